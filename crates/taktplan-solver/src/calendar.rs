//! Working calendar projection.
//!
//! The optimizer reasons over a dense working-minute index: each working day
//! contributes [`MINUTES_PER_DAY`] consecutive minutes starting at the 06:00
//! opening, and weekends/holidays simply do not exist in the index. Exact
//! wall-clock constraints (on-dock dates, deliveries) are projected into the
//! index on entry and back out on extraction.

use chrono::{Days, NaiveDate, NaiveDateTime, TimeDelta};
use std::collections::BTreeMap;
use taktplan_core::{day_opening, Catalog, ScheduleError, MINUTES_PER_DAY};
use tracing::debug;

/// Hard cap on the indexed range, in calendar days from the epoch
const HORIZON_CAP_DAYS: u64 = 5 * 365;

/// Dense working-minute index anchored at the catalog epoch.
///
/// Built against the calendar of one reference product line (the first, by
/// id); product-specific holidays are still honored exactly by the heuristic
/// path and the makespan metric.
#[derive(Debug, Clone)]
pub struct WorkingCalendar {
    epoch: NaiveDateTime,
    /// Wall-clock opening of each indexed working day
    day_openings: Vec<NaiveDateTime>,
    /// Working-minute offset of each indexed date
    day_offsets: BTreeMap<NaiveDate, i64>,
    /// Variable-domain horizon in working minutes
    horizon: i64,
}

impl WorkingCalendar {
    /// Index working days forward from the epoch and size the horizon as
    /// `sum(durations) + 2 * MINUTES_PER_DAY * instances`, bounded by the
    /// hard cap. Exceeding the cap makes the scenario infeasible.
    pub fn build(catalog: &Catalog) -> Result<Self, ScheduleError> {
        let reference = catalog.products.keys().next().map(String::as_str);

        let mut day_openings = Vec::new();
        let mut day_offsets = BTreeMap::new();
        let mut cumulative = 0i64;

        for offset in 0..HORIZON_CAP_DAYS {
            let date = catalog
                .epoch
                .date()
                .checked_add_days(Days::new(offset))
                .ok_or(ScheduleError::HorizonExceeded)?;
            if !catalog.is_working_day(date, reference) {
                continue;
            }
            day_offsets.insert(date, cumulative);
            day_openings.push(date.and_time(day_opening()));
            cumulative += MINUTES_PER_DAY;
        }

        let work_minutes: i64 = catalog
            .instances
            .values()
            .map(|i| i64::from(i.duration_minutes))
            .sum();
        let horizon = work_minutes + 2 * MINUTES_PER_DAY * catalog.instances.len() as i64;
        if horizon > cumulative {
            return Err(ScheduleError::HorizonExceeded);
        }

        debug!(
            horizon,
            indexed_days = day_openings.len(),
            "built working-minute calendar"
        );
        Ok(Self {
            epoch: catalog.epoch,
            day_openings,
            day_offsets,
            horizon,
        })
    }

    pub fn epoch(&self) -> NaiveDateTime {
        self.epoch
    }

    pub fn horizon_minutes(&self) -> i64 {
        self.horizon
    }

    /// Earliest working-minute index at or after the given wall-clock time.
    /// Non-working days round forward to the next working-day opening.
    pub fn date_to_minutes(&self, at: NaiveDateTime) -> Result<i64, ScheduleError> {
        let mut date = at.date();
        let mut steps = 0u32;
        loop {
            if let Some(&offset) = self.day_offsets.get(&date) {
                if date > at.date() {
                    return Ok(offset);
                }
                let opening = date.and_time(day_opening());
                let minute_of_day = (at - opening).num_minutes();
                if minute_of_day <= 0 {
                    return Ok(offset);
                }
                if minute_of_day < MINUTES_PER_DAY {
                    return Ok(offset + minute_of_day);
                }
                // Past this day's window: fall through to the next working day
            }
            date = date
                .checked_add_days(Days::new(1))
                .ok_or(ScheduleError::HorizonExceeded)?;
            steps += 1;
            if steps > 366 {
                return Err(ScheduleError::HorizonExceeded);
            }
        }
    }

    /// Inverse of [`date_to_minutes`] on the indexed range
    pub fn minutes_to_datetime(&self, minutes: i64) -> NaiveDateTime {
        let minutes = minutes.max(0);
        let day = (minutes / MINUTES_PER_DAY) as usize;
        let within = minutes % MINUTES_PER_DAY;
        match self.day_openings.get(day) {
            Some(opening) => *opening + TimeDelta::minutes(within),
            // Clamped: callers stay inside the horizon
            None => match self.day_openings.last() {
                Some(last) => *last + TimeDelta::minutes(within),
                None => self.epoch,
            },
        }
    }

    /// Like [`minutes_to_datetime`], but an index landing exactly on a day
    /// boundary maps to the *closing* clock of the previous working day, so
    /// interval ends render on the day the work happened.
    pub fn minutes_to_datetime_end(&self, minutes: i64) -> NaiveDateTime {
        if minutes > 0 && minutes % MINUTES_PER_DAY == 0 {
            let day = (minutes / MINUTES_PER_DAY - 1) as usize;
            if let Some(opening) = self.day_openings.get(day) {
                return *opening + TimeDelta::minutes(MINUTES_PER_DAY);
            }
        }
        self.minutes_to_datetime(minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use taktplan_core::{ProductLine, ResourceKey, ResourceKind, TaskInstance, TaskKind};

    fn epoch() -> NaiveDateTime {
        // 2025-08-22 is a Friday
        NaiveDate::from_ymd_opt(2025, 8, 22)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    fn catalog_with_one_task() -> Catalog {
        let mut catalog = Catalog::new(epoch());
        catalog.products.insert(
            "Product A".into(),
            ProductLine {
                id: "Product A".into(),
                delivery: epoch() + TimeDelta::days(30),
                task_range: (1, 1),
            },
        );
        catalog.instances.insert(
            "Product A_1".into(),
            TaskInstance {
                id: "Product A_1".into(),
                kind: TaskKind::Production,
                product: Some("Product A".into()),
                duration_minutes: 60,
                headcount: 1,
                resource: ResourceKey::mechanic("Mechanic Team 1", Some("Skill 1")),
                resource_kind: ResourceKind::Mechanic,
                primary: None,
                on_dock: None,
                original: "1".into(),
            },
        );
        catalog
    }

    #[test]
    fn epoch_is_minute_zero() {
        let calendar = WorkingCalendar::build(&catalog_with_one_task()).unwrap();
        assert_eq!(calendar.date_to_minutes(epoch()).unwrap(), 0);
        assert_eq!(calendar.minutes_to_datetime(0), epoch());
    }

    #[test]
    fn weekend_rounds_to_monday_opening() {
        let calendar = WorkingCalendar::build(&catalog_with_one_task()).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2025, 8, 23)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        // Friday is day 0, so Monday opens at minute 480
        assert_eq!(calendar.date_to_minutes(saturday).unwrap(), MINUTES_PER_DAY);
        assert_eq!(
            calendar.minutes_to_datetime(MINUTES_PER_DAY),
            NaiveDate::from_ymd_opt(2025, 8, 25)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn intra_day_minutes_are_exact() {
        let calendar = WorkingCalendar::build(&catalog_with_one_task()).unwrap();
        let at = epoch() + TimeDelta::minutes(95);
        assert_eq!(calendar.date_to_minutes(at).unwrap(), 95);
    }

    #[test]
    fn roundtrip_holds_across_the_horizon() {
        let calendar = WorkingCalendar::build(&catalog_with_one_task()).unwrap();
        for minutes in [0, 1, 95, 479, 480, 481, 1200, calendar.horizon_minutes() - 1] {
            let wall = calendar.minutes_to_datetime(minutes);
            assert_eq!(calendar.date_to_minutes(wall).unwrap(), minutes, "minute {minutes}");
        }
    }

    #[test]
    fn after_close_rounds_to_next_opening() {
        let calendar = WorkingCalendar::build(&catalog_with_one_task()).unwrap();
        // 18:00 Friday is past the 480-minute window; next index is Monday
        let late = NaiveDate::from_ymd_opt(2025, 8, 22)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap();
        assert_eq!(calendar.date_to_minutes(late).unwrap(), MINUTES_PER_DAY);
    }

    #[test]
    fn holidays_of_the_reference_product_are_excised() {
        let mut catalog = catalog_with_one_task();
        // Monday 2025-08-25 off for the reference product
        catalog
            .holidays
            .entry("Product A".into())
            .or_default()
            .insert(NaiveDate::from_ymd_opt(2025, 8, 25).unwrap());
        let calendar = WorkingCalendar::build(&catalog).unwrap();
        assert_eq!(
            calendar.minutes_to_datetime(MINUTES_PER_DAY).date(),
            NaiveDate::from_ymd_opt(2025, 8, 26).unwrap()
        );
    }

    #[test]
    fn boundary_end_maps_to_closing_clock() {
        let calendar = WorkingCalendar::build(&catalog_with_one_task()).unwrap();
        // Minute 480 as an interval end is Friday 14:00, not Monday 06:00
        assert_eq!(
            calendar.minutes_to_datetime_end(MINUTES_PER_DAY),
            NaiveDate::from_ymd_opt(2025, 8, 22)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap()
        );
    }
}
