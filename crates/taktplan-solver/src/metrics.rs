//! Schedule metrics: makespan, per-product lateness, slack and utilization.

use crate::weaver::DependencyGraph;
use chrono::{Days, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use taktplan_core::{
    logical_instance_id, Catalog, InstanceId, ProductLateness, ScheduleEntry, MAKESPAN_SENTINEL,
    MINUTES_PER_DAY,
};

/// Slack beyond a year reads as unbounded
const SLACK_CAP_HOURS: f64 = 365.0 * 24.0;

/// First start and last end of an instance in the schedule, spanning split
/// parts when present.
pub fn entry_bounds(
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    id: &str,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    if let Some(entry) = entries.get(id) {
        return Some((entry.start, entry.end));
    }
    let mut bounds: Option<(NaiveDateTime, NaiveDateTime)> = None;
    for (key, entry) in entries {
        if logical_instance_id(key) != id {
            continue;
        }
        bounds = Some(match bounds {
            None => (entry.start, entry.end),
            Some((start, end)) => (start.min(entry.start), end.max(entry.end)),
        });
    }
    bounds
}

/// Makespan in working days between the earliest start and the latest end.
/// Returns the large sentinel when any instance is unscheduled; a day counts
/// as working when it works for at least one product.
pub fn makespan_working_days(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
) -> u32 {
    if entries.is_empty() {
        return 0;
    }

    let scheduled: BTreeSet<&str> = entries.keys().map(|k| logical_instance_id(k)).collect();
    if scheduled.len() < catalog.instances.len() {
        return MAKESPAN_SENTINEL;
    }

    let start = entries.values().map(|e| e.start).min().expect("non-empty");
    let end = entries.values().map(|e| e.end).max().expect("non-empty");

    let mut current = start.date();
    let end_date = end.date();
    let mut working_days = 0u32;
    while current <= end_date {
        let works_somewhere = if catalog.products.is_empty() {
            catalog.is_working_day(current, None)
        } else {
            catalog
                .products
                .keys()
                .any(|p| catalog.is_working_day(current, Some(p)))
        };
        if works_somewhere {
            working_days += 1;
        }
        current = match current.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    working_days
}

/// Per-product delivery outcome. A product with no scheduled work reports
/// the sentinel lateness and is never on time.
pub fn product_lateness(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
) -> BTreeMap<String, ProductLateness> {
    let mut completions: BTreeMap<&str, (NaiveDateTime, usize)> = BTreeMap::new();
    for entry in entries.values() {
        let Some(product) = entry.product.as_deref() else {
            continue;
        };
        let slot = completions.entry(product).or_insert((entry.end, 0));
        slot.0 = slot.0.max(entry.end);
        slot.1 += 1;
    }

    let mut lateness = BTreeMap::new();
    for (product, line) in &catalog.products {
        let outcome = match completions.get(product.as_str()) {
            Some(&(completion, task_count)) => {
                let lateness_days = (completion - line.delivery).num_days();
                ProductLateness {
                    delivery: line.delivery,
                    completion: Some(completion),
                    lateness_days,
                    on_time: lateness_days <= 0,
                    task_count,
                }
            }
            None => ProductLateness {
                delivery: line.delivery,
                completion: None,
                lateness_days: i64::from(MAKESPAN_SENTINEL),
                on_time: false,
                task_count: 0,
            },
        };
        lateness.insert(product.clone(), outcome);
    }
    lateness
}

/// Slack in hours for one instance: the tightest gap to a successor's start,
/// or the distance to the delivery date for terminal tasks. `None` means
/// unbounded.
pub fn slack_hours(
    catalog: &Catalog,
    graph: &DependencyGraph,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    instance_id: &str,
) -> Option<f64> {
    let logical = logical_instance_id(instance_id);
    let (start, _) = entry_bounds(entries, logical)?;

    let delivery = catalog
        .instance(logical)
        .and_then(|i| i.product.as_ref())
        .and_then(|p| catalog.products.get(p))
        .map(|line| line.delivery);

    let successor_ids: Vec<&str> = graph
        .successors_of(logical)
        .map(|edge| edge.second.as_str())
        .collect();

    if successor_ids.is_empty() {
        let delivery = delivery?;
        let slack = (delivery - start).num_minutes() as f64 / 60.0;
        return if slack > SLACK_CAP_HOURS {
            None
        } else {
            Some(slack.max(0.0))
        };
    }

    let duration_hours = catalog
        .instance(logical)
        .map(|i| f64::from(i.duration_minutes) / 60.0)
        .unwrap_or(0.0);

    let mut latest_start: Option<NaiveDateTime> = None;
    for successor in successor_ids {
        let Some((succ_start, _)) = entry_bounds(entries, successor) else {
            continue;
        };
        let required = succ_start - chrono::TimeDelta::minutes((duration_hours * 60.0) as i64);
        latest_start = Some(match latest_start {
            None => required,
            Some(current) => current.min(required),
        });
    }

    let latest_start = match latest_start {
        Some(latest) => latest,
        None => delivery?,
    };

    let slack = (latest_start - start).num_minutes() as f64 / 60.0;
    if slack.abs() > SLACK_CAP_HOURS {
        None
    } else {
        Some(slack.max(0.0))
    }
}

/// Percent utilization per resource label over the makespan, clamped to 100.
pub fn utilization(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    makespan_days: u32,
) -> BTreeMap<String, f64> {
    let mut utilizations = BTreeMap::new();
    if makespan_days == 0 || makespan_days >= MAKESPAN_SENTINEL {
        return utilizations;
    }

    let mut work_minutes: BTreeMap<String, f64> = BTreeMap::new();
    for entry in entries.values() {
        *work_minutes.entry(entry.resource.label()).or_insert(0.0) +=
            f64::from(entry.duration_minutes) * f64::from(entry.headcount);
    }

    let capacity_tables = [
        &catalog.mechanic_capacity,
        &catalog.quality_capacity,
        &catalog.customer_capacity,
    ];
    for table in capacity_tables {
        for (label, &capacity) in table {
            if capacity == 0 {
                continue;
            }
            let available =
                f64::from(capacity) * f64::from(makespan_days) * MINUTES_PER_DAY as f64;
            let used = work_minutes.get(label).copied().unwrap_or(0.0);
            let percent = (used / available * 100.0).min(100.0);
            utilizations.insert(label.clone(), percent);
        }
    }
    utilizations
}
