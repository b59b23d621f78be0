//! Fixed-order catalog loading.
//!
//! Load order matters: shifts first, then team capacities and calendars,
//! then the task catalog, product lines and expansion, then inspections,
//! late parts, rework and holidays, ending with the quality-team fix-up.

use crate::expand;
use crate::sections::{split_sections, Table};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::Path;
use taktplan_core::{
    parse_clock, BaselineEdge, BaselineTaskDef, Catalog, LoadError, ProductLine, Relationship,
    Shift, ShiftId,
};
use tracing::{debug, info, warn};

const SHIFT_HOURS: &str = "SHIFT WORKING HOURS";
const MECHANIC_CAPACITY: &str = "MECHANIC TEAM CAPACITY";
const QUALITY_CAPACITY: &str = "QUALITY TEAM CAPACITY";
const CUSTOMER_CAPACITY: &str = "CUSTOMER TEAM CAPACITY";
const MECHANIC_CALENDARS: &str = "MECHANIC TEAM WORKING CALENDARS";
const QUALITY_CALENDARS: &str = "QUALITY TEAM WORKING CALENDARS";
const CUSTOMER_CALENDARS: &str = "CUSTOMER TEAM WORKING CALENDARS";
const TASK_RELATIONSHIPS: &str = "TASK RELATIONSHIPS TABLE";
const TASK_DURATIONS: &str = "TASK DURATION AND RESOURCE TABLE";
const DELIVERY_SCHEDULE: &str = "PRODUCT LINE DELIVERY SCHEDULE";
const PRODUCT_JOBS: &str = "PRODUCT LINE JOBS";
const QUALITY_INSPECTIONS: &str = "QUALITY INSPECTION REQUIREMENTS";
const CUSTOMER_INSPECTIONS: &str = "CUSTOMER INSPECTION REQUIREMENTS";
const LATE_PART_RELATIONSHIPS: &str = "LATE PARTS RELATIONSHIPS TABLE";
const LATE_PART_DETAILS: &str = "LATE PARTS TASK DETAILS";
const REWORK_RELATIONSHIPS: &str = "REWORK RELATIONSHIPS TABLE";
const REWORK_DETAILS: &str = "REWORK TASK DETAILS";
const HOLIDAY_CALENDAR: &str = "PRODUCT LINE HOLIDAY CALENDAR";

/// Default scheduling epoch when the caller does not supply one
pub fn default_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 22)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap()
}

/// Read and parse a catalog document from disk. UTF-8 with BOM tolerance;
/// falls back to latin-1 when the bytes are not valid UTF-8.
pub fn load_catalog(path: &Path) -> Result<Catalog, LoadError> {
    let bytes = std::fs::read(path)?;
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!("catalog is not valid UTF-8, decoding as latin-1");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };
    parse_catalog(&content)
}

/// Parse a catalog document with the default epoch
pub fn parse_catalog(content: &str) -> Result<Catalog, LoadError> {
    parse_catalog_with_epoch(content, default_epoch())
}

/// Parse a catalog document, anchoring the working calendar at `epoch`
pub fn parse_catalog_with_epoch(
    content: &str,
    epoch: NaiveDateTime,
) -> Result<Catalog, LoadError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let sections = split_sections(content);
    debug!(count = sections.len(), "found sections in catalog document");

    let mut catalog = Catalog::new(epoch);

    load_shifts(&mut catalog, sections.get(SHIFT_HOURS));
    load_mechanic_teams(
        &mut catalog,
        sections.get(MECHANIC_CAPACITY),
        sections.get(MECHANIC_CALENDARS),
    );
    load_team_capacities(
        sections.get(QUALITY_CAPACITY),
        &mut catalog.quality_capacity,
        false,
    );
    load_team_shifts(sections.get(QUALITY_CALENDARS), &mut catalog.quality_shifts);
    load_team_capacities(
        sections.get(CUSTOMER_CAPACITY),
        &mut catalog.customer_capacity,
        true,
    );
    load_team_shifts(sections.get(CUSTOMER_CALENDARS), &mut catalog.customer_shifts);
    inherit_quality_shifts(&mut catalog);

    load_task_definitions(
        &mut catalog,
        sections.get(TASK_RELATIONSHIPS),
        sections.get(TASK_DURATIONS),
    );
    load_deliveries(&mut catalog, sections.get(DELIVERY_SCHEDULE));
    load_jobs(&mut catalog, sections.get(PRODUCT_JOBS));

    if let Some(table) = sections.get(QUALITY_INSPECTIONS) {
        expand::attach_quality_inspections(&mut catalog, table);
    }
    if let Some(table) = sections.get(CUSTOMER_INSPECTIONS) {
        expand::attach_customer_inspections(&mut catalog, table);
    }

    load_side_edges(&mut catalog, sections.get(LATE_PART_RELATIONSHIPS), true);
    load_side_edges(&mut catalog, sections.get(REWORK_RELATIONSHIPS), false);
    if let Some(table) = sections.get(LATE_PART_DETAILS) {
        expand::load_late_parts(&mut catalog, table);
    }
    if let Some(table) = sections.get(REWORK_DETAILS) {
        expand::load_rework(&mut catalog, table);
    }

    load_holidays(&mut catalog, sections.get(HOLIDAY_CALENDAR));
    expand::fix_quality_assignments(&mut catalog);

    // The load succeeds only if the core tables came through
    if catalog.baseline.is_empty() {
        return Err(LoadError::EmptyTable("tasks"));
    }
    if catalog.mechanic_capacity.is_empty() {
        return Err(LoadError::EmptyTable("teams"));
    }
    if catalog.products.is_empty() {
        return Err(LoadError::EmptyTable("deliveries"));
    }
    if catalog.instance_index.is_empty() {
        return Err(LoadError::EmptyTable("jobs"));
    }

    for product in catalog.products.values() {
        if product.delivery <= catalog.epoch {
            warn!(product = %product.id, "delivery date is not after the scheduling epoch");
        }
    }

    catalog.original_mechanic_capacity = catalog.mechanic_capacity.clone();
    catalog.original_quality_capacity = catalog.quality_capacity.clone();
    catalog.original_customer_capacity = catalog.customer_capacity.clone();
    catalog.bump_version();

    info!(
        instances = catalog.instances.len(),
        products = catalog.products.len(),
        constraints = catalog.baseline_edges.len()
            + catalog.late_part_edges.len()
            + catalog.rework_edges.len(),
        "catalog loaded"
    );
    Ok(catalog)
}

fn load_shifts(catalog: &mut Catalog, table: Option<&Table>) {
    if let Some(table) = table {
        for (idx, row) in table.rows.iter().enumerate() {
            let parsed = (|| -> Result<Shift, LoadError> {
                let name = table.require(idx + 1, row, "Shift")?;
                let id = ShiftId::parse(name).ok_or_else(|| LoadError::Parse {
                    section: table.name.clone(),
                    row: idx + 1,
                    field: "Shift".to_string(),
                })?;
                let start = parse_clock(table.require(idx + 1, row, "Start")?)?;
                let end = parse_clock(table.require(idx + 1, row, "End")?)?;
                Ok(Shift { id, start, end })
            })();
            match parsed {
                Ok(shift) => {
                    catalog.shifts.insert(shift.id, shift);
                }
                Err(err) => warn!(%err, "skipping shift row"),
            }
        }
    }

    if catalog.shifts.is_empty() {
        warn!("no shift working hours found, using plant defaults");
        for (id, start, end) in [
            (ShiftId::First, "6:00", "14:30"),
            (ShiftId::Second, "14:30", "23:00"),
            (ShiftId::Third, "23:00", "6:30"),
        ] {
            let shift = Shift {
                id,
                start: parse_clock(start).expect("default clock"),
                end: parse_clock(end).expect("default clock"),
            };
            catalog.shifts.insert(id, shift);
        }
    }
    debug!(count = catalog.shifts.len(), "loaded shift working hours");
}

/// Load a capacity table. Mechanic and customer capacities aggregate
/// skill-partition rows into an additional base-team row.
fn load_team_capacities(
    table: Option<&Table>,
    capacities: &mut BTreeMap<String, u32>,
    aggregate_base: bool,
) {
    let Some(table) = table else { return };
    let mut base_totals: BTreeMap<String, u32> = BTreeMap::new();

    for (idx, row) in table.rows.iter().enumerate() {
        // Capacity tables title their first column by team type
        // ("Mechanic Team", "Quality Team", ...), so fall back to position
        let team = match table
            .field(row, "Team")
            .or_else(|| row.first().map(String::as_str).filter(|t| !t.is_empty()))
        {
            Some(team) => team.to_string(),
            None => {
                warn!(section = %table.name, row = idx + 1, "skipping capacity row");
                continue;
            }
        };
        let capacity: u32 = match table
            .field(row, "Capacity")
            .or_else(|| row.get(1).map(String::as_str))
            .and_then(|c| c.parse().ok())
        {
            Some(capacity) => capacity,
            None => {
                warn!(section = %table.name, row = idx + 1, "skipping capacity row without a numeric capacity");
                continue;
            }
        };
        let base = team.split(" (").next().unwrap_or(&team).to_string();
        *base_totals.entry(base).or_insert(0) += capacity;
        capacities.insert(team, capacity);
    }

    if aggregate_base {
        for (base, total) in base_totals {
            capacities.entry(base).or_insert(total);
        }
    }
}

fn load_team_shifts(table: Option<&Table>, shifts: &mut BTreeMap<String, Vec<ShiftId>>) {
    let Some(table) = table else { return };
    for (idx, row) in table.rows.iter().enumerate() {
        let (Some(team), Some(shift_name)) = (row.first(), row.get(1)) else {
            continue;
        };
        match ShiftId::parse(shift_name) {
            Some(shift) => {
                shifts.entry(team.clone()).or_default().push(shift);
            }
            None => warn!(section = %table.name, row = idx + 1, shift = %shift_name, "unknown shift"),
        }
    }
}

fn load_mechanic_teams(
    catalog: &mut Catalog,
    capacity: Option<&Table>,
    calendars: Option<&Table>,
) {
    load_team_capacities(capacity, &mut catalog.mechanic_capacity, true);
    load_team_shifts(calendars, &mut catalog.mechanic_shifts);
    debug!(
        teams = catalog.mechanic_capacity.len(),
        "loaded mechanic team capacity (including aggregated base teams)"
    );
}

/// Quality teams without a calendar row inherit the matching mechanic team's
/// shifts, else fall back to defaults by team-number parity.
fn inherit_quality_shifts(catalog: &mut Catalog) {
    let teams: Vec<String> = catalog.quality_capacity.keys().cloned().collect();
    for team in teams {
        if catalog.quality_shifts.get(&team).is_some_and(|s| !s.is_empty()) {
            continue;
        }
        let number: Option<u32> = team
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok();

        let inherited = number.and_then(|n| {
            catalog
                .mechanic_shifts
                .get(&format!("Mechanic Team {n}"))
                .cloned()
        });
        let shifts = match inherited {
            Some(shifts) => {
                debug!(team = %team, "quality team inheriting mechanic shifts");
                shifts
            }
            None => match number {
                Some(n) if matches!(n, 1 | 4 | 7 | 10) => vec![ShiftId::First],
                Some(n) if matches!(n, 2 | 5 | 8) => vec![ShiftId::Second],
                Some(_) => vec![ShiftId::Third],
                None => vec![ShiftId::First],
            },
        };
        catalog.quality_shifts.insert(team, shifts);
    }
}

fn load_task_definitions(
    catalog: &mut Catalog,
    relationships: Option<&Table>,
    durations: Option<&Table>,
) {
    if let Some(table) = relationships {
        for (idx, row) in table.rows.iter().enumerate() {
            let parsed = (|| -> Result<BaselineEdge, LoadError> {
                let first = expand::parse_u32(table, idx + 1, row, "First")?;
                let second = expand::parse_u32(table, idx + 1, row, "Second")?;
                let relationship = table
                    .field(row, "Relationship Type")
                    .or_else(|| table.field(row, "Relationship"))
                    .map(Relationship::normalize)
                    .unwrap_or_default();
                Ok(BaselineEdge {
                    first,
                    second,
                    relationship,
                })
            })();
            match parsed {
                Ok(edge) => catalog.baseline_edges.push(edge),
                Err(err) => warn!(%err, "skipping task relationship row"),
            }
        }
        debug!(count = catalog.baseline_edges.len(), "loaded baseline task relationships");
    }

    if let Some(table) = durations {
        let mut loaded = 0;
        for (idx, row) in table.rows.iter().enumerate() {
            let parsed = (|| -> Result<BaselineTaskDef, LoadError> {
                let id = expand::parse_u32(table, idx + 1, row, "Task")?;
                let duration = expand::parse_u32(table, idx + 1, row, "Duration (minutes)")?;
                let team = table.require(idx + 1, row, "Resource Type")?.to_string();
                let headcount = expand::parse_u32(table, idx + 1, row, "Mechanics Required")?;
                let skill = table.field(row, "Skill Code").map(str::to_string);
                Ok(BaselineTaskDef {
                    id,
                    duration_minutes: duration,
                    team,
                    skill,
                    headcount,
                    dependencies: Vec::new(),
                })
            })();
            match parsed {
                Ok(def) => {
                    catalog.baseline.insert(def.id, def);
                    loaded += 1;
                }
                Err(err) => warn!(%err, "skipping incomplete task row"),
            }
        }
        debug!(count = loaded, "loaded baseline task definitions");
    }

    // Mirror the relationships onto per-task dependency lists
    let edges: Vec<(u32, u32)> = catalog
        .baseline_edges
        .iter()
        .map(|e| (e.first, e.second))
        .collect();
    let mut applied = 0;
    for (first, second) in edges {
        if catalog.baseline.contains_key(&first) {
            if let Some(def) = catalog.baseline.get_mut(&second) {
                def.dependencies.push(first);
                applied += 1;
            }
        }
    }
    debug!(count = applied, "applied dependency relationships to baseline tasks");
}

fn load_deliveries(catalog: &mut Catalog, table: Option<&Table>) {
    let Some(table) = table else { return };
    for (idx, row) in table.rows.iter().enumerate() {
        let parsed = (|| -> Result<(String, NaiveDateTime), LoadError> {
            let product = table.require(idx + 1, row, "Product Line")?.to_string();
            let raw = table.require(idx + 1, row, "Delivery Date")?;
            let delivery = expand::parse_timestamp(raw).ok_or_else(|| LoadError::Parse {
                section: table.name.clone(),
                row: idx + 1,
                field: "Delivery Date".to_string(),
            })?;
            Ok((product, delivery))
        })();
        match parsed {
            Ok((product, delivery)) => {
                catalog.products.insert(
                    product.clone(),
                    ProductLine {
                        id: product,
                        delivery,
                        task_range: (0, 0),
                    },
                );
            }
            Err(err) => warn!(%err, "skipping delivery row"),
        }
    }
    debug!(count = catalog.products.len(), "loaded product delivery dates");
}

fn load_jobs(catalog: &mut Catalog, table: Option<&Table>) {
    let Some(table) = table else { return };
    let mut total = 0;
    for (idx, row) in table.rows.iter().enumerate() {
        let parsed = (|| -> Result<(String, u32, u32), LoadError> {
            let product = table.require(idx + 1, row, "Product Line")?.to_string();
            let start = expand::parse_u32(table, idx + 1, row, "Task Start")?;
            let end = expand::parse_u32(table, idx + 1, row, "Task End")?;
            Ok((product, start, end))
        })();
        let (product, start, end) = match parsed {
            Ok(fields) => fields,
            Err(err) => {
                warn!(%err, "skipping product job row");
                continue;
            }
        };

        let Some(line) = catalog.products.get_mut(&product) else {
            warn!(product = %product, "job row references a product without a delivery date");
            continue;
        };
        line.task_range = (start, end);
        let created = expand::expand_production(catalog, &product, start, end);
        debug!(product = %product, created, start, end, "created baseline task instances");
        total += created;
    }
    debug!(total, "total baseline task instances created");
}

fn load_side_edges(catalog: &mut Catalog, table: Option<&Table>, with_on_dock: bool) {
    let Some(table) = table else { return };
    let mut count = 0;
    for (idx, row) in table.rows.iter().enumerate() {
        match expand::read_side_edge(table, idx + 1, row, with_on_dock) {
            Ok(edge) => {
                if let Some(on_dock) = edge.on_dock {
                    catalog.on_dock.insert(edge.first.clone(), on_dock);
                }
                if with_on_dock {
                    catalog.late_part_edges.push(edge);
                } else {
                    catalog.rework_edges.push(edge);
                }
                count += 1;
            }
            Err(err) => warn!(%err, "skipping relationship row"),
        }
    }
    debug!(count, on_dock = with_on_dock, "loaded side relationships");
}

fn load_holidays(catalog: &mut Catalog, table: Option<&Table>) {
    let Some(table) = table else { return };
    let mut count = 0;
    for (idx, row) in table.rows.iter().enumerate() {
        let parsed = (|| -> Result<(String, NaiveDate), LoadError> {
            let product = table.require(idx + 1, row, "Product Line")?.to_string();
            let raw = table.require(idx + 1, row, "Date")?;
            let date = expand::parse_timestamp(raw)
                .map(|dt| dt.date())
                .ok_or_else(|| LoadError::Parse {
                    section: table.name.clone(),
                    row: idx + 1,
                    field: "Date".to_string(),
                })?;
            Ok((product, date))
        })();
        match parsed {
            Ok((product, date)) => {
                catalog.holidays.entry(product).or_default().insert(date);
                count += 1;
            }
            Err(err) => warn!(%err, "skipping holiday row"),
        }
    }
    debug!(count, "loaded holiday entries");
}
