//! Instance expansion: materialize per-product task instances from the
//! catalog tables and attach inspection sidecars.
//!
//! Late-part and rework tasks have no natural product; they inherit team,
//! skill and product from the baseline instance reached by tracing forward
//! through the union of late-part and rework constraints.

use crate::sections::Table;
use chrono::NaiveDateTime;
use std::collections::VecDeque;
use taktplan_core::{
    Catalog, InstanceId, LoadError, ProductId, ResourceKey, ResourceKind, SideEdge, TaskInstance,
    TaskKind,
};
use tracing::{debug, warn};

/// Baseline instance id grammar: `<product>_<catalogId>`
pub fn baseline_instance_id(product: &str, catalog_id: u32) -> InstanceId {
    format!("{product}_{catalog_id}")
}

/// First contiguous digit run in a team name
fn team_number(name: &str) -> Option<&str> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let rest = &name[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Map a mechanic team to its quality team by team number (1:1 mapping).
/// Returns `None` when no matching quality team exists in the capacity table.
pub fn quality_team_for(catalog: &Catalog, mechanic_team: &str) -> Option<String> {
    let number = team_number(mechanic_team)?;
    let quality_team = format!("Quality Team {number}");
    if catalog.quality_capacity.contains_key(&quality_team) {
        Some(quality_team)
    } else {
        warn!(team = mechanic_team, "could not map mechanic team to a quality team");
        None
    }
}

/// First skill partition present in the mechanic capacity table for a base team
fn first_skill_for(catalog: &Catalog, base_team: &str) -> Option<String> {
    let prefix = format!("{base_team} (");
    catalog
        .mechanic_capacity
        .keys()
        .find(|label| label.starts_with(&prefix))
        .map(|label| ResourceKey::from_label(label).skill.unwrap_or_default())
}

/// Materialize Production instances for one product's `[start, end]` range
pub fn expand_production(catalog: &mut Catalog, product: &ProductId, start: u32, end: u32) -> usize {
    let mut created = 0;
    for catalog_id in start..=end {
        let Some(def) = catalog.baseline.get(&catalog_id) else {
            continue;
        };
        let id = baseline_instance_id(product, catalog_id);
        let instance = TaskInstance {
            id: id.clone(),
            kind: TaskKind::Production,
            product: Some(product.clone()),
            duration_minutes: def.duration_minutes,
            headcount: def.headcount,
            resource: ResourceKey::mechanic(def.team.as_str(), def.skill.as_deref()),
            resource_kind: ResourceKind::Mechanic,
            primary: None,
            on_dock: None,
            original: catalog_id.to_string(),
        };
        catalog.instance_index.insert((product.clone(), catalog_id), id.clone());
        catalog.instances.insert(id, instance);
        created += 1;
    }
    created
}

/// Attach a quality inspection sidecar to every in-range primary of every
/// product. The QI's team is the quality team mapped from the primary's
/// mechanic team.
pub fn attach_quality_inspections(catalog: &mut Catalog, table: &Table) {
    let products: Vec<ProductId> = catalog.products.keys().cloned().collect();
    let mut created = 0;

    for (row_number, row) in table.rows.iter().enumerate() {
        let parsed = (|| -> Result<(u32, u32, u32, u32), LoadError> {
            let primary = parse_u32(table, row_number + 1, row, "Primary Task")?;
            let qi = parse_u32(table, row_number + 1, row, "Quality Task")?;
            let headcount = parse_u32(table, row_number + 1, row, "Quality Headcount Required")?;
            let duration = parse_u32(table, row_number + 1, row, "Quality Duration (minutes)")?;
            Ok((primary, qi, headcount, duration))
        })();
        let (primary_id, qi_id, headcount, duration) = match parsed {
            Ok(fields) => fields,
            Err(err) => {
                warn!(%err, "skipping quality inspection row");
                continue;
            }
        };

        for product in &products {
            let (start, end) = catalog.products[product].task_range;
            if !(start..=end).contains(&primary_id) {
                continue;
            }
            let Some(primary_instance) = catalog
                .instance_index
                .get(&(product.clone(), primary_id))
                .cloned()
            else {
                continue;
            };

            let mechanic_team = catalog.instances[&primary_instance].resource.team.clone();
            let quality_team = quality_team_for(catalog, &mechanic_team).unwrap_or_default();

            let instance_id = format!("{product}_QI_{qi_id}");
            catalog.instances.insert(
                instance_id.clone(),
                TaskInstance {
                    id: instance_id.clone(),
                    kind: TaskKind::QualityInspection,
                    product: Some(product.clone()),
                    duration_minutes: duration,
                    headcount,
                    resource: ResourceKey::team_only(quality_team),
                    resource_kind: ResourceKind::Quality,
                    primary: Some(primary_instance.clone()),
                    on_dock: None,
                    original: qi_id.to_string(),
                },
            );
            catalog.quality_for.insert(primary_instance, instance_id);
            created += 1;
        }
    }
    debug!(count = created, "created quality inspection instances");
}

/// Customer inspections expand symmetrically; their team starts as
/// `Customer Team 1` and may be reassigned by the solver.
pub fn attach_customer_inspections(catalog: &mut Catalog, table: &Table) {
    let products: Vec<ProductId> = catalog.products.keys().cloned().collect();
    let mut created = 0;

    for (row_number, row) in table.rows.iter().enumerate() {
        let parsed = (|| -> Result<(u32, String, u32, u32), LoadError> {
            let primary = parse_u32(table, row_number + 1, row, "Primary Task")?;
            let cc = table
                .require(row_number + 1, row, "Customer Task")?
                .to_string();
            let headcount = parse_u32(table, row_number + 1, row, "Customer Headcount")?;
            let duration = parse_u32(table, row_number + 1, row, "Customer Duration")?;
            Ok((primary, cc, headcount, duration))
        })();
        let (primary_id, cc_task, headcount, duration) = match parsed {
            Ok(fields) => fields,
            Err(err) => {
                warn!(%err, "skipping customer inspection row");
                continue;
            }
        };

        for product in &products {
            let (start, end) = catalog.products[product].task_range;
            if !(start..=end).contains(&primary_id) {
                continue;
            }
            let Some(primary_instance) = catalog
                .instance_index
                .get(&(product.clone(), primary_id))
                .cloned()
            else {
                continue;
            };

            let instance_id = format!("{product}_{cc_task}");
            catalog.instances.insert(
                instance_id.clone(),
                TaskInstance {
                    id: instance_id.clone(),
                    kind: TaskKind::CustomerInspection,
                    product: Some(product.clone()),
                    duration_minutes: duration,
                    headcount,
                    resource: ResourceKey::team_only("Customer Team 1"),
                    resource_kind: ResourceKind::Customer,
                    primary: Some(primary_instance.clone()),
                    on_dock: None,
                    original: cc_task.clone(),
                },
            );
            catalog.customer_for.insert(primary_instance, instance_id);
            created += 1;
        }
    }
    debug!(count = created, "created customer inspection instances");
}

/// Trace forward, breadth-first, through the union of late-part and rework
/// constraints until a baseline instance is reached.
pub fn trace_baseline(
    catalog: &Catalog,
    task_id: &str,
    product_hint: Option<&str>,
) -> Option<InstanceId> {
    let mut visited: Vec<String> = Vec::new();
    let mut queue: VecDeque<(String, Option<String>)> =
        VecDeque::from([(task_id.to_string(), product_hint.map(str::to_string))]);

    while let Some((current, product)) = queue.pop_front() {
        if visited.contains(&current) {
            continue;
        }
        visited.push(current.clone());

        if let Ok(catalog_id) = current.parse::<u32>() {
            if let Some(product) = &product {
                if let Some(id) = catalog.instance_index.get(&(product.clone(), catalog_id)) {
                    return Some(id.clone());
                }
            } else {
                for candidate in catalog.products.keys() {
                    if let Some(id) = catalog.instance_index.get(&(candidate.clone(), catalog_id)) {
                        return Some(id.clone());
                    }
                }
            }
        }

        for edge in catalog.late_part_edges.iter().chain(&catalog.rework_edges) {
            if edge.first == current {
                let next_product = edge.product.clone().or_else(|| product.clone());
                queue.push_back((edge.second.clone(), next_product));
            }
        }
    }
    None
}

struct SideTaskRow {
    task_id: String,
    duration: u32,
    resource_type: String,
    headcount: u32,
}

fn read_side_task(table: &Table, row_number: usize, row: &[String]) -> Result<SideTaskRow, LoadError> {
    Ok(SideTaskRow {
        task_id: table.require(row_number, row, "Task")?.to_string(),
        duration: parse_u32(table, row_number, row, "Duration (minutes)")?,
        resource_type: table.require(row_number, row, "Resource Type")?.to_string(),
        headcount: parse_u32(table, row_number, row, "Mechanics Required")?,
    })
}

/// Resolve the resource key for a late-part or rework task: inherit from the
/// traced baseline instance, else fall back to the declared team plus the
/// first skill partition known for it.
fn resolve_side_resource(
    catalog: &Catalog,
    task_id: &str,
    declared_team: &str,
    product: Option<&str>,
) -> (ResourceKey, Option<ProductId>, bool) {
    if let Some(baseline_id) = trace_baseline(catalog, task_id, product) {
        let baseline = &catalog.instances[&baseline_id];
        debug!(task = task_id, from = %baseline_id, "inherited team/skill from baseline");
        return (baseline.resource.clone(), baseline.product.clone(), true);
    }

    let skill = first_skill_for(catalog, declared_team).or_else(|| Some("Skill 1".to_string()));
    let key = ResourceKey::mechanic(declared_team, skill.as_deref());
    warn!(task = task_id, resource = %key, "could not inherit team/skill, using declared team");
    (key, product.map(str::to_string), false)
}

/// Materialize late-part instances from their detail rows
pub fn load_late_parts(catalog: &mut Catalog, table: &Table) {
    let mut created = 0;
    let mut inherited = 0;

    for (idx, row) in table.rows.iter().enumerate() {
        let parsed = match read_side_task(table, idx + 1, row) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "skipping incomplete late part task row");
                continue;
            }
        };

        let product = catalog
            .late_part_edges
            .iter()
            .find(|edge| edge.first == parsed.task_id && edge.product.is_some())
            .and_then(|edge| edge.product.clone());

        let (resource, product, was_inherited) =
            resolve_side_resource(catalog, &parsed.task_id, &parsed.resource_type, product.as_deref());
        if was_inherited {
            inherited += 1;
        }

        let on_dock = catalog.on_dock.get(&parsed.task_id).copied();
        catalog.instances.insert(
            parsed.task_id.clone(),
            TaskInstance {
                id: parsed.task_id.clone(),
                kind: TaskKind::LatePart,
                product,
                duration_minutes: parsed.duration,
                headcount: parsed.headcount,
                resource,
                resource_kind: ResourceKind::Mechanic,
                primary: None,
                on_dock,
                original: parsed.task_id.clone(),
            },
        );
        created += 1;
    }
    debug!(count = created, inherited, "created late part task instances");
}

/// Materialize rework instances, attaching a QI sidecar unless the row
/// opts out (`Needs QI`).
pub fn load_rework(catalog: &mut Catalog, table: &Table) {
    let mut created = 0;
    let mut qi_created = 0;

    for (idx, row) in table.rows.iter().enumerate() {
        let parsed = match read_side_task(table, idx + 1, row) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "skipping incomplete rework task row");
                continue;
            }
        };

        let product = catalog
            .rework_edges
            .iter()
            .find(|edge| {
                (edge.first == parsed.task_id || edge.second == parsed.task_id)
                    && edge.product.is_some()
            })
            .and_then(|edge| edge.product.clone());

        let (resource, product, _) =
            resolve_side_resource(catalog, &parsed.task_id, &parsed.resource_type, product.as_deref());

        catalog.instances.insert(
            parsed.task_id.clone(),
            TaskInstance {
                id: parsed.task_id.clone(),
                kind: TaskKind::Rework,
                product: product.clone(),
                duration_minutes: parsed.duration,
                headcount: parsed.headcount,
                resource: resource.clone(),
                resource_kind: ResourceKind::Mechanic,
                primary: None,
                on_dock: None,
                original: parsed.task_id.clone(),
            },
        );
        created += 1;

        let needs_qi = table
            .field(row, "Needs QI")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "y" | "1" | "true"))
            .unwrap_or(true);
        if !needs_qi {
            continue;
        }

        let qi_duration = table
            .field(row, "QI Duration (minutes)")
            .or_else(|| table.field(row, "QI Duration"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let qi_headcount = table
            .field(row, "QI Headcount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let qi_id = format!("QI_{}", parsed.task_id);
        let quality_team = quality_team_for(catalog, &resource.team).unwrap_or_default();
        catalog.instances.insert(
            qi_id.clone(),
            TaskInstance {
                id: qi_id.clone(),
                kind: TaskKind::QualityInspection,
                product,
                duration_minutes: qi_duration,
                headcount: qi_headcount,
                resource: ResourceKey::team_only(quality_team),
                resource_kind: ResourceKind::Quality,
                primary: Some(parsed.task_id.clone()),
                on_dock: None,
                original: qi_id.clone(),
            },
        );
        catalog.quality_for.insert(parsed.task_id.clone(), qi_id);
        qi_created += 1;
    }
    debug!(count = created, qi = qi_created, "created rework task instances");
}

/// Repair quality inspections whose team mapping failed during expansion by
/// re-deriving it from the primary's mechanic team.
pub fn fix_quality_assignments(catalog: &mut Catalog) {
    let orphaned: Vec<(InstanceId, InstanceId)> = catalog
        .instances
        .values()
        .filter(|instance| {
            instance.kind == TaskKind::QualityInspection && instance.resource.team.is_empty()
        })
        .filter_map(|instance| {
            instance
                .primary
                .clone()
                .map(|primary| (instance.id.clone(), primary))
        })
        .collect();

    let mut fixed = 0;
    for (qi_id, primary_id) in orphaned {
        let Some(primary_team) = catalog
            .instances
            .get(&primary_id)
            .map(|p| p.resource.team.clone())
        else {
            continue;
        };
        if let Some(quality_team) = quality_team_for(catalog, &primary_team) {
            if let Some(qi) = catalog.instances.get_mut(&qi_id) {
                qi.resource = ResourceKey::team_only(quality_team);
                fixed += 1;
            }
        }
    }

    if fixed > 0 {
        debug!(fixed, "repaired quality inspection team assignments");
    }
    let still_orphaned = catalog
        .instances
        .values()
        .filter(|i| i.kind == TaskKind::QualityInspection && i.resource.team.is_empty())
        .count();
    if still_orphaned > 0 {
        warn!(count = still_orphaned, "quality inspections still without teams");
    }
}

pub(crate) fn parse_u32(
    table: &Table,
    row_number: usize,
    row: &[String],
    column: &str,
) -> Result<u32, LoadError> {
    table
        .require(row_number, row, column)?
        .parse()
        .map_err(|_| LoadError::Parse {
            section: table.name.clone(),
            row: row_number,
            field: column.to_string(),
        })
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(value, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Parse a late-part or rework relationship row into a [`SideEdge`]
pub(crate) fn read_side_edge(
    table: &Table,
    row_number: usize,
    row: &[String],
    with_on_dock: bool,
) -> Result<SideEdge, LoadError> {
    let first = table.require(row_number, row, "First")?.to_string();
    let second = table.require(row_number, row, "Second")?.to_string();
    let relationship = table
        .field(row, "Relationship Type")
        .or_else(|| table.field(row, "Relationship"))
        .map(taktplan_core::Relationship::normalize)
        .unwrap_or_default();
    let product = table.field(row, "Product Line").map(str::to_string);

    let on_dock = if with_on_dock {
        let raw = table.require(row_number, row, "Estimated On Dock Date")?;
        Some(parse_timestamp(raw).ok_or_else(|| LoadError::Parse {
            section: table.name.clone(),
            row: row_number,
            field: "Estimated On Dock Date".to_string(),
        })?)
    } else {
        None
    };

    Ok(SideEdge {
        first,
        second,
        relationship,
        product,
        on_dock,
    })
}
