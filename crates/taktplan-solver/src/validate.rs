//! Structural validation: cycle detection on the woven graph, pre-solve
//! schedulability, and the post-solve resource-conflict sweep.

use crate::weaver::DependencyGraph;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap, HashSet};
use taktplan_core::{Catalog, InstanceId, Relationship, ScheduleEntry, ScheduleError};
use tracing::warn;

/// Cycle detection over the FS / F=S subgraph. Cycles are fatal before solve.
pub fn validate_dag(graph: &DependencyGraph) -> Result<(), ScheduleError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        if matches!(
            edge.relationship,
            Relationship::FinishToStart | Relationship::FinishEqualsStart
        ) {
            adjacency
                .entry(edge.first.as_str())
                .or_default()
                .push(edge.second.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<InstanceId>> {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        for &next in adjacency.get(node).into_iter().flatten() {
            if !visited.contains(next) {
                if let Some(cycle) = dfs(next, adjacency, visited, on_stack, path) {
                    return Some(cycle);
                }
            } else if on_stack.contains(next) {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<InstanceId> =
                    path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }

        path.pop();
        on_stack.remove(node);
        None
    }

    let nodes: Vec<&str> = adjacency.keys().copied().collect();
    for node in nodes {
        if !visited.contains(node) {
            if let Some(path) = dfs(node, &adjacency, &mut visited, &mut on_stack, &mut path) {
                return Err(ScheduleError::DagCycle { path });
            }
        }
    }
    Ok(())
}

/// Check every instance's resource key against the capacity tables before
/// solving: an absent key or a headcount above capacity is fatal.
pub fn validate_schedulability(catalog: &Catalog) -> Result<(), ScheduleError> {
    let mut first_error: Option<ScheduleError> = None;
    for instance in catalog.instances.values() {
        let error = match catalog.capacity_of(&instance.resource, instance.resource_kind) {
            None => Some(ScheduleError::UnresolvableTeam {
                task: instance.id.clone(),
                team: instance.resource.label(),
            }),
            Some(capacity) if instance.headcount > capacity => {
                Some(ScheduleError::InfeasibleCapacity {
                    task: instance.id.clone(),
                    team: instance.resource.label(),
                    need: instance.headcount,
                    capacity,
                })
            }
            Some(_) => None,
        };
        if let Some(error) = error {
            warn!(%error, "schedulability check failed");
            first_error.get_or_insert(error);
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// A point where concurrent usage on a resource exceeds its capacity
#[derive(Debug, Clone)]
pub struct ResourceConflict {
    pub resource: String,
    pub at: NaiveDateTime,
    pub usage: u32,
    pub capacity: u32,
    pub instance: InstanceId,
}

/// Sweep-line over per-resource start/end events; reports every instant where
/// usage exceeds capacity.
pub fn check_resource_conflicts(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
) -> Vec<ResourceConflict> {
    let mut by_resource: BTreeMap<String, Vec<&ScheduleEntry>> = BTreeMap::new();
    for entry in entries.values() {
        by_resource
            .entry(entry.resource.label())
            .or_default()
            .push(entry);
    }

    let mut conflicts = Vec::new();
    for (resource, resource_entries) in by_resource {
        let capacity = lookup_capacity(catalog, &resource).unwrap_or(0);

        // (time, delta, is_start, instance); ends sort before starts at the
        // same instant so back-to-back intervals do not collide
        let mut events: Vec<(NaiveDateTime, i64, bool, &str)> = Vec::new();
        for entry in resource_entries {
            events.push((entry.start, i64::from(entry.headcount), true, &entry.instance));
            events.push((entry.end, -i64::from(entry.headcount), false, &entry.instance));
        }
        events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut usage = 0i64;
        for (at, delta, is_start, instance) in events {
            usage += delta;
            if is_start && usage > i64::from(capacity) {
                conflicts.push(ResourceConflict {
                    resource: resource.clone(),
                    at,
                    usage: usage as u32,
                    capacity,
                    instance: instance.to_string(),
                });
            }
        }
    }
    conflicts
}

fn lookup_capacity(catalog: &Catalog, label: &str) -> Option<u32> {
    catalog
        .mechanic_capacity
        .get(label)
        .or_else(|| catalog.quality_capacity.get(label))
        .or_else(|| catalog.customer_capacity.get(label))
        .or_else(|| {
            // Skill partitions fall back to the base team's capacity row
            let base = label.split(" (").next()?;
            catalog.mechanic_capacity.get(base)
        })
        .copied()
}
