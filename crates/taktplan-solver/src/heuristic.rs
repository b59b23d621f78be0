//! Shift-aware greedy list scheduler.
//!
//! Diagnostic fallback to the CP path: pops ready instances off a priority
//! heap, computes the earliest start allowed by scheduled predecessors, and
//! walks the calendar day by day / shift by shift for the first slot with
//! enough team capacity. Tasks longer than the longest shift window of their
//! resource are split into `---partN` chained parts.

use crate::metrics::entry_bounds;
use crate::weaver::DependencyGraph;
use chrono::{Datelike, Days, NaiveDateTime, TimeDelta, Timelike};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use taktplan_core::{
    day_opening, logical_instance_id, part_id, Catalog, InstanceId, Relationship, ResourceKey,
    ResourceKind, ScheduleEntry, ShiftId, TaskInstance, TaskKind,
};
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const MAX_LOOKAHEAD_DAYS: u64 = 30;
const ROUND_MINUTES: i64 = 15;
const MIN_PART_MINUTES: i64 = 60;
/// Starts beyond this year are treated as scheduling failures
const SANITY_YEAR: i32 = 2030;

/// Result of a heuristic run: a (possibly partial) schedule plus the set of
/// instances that exhausted their retries.
#[derive(Debug, Default)]
pub struct HeuristicOutcome {
    pub entries: BTreeMap<InstanceId, ScheduleEntry>,
    pub failed: BTreeSet<InstanceId>,
}

/// Schedule every instance greedily. `boost_product` pulls one product's
/// tasks to the front of the queue (what-if runs on the fallback path).
pub fn schedule(
    catalog: &Catalog,
    graph: &DependencyGraph,
    boost_product: Option<&str>,
) -> HeuristicOutcome {
    let scores = priority_scores(catalog, graph, boost_product);
    let mut outcome = HeuristicOutcome::default();
    let mut retries: HashMap<InstanceId, u32> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<(i64, InstanceId)>> = BinaryHeap::new();

    let blocking_ready = |outcome: &HeuristicOutcome, id: &str| {
        graph
            .predecessors_of(id)
            .filter(|edge| edge.relationship.is_blocking())
            .all(|edge| entry_bounds(&outcome.entries, &edge.first).is_some())
    };

    for id in catalog.instances.keys() {
        if blocking_ready(&outcome, id) {
            heap.push(Reverse((scores.get(id).copied().unwrap_or(0), id.clone())));
        }
    }
    debug!(ready = heap.len(), total = catalog.instances.len(), "initial ready queue");

    let max_iterations = catalog.instances.len() * 10;
    let mut iterations = 0;

    loop {
        while let Some(Reverse((score, id))) = heap.pop() {
            iterations += 1;
            if iterations > max_iterations {
                heap.clear();
                break;
            }
            if is_placed(&outcome.entries, &id) || outcome.failed.contains(&id) {
                continue;
            }
            if !blocking_ready(&outcome, &id) {
                // Stale entry; the instance re-enters when its predecessor lands
                continue;
            }

            let instance = &catalog.instances[&id];
            let earliest = earliest_start(catalog, graph, &outcome.entries, instance);

            match place(catalog, &outcome.entries, instance, earliest) {
                Ok(placed) => {
                    for entry in placed {
                        outcome.entries.insert(entry.instance.clone(), entry);
                    }
                    for edge in graph.successors_of(&id) {
                        let dependent = &edge.second;
                        if !is_placed(&outcome.entries, dependent)
                            && !outcome.failed.contains(dependent)
                            && blocking_ready(&outcome, dependent)
                        {
                            heap.push(Reverse((
                                scores.get(dependent).copied().unwrap_or(0),
                                dependent.clone(),
                            )));
                        }
                    }
                }
                Err(reason) => {
                    let count = retries.entry(id.clone()).or_insert(0);
                    *count += 1;
                    if *count < MAX_RETRIES {
                        heap.push(Reverse((score + 1, id)));
                    } else {
                        let error = taktplan_core::ScheduleError::SchedulingFailure {
                            task: id.clone(),
                            reason,
                        };
                        warn!(%error, "giving up after retries");
                        outcome.failed.insert(id);
                    }
                }
            }
        }

        // Refill: anything unscheduled whose blocking predecessors all landed
        let mut refilled = false;
        for id in catalog.instances.keys() {
            if !is_placed(&outcome.entries, id)
                && !outcome.failed.contains(id)
                && blocking_ready(&outcome, id)
            {
                heap.push(Reverse((scores.get(id).copied().unwrap_or(0), id.clone())));
                refilled = true;
            }
        }
        if !refilled || iterations > max_iterations {
            break;
        }
    }

    let placed: BTreeSet<&str> = outcome
        .entries
        .keys()
        .map(|k| logical_instance_id(k))
        .collect();
    debug!(
        scheduled = placed.len(),
        failed = outcome.failed.len(),
        total = catalog.instances.len(),
        "heuristic scheduling complete"
    );
    outcome
}

fn is_placed(entries: &BTreeMap<InstanceId, ScheduleEntry>, id: &str) -> bool {
    entries.contains_key(id) || entries.contains_key(&part_id(id, 1))
}

// ============================================================================
// Priorities
// ============================================================================

/// Composite priority score; lower pops first. Earlier delivery and a longer
/// critical-path tail raise priority, shorter durations get a slight boost.
/// Late parts occupy a fixed high-priority band offset by on-dock lateness;
/// a quality inspection rides just behind its primary; rework derives its
/// urgency from its downstream dependents.
fn priority_scores(
    catalog: &Catalog,
    graph: &DependencyGraph,
    boost_product: Option<&str>,
) -> HashMap<InstanceId, i64> {
    let tails = tail_minutes(catalog, graph);
    let days_to_delivery = |product: Option<&str>| -> i64 {
        product
            .and_then(|p| catalog.products.get(p))
            .map(|line| (line.delivery - catalog.epoch).num_days())
            .unwrap_or(999)
    };

    let standard = |instance: &TaskInstance| -> i64 {
        20 * days_to_delivery(instance.product.as_deref())
            - 5 * tails.get(&instance.id).copied().unwrap_or(0)
            + i64::from(instance.duration_minutes) / 5
    };

    let mut scores: HashMap<InstanceId, i64> = HashMap::new();

    // First pass: everything except inspections of other instances
    for instance in catalog.instances.values() {
        let score = match instance.kind {
            TaskKind::LatePart => {
                let days_until = instance
                    .on_dock
                    .map(|d| (d - catalog.epoch).num_days())
                    .unwrap_or(0);
                -3000 + 10 * days_until
            }
            TaskKind::Rework => {
                let dependent_urgency = graph
                    .successors_of(&instance.id)
                    .filter_map(|edge| catalog.instance(&edge.second))
                    .map(|dep| 20 * days_to_delivery(dep.product.as_deref()))
                    .min();
                match dependent_urgency {
                    Some(urgency) => urgency - 100,
                    None => -500,
                }
            }
            TaskKind::QualityInspection => continue,
            TaskKind::Production | TaskKind::CustomerInspection => standard(instance),
        };
        scores.insert(instance.id.clone(), score);
    }

    // Second pass: a QI inherits its primary's priority minus one
    for instance in catalog.instances.values() {
        if instance.kind != TaskKind::QualityInspection {
            continue;
        }
        let score = instance
            .primary
            .as_ref()
            .and_then(|primary| scores.get(primary))
            .map(|s| s - 1)
            .unwrap_or(-2000);
        scores.insert(instance.id.clone(), score);
    }

    if let Some(product) = boost_product {
        for instance in catalog.instances.values() {
            if instance.product.as_deref() == Some(product) {
                if let Some(score) = scores.get_mut(&instance.id) {
                    *score -= 5000;
                }
            }
        }
    }
    scores
}

/// Longest downstream path in minutes, including the task itself
fn tail_minutes(catalog: &Catalog, graph: &DependencyGraph) -> HashMap<InstanceId, i64> {
    fn visit(
        id: &str,
        catalog: &Catalog,
        graph: &DependencyGraph,
        memo: &mut HashMap<InstanceId, i64>,
    ) -> i64 {
        if let Some(&cached) = memo.get(id) {
            return cached;
        }
        let own = catalog
            .instance(id)
            .map(|i| i64::from(i.duration_minutes))
            .unwrap_or(0);
        // Temporary mark guards against malformed cyclic input
        memo.insert(id.to_string(), own);
        let downstream = graph
            .successors_of(id)
            .map(|edge| visit(&edge.second, catalog, graph, memo))
            .max()
            .unwrap_or(0);
        let total = own + downstream;
        memo.insert(id.to_string(), total);
        total
    }

    let mut memo = HashMap::new();
    for id in catalog.instances.keys() {
        visit(id, catalog, graph, &mut memo);
    }
    memo
}

// ============================================================================
// Placement
// ============================================================================

/// Earliest start permitted by scheduled predecessors and, for late parts,
/// the on-dock availability (opening of the working day `delay` days after
/// on-dock).
fn earliest_start(
    catalog: &Catalog,
    graph: &DependencyGraph,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    instance: &TaskInstance,
) -> NaiveDateTime {
    let mut earliest = catalog.epoch;

    if instance.kind == TaskKind::LatePart {
        if let Some(on_dock) = instance.on_dock {
            let available = (on_dock + TimeDelta::days(catalog.late_part_delay_days))
                .date()
                .and_time(day_opening());
            earliest = earliest.max(available);
        }
    }

    let duration = TimeDelta::minutes(i64::from(instance.duration_minutes));
    let mut exact_start: Option<NaiveDateTime> = None;

    for edge in graph.predecessors_of(&instance.id) {
        let Some((pred_start, pred_end)) = entry_bounds(entries, &edge.first) else {
            continue;
        };
        let bound = match edge.relationship {
            Relationship::FinishToStart | Relationship::FinishEqualsStart => pred_end,
            Relationship::StartToStart => pred_start,
            Relationship::StartEqualsStart => {
                exact_start = Some(pred_start);
                pred_start
            }
            Relationship::FinishToFinish => pred_end - duration,
            Relationship::StartToFinish => pred_start - duration,
        };
        earliest = earliest.max(bound);
    }

    exact_start.unwrap_or(earliest)
}

/// Place one instance, possibly as several `---partN` chunks. Returns the
/// entries to insert, or a failure reason.
fn place(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    instance: &TaskInstance,
    earliest: NaiveDateTime,
) -> Result<Vec<ScheduleEntry>, String> {
    match instance.kind {
        TaskKind::CustomerInspection => place_on_any_customer_team(catalog, entries, instance, earliest),
        TaskKind::QualityInspection => {
            let key = quality_key(catalog, instance)
                .ok_or_else(|| "no quality team assigned".to_string())?;
            let slot = next_slot(
                catalog,
                entries,
                &key,
                ResourceKind::Quality,
                instance.product.as_deref(),
                instance.headcount,
                i64::from(instance.duration_minutes),
                earliest,
            )
            .ok_or_else(|| format!("no slot on {key}"))?;
            Ok(vec![entry_for(instance, instance.id.clone(), key, slot, instance.duration_minutes, false)?])
        }
        TaskKind::Production | TaskKind::LatePart | TaskKind::Rework => {
            place_mechanic_work(catalog, entries, instance, earliest)
        }
    }
}

/// Customer inspections may run on any customer team with the headcount;
/// pick the team offering the earliest slot.
fn place_on_any_customer_team(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    instance: &TaskInstance,
    earliest: NaiveDateTime,
) -> Result<Vec<ScheduleEntry>, String> {
    let mut best: Option<(NaiveDateTime, ShiftId, ResourceKey)> = None;
    for (team, &capacity) in &catalog.customer_capacity {
        if capacity < instance.headcount {
            continue;
        }
        let key = ResourceKey::team_only(team.clone());
        if let Some((start, shift)) = next_slot(
            catalog,
            entries,
            &key,
            ResourceKind::Customer,
            instance.product.as_deref(),
            instance.headcount,
            i64::from(instance.duration_minutes),
            earliest,
        ) {
            if best.as_ref().map_or(true, |(current, _, _)| start < *current) {
                best = Some((start, shift, key));
            }
        }
    }
    let (start, shift, key) = best.ok_or_else(|| "no customer team slot".to_string())?;
    Ok(vec![entry_for(
        instance,
        instance.id.clone(),
        key,
        (start, shift),
        instance.duration_minutes,
        false,
    )?])
}

/// Mechanic work splits into chained parts when it cannot fit the longest
/// shift window of its resource.
fn place_mechanic_work(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    instance: &TaskInstance,
    earliest: NaiveDateTime,
) -> Result<Vec<ScheduleEntry>, String> {
    let key = instance.resource.clone();
    let duration = i64::from(instance.duration_minutes);
    let longest_window = catalog
        .shifts_of(&key, ResourceKind::Mechanic)
        .iter()
        .filter_map(|id| catalog.shifts.get(id))
        .map(|s| s.duration_minutes())
        .max()
        .unwrap_or(taktplan_core::MINUTES_PER_DAY);

    if duration <= longest_window {
        let slot = next_slot(
            catalog,
            entries,
            &key,
            ResourceKind::Mechanic,
            instance.product.as_deref(),
            instance.headcount,
            duration,
            earliest,
        )
        .ok_or_else(|| format!("no slot on {key}"))?;
        return Ok(vec![entry_for(instance, instance.id.clone(), key, slot, instance.duration_minutes, false)?]);
    }

    // Chunk the task so every part fits one window and stays >= 1 hour
    let mut chunks: Vec<i64> = Vec::new();
    let mut remaining = duration;
    while remaining > longest_window {
        let mut take = longest_window;
        if remaining - take < MIN_PART_MINUTES {
            take = (remaining - MIN_PART_MINUTES).max(MIN_PART_MINUTES);
        }
        chunks.push(take);
        remaining -= take;
    }
    chunks.push(remaining);

    let mut placed = Vec::new();
    let mut cursor = earliest;
    let mut working = entries.clone();
    for (index, &chunk) in chunks.iter().enumerate() {
        let slot = next_slot(
            catalog,
            &working,
            &key,
            ResourceKind::Mechanic,
            instance.product.as_deref(),
            instance.headcount,
            chunk,
            cursor,
        )
        .ok_or_else(|| format!("no slot for part {} on {key}", index + 1))?;
        let entry = entry_for(
            instance,
            part_id(&instance.id, index + 1),
            key.clone(),
            slot,
            chunk as u32,
            true,
        )?;
        cursor = entry.end;
        working.insert(entry.instance.clone(), entry.clone());
        placed.push(entry);
    }
    debug!(task = %instance.id, parts = placed.len(), "split long task across shift windows");
    Ok(placed)
}

fn entry_for(
    instance: &TaskInstance,
    id: InstanceId,
    resource: ResourceKey,
    (start, shift): (NaiveDateTime, ShiftId),
    duration_minutes: u32,
    split_part: bool,
) -> Result<ScheduleEntry, String> {
    if start.year() > SANITY_YEAR {
        return Err(format!("scheduled to year {}", start.year()));
    }
    Ok(ScheduleEntry {
        instance: id,
        start,
        end: start + TimeDelta::minutes(i64::from(duration_minutes)),
        resource,
        kind: instance.kind,
        product: instance.product.clone(),
        duration_minutes,
        headcount: instance.headcount,
        shift: Some(shift),
        split_part,
    })
}

/// Resolve the quality team for a QI, repairing a missing assignment from
/// the primary's mechanic team number.
fn quality_key(catalog: &Catalog, instance: &TaskInstance) -> Option<ResourceKey> {
    if !instance.resource.team.is_empty() {
        return Some(instance.resource.clone());
    }
    let primary = catalog.instance(instance.primary.as_deref()?)?;
    let digits: String = primary
        .resource
        .team
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    let team = format!("Quality Team {digits}");
    catalog
        .quality_capacity
        .contains_key(&team)
        .then(|| ResourceKey::team_only(team))
}

// ============================================================================
// Slot Search
// ============================================================================

/// Walk forward day by day, shift by shift, for the first 15-minute-aligned
/// start where the interval fits the window and the team has headcount left.
#[allow(clippy::too_many_arguments)]
fn next_slot(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    key: &ResourceKey,
    kind: ResourceKind,
    product: Option<&str>,
    needed: u32,
    duration_minutes: i64,
    earliest: NaiveDateTime,
) -> Option<(NaiveDateTime, ShiftId)> {
    let capacity = catalog.capacity_of(key, kind)?;
    if capacity == 0 || needed > capacity {
        return None;
    }
    let shifts = catalog.shifts_of(key, kind);

    for day_offset in 0..MAX_LOOKAHEAD_DAYS {
        let date = earliest.date().checked_add_days(Days::new(day_offset))?;
        if !catalog.is_working_day(date, product) {
            continue;
        }

        for shift_id in &shifts {
            let Some(shift) = catalog.shifts.get(shift_id) else {
                continue;
            };

            let (window_start, window_end) = if shift.crosses_midnight() {
                // Overnight shift runs [start today, end tomorrow); when the
                // clock is already inside the carry-over tail, the window
                // started yesterday
                if day_offset == 0 && earliest.time() < shift.end {
                    let yesterday = date.checked_sub_days(Days::new(1))?;
                    (yesterday.and_time(shift.start), date.and_time(shift.end))
                } else {
                    let tomorrow = date.checked_add_days(Days::new(1))?;
                    (date.and_time(shift.start), tomorrow.and_time(shift.end))
                }
            } else {
                (date.and_time(shift.start), date.and_time(shift.end))
            };

            if window_end <= earliest {
                continue;
            }

            let mut candidate = window_start.max(earliest);
            let minute = i64::from(candidate.time().minute());
            if minute % ROUND_MINUTES != 0 {
                candidate += TimeDelta::minutes(ROUND_MINUTES - minute % ROUND_MINUTES);
            }

            // Probe 15-minute marks across the window until the team has
            // headcount left for the whole interval
            loop {
                let task_end = candidate + TimeDelta::minutes(duration_minutes);
                if task_end > window_end {
                    break;
                }
                let used = overlapping_headcount(catalog, entries, key, kind, candidate, task_end);
                if capacity - used.min(capacity) >= needed {
                    return Some((candidate, *shift_id));
                }
                candidate += TimeDelta::minutes(ROUND_MINUTES);
            }
        }
    }
    None
}

/// Headcount already committed on a resource over a window. A mechanic crew
/// stays blocked while its task's quality inspection runs, so QI entries
/// charge the primary's mechanic resource too.
fn overlapping_headcount(
    catalog: &Catalog,
    entries: &BTreeMap<InstanceId, ScheduleEntry>,
    key: &ResourceKey,
    kind: ResourceKind,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> u32 {
    let mut used = 0;
    for entry in entries.values() {
        if entry.start >= to || entry.end <= from {
            continue;
        }
        if entry.resource == *key {
            used += entry.headcount;
            continue;
        }
        if kind == ResourceKind::Mechanic && entry.kind == TaskKind::QualityInspection {
            let blocked = catalog
                .instance(logical_instance_id(&entry.instance))
                .and_then(|qi| qi.primary.as_deref())
                .and_then(|primary| catalog.instance(primary))
                .is_some_and(|primary| primary.resource == *key);
            if blocked {
                used += entry.headcount;
            }
        }
    }
    used
}
