//! CP model builder and solver driver (canonical scheduling path).
//!
//! The model lives in the dense working-minute index of the
//! [`WorkingCalendar`]: one bounded start variable per task instance,
//! precedence constraints per woven edge, late-part lower bounds, and one
//! cumulative constraint per resource key. A production task with a quality
//! inspection contributes a longer *blocking* duration to its mechanic
//! team's cumulative, keeping the crew booked through the inspection.
//!
//! The joint-optimization mode wraps the fixed-capacity model in an outer
//! bottleneck-ascent search, since the backend's cumulative constraint takes
//! a fixed capacity.

use crate::calendar::WorkingCalendar;
use crate::weaver::DependencyGraph;
use pumpkin_solver::constraints as cp;
use pumpkin_solver::optimisation::linear_sat_unsat::LinearSatUnsat;
use pumpkin_solver::optimisation::OptimisationDirection;
use pumpkin_solver::results::{OptimisationResult, ProblemSolution};
use pumpkin_solver::termination::TimeBudget;
use pumpkin_solver::variables::TransformableVariable;
use pumpkin_solver::Solver;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use taktplan_core::{
    Catalog, InstanceId, Relationship, ResourceKind, ScenarioMode, ScheduleEntry, ScheduleError,
    ShiftId, TaskInstance, MINUTES_PER_DAY,
};
use tracing::{debug, info};

/// Joint mode: outer search rounds and probe fan-out
const ASCENT_ROUNDS: usize = 8;
const ASCENT_CANDIDATES: usize = 3;

/// A CP solution mapped back to wall-clock schedule entries
#[derive(Debug)]
pub struct CpSchedule {
    pub entries: BTreeMap<InstanceId, ScheduleEntry>,
    pub objective: i64,
    pub lateness_days: i64,
    /// Per-resource capacities chosen by the joint-optimization mode
    pub capacities: Option<BTreeMap<String, u32>>,
}

enum CpObjective<'a> {
    TotalLateness,
    Prioritize(&'a str),
}

/// Solve one scenario. Capacities are taken from the catalog's current maps
/// except in joint mode, where they become the search space.
pub fn solve(
    catalog: &Catalog,
    graph: &DependencyGraph,
    calendar: &WorkingCalendar,
    mode: &ScenarioMode,
    budget_secs: u64,
) -> Result<CpSchedule, ScheduleError> {
    let budget_ms = budget_secs * 1000;
    match mode {
        ScenarioMode::Baseline => solve_fixed(
            catalog,
            graph,
            calendar,
            &resolved_capacities(catalog),
            &CpObjective::TotalLateness,
            budget_ms,
        ),
        ScenarioMode::WhatIf { product } => solve_fixed(
            catalog,
            graph,
            calendar,
            &resolved_capacities(catalog),
            &CpObjective::Prioritize(product),
            budget_ms,
        ),
        ScenarioMode::JointOptimize => optimize_capacities(catalog, graph, calendar, budget_ms),
    }
}

/// Resource label a task instance draws capacity from: mechanic work is
/// keyed by (team, skill), inspections by their team alone.
fn resource_label(instance: &TaskInstance) -> String {
    match instance.resource_kind {
        ResourceKind::Mechanic => instance.resource.label(),
        ResourceKind::Quality | ResourceKind::Customer => instance.resource.team.clone(),
    }
}

/// Capacities for every resource label referenced by an instance
fn resolved_capacities(catalog: &Catalog) -> BTreeMap<String, u32> {
    let mut capacities = BTreeMap::new();
    for instance in catalog.instances.values() {
        let label = resource_label(instance);
        if !capacities.contains_key(&label) {
            let capacity = catalog
                .capacity_of(&instance.resource, instance.resource_kind)
                .unwrap_or(0);
            capacities.insert(label, capacity);
        }
    }
    capacities
}

fn solve_fixed(
    catalog: &Catalog,
    graph: &DependencyGraph,
    calendar: &WorkingCalendar,
    capacities: &BTreeMap<String, u32>,
    objective: &CpObjective<'_>,
    budget_ms: u64,
) -> Result<CpSchedule, ScheduleError> {
    let horizon = calendar.horizon_minutes();
    let horizon_i32 = i32::try_from(horizon).map_err(|_| ScheduleError::HorizonExceeded)?;
    let horizon_days = horizon_i32 / MINUTES_PER_DAY as i32 + 1;

    let instances: Vec<&TaskInstance> = catalog.instances.values().collect();
    let index: HashMap<&str, usize> = instances
        .iter()
        .enumerate()
        .map(|(i, instance)| (instance.id.as_str(), i))
        .collect();

    let mut solver = Solver::default();
    let constraint_tag = solver.new_constraint_tag();

    // One bounded start per instance; end = start + duration stays implicit
    let durations: Vec<i32> = instances
        .iter()
        .map(|i| i.duration_minutes as i32)
        .collect();
    let starts: Vec<_> = durations
        .iter()
        .map(|&duration| solver.new_bounded_integer(0, (horizon_i32 - duration).max(0)))
        .collect();

    // Precedence per woven edge
    for edge in &graph.edges {
        let (Some(&u), Some(&v)) = (index.get(edge.first.as_str()), index.get(edge.second.as_str()))
        else {
            continue;
        };
        let (dur_u, dur_v) = (durations[u], durations[v]);
        match edge.relationship {
            Relationship::FinishToStart => {
                let vars = vec![starts[v].scaled(1), starts[u].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, dur_u, constraint_tag))
                    .post();
            }
            Relationship::FinishEqualsStart => {
                let vars = vec![starts[v].scaled(1), starts[u].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, dur_u, constraint_tag))
                    .post();
                let vars = vec![starts[u].scaled(1), starts[v].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, -dur_u, constraint_tag))
                    .post();
            }
            Relationship::StartToStart => {
                let vars = vec![starts[v].scaled(1), starts[u].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, 0, constraint_tag))
                    .post();
            }
            Relationship::StartEqualsStart => {
                let vars = vec![starts[v].scaled(1), starts[u].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, 0, constraint_tag))
                    .post();
                let vars = vec![starts[u].scaled(1), starts[v].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, 0, constraint_tag))
                    .post();
            }
            Relationship::FinishToFinish => {
                let vars = vec![starts[v].scaled(1), starts[u].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, dur_u - dur_v, constraint_tag))
                    .post();
            }
            Relationship::StartToFinish => {
                let vars = vec![starts[v].scaled(1), starts[u].scaled(-1)];
                let _ = solver
                    .add_constraint(cp::greater_than_or_equals(vars, -dur_v, constraint_tag))
                    .post();
            }
        }
    }

    // Late-part lower bounds: available at the opening of the working day
    // `delay` days after on-dock
    for (task_id, on_dock) in &catalog.on_dock {
        let Some(&idx) = index.get(task_id.as_str()) else {
            continue;
        };
        let available = (*on_dock + chrono::TimeDelta::days(catalog.late_part_delay_days))
            .date()
            .and_time(taktplan_core::day_opening());
        let bound = calendar.date_to_minutes(available)?;
        let bound = i32::try_from(bound.min(horizon)).map_err(|_| ScheduleError::HorizonExceeded)?;
        let vars = vec![starts[idx].scaled(1)];
        let _ = solver
            .add_constraint(cp::greater_than_or_equals(vars, bound, constraint_tag))
            .post();
    }

    // Cumulative capacity per resource label; mechanic tasks with a QI
    // contribute their blocking duration instead
    let mut per_resource: BTreeMap<String, (Vec<_>, Vec<i32>, Vec<i32>)> = BTreeMap::new();
    for (idx, instance) in instances.iter().enumerate() {
        let label = resource_label(instance);
        let mut duration = durations[idx];
        if instance.kind.is_mechanic_work() {
            if let Some(qi) = catalog.quality_for.get(&instance.id) {
                if let Some(qi_instance) = catalog.instance(qi) {
                    duration += qi_instance.duration_minutes as i32;
                }
            }
        }
        let slot = per_resource.entry(label).or_default();
        slot.0.push(starts[idx]);
        slot.1.push(duration);
        slot.2.push(instance.headcount as i32);
    }
    for (label, (resource_starts, resource_durations, demands)) in per_resource {
        let capacity = capacities.get(&label).copied().unwrap_or(0);
        if resource_starts.is_empty() || capacity == 0 {
            continue;
        }
        let _ = solver
            .add_constraint(cp::cumulative(
                resource_starts,
                resource_durations,
                demands,
                capacity as i32,
                constraint_tag,
            ))
            .post();
    }

    // Per-product completion and lateness-day variables
    let mut completion_vars: BTreeMap<&str, _> = BTreeMap::new();
    let mut lateness_vars: Vec<(&str, _)> = Vec::new();
    for (product, line) in &catalog.products {
        let terminals = graph.terminals_of(catalog, product);
        let terminal_indexes: Vec<usize> = terminals
            .iter()
            .filter_map(|id| index.get(id.as_str()).copied())
            .collect();
        if terminal_indexes.is_empty() {
            continue;
        }

        let completion = solver.new_bounded_integer(0, horizon_i32);
        for idx in terminal_indexes {
            let vars = vec![completion.scaled(1), starts[idx].scaled(-1)];
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(vars, durations[idx], constraint_tag))
                .post();
        }
        completion_vars.insert(product.as_str(), completion);

        let due = calendar.date_to_minutes(line.delivery).unwrap_or(horizon);
        let due = i32::try_from(due.min(horizon)).unwrap_or(horizon_i32);
        let lateness = solver.new_bounded_integer(0, horizon_days);
        // MINUTES_PER_DAY * lateness >= completion - due
        let vars = vec![
            lateness.scaled(MINUTES_PER_DAY as i32),
            completion.scaled(-1),
        ];
        let _ = solver
            .add_constraint(cp::greater_than_or_equals(vars, -due, constraint_tag))
            .post();
        lateness_vars.push((product.as_str(), lateness));
    }

    // Objective variable tied to its terms from both sides
    let (objective_var, objective_bound) = match objective {
        CpObjective::TotalLateness => {
            let bound = horizon_days * lateness_vars.len().max(1) as i32;
            let objective_var = solver.new_bounded_integer(0, bound);
            let mut forward = vec![objective_var.scaled(1)];
            let mut backward = vec![objective_var.scaled(-1)];
            for (_, lateness) in &lateness_vars {
                forward.push(lateness.scaled(-1));
                backward.push(lateness.scaled(1));
            }
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(forward, 0, constraint_tag))
                .post();
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(backward, 0, constraint_tag))
                .post();
            (objective_var, bound)
        }
        CpObjective::Prioritize(product) => {
            let bound = horizon_i32
                .saturating_mul(1000)
                .saturating_add(horizon_days.saturating_mul(10 * lateness_vars.len().max(1) as i32));
            let objective_var = solver.new_bounded_integer(0, bound);
            let mut forward = vec![objective_var.scaled(1)];
            let mut backward = vec![objective_var.scaled(-1)];
            if let Some(completion) = completion_vars.get(*product) {
                forward.push(completion.scaled(-1000));
                backward.push(completion.scaled(1000));
            }
            for (other, lateness) in &lateness_vars {
                if other == product {
                    continue;
                }
                forward.push(lateness.scaled(-10));
                backward.push(lateness.scaled(10));
            }
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(forward, 0, constraint_tag))
                .post();
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(backward, 0, constraint_tag))
                .post();
            (objective_var, bound)
        }
    };
    debug!(
        instances = instances.len(),
        edges = graph.edges.len(),
        objective_bound,
        "built CP model"
    );

    // Solve under the wall-clock budget
    let mut brancher = solver.default_brancher();
    let mut termination = TimeBudget::starting_now(Duration::from_millis(budget_ms));

    fn noop_callback<B>(_: &Solver, _: pumpkin_solver::results::SolutionReference, _: &B) {}
    let result = solver.optimise(
        &mut brancher,
        &mut termination,
        LinearSatUnsat::new(OptimisationDirection::Minimise, objective_var, noop_callback),
    );

    let extracted = match result {
        OptimisationResult::Optimal(optimal_solution) => {
            extract_values(&optimal_solution, objective_var, &lateness_vars, &starts)
        }
        OptimisationResult::Satisfiable(satisfiable) => {
            // Found a solution but could not prove optimality within budget
            extract_values(&satisfiable, objective_var, &lateness_vars, &starts)
        }
        OptimisationResult::Unsatisfiable => return Err(ScheduleError::SolverInfeasible),
        OptimisationResult::Unknown => return Err(ScheduleError::SolverTimeout),
    };
    let (objective_value, lateness_days, start_values) = extracted;

    let mut entries = BTreeMap::new();
    for (idx, instance) in instances.iter().enumerate() {
        let start_minute = start_values[idx];
        let start = calendar.minutes_to_datetime(start_minute);
        let end = calendar.minutes_to_datetime_end(start_minute + i64::from(durations[idx]));
        entries.insert(
            instance.id.clone(),
            ScheduleEntry {
                instance: instance.id.clone(),
                start,
                end,
                resource: instance.resource.clone(),
                kind: instance.kind,
                product: instance.product.clone(),
                duration_minutes: instance.duration_minutes,
                headcount: instance.headcount,
                shift: derive_shift(catalog, instance, start),
                split_part: false,
            },
        );
    }

    info!(objective_value, lateness_days, "CP solver finished");
    Ok(CpSchedule {
        entries,
        objective: objective_value,
        lateness_days,
        capacities: None,
    })
}

/// Joint capacity/lateness optimization: start every resource at its minimum
/// viable capacity and repeatedly raise the most-loaded resource while the
/// weighted objective `10 * latenessDays + total capacity` improves.
fn optimize_capacities(
    catalog: &Catalog,
    graph: &DependencyGraph,
    calendar: &WorkingCalendar,
    budget_ms: u64,
) -> Result<CpSchedule, ScheduleError> {
    let minimums = catalog.minimum_team_requirements();
    let mut capacities: BTreeMap<String, u32> = resolved_capacities(catalog)
        .keys()
        .map(|label| {
            let floor = minimums.get(label).copied().unwrap_or(1).max(1);
            (label.clone(), floor)
        })
        .collect();

    let mut work_minutes: BTreeMap<String, i64> = BTreeMap::new();
    for instance in catalog.instances.values() {
        *work_minutes.entry(resource_label(instance)).or_insert(0) +=
            i64::from(instance.duration_minutes) * i64::from(instance.headcount);
    }

    let probe_ms = (budget_ms / (ASCENT_ROUNDS as u64 + 1)).max(2000);
    let weighted = |lateness: i64, caps: &BTreeMap<String, u32>| -> i64 {
        10 * lateness + i64::from(caps.values().sum::<u32>())
    };

    let mut best = solve_fixed(
        catalog,
        graph,
        calendar,
        &capacities,
        &CpObjective::TotalLateness,
        probe_ms,
    )?;
    let mut best_caps = capacities.clone();
    let mut best_objective = weighted(best.lateness_days, &capacities);
    debug!(objective = best_objective, "joint optimization baseline at minimum capacities");

    for round in 0..ASCENT_ROUNDS {
        // Most-loaded resources are the likeliest bottlenecks
        let mut ranked: Vec<(&String, i64)> = capacities
            .keys()
            .map(|label| {
                let load = work_minutes.get(label).copied().unwrap_or(0)
                    / i64::from(capacities[label]).max(1);
                (label, load)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let candidates: Vec<String> = ranked
            .into_iter()
            .take(ASCENT_CANDIDATES)
            .map(|(label, _)| label.clone())
            .collect();

        let mut improved = false;
        for label in candidates {
            let mut probe_caps = best_caps.clone();
            *probe_caps.get_mut(&label).expect("known label") += 1;

            let Ok(candidate) = solve_fixed(
                catalog,
                graph,
                calendar,
                &probe_caps,
                &CpObjective::TotalLateness,
                probe_ms,
            ) else {
                continue;
            };
            let objective = weighted(candidate.lateness_days, &probe_caps);
            if objective < best_objective {
                debug!(round, resource = %label, objective, "capacity increase improved the objective");
                best = candidate;
                best_caps = probe_caps;
                best_objective = objective;
                improved = true;
                break;
            }
        }

        if !improved {
            break;
        }
        capacities = best_caps.clone();
    }

    info!(
        objective = best_objective,
        lateness_days = best.lateness_days,
        workforce = best_caps.values().sum::<u32>(),
        "joint optimization complete"
    );
    Ok(CpSchedule {
        entries: best.entries,
        objective: best_objective,
        lateness_days: best.lateness_days,
        capacities: Some(best_caps),
    })
}

/// Pull objective, summed lateness days and all start values out of a solver
/// solution.
fn extract_values(
    solution: &impl ProblemSolution,
    objective_var: pumpkin_solver::variables::DomainId,
    lateness_vars: &[(&str, pumpkin_solver::variables::DomainId)],
    starts: &[pumpkin_solver::variables::DomainId],
) -> (i64, i64, Vec<i64>) {
    let objective_value = i64::from(solution.get_integer_value(objective_var));
    let lateness_days: i64 = lateness_vars
        .iter()
        .map(|&(_, lateness)| i64::from(solution.get_integer_value(lateness)))
        .sum();
    let start_values: Vec<i64> = starts
        .iter()
        .map(|&start| i64::from(solution.get_integer_value(start)))
        .collect();
    (objective_value, lateness_days, start_values)
}

/// Derive the shift whose window contains the start clock, if any
fn derive_shift(catalog: &Catalog, instance: &TaskInstance, start: chrono::NaiveDateTime) -> Option<ShiftId> {
    let clock = start.time();
    for shift_id in catalog.shifts_of(&instance.resource, instance.resource_kind) {
        let Some(shift) = catalog.shifts.get(&shift_id) else {
            continue;
        };
        let inside = if shift.crosses_midnight() {
            clock >= shift.start || clock < shift.end
        } else {
            clock >= shift.start && clock < shift.end
        };
        if inside {
            return Some(shift_id);
        }
    }
    None
}
