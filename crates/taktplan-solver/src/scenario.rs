//! Scenario orchestration.
//!
//! The [`Scheduler`] owns the catalog, the cached dependency graph and the
//! current schedule. A run validates the graph, snapshots capacities,
//! dispatches the selected solver, assembles the [`ScenarioResult`] and
//! restores the captured capacities on every exit path.

use crate::heuristic;
use crate::metrics;
use crate::validate;
use crate::weaver::{build_dependencies, DependencyGraph};
use std::collections::{BTreeMap, BTreeSet};
use taktplan_core::{
    logical_instance_id, Catalog, Criticality, InstanceId, PriorityEntry, ScenarioMode,
    ScenarioResult, ScenarioStatus, ScheduleEntry, ScheduleError, TaskKind,
};
use tracing::{info, warn};

/// Which solving path a run uses. The CP path is canonical; the heuristic is
/// a diagnostic fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverMode {
    Cp,
    Heuristic,
}

/// Per-run configuration
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub mode: ScenarioMode,
    pub solver: SolverMode,
    /// Wall-clock budget in seconds; defaults per scenario mode
    pub time_limit_secs: Option<u64>,
}

impl RunConfig {
    pub fn new(mode: ScenarioMode) -> Self {
        Self {
            mode,
            solver: SolverMode::Cp,
            time_limit_secs: None,
        }
    }

    pub fn with_solver(mut self, solver: SolverMode) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_time_limit(mut self, secs: u64) -> Self {
        self.time_limit_secs = Some(secs);
        self
    }
}

/// Owns the catalog and the schedule across scenario runs
pub struct Scheduler {
    pub catalog: Catalog,
    graph_cache: Option<DependencyGraph>,
}

impl Scheduler {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            graph_cache: None,
        }
    }

    /// The woven dependency graph, rebuilt lazily whenever the catalog
    /// version moves past the cached one.
    pub fn dependencies(&mut self) -> &DependencyGraph {
        let stale = self
            .graph_cache
            .as_ref()
            .map(|graph| graph.version() != self.catalog.version())
            .unwrap_or(true);
        if stale {
            self.graph_cache = Some(build_dependencies(&self.catalog));
        }
        self.graph_cache.as_ref().expect("graph cache populated")
    }

    /// Run one scenario. Capacities mutated by the run (joint mode) are
    /// restored before returning, on success and on error alike.
    pub fn run(&mut self, config: &RunConfig) -> Result<ScenarioResult, ScheduleError> {
        let graph = self.dependencies().clone();
        validate::validate_dag(&graph)?;
        validate::validate_schedulability(&self.catalog)?;

        let snapshot = self.catalog.capture_capacities();
        let result = self.run_inner(config, &graph);
        self.catalog.restore_capacities(snapshot);
        result
    }

    fn run_inner(
        &mut self,
        config: &RunConfig,
        graph: &DependencyGraph,
    ) -> Result<ScenarioResult, ScheduleError> {
        let time_limit = config
            .time_limit_secs
            .unwrap_or_else(|| config.mode.default_time_limit());

        let solver = match config.solver {
            SolverMode::Cp if cfg!(feature = "cp-solver") => SolverMode::Cp,
            SolverMode::Cp => {
                warn!("cp-solver feature disabled, falling back to the heuristic path");
                SolverMode::Heuristic
            }
            SolverMode::Heuristic => SolverMode::Heuristic,
        };

        let outcome = match solver {
            SolverMode::Cp => self.run_cp(config, graph, time_limit),
            SolverMode::Heuristic => Ok(self.run_heuristic(config, graph)),
        };

        let (entries, failed, objective, capacities) = match outcome {
            Ok(parts) => parts,
            // A solver failure is an explicit FAILED result, not a crash;
            // callers may fall back to the heuristic path
            Err(error @ (ScheduleError::SolverTimeout | ScheduleError::SolverInfeasible)) => {
                warn!(%error, "solver produced no schedule");
                return Ok(self.failed_result(config));
            }
            Err(error) => return Err(error),
        };

        // Joint mode reports metrics against its optimized capacities; the
        // outer snapshot restores the originals afterwards
        if let Some(capacities) = &capacities {
            self.apply_capacities(capacities);
        }

        let conflicts = validate::check_resource_conflicts(&self.catalog, &entries);
        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "schedule has resource conflicts");
        }

        Ok(self.assemble(config, graph, entries, failed, objective, capacities))
    }

    fn run_cp(
        &self,
        config: &RunConfig,
        graph: &DependencyGraph,
        time_limit: u64,
    ) -> Result<SolveParts, ScheduleError> {
        #[cfg(feature = "cp-solver")]
        {
            let calendar = crate::calendar::WorkingCalendar::build(&self.catalog)?;
            let solved = crate::cp::solve(&self.catalog, graph, &calendar, &config.mode, time_limit)?;
            Ok((
                solved.entries,
                BTreeSet::new(),
                Some(solved.objective),
                solved.capacities,
            ))
        }
        #[cfg(not(feature = "cp-solver"))]
        {
            let _ = (config, graph, time_limit);
            unreachable!("cp path selected without the cp-solver feature")
        }
    }

    fn run_heuristic(&self, config: &RunConfig, graph: &DependencyGraph) -> SolveParts {
        let boost = match &config.mode {
            ScenarioMode::WhatIf { product } => Some(product.as_str()),
            _ => None,
        };
        if config.mode == ScenarioMode::JointOptimize {
            warn!("joint capacity optimization is CP-only; scheduling against fixed capacities");
        }
        let outcome = heuristic::schedule(&self.catalog, graph, boost);
        (outcome.entries, outcome.failed, None, None)
    }

    fn apply_capacities(&mut self, capacities: &BTreeMap<String, u32>) {
        for (label, &capacity) in capacities {
            if self.catalog.original_quality_capacity.contains_key(label) {
                self.catalog.quality_capacity.insert(label.clone(), capacity);
            } else if self.catalog.original_customer_capacity.contains_key(label) {
                self.catalog.customer_capacity.insert(label.clone(), capacity);
            } else {
                self.catalog.mechanic_capacity.insert(label.clone(), capacity);
            }
        }
    }

    fn failed_result(&self, config: &RunConfig) -> ScenarioResult {
        ScenarioResult {
            mode: config.mode.clone(),
            status: ScenarioStatus::Failed,
            entries: BTreeMap::new(),
            failed: BTreeSet::new(),
            makespan_days: 0,
            lateness: BTreeMap::new(),
            utilization: BTreeMap::new(),
            on_time_rate: 0.0,
            total_workforce: self.catalog.total_workforce(),
            optimized_capacities: None,
            priority_list: Vec::new(),
            predecessors: BTreeMap::new(),
            successors: BTreeMap::new(),
            objective: None,
        }
    }

    fn assemble(
        &self,
        config: &RunConfig,
        graph: &DependencyGraph,
        entries: BTreeMap<InstanceId, ScheduleEntry>,
        failed: BTreeSet<InstanceId>,
        objective: Option<i64>,
        optimized_capacities: Option<BTreeMap<String, u32>>,
    ) -> ScenarioResult {
        let makespan_days = metrics::makespan_working_days(&self.catalog, &entries);
        let lateness = metrics::product_lateness(&self.catalog, &entries);
        let utilization = metrics::utilization(&self.catalog, &entries, makespan_days);
        let on_time_rate = if lateness.is_empty() {
            0.0
        } else {
            lateness.values().filter(|l| l.on_time).count() as f64 / lateness.len() as f64 * 100.0
        };
        let priority_list = self.priority_list(graph, &entries);
        let (predecessors, successors) = graph.maps_by_original(&self.catalog);

        info!(
            makespan_days,
            scheduled = entries.len(),
            failed = failed.len(),
            on_time_rate,
            "scenario run complete"
        );

        ScenarioResult {
            mode: config.mode.clone(),
            status: ScenarioStatus::Success,
            total_workforce: self.catalog.total_workforce(),
            entries,
            failed,
            makespan_days,
            lateness,
            utilization,
            on_time_rate,
            optimized_capacities,
            priority_list,
            predecessors,
            successors,
            objective,
        }
    }

    /// Presentation list: schedule entries ordered by `(start, slack)` with
    /// 1-based ordinals and bucketed criticality.
    fn priority_list(
        &self,
        graph: &DependencyGraph,
        entries: &BTreeMap<InstanceId, ScheduleEntry>,
    ) -> Vec<PriorityEntry> {
        let mut rows: Vec<PriorityEntry> = entries
            .iter()
            .map(|(key, entry)| {
                let slack_hours = metrics::slack_hours(&self.catalog, graph, entries, key);
                PriorityEntry {
                    ordinal: 0,
                    instance: key.clone(),
                    display_name: self.display_name(key, entry),
                    kind: entry.kind,
                    criticality: Criticality::from_slack_hours(slack_hours),
                    product: entry.product.clone(),
                    start: entry.start,
                    end: entry.end,
                    slack_hours,
                    shift: entry.shift,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            let slack_a = a.slack_hours.unwrap_or(f64::INFINITY);
            let slack_b = b.slack_hours.unwrap_or(f64::INFINITY);
            a.start
                .cmp(&b.start)
                .then(slack_a.partial_cmp(&slack_b).unwrap_or(std::cmp::Ordering::Equal))
        });
        for (index, row) in rows.iter_mut().enumerate() {
            row.ordinal = index + 1;
        }
        rows
    }

    fn display_name(&self, key: &str, entry: &ScheduleEntry) -> String {
        let logical = logical_instance_id(key);
        let product = entry.product.as_deref().unwrap_or("Unknown");
        let instance = self.catalog.instance(logical);
        let original = instance.map(|i| i.original.as_str()).unwrap_or(logical);

        let base = match entry.kind {
            TaskKind::QualityInspection => {
                let primary_original = instance
                    .and_then(|i| i.primary.as_deref())
                    .and_then(|p| self.catalog.instance(p))
                    .map(|p| p.original.clone());
                match primary_original {
                    Some(primary) => format!("{product} QI for Task {primary}"),
                    None => format!("{product} QI {original}"),
                }
            }
            TaskKind::LatePart => format!("{product} Late Part {original}"),
            TaskKind::Rework => format!("{product} Rework {original}"),
            TaskKind::Production | TaskKind::CustomerInspection => {
                format!("{product} Task {original}")
            }
        };

        match key.rsplit_once(taktplan_core::PART_SEPARATOR) {
            Some((_, part)) if entry.split_part => format!("{base} (Part {part})"),
            _ => base,
        }
    }
}

type SolveParts = (
    BTreeMap<InstanceId, ScheduleEntry>,
    BTreeSet<InstanceId>,
    Option<i64>,
    Option<BTreeMap<String, u32>>,
);
