//! # taktplan-solver
//!
//! Scheduling solvers for the taktplan production scheduling engine.
//!
//! This crate provides:
//! - The working-minute calendar projection ([`calendar::WorkingCalendar`])
//! - Dynamic dependency weaving with inspection chaining ([`weaver`])
//! - A CP model and driver over cumulative team capacities ([`cp`], behind
//!   the default `cp-solver` feature)
//! - A shift-aware greedy fallback scheduler ([`heuristic`])
//! - Schedule metrics and validation ([`metrics`], [`validate`])
//! - The scenario controller ([`scenario::Scheduler`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use taktplan_core::ScenarioMode;
//! use taktplan_solver::{RunConfig, Scheduler};
//!
//! # fn run(catalog: taktplan_core::Catalog) -> Result<(), taktplan_core::ScheduleError> {
//! let mut scheduler = Scheduler::new(catalog);
//! let result = scheduler.run(&RunConfig::new(ScenarioMode::Baseline))?;
//! println!("makespan: {} working days", result.makespan_days);
//! # Ok(())
//! # }
//! ```

pub mod calendar;
#[cfg(feature = "cp-solver")]
pub mod cp;
pub mod heuristic;
pub mod metrics;
pub mod scenario;
pub mod validate;
pub mod weaver;

pub use calendar::WorkingCalendar;
pub use heuristic::HeuristicOutcome;
pub use scenario::{RunConfig, Scheduler, SolverMode};
pub use validate::{check_resource_conflicts, validate_dag, validate_schedulability, ResourceConflict};
pub use weaver::{build_dependencies, DependencyGraph, DynamicEdge};
