//! Scenario-controller tests on the deterministic heuristic path.

use pretty_assertions::assert_eq;
use taktplan_core::{ScenarioMode, ScenarioStatus};
use taktplan_parser::parse_catalog;
use taktplan_solver::{RunConfig, Scheduler, SolverMode};

const TWO_PRODUCT_DOC: &str = "\
==== SHIFT WORKING HOURS ====
Shift,Start,End
1st,6:00,14:30
2nd,14:30,23:00
3rd,23:00,6:00

==== MECHANIC TEAM CAPACITY ====
Mechanic Team,Capacity
Mechanic Team 1 (Skill 1),1

==== QUALITY TEAM CAPACITY ====
Quality Team,Capacity
Quality Team 1,1

==== CUSTOMER TEAM CAPACITY ====
Customer Team,Capacity
Customer Team 1,1

==== MECHANIC TEAM WORKING CALENDARS ====
Mechanic Team,Shift
Mechanic Team 1,1st

==== QUALITY TEAM WORKING CALENDARS ====
Quality Team,Shift
Quality Team 1,1st

==== CUSTOMER TEAM WORKING CALENDARS ====
Customer Team,Shift
Customer Team 1,1st

==== TASK RELATIONSHIPS TABLE ====
First,Second
1,2

==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,60,Mechanic Team 1,1,Skill 1
2,60,Mechanic Team 1,1,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
Line A,2025-09-19
Line B,2025-09-05

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
Line A,1,2
Line B,1,2
";

fn heuristic_config(mode: ScenarioMode) -> RunConfig {
    RunConfig::new(mode).with_solver(SolverMode::Heuristic)
}

#[test]
fn baseline_run_reports_a_complete_scenario() {
    let catalog = parse_catalog(TWO_PRODUCT_DOC).unwrap();
    let mut scheduler = Scheduler::new(catalog);
    let result = scheduler
        .run(&heuristic_config(ScenarioMode::Baseline))
        .unwrap();

    assert_eq!(result.status, ScenarioStatus::Success);
    assert!(result.failed.is_empty());
    assert_eq!(result.entries.len(), 4);
    assert!(result.makespan_days >= 1);
    assert_eq!(result.on_time_rate, 100.0);
    assert_eq!(result.total_workforce, 3);

    // Both products are measured against their deliveries
    assert!(result.lateness["Line A"].on_time);
    assert!(result.lateness["Line B"].on_time);

    // Dependency maps are keyed by original ids
    assert_eq!(result.predecessors["2"], vec!["1"]);
    assert_eq!(result.successors["1"], vec!["2"]);

    for value in result.utilization.values() {
        assert!((0.0..=100.0).contains(value));
    }
}

#[test]
fn priority_list_is_ordered_with_sequential_ordinals() {
    let catalog = parse_catalog(TWO_PRODUCT_DOC).unwrap();
    let mut scheduler = Scheduler::new(catalog);
    let result = scheduler
        .run(&heuristic_config(ScenarioMode::Baseline))
        .unwrap();

    let ordinals: Vec<usize> = result.priority_list.iter().map(|p| p.ordinal).collect();
    assert_eq!(ordinals, (1..=result.priority_list.len()).collect::<Vec<_>>());

    for pair in result.priority_list.windows(2) {
        assert!(pair[0].start <= pair[1].start, "priority list must be start-ordered");
    }
}

#[test]
fn capacities_are_restored_after_every_run() {
    let catalog = parse_catalog(TWO_PRODUCT_DOC).unwrap();
    let original = catalog.mechanic_capacity.clone();
    let mut scheduler = Scheduler::new(catalog);

    scheduler
        .run(&heuristic_config(ScenarioMode::Baseline))
        .unwrap();
    assert_eq!(scheduler.catalog.mechanic_capacity, original);

    // The joint mode falls back to fixed capacities on the heuristic path
    // and must also leave the tables untouched
    scheduler
        .run(&heuristic_config(ScenarioMode::JointOptimize))
        .unwrap();
    assert_eq!(scheduler.catalog.mechanic_capacity, original);
}

#[test]
fn identical_runs_produce_identical_schedules() {
    let catalog = parse_catalog(TWO_PRODUCT_DOC).unwrap();
    let mut scheduler = Scheduler::new(catalog);
    let config = heuristic_config(ScenarioMode::Baseline);

    let first = scheduler.run(&config).unwrap();
    let second = scheduler.run(&config).unwrap();

    assert_eq!(first.entries, second.entries);
    assert_eq!(first.makespan_days, second.makespan_days);
    assert_eq!(
        first.lateness.keys().collect::<Vec<_>>(),
        second.lateness.keys().collect::<Vec<_>>()
    );
}

#[test]
fn what_if_pulls_the_prioritized_product_forward() {
    let catalog = parse_catalog(TWO_PRODUCT_DOC).unwrap();
    let mut scheduler = Scheduler::new(catalog);

    // Baseline: Line B's earlier delivery wins the shared mechanic seat,
    // pushing Line A's completion out
    let baseline = scheduler
        .run(&heuristic_config(ScenarioMode::Baseline))
        .unwrap();
    let what_if = scheduler
        .run(&heuristic_config(ScenarioMode::WhatIf {
            product: "Line A".into(),
        }))
        .unwrap();

    let baseline_a = baseline.lateness["Line A"].completion.unwrap();
    let what_if_a = what_if.lateness["Line A"].completion.unwrap();
    assert!(
        what_if_a <= baseline_a,
        "prioritizing Line A must not delay it ({what_if_a} vs {baseline_a})"
    );

    let baseline_b = baseline.lateness["Line B"].completion.unwrap();
    let what_if_b = what_if.lateness["Line B"].completion.unwrap();
    assert!(
        what_if_b >= baseline_b,
        "prioritizing Line A should not improve Line B"
    );
}

#[test]
fn cycle_in_constraints_is_fatal() {
    let doc = TWO_PRODUCT_DOC.to_string()
        + "
==== REWORK RELATIONSHIPS TABLE ====
First,Second,Product Line
2,1,Line A
";
    let catalog = parse_catalog(&doc).unwrap();
    let mut scheduler = Scheduler::new(catalog);
    let err = scheduler
        .run(&heuristic_config(ScenarioMode::Baseline))
        .unwrap_err();
    assert!(matches!(err, taktplan_core::ScheduleError::DagCycle { .. }));
}
