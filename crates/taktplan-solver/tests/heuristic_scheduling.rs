//! Scenario tests for the shift-aware greedy scheduler.
//!
//! The heuristic is deterministic, so these assert exact wall-clock
//! placements. The scheduling epoch is Friday 2025-08-22 06:00.

use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use taktplan_core::{Catalog, ScheduleEntry};
use taktplan_parser::parse_catalog;
use taktplan_solver::{build_dependencies, check_resource_conflicts, heuristic, DependencyGraph};

const COMMON: &str = "\
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

";

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn run(extra: &str) -> (Catalog, DependencyGraph, heuristic::HeuristicOutcome) {
    let doc = format!("{COMMON}{extra}");
    let catalog = parse_catalog(&doc).unwrap();
    let graph = build_dependencies(&catalog);
    let outcome = heuristic::schedule(&catalog, &graph, None);
    (catalog, graph, outcome)
}

fn entry<'a>(outcome: &'a heuristic::HeuristicOutcome, id: &str) -> &'a ScheduleEntry {
    outcome
        .entries
        .get(id)
        .unwrap_or_else(|| panic!("{id} not scheduled"))
}

#[test]
fn two_chained_tasks_run_back_to_back() {
    let (_, _, outcome) = run("\
==== TASK RELATIONSHIPS TABLE ====
First,Second
1,2

==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,60,Mechanic Team 1,1,Skill 1
2,120,Mechanic Team 1,1,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P1,2025-09-05

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P1,1,2
");

    assert!(outcome.failed.is_empty());
    let t1 = entry(&outcome, "P1_1");
    assert_eq!(t1.start, at(22, 6, 0));
    assert_eq!(t1.end, at(22, 7, 0));
    let t2 = entry(&outcome, "P1_2");
    assert_eq!(t2.start, at(22, 7, 0));
    assert_eq!(t2.end, at(22, 9, 0));
}

#[test]
fn inspection_chain_runs_immediately_after_primary() {
    let (catalog, _, outcome) = run("\
==== TASK RELATIONSHIPS TABLE ====
First,Second
1,2

==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,60,Mechanic Team 1,1,Skill 1
2,60,Mechanic Team 1,1,Skill 1
3,60,Mechanic Team 1,1,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P1,2025-09-05

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P1,1,3

==== QUALITY INSPECTION REQUIREMENTS ====
Primary Task,Quality Task,Quality Headcount Required,Quality Duration (minutes)
1,601,1,30

==== CUSTOMER INSPECTION REQUIREMENTS ====
Primary Task,Customer Task,Customer Headcount,Customer Duration
1,CC_601,1,30
");

    assert!(outcome.failed.is_empty());
    let t1 = entry(&outcome, "P1_1");
    let qi = entry(&outcome, "P1_QI_601");
    let cc = entry(&outcome, "P1_CC_601");
    let t2 = entry(&outcome, "P1_2");

    // T1 -> QI -> CC -> T2, each immediately schedulable after the last
    assert_eq!((t1.start, t1.end), (at(22, 6, 0), at(22, 7, 0)));
    assert_eq!((qi.start, qi.end), (at(22, 7, 0), at(22, 7, 30)));
    assert_eq!((cc.start, cc.end), (at(22, 7, 30), at(22, 8, 0)));
    assert_eq!(qi.resource.team, "Quality Team 1");
    assert_eq!(cc.resource.team, "Customer Team 1");

    // The mechanic crew stays blocked through its QI: the independent task 3
    // cannot start before 07:30, even though the crew's own task ended 07:00
    let t3 = entry(&outcome, "P1_3");
    assert_eq!(t3.start, at(22, 7, 30));

    // Successor waits for the whole chain and for the crew to free up
    assert_eq!(t2.start, at(22, 8, 30));

    assert!(check_resource_conflicts(&catalog, &outcome.entries).is_empty());
}

#[test]
fn late_part_waits_for_on_dock_plus_delay() {
    let (_, _, outcome) = run("\
==== TASK RELATIONSHIPS TABLE ====
First,Second
5,6

==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
5,60,Mechanic Team 1,1,Skill 1
6,60,Mechanic Team 1,1,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P1,2025-09-12

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P1,5,6

==== LATE PARTS RELATIONSHIPS TABLE ====
First,Second,Estimated On Dock Date,Product Line
LP_1001,5,2025-08-26,P1

==== LATE PARTS TASK DETAILS ====
Task,Duration (minutes),Resource Type,Mechanics Required
LP_1001,45,Mechanic Team 1,1
");

    assert!(outcome.failed.is_empty());
    // On dock Tuesday the 26th, one day of receiving delay: workable from
    // the Wednesday opening
    let lp = entry(&outcome, "LP_1001");
    assert_eq!(lp.start, at(27, 6, 0));
    assert_eq!(lp.end, at(27, 6, 45));

    // Its successor follows once the part is installed
    let t5 = entry(&outcome, "P1_5");
    assert!(t5.start >= lp.end, "successor started before the late part landed");
}

#[test]
fn capacity_contention_serializes() {
    let (catalog, _, outcome) = run("\
==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,60,Mechanic Team 1,1,Skill 1
2,60,Mechanic Team 1,1,Skill 1
3,60,Mechanic Team 1,1,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P1,2025-09-05

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P1,1,3
");

    assert!(outcome.failed.is_empty());
    let mut starts: Vec<NaiveDateTime> = outcome.entries.values().map(|e| e.start).collect();
    starts.sort();
    assert_eq!(starts, vec![at(22, 6, 0), at(22, 7, 0), at(22, 8, 0)]);

    // Three 60-minute tasks on a single seat: total span is at least 180min
    let first = outcome.entries.values().map(|e| e.start).min().unwrap();
    let last = outcome.entries.values().map(|e| e.end).max().unwrap();
    assert!((last - first).num_minutes() >= 180);
    assert!(check_resource_conflicts(&catalog, &outcome.entries).is_empty());
}

#[test]
fn oversized_task_splits_across_shift_windows() {
    // 600 minutes cannot fit the 510-minute 1st shift window
    let (_, _, outcome) = run("\
==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,600,Mechanic Team 1,1,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P1,2025-09-05

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P1,1,1
");

    assert!(outcome.failed.is_empty());
    assert!(!outcome.entries.contains_key("P1_1"));
    let part1 = entry(&outcome, "P1_1---part1");
    let part2 = entry(&outcome, "P1_1---part2");
    assert!(part1.split_part && part2.split_part);
    assert_eq!(
        part1.duration_minutes + part2.duration_minutes,
        600,
        "parts must cover the full duration"
    );
    assert!(part1.duration_minutes >= 60 && part2.duration_minutes >= 60);
    assert!(part2.start >= part1.end, "parts must be chained in order");
}

#[test]
fn unplaceable_task_lands_in_the_failed_set() {
    // Task 2 needs 3 mechanics but the team seats only 1; the pre-solve
    // validation would normally catch this, the heuristic records a failure
    let (_, _, outcome) = run("\
==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,60,Mechanic Team 1,1,Skill 1
2,60,Mechanic Team 1,3,Skill 1

==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P1,2025-09-05

==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P1,1,2
");

    assert!(outcome.entries.contains_key("P1_1"));
    assert!(outcome.failed.contains("P1_2"));
}
