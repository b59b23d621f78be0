//! # taktplan-core
//!
//! Core domain model for the taktplan production scheduling engine.
//!
//! This crate provides:
//! - Domain types: `Catalog`, `TaskInstance`, `ResourceKey`, `Shift`, `ProductLine`
//! - The dynamic relationship algebra (`Relationship`) and task taxonomy (`TaskKind`)
//! - Schedule and scenario result types consumed by external collaborators
//! - Error types shared across the loader and the solvers
//!
//! ## Example
//!
//! ```rust
//! use taktplan_core::{Relationship, ResourceKey, TaskKind};
//!
//! let key = ResourceKey::mechanic("Mechanic Team 1", Some("Skill 2"));
//! assert_eq!(key.label(), "Mechanic Team 1 (Skill 2)");
//! assert_eq!(Relationship::normalize("FS"), Relationship::FinishToStart);
//! assert!(TaskKind::Rework.is_mechanic_work());
//! ```

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// ============================================================================
// Type Aliases & Constants
// ============================================================================

/// Unique identifier for a product line (e.g. "Product A")
pub type ProductId = String;

/// Globally unique identifier for a task instance (e.g. "Product A_42", "LP_1001")
pub type InstanceId = String;

/// Working minutes per shift-day used by the dense minute index
pub const MINUTES_PER_DAY: i64 = 8 * 60;

/// Clock hour at which a working day opens
pub const DAY_OPENING_HOUR: u32 = 6;

/// Makespan sentinel reported when any instance is unscheduled
pub const MAKESPAN_SENTINEL: u32 = 999_999;

/// Separator used by the heuristic scheduler when splitting long tasks
pub const PART_SEPARATOR: &str = "---part";

/// Opening clock of a working day (06:00)
pub fn day_opening() -> NaiveTime {
    NaiveTime::from_hms_opt(DAY_OPENING_HOUR, 0, 0).expect("valid clock")
}

/// Strip a `---partN` suffix, returning the logical instance id
pub fn logical_instance_id(id: &str) -> &str {
    match id.find(PART_SEPARATOR) {
        Some(pos) => &id[..pos],
        None => id,
    }
}

/// Build the id of the `n`-th split part (1-based) of an instance
pub fn part_id(base: &str, n: usize) -> InstanceId {
    format!("{base}{PART_SEPARATOR}{n}")
}

// ============================================================================
// Shifts & Clock Parsing
// ============================================================================

/// The three plant shifts
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShiftId {
    First,
    Second,
    Third,
}

impl ShiftId {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1st" | "1" | "First" | "first" => Some(ShiftId::First),
            "2nd" | "2" | "Second" | "second" => Some(ShiftId::Second),
            "3rd" | "3" | "Third" | "third" => Some(ShiftId::Third),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftId::First => "1st",
            ShiftId::Second => "2nd",
            ShiftId::Third => "3rd",
        }
    }
}

impl std::fmt::Display for ShiftId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A working shift window; the 3rd shift crosses midnight (start > end)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Shift {
    pub fn crosses_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Window length in minutes, accounting for the overnight wrap
    pub fn duration_minutes(&self) -> i64 {
        let start = i64::from(self.start.hour()) * 60 + i64::from(self.start.minute());
        let end = i64::from(self.end.hour()) * 60 + i64::from(self.end.minute());
        if self.crosses_midnight() {
            (24 * 60 - start) + end
        } else {
            end - start
        }
    }
}

/// Parse a clock field in 24-hour `HH:MM` or `h:mm AM/PM` form.
///
/// All shift and calendar clocks in the input document go through this one
/// parser.
pub fn parse_clock(raw: &str) -> Result<NaiveTime, LoadError> {
    let s = raw.trim();
    let upper = s.to_ascii_uppercase();
    let (body, meridiem) = if let Some(stripped) = upper.strip_suffix("PM") {
        (stripped.trim_end().to_string(), Some(true))
    } else if let Some(stripped) = upper.strip_suffix("AM") {
        (stripped.trim_end().to_string(), Some(false))
    } else {
        (upper, None)
    };

    let mut parts = body.split(':');
    let hour: u32 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(|| LoadError::Clock(raw.to_string()))?;
    let minute: u32 = match parts.next() {
        Some(p) => p
            .trim()
            .parse()
            .map_err(|_| LoadError::Clock(raw.to_string()))?,
        None => 0,
    };

    let hour = match meridiem {
        Some(true) if hour != 12 => hour + 12,
        Some(false) if hour == 12 => 0,
        _ => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| LoadError::Clock(raw.to_string()))
}

// ============================================================================
// Relationships
// ============================================================================

/// Precedence relationship between two task instances
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    /// Finish <= Start
    #[default]
    FinishToStart,
    /// Finish = Start
    FinishEqualsStart,
    /// Start <= Start
    StartToStart,
    /// Start = Start
    StartEqualsStart,
    /// Finish <= Finish
    FinishToFinish,
    /// Start <= Finish
    StartToFinish,
}

impl Relationship {
    /// Normalize the relationship spellings seen in input documents.
    /// Unknown strings fall back to the Finish <= Start default.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim() {
            "" => Relationship::FinishToStart,
            "FS" | "F-S" | "Finish-Start" | "Finish <= Start" => Relationship::FinishToStart,
            "F=S" | "Finish=Start" | "Finish = Start" => Relationship::FinishEqualsStart,
            "SS" | "S-S" | "Start-Start" | "Start <= Start" => Relationship::StartToStart,
            "S=S" | "Start=Start" | "Start = Start" => Relationship::StartEqualsStart,
            "FF" | "F-F" | "Finish-Finish" | "Finish <= Finish" => Relationship::FinishToFinish,
            "SF" | "S-F" | "Start-Finish" | "Start <= Finish" => Relationship::StartToFinish,
            other => {
                tracing::warn!(relationship = other, "unknown relationship type, using FS");
                Relationship::FinishToStart
            }
        }
    }

    /// A blocking relationship forces the successor to wait for the
    /// predecessor's placement before it can be scheduled greedily.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Relationship::FinishToStart
                | Relationship::FinishEqualsStart
                | Relationship::FinishToFinish
        )
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Relationship::FinishToStart => "Finish <= Start",
            Relationship::FinishEqualsStart => "Finish = Start",
            Relationship::StartToStart => "Start <= Start",
            Relationship::StartEqualsStart => "Start = Start",
            Relationship::FinishToFinish => "Finish <= Finish",
            Relationship::StartToFinish => "Start <= Finish",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Task Taxonomy & Resources
// ============================================================================

/// The five kinds of schedulable task instances
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Production,
    LatePart,
    Rework,
    QualityInspection,
    CustomerInspection,
}

impl TaskKind {
    pub fn is_inspection(&self) -> bool {
        matches!(self, TaskKind::QualityInspection | TaskKind::CustomerInspection)
    }

    /// Production, late-part and rework instances occupy mechanic crews
    pub fn is_mechanic_work(&self) -> bool {
        matches!(self, TaskKind::Production | TaskKind::LatePart | TaskKind::Rework)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Production => "Production",
            TaskKind::LatePart => "Late Part",
            TaskKind::Rework => "Rework",
            TaskKind::QualityInspection => "Quality Inspection",
            TaskKind::CustomerInspection => "Customer",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which capacity table a resource key is drawn from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Mechanic,
    Quality,
    Customer,
}

/// Identity under which capacity and shift data are keyed.
///
/// Mechanic resources carry the skill sub-partition; quality and customer
/// resources are keyed by team alone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub team: String,
    pub skill: Option<String>,
}

impl ResourceKey {
    pub fn team_only(team: impl Into<String>) -> Self {
        Self { team: team.into(), skill: None }
    }

    pub fn mechanic(team: impl Into<String>, skill: Option<&str>) -> Self {
        Self {
            team: team.into(),
            skill: skill.map(str::to_string),
        }
    }

    /// Combined capacity-table label, e.g. `Mechanic Team 1 (Skill 2)`
    pub fn label(&self) -> String {
        match &self.skill {
            Some(skill) => format!("{} ({})", self.team, skill),
            None => self.team.clone(),
        }
    }

    /// Parse a capacity-table label back into a key
    pub fn from_label(label: &str) -> Self {
        match label.split_once(" (") {
            Some((team, rest)) => Self {
                team: team.trim().to_string(),
                skill: Some(rest.trim_end_matches(')').trim().to_string()),
            },
            None => Self::team_only(label.trim()),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

// ============================================================================
// Catalog Definitions
// ============================================================================

/// A baseline task definition from the catalog tables
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaselineTaskDef {
    pub id: u32,
    pub duration_minutes: u32,
    pub team: String,
    pub skill: Option<String>,
    pub headcount: u32,
    /// Predecessor catalog ids
    pub dependencies: Vec<u32>,
}

/// A product line with its delivery commitment and baseline task range
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductLine {
    pub id: ProductId,
    pub delivery: NaiveDateTime,
    /// Inclusive `[start, end]` range of baseline catalog ids still to build
    pub task_range: (u32, u32),
}

/// A concrete task instance produced by expansion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub kind: TaskKind,
    /// Owning product; `None` only for late parts with no traceable product
    pub product: Option<ProductId>,
    pub duration_minutes: u32,
    pub headcount: u32,
    pub resource: ResourceKey,
    pub resource_kind: ResourceKind,
    /// Primary instance for inspection kinds
    pub primary: Option<InstanceId>,
    /// Estimated on-dock timestamp for late parts
    pub on_dock: Option<NaiveDateTime>,
    /// Original catalog / CSV task id this instance was expanded from
    pub original: String,
}

/// Baseline precedence over catalog ids, expanded per product by the weaver
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaselineEdge {
    pub first: u32,
    pub second: u32,
    pub relationship: Relationship,
}

/// Late-part or rework precedence over instance-level ids.
///
/// Endpoints may be numeric strings (a baseline catalog id, resolved per
/// product) or verbatim instance ids. `on_dock` is set for late-part rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SideEdge {
    pub first: String,
    pub second: String,
    pub relationship: Relationship,
    pub product: Option<ProductId>,
    pub on_dock: Option<NaiveDateTime>,
}

/// Everything the loader produces: typed tables, the instance arena and the
/// inspection maps. The scheduler owns exactly one catalog at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Catalog {
    /// Scheduling epoch: minute zero of the working calendar
    pub epoch: NaiveDateTime,
    /// Calendar days between a part's on-dock date and its first usable day
    pub late_part_delay_days: i64,

    pub shifts: BTreeMap<ShiftId, Shift>,

    // Capacity tables, keyed by label (mechanic tables also carry the
    // aggregated base-team rows)
    pub mechanic_capacity: BTreeMap<String, u32>,
    pub quality_capacity: BTreeMap<String, u32>,
    pub customer_capacity: BTreeMap<String, u32>,

    pub mechanic_shifts: BTreeMap<String, Vec<ShiftId>>,
    pub quality_shifts: BTreeMap<String, Vec<ShiftId>>,
    pub customer_shifts: BTreeMap<String, Vec<ShiftId>>,

    pub baseline: BTreeMap<u32, BaselineTaskDef>,
    pub products: BTreeMap<ProductId, ProductLine>,
    pub holidays: BTreeMap<ProductId, BTreeSet<NaiveDate>>,

    pub instances: BTreeMap<InstanceId, TaskInstance>,
    /// (product, catalog id) -> baseline instance id
    pub instance_index: BTreeMap<(ProductId, u32), InstanceId>,
    /// primary instance -> its quality inspection
    pub quality_for: BTreeMap<InstanceId, InstanceId>,
    /// primary instance -> its customer inspection
    pub customer_for: BTreeMap<InstanceId, InstanceId>,

    pub baseline_edges: Vec<BaselineEdge>,
    pub late_part_edges: Vec<SideEdge>,
    pub rework_edges: Vec<SideEdge>,
    /// Late-part instance id -> estimated on-dock timestamp
    pub on_dock: BTreeMap<InstanceId, NaiveDateTime>,

    // Capacities captured at load time, restored between scenario runs
    pub original_mechanic_capacity: BTreeMap<String, u32>,
    pub original_quality_capacity: BTreeMap<String, u32>,
    pub original_customer_capacity: BTreeMap<String, u32>,

    version: u64,
}

impl Default for Catalog {
    fn default() -> Self {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
            .expect("valid date")
            .and_hms_opt(0, 0, 0)
            .expect("valid clock");
        Self::new(epoch)
    }
}

impl Catalog {
    pub fn new(epoch: NaiveDateTime) -> Self {
        Self {
            epoch,
            late_part_delay_days: 1,
            shifts: BTreeMap::new(),
            mechanic_capacity: BTreeMap::new(),
            quality_capacity: BTreeMap::new(),
            customer_capacity: BTreeMap::new(),
            mechanic_shifts: BTreeMap::new(),
            quality_shifts: BTreeMap::new(),
            customer_shifts: BTreeMap::new(),
            baseline: BTreeMap::new(),
            products: BTreeMap::new(),
            holidays: BTreeMap::new(),
            instances: BTreeMap::new(),
            instance_index: BTreeMap::new(),
            quality_for: BTreeMap::new(),
            customer_for: BTreeMap::new(),
            baseline_edges: Vec::new(),
            late_part_edges: Vec::new(),
            rework_edges: Vec::new(),
            on_dock: BTreeMap::new(),
            original_mechanic_capacity: BTreeMap::new(),
            original_quality_capacity: BTreeMap::new(),
            original_customer_capacity: BTreeMap::new(),
            version: 0,
        }
    }

    /// Version counter for derived-cache invalidation. Bump on any catalog
    /// mutation that affects the dependency graph.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn instance(&self, id: &str) -> Option<&TaskInstance> {
        self.instances.get(id)
    }

    /// Weekday in Mon..Fri and not a holiday of the given product.
    /// Unknown or absent products have an empty holiday set.
    pub fn is_working_day(&self, date: NaiveDate, product: Option<&str>) -> bool {
        if date.weekday().num_days_from_monday() >= 5 {
            return false;
        }
        match product.and_then(|p| self.holidays.get(p)) {
            Some(days) => !days.contains(&date),
            None => true,
        }
    }

    /// Current capacity for a resource key
    pub fn capacity_of(&self, key: &ResourceKey, kind: ResourceKind) -> Option<u32> {
        match kind {
            ResourceKind::Mechanic => self
                .mechanic_capacity
                .get(&key.label())
                .or_else(|| self.mechanic_capacity.get(&key.team))
                .copied(),
            ResourceKind::Quality => self.quality_capacity.get(&key.team).copied(),
            ResourceKind::Customer => self.customer_capacity.get(&key.team).copied(),
        }
    }

    /// Shift set of a resource key. Mechanic shifts are kept on the base
    /// team; skill partitions inherit them. Defaults to 1st shift.
    pub fn shifts_of(&self, key: &ResourceKey, kind: ResourceKind) -> Vec<ShiftId> {
        let table = match kind {
            ResourceKind::Mechanic => &self.mechanic_shifts,
            ResourceKind::Quality => &self.quality_shifts,
            ResourceKind::Customer => &self.customer_shifts,
        };
        table
            .get(&key.team)
            .or_else(|| table.get(&key.label()))
            .cloned()
            .unwrap_or_else(|| vec![ShiftId::First])
    }

    /// Capture the three capacity maps for later restoration
    pub fn capture_capacities(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            mechanic: self.mechanic_capacity.clone(),
            quality: self.quality_capacity.clone(),
            customer: self.customer_capacity.clone(),
        }
    }

    pub fn restore_capacities(&mut self, snapshot: CapacitySnapshot) {
        self.mechanic_capacity = snapshot.mechanic;
        self.quality_capacity = snapshot.quality;
        self.customer_capacity = snapshot.customer;
    }

    /// Reset the working capacity maps to the values captured at load time
    pub fn restore_original_capacities(&mut self) {
        self.mechanic_capacity = self.original_mechanic_capacity.clone();
        self.quality_capacity = self.original_quality_capacity.clone();
        self.customer_capacity = self.original_customer_capacity.clone();
    }

    /// Minimum viable capacity per resource label: the largest single-task
    /// headcount requirement routed to it. Drives joint-optimization lower
    /// bounds and the pre-solve feasibility check.
    pub fn minimum_team_requirements(&self) -> BTreeMap<String, u32> {
        let mut mins: BTreeMap<String, u32> = BTreeMap::new();
        for instance in self.instances.values() {
            let label = instance.resource.label();
            let entry = mins.entry(label).or_insert(0);
            *entry = (*entry).max(instance.headcount);
        }
        mins
    }

    /// Total headcount across all teams. Mechanic base-team rows that merely
    /// aggregate skill partitions are not double counted.
    pub fn total_workforce(&self) -> u32 {
        let skilled_bases: BTreeSet<&str> = self
            .mechanic_capacity
            .keys()
            .filter_map(|label| label.split_once(" (").map(|(base, _)| base.trim()))
            .collect();

        let mechanics: u32 = self
            .mechanic_capacity
            .iter()
            .filter(|(label, _)| {
                label.contains(" (") || !skilled_bases.contains(label.as_str())
            })
            .map(|(_, cap)| cap)
            .sum();

        mechanics
            + self.quality_capacity.values().sum::<u32>()
            + self.customer_capacity.values().sum::<u32>()
    }
}

/// Capacity maps captured before a scenario run mutates them
#[derive(Clone, Debug)]
pub struct CapacitySnapshot {
    pub mechanic: BTreeMap<String, u32>,
    pub quality: BTreeMap<String, u32>,
    pub customer: BTreeMap<String, u32>,
}

// ============================================================================
// Schedule & Scenario Results
// ============================================================================

/// One scheduled interval. Keys in the schedule map may carry a `---partN`
/// suffix when the heuristic split a long task; all parts share the logical
/// instance id returned by [`logical_instance_id`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub instance: InstanceId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub resource: ResourceKey,
    pub kind: TaskKind,
    pub product: Option<ProductId>,
    pub duration_minutes: u32,
    pub headcount: u32,
    pub shift: Option<ShiftId>,
    pub split_part: bool,
}

/// Which objective / capacity model a scenario run uses
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioMode {
    /// Fixed CSV capacities, minimize total lateness
    Baseline,
    /// Jointly minimize `10 * latenessDays + total workforce`
    JointOptimize,
    /// Pull one product forward at the expense of the rest
    WhatIf { product: ProductId },
}

impl ScenarioMode {
    /// Default wall-clock budget for the CP driver, in seconds
    pub fn default_time_limit(&self) -> u64 {
        match self {
            ScenarioMode::Baseline => 60,
            ScenarioMode::JointOptimize => 90,
            ScenarioMode::WhatIf { .. } => 60,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioStatus {
    Success,
    Failed,
}

/// Delivery outcome for one product line
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductLateness {
    pub delivery: NaiveDateTime,
    pub completion: Option<NaiveDateTime>,
    pub lateness_days: i64,
    pub on_time: bool,
    pub task_count: usize,
}

/// Bucketed slack classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    Critical,
    Buffer,
    Flexible,
}

impl Criticality {
    /// CRITICAL below two days of slack, BUFFER below five, else FLEXIBLE.
    /// Unbounded slack is FLEXIBLE.
    pub fn from_slack_hours(slack_hours: Option<f64>) -> Self {
        match slack_hours {
            Some(h) if h < 2.0 * 24.0 => Criticality::Critical,
            Some(h) if h < 5.0 * 24.0 => Criticality::Buffer,
            _ => Criticality::Flexible,
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Criticality::Critical => "CRITICAL",
            Criticality::Buffer => "BUFFER",
            Criticality::Flexible => "FLEXIBLE",
        };
        f.write_str(s)
    }
}

/// One row of the presentation priority list
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriorityEntry {
    /// 1-based ordinal after sorting by `(start, slack)`
    pub ordinal: usize,
    pub instance: InstanceId,
    pub display_name: String,
    pub kind: TaskKind,
    pub criticality: Criticality,
    pub product: Option<ProductId>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// `None` means unbounded slack
    pub slack_hours: Option<f64>,
    pub shift: Option<ShiftId>,
}

/// Immutable snapshot handed to callers after a scenario run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub mode: ScenarioMode,
    pub status: ScenarioStatus,
    pub entries: BTreeMap<InstanceId, ScheduleEntry>,
    /// Instances the heuristic gave up on
    pub failed: BTreeSet<InstanceId>,
    pub makespan_days: u32,
    pub lateness: BTreeMap<ProductId, ProductLateness>,
    /// Percent utilization per resource label over the makespan
    pub utilization: BTreeMap<String, f64>,
    pub on_time_rate: f64,
    pub total_workforce: u32,
    /// Per-resource capacities chosen by the joint-optimization mode
    pub optimized_capacities: Option<BTreeMap<String, u32>>,
    pub priority_list: Vec<PriorityEntry>,
    /// original-id -> original predecessor ids
    pub predecessors: BTreeMap<String, Vec<String>>,
    /// original-id -> original successor ids
    pub successors: BTreeMap<String, Vec<String>>,
    /// Solver objective value, when the CP path produced the schedule
    pub objective: Option<i64>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading a catalog document
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error reading catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("section `{section}`, row {row}: missing or invalid field `{field}`")]
    Parse {
        section: String,
        row: usize,
        field: String,
    },

    #[error("unparseable clock value `{0}`")]
    Clock(String),

    #[error("core table `{0}` is empty after load")]
    EmptyTable(&'static str),
}

/// Errors raised during validation and solving
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("dependency cycle: {}", path.join(" -> "))]
    DagCycle { path: Vec<InstanceId> },

    #[error("task {task}: team `{team}` not present in capacity tables")]
    UnresolvableTeam { task: InstanceId, team: String },

    #[error("task {task} needs {need} people but `{team}` only has {capacity}")]
    InfeasibleCapacity {
        task: InstanceId,
        team: String,
        need: u32,
        capacity: u32,
    },

    #[error("working-time horizon exceeded")]
    HorizonExceeded,

    #[error("solver hit its wall-clock budget without a feasible schedule")]
    SolverTimeout,

    #[error("scheduling model proven infeasible")]
    SolverInfeasible,

    #[error("task {task} could not be scheduled: {reason}")]
    SchedulingFailure { task: InstanceId, reason: String },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn relationship_normalization() {
        assert_eq!(Relationship::normalize("FS"), Relationship::FinishToStart);
        assert_eq!(Relationship::normalize("Finish <= Start"), Relationship::FinishToStart);
        assert_eq!(Relationship::normalize("F=S"), Relationship::FinishEqualsStart);
        assert_eq!(Relationship::normalize("Start = Start"), Relationship::StartEqualsStart);
        assert_eq!(Relationship::normalize("S-S"), Relationship::StartToStart);
        assert_eq!(Relationship::normalize("FF"), Relationship::FinishToFinish);
        assert_eq!(Relationship::normalize("SF"), Relationship::StartToFinish);
        // Unknown spellings default to FS
        assert_eq!(Relationship::normalize("sometime later"), Relationship::FinishToStart);
        assert_eq!(Relationship::normalize(""), Relationship::FinishToStart);
    }

    #[test]
    fn blocking_relationships() {
        assert!(Relationship::FinishToStart.is_blocking());
        assert!(Relationship::FinishEqualsStart.is_blocking());
        assert!(Relationship::FinishToFinish.is_blocking());
        assert!(!Relationship::StartToStart.is_blocking());
        assert!(!Relationship::StartToFinish.is_blocking());
    }

    #[test]
    fn clock_parsing_24h() {
        assert_eq!(parse_clock("6:00").unwrap(), time(6, 0));
        assert_eq!(parse_clock("14:30").unwrap(), time(14, 30));
        assert_eq!(parse_clock("23:00").unwrap(), time(23, 0));
        assert_eq!(parse_clock(" 06:15 ").unwrap(), time(6, 15));
    }

    #[test]
    fn clock_parsing_am_pm() {
        assert_eq!(parse_clock("6:00 AM").unwrap(), time(6, 0));
        assert_eq!(parse_clock("2:30 PM").unwrap(), time(14, 30));
        assert_eq!(parse_clock("12:00 PM").unwrap(), time(12, 0));
        assert_eq!(parse_clock("12:00 AM").unwrap(), time(0, 0));
        assert_eq!(parse_clock("11:00PM").unwrap(), time(23, 0));
    }

    #[test]
    fn clock_parsing_rejects_garbage() {
        assert!(parse_clock("not a time").is_err());
        assert!(parse_clock("25:00").is_err());
    }

    #[test]
    fn third_shift_crosses_midnight() {
        let shift = Shift {
            id: ShiftId::Third,
            start: time(23, 0),
            end: time(6, 30),
        };
        assert!(shift.crosses_midnight());
        assert_eq!(shift.duration_minutes(), 60 + 6 * 60 + 30);

        let day_shift = Shift {
            id: ShiftId::First,
            start: time(6, 0),
            end: time(14, 30),
        };
        assert!(!day_shift.crosses_midnight());
        assert_eq!(day_shift.duration_minutes(), 8 * 60 + 30);
    }

    #[test]
    fn resource_key_label_roundtrip() {
        let key = ResourceKey::mechanic("Mechanic Team 3", Some("Skill 2"));
        assert_eq!(key.label(), "Mechanic Team 3 (Skill 2)");
        assert_eq!(ResourceKey::from_label("Mechanic Team 3 (Skill 2)"), key);

        let plain = ResourceKey::team_only("Quality Team 1");
        assert_eq!(plain.label(), "Quality Team 1");
        assert_eq!(ResourceKey::from_label("Quality Team 1"), plain);
    }

    #[test]
    fn split_part_ids() {
        assert_eq!(logical_instance_id("Product A_42---part2"), "Product A_42");
        assert_eq!(logical_instance_id("Product A_42"), "Product A_42");
        assert_eq!(part_id("LP_7", 1), "LP_7---part1");
    }

    #[test]
    fn criticality_thresholds() {
        assert_eq!(Criticality::from_slack_hours(Some(0.0)), Criticality::Critical);
        assert_eq!(Criticality::from_slack_hours(Some(47.9)), Criticality::Critical);
        assert_eq!(Criticality::from_slack_hours(Some(48.0)), Criticality::Buffer);
        assert_eq!(Criticality::from_slack_hours(Some(119.9)), Criticality::Buffer);
        assert_eq!(Criticality::from_slack_hours(Some(120.0)), Criticality::Flexible);
        assert_eq!(Criticality::from_slack_hours(None), Criticality::Flexible);
    }

    #[test]
    fn working_day_weekends_and_holidays() {
        let mut catalog = Catalog::new(
            NaiveDate::from_ymd_opt(2025, 8, 22)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
        );
        let holiday = NaiveDate::from_ymd_opt(2025, 8, 25).unwrap(); // a Monday
        catalog
            .holidays
            .entry("Product A".into())
            .or_default()
            .insert(holiday);

        // Friday is a working day
        let friday = NaiveDate::from_ymd_opt(2025, 8, 22).unwrap();
        assert!(catalog.is_working_day(friday, Some("Product A")));

        // Weekend never works
        let saturday = NaiveDate::from_ymd_opt(2025, 8, 23).unwrap();
        assert!(!catalog.is_working_day(saturday, Some("Product A")));

        // Product holiday only affects that product
        assert!(!catalog.is_working_day(holiday, Some("Product A")));
        assert!(catalog.is_working_day(holiday, Some("Product B")));
        assert!(catalog.is_working_day(holiday, None));
    }

    #[test]
    fn total_workforce_skips_aggregated_base_teams() {
        let mut catalog = Catalog::default();
        catalog.mechanic_capacity.insert("Mechanic Team 1 (Skill 1)".into(), 4);
        catalog.mechanic_capacity.insert("Mechanic Team 1 (Skill 2)".into(), 3);
        // Aggregated base row must not be counted twice
        catalog.mechanic_capacity.insert("Mechanic Team 1".into(), 7);
        // Plain team with no skill partition counts as itself
        catalog.mechanic_capacity.insert("Mechanic Team 2".into(), 5);
        catalog.quality_capacity.insert("Quality Team 1".into(), 2);
        catalog.customer_capacity.insert("Customer Team 1".into(), 1);

        assert_eq!(catalog.total_workforce(), 4 + 3 + 5 + 2 + 1);
    }

    #[test]
    fn minimum_team_requirements_tracks_max_headcount() {
        let mut catalog = Catalog::default();
        let key = ResourceKey::mechanic("Mechanic Team 1", Some("Skill 1"));
        for (n, headcount) in [(1u32, 2u32), (2, 5), (3, 3)] {
            catalog.instances.insert(
                format!("Product A_{n}"),
                TaskInstance {
                    id: format!("Product A_{n}"),
                    kind: TaskKind::Production,
                    product: Some("Product A".into()),
                    duration_minutes: 60,
                    headcount,
                    resource: key.clone(),
                    resource_kind: ResourceKind::Mechanic,
                    primary: None,
                    on_dock: None,
                    original: n.to_string(),
                },
            );
        }

        let mins = catalog.minimum_team_requirements();
        assert_eq!(mins.get("Mechanic Team 1 (Skill 1)"), Some(&5));
    }

    #[test]
    fn capacity_snapshot_restores_verbatim() {
        let mut catalog = Catalog::default();
        catalog.mechanic_capacity.insert("Mechanic Team 1 (Skill 1)".into(), 4);
        catalog.quality_capacity.insert("Quality Team 1".into(), 2);

        let snapshot = catalog.capture_capacities();
        catalog.mechanic_capacity.insert("Mechanic Team 1 (Skill 1)".into(), 99);
        catalog.quality_capacity.clear();

        catalog.restore_capacities(snapshot);
        assert_eq!(catalog.mechanic_capacity.get("Mechanic Team 1 (Skill 1)"), Some(&4));
        assert_eq!(catalog.quality_capacity.get("Quality Team 1"), Some(&2));
    }

    #[test]
    fn capacity_lookup_falls_back_to_base_team() {
        let mut catalog = Catalog::default();
        catalog.mechanic_capacity.insert("Mechanic Team 1".into(), 6);
        catalog
            .mechanic_shifts
            .insert("Mechanic Team 1".into(), vec![ShiftId::Second]);

        let key = ResourceKey::mechanic("Mechanic Team 1", Some("Skill 9"));
        assert_eq!(catalog.capacity_of(&key, ResourceKind::Mechanic), Some(6));
        assert_eq!(catalog.shifts_of(&key, ResourceKind::Mechanic), vec![ShiftId::Second]);
    }
}
