use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::id::{LotId, MachineId, ScheduleId};
use crate::domain::lot::OpClass;

/// Class tag of a solved operation, kept alongside the solved times so the
/// writer and the artifact emitter can dispatch without the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvedClass {
    Completed,
    Wip,
    Frozen,
    Normal,
}

impl SolvedClass {
    pub fn of(class: &OpClass) -> SolvedClass {
        match class {
            OpClass::Completed { .. } => SolvedClass::Completed,
            OpClass::Wip { .. } => SolvedClass::Wip,
            OpClass::Frozen { .. } => SolvedClass::Frozen,
            OpClass::Normal => SolvedClass::Normal,
        }
    }
}

/// A solved interval in integer minutes from the wave origin, carried into
/// later waves as an immovable occupancy on its machine.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedInterval {
    pub start_min: i64,
    pub end_min: i64,
    pub machine: MachineId,
}

/// One operation's solved placement, in both absolute timestamps (for the
/// writer and artifacts) and origin-relative minutes (for the carry-map).
#[derive(Debug, Clone)]
pub struct SolvedOp {
    pub lot_id: LotId,
    pub step: String,
    /// 1-based position of the step within its lot.
    pub step_idx: i64,
    pub class: SolvedClass,
    pub machine: MachineId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub start_min: i64,
    pub end_min: i64,
}

impl SolvedOp {
    pub fn duration_minutes(&self) -> i64 {
        self.end_min - self.start_min
    }
}

/// New entry appended to an operation's `PlanHistory` JSON array. Keys are
/// literal and case-sensitive; they match the store collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanHistoryEntry {
    #[serde(rename = "PlanID")]
    pub plan_id: String,
    #[serde(rename = "PlanCheckInTime")]
    pub plan_check_in_time: String,
    #[serde(rename = "PlanCheckOutTime")]
    pub plan_check_out_time: String,
    #[serde(rename = "PlanMachineId")]
    pub plan_machine_id: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: String,
}

/// Outcome of a full engine run, returned by `run_schedule`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub schedule_id: ScheduleId,
    pub waves_total: usize,
    pub waves_failed: usize,
    pub lots_loaded: usize,
    pub has_solution: bool,
    pub partial_write: bool,
    pub earliest_start: Option<NaiveDateTime>,
    pub latest_end: Option<NaiveDateTime>,
    pub duration_str: String,
}
