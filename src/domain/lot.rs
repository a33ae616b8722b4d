use chrono::NaiveDateTime;

use crate::domain::id::{GroupId, LotId, MachineId};

/// Raw step state as stored in `LotOperations.StepStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    NewAdd = 0,
    Wip = 1,
    Completed = 2,
}

impl StepStatus {
    pub fn from_code(code: i64) -> StepStatus {
        match code {
            1 => StepStatus::Wip,
            2 => StepStatus::Completed,
            _ => StepStatus::NewAdd,
        }
    }
}

/// Engine-side classification of an operation, carrying the class-specific
/// payload the model builder dispatches on.
///
/// Completed and Frozen operations are fixed intervals on a known machine.
/// WIP operations occupy their planned machine for the minutes that remain
/// at the wave origin. Normal operations are subject to optimization.
#[derive(Debug, Clone, PartialEq)]
pub enum OpClass {
    Completed { machine: MachineId, start: NaiveDateTime, end: NaiveDateTime },
    Wip { machine: MachineId, remaining_minutes: i64 },
    Frozen { machine: MachineId, start: NaiveDateTime, end: NaiveDateTime },
    Normal,
}

impl OpClass {
    pub fn is_normal(&self) -> bool {
        matches!(self, OpClass::Normal)
    }
}

/// One step of a lot, demanding a machine from `machine_group` for
/// `duration_minutes`. Ordering within the lot is strictly by `sequence`.
#[derive(Debug, Clone)]
pub struct Operation {
    pub lot_id: LotId,
    pub step: String,
    pub machine_group: GroupId,
    pub duration_minutes: i64,
    pub sequence: i64,
    pub status: StepStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub plan_check_in_time: Option<NaiveDateTime>,
    pub plan_check_out_time: Option<NaiveDateTime>,
    pub plan_machine_id: Option<MachineId>,
    pub class: OpClass,
}

#[derive(Debug, Clone)]
pub struct Lot {
    pub lot_id: LotId,
    pub priority: i64,
    pub due_date: Option<NaiveDateTime>,
    pub actual_finish_date: Option<NaiveDateTime>,
    pub lot_create_date: Option<NaiveDateTime>,
    pub plan_start_time: Option<NaiveDateTime>,

    /// Ordered by `Operation::sequence`, never empty for a schedulable lot.
    pub operations: Vec<Operation>,
}

impl Lot {
    /// Release time of the lot in minutes from the wave origin.
    ///
    /// # Returns
    /// max(0, minutes from origin to the first defined of PlanStartTime and
    /// LotCreateDate); 0 when neither is set.
    pub fn release_minutes(&self, origin: NaiveDateTime) -> i64 {
        let anchor = self.plan_start_time.or(self.lot_create_date);
        match anchor {
            Some(ts) => (ts - origin).num_minutes().max(0),
            None => 0,
        }
    }

    /// True when at least one operation still needs a solver decision.
    pub fn has_normal_ops(&self) -> bool {
        self.operations.iter().any(|op| op.class.is_normal())
    }

    /// True when any operation already carries a planned check-in, meaning a
    /// new plan for this lot is a reschedule rather than a first plan.
    pub fn had_previous_plan(&self) -> bool {
        self.operations.iter().any(|op| op.plan_check_in_time.is_some())
    }
}
