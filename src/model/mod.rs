use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

use crate::domain::id::{LotId, MachineId};
use crate::domain::plan::SolvedClass;

pub mod builder;

new_key_type! {
    /// Opaque handle of one task inside a wave model.
    pub struct TaskKey;
}

/// A point in model time: either a constant number of minutes from the wave
/// origin, or the start/end variable of another task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRef {
    Const(i64),
    StartOf(TaskKey),
    EndOf(TaskKey),
}

/// Variables (or constants) backing one task.
#[derive(Debug, Clone)]
pub enum TaskVars {
    /// Interval known before solving. Completed, WIP, Frozen.
    Fixed { start_min: i64, end_min: i64 },
    /// Interval and machine choice left to the solver. Normal.
    Decision { duration: i64, machines: Vec<MachineId> },
}

#[derive(Debug, Clone)]
pub struct ModelTask {
    pub lot_id: LotId,
    pub step: String,
    pub step_idx: i64,
    pub class: SolvedClass,
    /// Known machine of a fixed task; `None` while the choice is open.
    pub machine: Option<MachineId>,
    pub vars: TaskVars,
    /// Zero-length sentinels keep their place in the sequence but add no
    /// occupancy to any machine.
    pub occupies: bool,
}

/// start(task) >= lower.
#[derive(Debug, Clone, Copy)]
pub struct SeqLink {
    pub task: TaskKey,
    pub lower: TimeRef,
}

/// later_start - earlier_end <= max_gap_minutes.
#[derive(Debug, Clone, Copy)]
pub struct QTimeLink {
    pub earlier_end: TimeRef,
    pub later_start: TimeRef,
    pub max_gap_minutes: i64,
}

/// End of the last operation of one lot, with the data the objective needs.
#[derive(Debug, Clone)]
pub struct LotTail {
    pub lot_id: LotId,
    pub end: TimeRef,
    pub due_minutes: Option<i64>,
    pub priority: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelObjective {
    FeasibilityOnly,
    Makespan,
    TotalCompletion,
    WeightedDelay { cost_scale: i64, makespan_tiebreak: i64 },
    WeightedCompletion,
}

/// One wave translated into a backend-neutral constraint model.
///
/// The solver adapter is the only consumer; it lowers the occupancy lists
/// into pairwise disjunctions and the time refs into linear constraints.
#[derive(Debug, Clone)]
pub struct WaveModel {
    /// Upper bound, in minutes from the wave origin, of every time variable.
    pub horizon: i64,
    pub tasks: SlotMap<TaskKey, ModelTask>,
    pub task_index: HashMap<(LotId, String), TaskKey>,
    /// Immovable occupancy per machine: carried prior-wave intervals and
    /// unavailability windows, already clipped to `[0, horizon]`.
    pub fixed_occupancy: HashMap<MachineId, Vec<(i64, i64)>>,
    pub sequencing: Vec<SeqLink>,
    pub qtime_links: Vec<QTimeLink>,
    pub lot_tails: Vec<LotTail>,
    pub objective: ModelObjective,
}

impl WaveModel {
    pub fn decision_count(&self) -> usize {
        self.tasks.values().filter(|t| matches!(t.vars, TaskVars::Decision { .. })).count()
    }

    pub fn fixed_count(&self) -> usize {
        self.tasks.len() - self.decision_count()
    }
}
