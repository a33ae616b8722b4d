use chrono::NaiveDateTime;
use slotmap::SlotMap;
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::domain::id::LotId;
use crate::domain::lot::{Lot, OpClass};
use crate::domain::machine::{MachineGroups, UnavailableMap};
use crate::domain::plan::{FixedInterval, SolvedClass};
use crate::error::{Error, Result};
use crate::model::{LotTail, ModelObjective, ModelTask, QTimeLink, SeqLink, TaskKey, TaskVars, TimeRef, WaveModel};

/// Translates one wave of lots, plus the immutable context of prior waves,
/// into a `WaveModel`. Purely constructive; no solving happens here.
///
/// Variable construction per class:
/// - Completed/Frozen become fixed constants, clamped to the origin. An
///   interval ending at or before the origin degenerates to a zero-length
///   sentinel without machine occupancy.
/// - WIP occupies its planned machine from the end of the previous step for
///   the minutes that remain at the origin.
/// - Normal gets a start/end decision and one candidate machine per active
///   group member.
pub fn build_wave_model(
    wave_lots: &[Lot],
    carry: &HashMap<(LotId, String), FixedInterval>,
    groups: &MachineGroups,
    unavailable: &UnavailableMap,
    origin: NaiveDateTime,
    config: &EngineConfig,
) -> Result<WaveModel> {
    let minutes = |t: NaiveDateTime| (t - origin).num_minutes();

    let mut tasks: SlotMap<TaskKey, ModelTask> = SlotMap::with_key();
    let mut task_index: HashMap<(LotId, String), TaskKey> = HashMap::new();
    let mut sequencing: Vec<SeqLink> = Vec::new();
    let mut qtime_links: Vec<QTimeLink> = Vec::new();
    let mut lot_tails: Vec<LotTail> = Vec::new();

    // Largest fixed endpoint seen anywhere; the horizon must stay above it.
    let mut max_const_end: i64 = carry.values().map(|f| f.end_min).max().unwrap_or(0);

    for lot in wave_lots {
        if lot.operations.is_empty() {
            log::warn!("Lot {} has no operations and is skipped.", lot.lot_id);
            continue;
        }

        let release = lot.release_minutes(origin);
        let mut prev_end = TimeRef::Const(0);
        let mut first_normal_pending = true;
        let mut lot_steps: HashMap<&str, TaskKey> = HashMap::new();

        for (idx, op) in lot.operations.iter().enumerate() {
            let step_idx = (idx + 1) as i64;

            let key = match &op.class {
                OpClass::Completed { machine, start, end } | OpClass::Frozen { machine, start, end } => {
                    let class = SolvedClass::of(&op.class);
                    let (start_min, end_min) = (minutes(*start), minutes(*end));
                    let (start_min, end_min, occupies) =
                        if end_min <= 0 { (0, 0, false) } else { (start_min.max(0), end_min, true) };
                    max_const_end = max_const_end.max(end_min);
                    prev_end = TimeRef::Const(end_min);

                    tasks.insert(ModelTask {
                        lot_id: lot.lot_id.clone(),
                        step: op.step.clone(),
                        step_idx,
                        class,
                        machine: Some(machine.clone()),
                        vars: TaskVars::Fixed { start_min, end_min },
                        occupies,
                    })
                }
                OpClass::Wip { machine, remaining_minutes } => match prev_end {
                    TimeRef::Const(at) => {
                        let end_min = at + remaining_minutes;
                        max_const_end = max_const_end.max(end_min);
                        prev_end = TimeRef::Const(end_min);

                        tasks.insert(ModelTask {
                            lot_id: lot.lot_id.clone(),
                            step: op.step.clone(),
                            step_idx,
                            class: SolvedClass::Wip,
                            machine: Some(machine.clone()),
                            vars: TaskVars::Fixed { start_min: at, end_min },
                            occupies: *remaining_minutes > 0,
                        })
                    }
                    // A WIP step behind an unplanned one cannot be pinned to a
                    // constant; it keeps its machine but joins the decision set.
                    _ => {
                        let key = tasks.insert(ModelTask {
                            lot_id: lot.lot_id.clone(),
                            step: op.step.clone(),
                            step_idx,
                            class: SolvedClass::Wip,
                            machine: None,
                            vars: TaskVars::Decision { duration: *remaining_minutes, machines: vec![machine.clone()] },
                            occupies: *remaining_minutes > 0,
                        });
                        sequencing.push(SeqLink { task: key, lower: prev_end });
                        prev_end = TimeRef::EndOf(key);
                        key
                    }
                },
                OpClass::Normal => {
                    let members = groups.get(&op.machine_group).filter(|m| !m.is_empty()).ok_or_else(|| {
                        Error::ModelError(format!(
                            "machine group '{}' required by {}/{} has no active members",
                            op.machine_group, lot.lot_id, op.step
                        ))
                    })?;

                    let key = tasks.insert(ModelTask {
                        lot_id: lot.lot_id.clone(),
                        step: op.step.clone(),
                        step_idx,
                        class: SolvedClass::Normal,
                        machine: None,
                        vars: TaskVars::Decision { duration: op.duration_minutes, machines: members.clone() },
                        occupies: op.duration_minutes > 0,
                    });

                    match prev_end {
                        TimeRef::Const(c) if c <= 0 => {}
                        lower => sequencing.push(SeqLink { task: key, lower }),
                    }
                    if first_normal_pending && release > 0 {
                        sequencing.push(SeqLink { task: key, lower: TimeRef::Const(release) });
                    }
                    first_normal_pending = false;
                    prev_end = TimeRef::EndOf(key);
                    key
                }
            };

            task_index.insert((lot.lot_id.clone(), op.step.clone()), key);
            lot_steps.insert(op.step.as_str(), key);
        }

        for pair in &config.qtime_pairs {
            let (Some(&earlier), Some(&later)) = (lot_steps.get(pair.earlier_step.as_str()), lot_steps.get(pair.later_step.as_str()))
            else {
                continue;
            };
            let earlier_end = end_ref(&tasks, earlier);
            let later_start = start_ref(&tasks, later);
            if matches!((earlier_end, later_start), (TimeRef::Const(_), TimeRef::Const(_))) {
                continue;
            }
            qtime_links.push(QTimeLink { earlier_end, later_start, max_gap_minutes: pair.max_gap_minutes });
        }

        let last_key = task_index[&(lot.lot_id.clone(), lot.operations.last().expect("non-empty lot").step.clone())];
        lot_tails.push(LotTail {
            lot_id: lot.lot_id.clone(),
            end: end_ref(&tasks, last_key),
            due_minutes: lot.due_date.map(minutes),
            priority: lot.priority,
        });
    }

    let max_lot_total: i64 = wave_lots.iter().map(|l| l.operations.iter().map(|o| o.duration_minutes).sum::<i64>()).max().unwrap_or(0);
    let horizon = (max_lot_total + config.horizon_buffer_minutes).max(max_const_end + max_lot_total);

    let mut fixed_occupancy: HashMap<_, Vec<(i64, i64)>> = HashMap::new();
    for interval in carry.values() {
        if interval.end_min > interval.start_min {
            fixed_occupancy.entry(interval.machine.clone()).or_default().push((interval.start_min, interval.end_min));
        }
    }
    for (machine, periods) in unavailable {
        for period in periods {
            let start_min = minutes(period.start_time).max(0);
            let end_min = minutes(period.end_time).min(horizon);
            if end_min > start_min {
                fixed_occupancy.entry(machine.clone()).or_default().push((start_min, end_min));
            }
        }
    }

    let objective = if config.fast_verification {
        ModelObjective::FeasibilityOnly
    } else {
        match config.objective {
            crate::config::ObjectiveKind::Makespan => ModelObjective::Makespan,
            crate::config::ObjectiveKind::TotalCompletion => ModelObjective::TotalCompletion,
            crate::config::ObjectiveKind::WeightedDelay => {
                ModelObjective::WeightedDelay { cost_scale: config.delay_cost_scale, makespan_tiebreak: config.makespan_tiebreak_weight }
            }
            crate::config::ObjectiveKind::WeightedCompletion => ModelObjective::WeightedCompletion,
        }
    };

    Ok(WaveModel { horizon, tasks, task_index, fixed_occupancy, sequencing, qtime_links, lot_tails, objective })
}

fn start_ref(tasks: &SlotMap<TaskKey, ModelTask>, key: TaskKey) -> TimeRef {
    match tasks[key].vars {
        TaskVars::Fixed { start_min, .. } => TimeRef::Const(start_min),
        TaskVars::Decision { .. } => TimeRef::StartOf(key),
    }
}

fn end_ref(tasks: &SlotMap<TaskKey, ModelTask>, key: TaskKey) -> TimeRef {
    match tasks[key].vars {
        TaskVars::Fixed { end_min, .. } => TimeRef::Const(end_min),
        TaskVars::Decision { .. } => TimeRef::EndOf(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::id::{GroupId, MachineId};
    use crate::domain::lot::{Operation, StepStatus};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn origin() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 9).unwrap().and_hms_opt(13, 0, 0).unwrap()
    }

    fn test_config() -> EngineConfig {
        EngineConfig::from_env(origin(), PathBuf::from(":memory:"), PathBuf::from("out")).unwrap()
    }

    fn op(lot: &str, step: &str, group: &str, duration: i64, sequence: i64, class: OpClass) -> Operation {
        Operation {
            lot_id: LotId::new(lot),
            step: step.to_string(),
            machine_group: GroupId::new(group),
            duration_minutes: duration,
            sequence,
            status: StepStatus::NewAdd,
            check_in_time: None,
            check_out_time: None,
            plan_check_in_time: None,
            plan_check_out_time: None,
            plan_machine_id: None,
            class,
        }
    }

    fn lot(id: &str, operations: Vec<Operation>) -> Lot {
        Lot {
            lot_id: LotId::new(id),
            priority: 1,
            due_date: None,
            actual_finish_date: None,
            lot_create_date: None,
            plan_start_time: None,
            operations,
        }
    }

    fn one_group() -> MachineGroups {
        let mut groups = MachineGroups::new();
        groups.insert(GroupId::new("G1"), vec![MachineId::new("m1")]);
        groups
    }

    #[test]
    fn completed_before_origin_becomes_sentinel() {
        let start = origin() - chrono::Duration::minutes(60);
        let end = origin() - chrono::Duration::minutes(20);
        let lots = vec![lot("L1", vec![op("L1", "STEP1", "G1", 40, 1, OpClass::Completed { machine: MachineId::new("m1"), start, end })])];

        let model = build_wave_model(&lots, &HashMap::new(), &one_group(), &UnavailableMap::new(), origin(), &test_config()).unwrap();
        let key = model.task_index[&(LotId::new("L1"), "STEP1".to_string())];
        let task = &model.tasks[key];
        assert!(!task.occupies);
        assert!(matches!(task.vars, TaskVars::Fixed { start_min: 0, end_min: 0 }));
    }

    #[test]
    fn wip_occupies_remaining_minutes_from_prev_end() {
        let check_in = origin() - chrono::Duration::minutes(4);
        let mut wip = op("L1", "STEP1", "G1", 10, 1, OpClass::Wip { machine: MachineId::new("m1"), remaining_minutes: 6 });
        wip.check_in_time = Some(check_in);
        let lots = vec![lot("L1", vec![wip, op("L1", "STEP2", "G1", 5, 2, OpClass::Normal)])];

        let model = build_wave_model(&lots, &HashMap::new(), &one_group(), &UnavailableMap::new(), origin(), &test_config()).unwrap();
        let key = model.task_index[&(LotId::new("L1"), "STEP1".to_string())];
        assert!(matches!(model.tasks[key].vars, TaskVars::Fixed { start_min: 0, end_min: 6 }));

        // The Normal successor is chained behind the WIP constant.
        let normal_key = model.task_index[&(LotId::new("L1"), "STEP2".to_string())];
        assert!(model.sequencing.iter().any(|link| link.task == normal_key && link.lower == TimeRef::Const(6)));
    }

    #[test]
    fn missing_group_is_a_model_error() {
        let lots = vec![lot("L1", vec![op("L1", "STEP1", "G9", 10, 1, OpClass::Normal)])];
        let result = build_wave_model(&lots, &HashMap::new(), &one_group(), &UnavailableMap::new(), origin(), &test_config());
        assert!(matches!(result, Err(Error::ModelError(_))));
    }

    #[test]
    fn qtime_pair_links_configured_steps() {
        let lots = vec![lot(
            "L1",
            vec![op("L1", "STEP3", "G1", 100, 1, OpClass::Normal), op("L1", "STEP4", "G1", 50, 2, OpClass::Normal)],
        )];
        let model = build_wave_model(&lots, &HashMap::new(), &one_group(), &UnavailableMap::new(), origin(), &test_config()).unwrap();
        assert_eq!(model.qtime_links.len(), 1);
        assert_eq!(model.qtime_links[0].max_gap_minutes, 200);
    }

    #[test]
    fn carried_intervals_become_fixed_occupancy() {
        let mut carry = HashMap::new();
        carry.insert(
            (LotId::new("L0"), "STEP1".to_string()),
            FixedInterval { start_min: 0, end_min: 30, machine: MachineId::new("m1") },
        );
        let lots = vec![lot("L1", vec![op("L1", "STEP1", "G1", 10, 1, OpClass::Normal)])];
        let model = build_wave_model(&lots, &carry, &one_group(), &UnavailableMap::new(), origin(), &test_config()).unwrap();

        assert_eq!(model.fixed_occupancy[&MachineId::new("m1")], vec![(0, 30)]);
        // The carried lot is occupancy only, never a task of this wave.
        assert!(!model.task_index.contains_key(&(LotId::new("L0"), "STEP1".to_string())));
    }

    #[test]
    fn horizon_covers_carried_intervals() {
        let mut carry = HashMap::new();
        carry.insert(
            (LotId::new("L0"), "STEP1".to_string()),
            FixedInterval { start_min: 100_000, end_min: 100_500, machine: MachineId::new("m1") },
        );
        let lots = vec![lot("L1", vec![op("L1", "STEP1", "G1", 10, 1, OpClass::Normal)])];
        let model = build_wave_model(&lots, &carry, &one_group(), &UnavailableMap::new(), origin(), &test_config()).unwrap();
        assert!(model.horizon >= 100_500 + 10);
    }

    #[test]
    fn release_constrains_first_normal_only() {
        let mut l = lot(
            "L1",
            vec![op("L1", "STEP1", "G1", 10, 1, OpClass::Normal), op("L1", "STEP2", "G1", 10, 2, OpClass::Normal)],
        );
        l.plan_start_time = Some(origin() + chrono::Duration::minutes(30));
        let lots = vec![l];
        let model = build_wave_model(&lots, &HashMap::new(), &one_group(), &UnavailableMap::new(), origin(), &test_config()).unwrap();

        let first = model.task_index[&(LotId::new("L1"), "STEP1".to_string())];
        let second = model.task_index[&(LotId::new("L1"), "STEP2".to_string())];
        assert!(model.sequencing.iter().any(|link| link.task == first && link.lower == TimeRef::Const(30)));
        assert!(!model.sequencing.iter().any(|link| link.task == second && link.lower == TimeRef::Const(30)));
    }
}
