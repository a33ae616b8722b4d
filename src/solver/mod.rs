use good_lp::{Expression, ResolutionError, Solution, SolverModel, Variable, WithTimeLimit, constraint, default_solver, variable, variables};
use slotmap::SecondaryMap;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::SolverSettings;
use crate::domain::id::MachineId;
use crate::model::{ModelObjective, TaskKey, TaskVars, TimeRef, WaveModel};

/// Per-wave failure. Recoverable: the wave scheduler logs it and moves on,
/// leaving the carry-map untouched.
#[derive(Debug, Error)]
pub enum SolverFailure {
    #[error("no feasible placement exists for this wave")]
    Infeasible,
    #[error("the wave model is unbounded")]
    Unbounded,
    #[error("the solver gave no result: {0}")]
    Unknown(String),
}

/// Solved placement of one task, in minutes from the wave origin.
#[derive(Debug, Clone)]
pub struct TaskSolution {
    pub start_min: i64,
    pub end_min: i64,
    pub machine: Option<MachineId>,
}

struct DecisionVars {
    start: Variable,
    end: Variable,
    presence: Vec<Variable>,
}

/// Solves one wave model within the configured time budget.
///
/// The model's no-overlap disjunctions are lowered to pairwise big-M
/// ordering binaries over the wave horizon; machine choice is a one-hot
/// presence vector per candidate machine. Fixed tasks are echoed back into
/// the solution unchanged so the caller sees every task of the wave.
pub fn solve_wave(model: &WaveModel, settings: &SolverSettings) -> Result<HashMap<TaskKey, TaskSolution>, SolverFailure> {
    let horizon = model.horizon as f64;

    let mut vars = variables!();
    let mut decisions: SecondaryMap<TaskKey, DecisionVars> = SecondaryMap::new();
    for (key, task) in &model.tasks {
        if let TaskVars::Decision { machines, .. } = &task.vars {
            decisions.insert(
                key,
                DecisionVars {
                    start: vars.add(variable().integer().min(0.0).max(horizon)),
                    end: vars.add(variable().integer().min(0.0).max(horizon)),
                    presence: machines.iter().map(|_| vars.add(variable().binary())).collect(),
                },
            );
        }
    }

    // Occupancy per machine: immovable intervals on one side, candidate
    // decision tasks (with their presence index) on the other.
    let mut machine_fixed: HashMap<MachineId, Vec<(i64, i64)>> = model.fixed_occupancy.clone();
    let mut machine_candidates: HashMap<MachineId, Vec<(TaskKey, usize)>> = HashMap::new();
    for (key, task) in &model.tasks {
        if !task.occupies {
            continue;
        }
        match &task.vars {
            TaskVars::Fixed { start_min, end_min } => {
                let machine = task.machine.clone().expect("fixed occupying task has a machine");
                machine_fixed.entry(machine).or_default().push((*start_min, *end_min));
            }
            TaskVars::Decision { machines, .. } => {
                for (midx, machine) in machines.iter().enumerate() {
                    machine_candidates.entry(machine.clone()).or_default().push((key, midx));
                }
            }
        }
    }

    // Ordering binaries must exist before the variable pool is consumed by
    // the objective, so the pair lists are prepared first.
    let mut fixed_pairs: Vec<(TaskKey, usize, i64, i64, Variable)> = Vec::new();
    let mut decision_pairs: Vec<(TaskKey, usize, TaskKey, usize, Variable)> = Vec::new();
    let mut machine_ids: Vec<&MachineId> = machine_candidates.keys().collect();
    machine_ids.sort();
    for machine in machine_ids {
        let candidates = &machine_candidates[machine];
        if let Some(fixed) = machine_fixed.get(machine) {
            for &(key, midx) in candidates {
                for &(fs, fe) in fixed {
                    fixed_pairs.push((key, midx, fs, fe, vars.add(variable().binary())));
                }
            }
        }
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                let (a, ai) = candidates[i];
                let (b, bi) = candidates[j];
                decision_pairs.push((a, ai, b, bi, vars.add(variable().binary())));
            }
        }
    }

    let makespan = vars.add(variable().integer().min(0.0).max(horizon));
    let mut delay_vars: Vec<(Variable, Expression, f64)> = Vec::new();
    let mut objective = Expression::from_other_affine(0.0);
    match model.objective {
        ModelObjective::FeasibilityOnly => {}
        ModelObjective::Makespan => objective += makespan,
        ModelObjective::TotalCompletion => {
            for tail in &model.lot_tails {
                objective += time_expr(&decisions, tail.end);
            }
        }
        ModelObjective::WeightedCompletion => {
            for tail in &model.lot_tails {
                objective += time_expr(&decisions, tail.end) * tail.priority as f64;
            }
        }
        ModelObjective::WeightedDelay { cost_scale, makespan_tiebreak } => {
            for tail in &model.lot_tails {
                if let Some(due) = tail.due_minutes {
                    let delay = vars.add(variable().integer().min(0.0));
                    let weight = (cost_scale * tail.priority) as f64;
                    objective += delay * weight;
                    delay_vars.push((delay, time_expr(&decisions, tail.end), due as f64));
                }
            }
            objective += makespan * makespan_tiebreak as f64;
        }
    }

    if settings.log_search_progress {
        log::info!(
            "Wave model: {} decision task(s), {} fixed task(s), {} ordering pair(s), horizon {} min.",
            model.decision_count(),
            model.fixed_count(),
            fixed_pairs.len() + decision_pairs.len(),
            model.horizon
        );
    }
    log::debug!("Solver budget: {}s, {} search worker(s) requested.", settings.max_time_seconds, settings.num_search_workers);

    let mut problem = vars.minimise(objective).using(default_solver);
    if settings.max_time_seconds > 0 {
        problem = problem.with_time_limit(settings.max_time_seconds as f64);
    }

    // Interval arithmetic per decision task.
    for (key, task) in &model.tasks {
        if let TaskVars::Decision { duration, .. } = &task.vars {
            let d = &decisions[key];
            let (start, end) = (d.start, d.end);
            let duration = *duration as f64;
            problem = problem.with(constraint!(end - start == duration));
            let presence_sum: Expression = d.presence.iter().sum();
            problem = problem.with(constraint!(presence_sum == 1.0));
        }
    }

    // Intra-lot sequencing and release times.
    for link in &model.sequencing {
        let start = decisions[link.task].start;
        let lower = time_expr(&decisions, link.lower);
        problem = problem.with(constraint!(start >= lower));
    }

    // Q-time coupling.
    for link in &model.qtime_links {
        let earlier = time_expr(&decisions, link.earlier_end);
        let later = time_expr(&decisions, link.later_start);
        let gap = link.max_gap_minutes as f64;
        problem = problem.with(constraint!(later - earlier <= gap));
    }

    // Machine exclusivity, decision task against immovable interval.
    let m_big = horizon;
    for &(key, midx, fs, fe, order) in &fixed_pairs {
        let d = &decisions[key];
        let (start, end) = (d.start, d.end);
        let p = d.presence[midx];
        let (fs, fe) = (fs as f64, fe as f64);
        problem = problem.with(constraint!(end + m_big * order + m_big * p <= fs + 2.0 * m_big));
        problem = problem.with(constraint!(start + m_big * order - m_big * p >= fe - m_big));
    }

    // Machine exclusivity, decision task against decision task.
    for &(a, ai, b, bi, order) in &decision_pairs {
        let (start_a, end_a) = (decisions[a].start, decisions[a].end);
        let (start_b, end_b) = (decisions[b].start, decisions[b].end);
        let pa = decisions[a].presence[ai];
        let pb = decisions[b].presence[bi];
        problem = problem.with(constraint!(end_a - start_b + m_big * order + m_big * pa + m_big * pb <= 3.0 * m_big));
        problem = problem.with(constraint!(end_b - start_a - m_big * order + m_big * pa + m_big * pb <= 2.0 * m_big));
    }

    // Objective support constraints.
    if !matches!(model.objective, ModelObjective::FeasibilityOnly) {
        for tail in &model.lot_tails {
            let end = time_expr(&decisions, tail.end);
            problem = problem.with(constraint!(makespan >= end));
        }
    }
    for &(delay, ref end, due) in &delay_vars {
        let end = end.clone();
        problem = problem.with(constraint!(delay >= end - due));
    }

    let solution = match problem.solve() {
        Ok(solution) => solution,
        Err(ResolutionError::Infeasible) => return Err(SolverFailure::Infeasible),
        Err(ResolutionError::Unbounded) => return Err(SolverFailure::Unbounded),
        Err(other) => return Err(SolverFailure::Unknown(other.to_string())),
    };

    let mut placements = HashMap::new();
    for (key, task) in &model.tasks {
        let placement = match &task.vars {
            TaskVars::Fixed { start_min, end_min } => TaskSolution { start_min: *start_min, end_min: *end_min, machine: task.machine.clone() },
            TaskVars::Decision { machines, .. } => {
                let d = &decisions[key];
                let mut chosen = 0;
                let mut best = f64::MIN;
                for (i, p) in d.presence.iter().enumerate() {
                    let value = solution.value(*p);
                    if value > best {
                        best = value;
                        chosen = i;
                    }
                }
                TaskSolution {
                    start_min: solution.value(d.start).round() as i64,
                    end_min: solution.value(d.end).round() as i64,
                    machine: Some(machines[chosen].clone()),
                }
            }
        };
        placements.insert(key, placement);
    }
    Ok(placements)
}

fn time_expr(decisions: &SecondaryMap<TaskKey, DecisionVars>, time_ref: TimeRef) -> Expression {
    match time_ref {
        TimeRef::Const(c) => Expression::from_other_affine(c as f64),
        TimeRef::StartOf(key) => Expression::from_other_affine(decisions[key].start),
        TimeRef::EndOf(key) => Expression::from_other_affine(decisions[key].end),
    }
}
