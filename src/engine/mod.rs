use chrono::Duration;
use std::collections::HashMap;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::domain::id::LotId;
use crate::domain::lot::Lot;
use crate::domain::machine::{MachineGroups, UnavailableMap};
use crate::domain::plan::{FixedInterval, SolvedOp};
use crate::error::Result;
use crate::model::builder::build_wave_model;
use crate::solver::solve_wave;

pub mod waves;

#[derive(Debug, Clone, Copy)]
pub struct WaveStats {
    pub waves_total: usize,
    pub waves_failed: usize,
}

/// Orchestrates batched solving: slices the lot population into waves,
/// solves them strictly in order, and carries every solved interval into
/// the following waves as an immovable machine occupancy.
///
/// A failed wave contributes nothing to the carry-map and does not stop the
/// run; its lots simply stay unplanned for this schedule.
pub struct WaveScheduler<'a> {
    config: &'a EngineConfig,
    lots: &'a [Lot],
    groups: &'a MachineGroups,
    unavailable: &'a UnavailableMap,
}

impl<'a> WaveScheduler<'a> {
    pub fn new(config: &'a EngineConfig, lots: &'a [Lot], groups: &'a MachineGroups, unavailable: &'a UnavailableMap) -> Self {
        WaveScheduler { config, lots, groups, unavailable }
    }

    pub fn run(&self) -> Result<(Vec<SolvedOp>, WaveStats)> {
        let origin = self.config.start_time;
        let wave_ranges = waves::partition_waves(self.lots.len(), &self.config.batch);
        let waves_total = wave_ranges.len();

        let mut carry: HashMap<(LotId, String), FixedInterval> = HashMap::new();
        let mut solved: Vec<SolvedOp> = Vec::new();
        let mut waves_failed = 0;

        for (wave_no, range) in wave_ranges.into_iter().enumerate() {
            let wave_lots = &self.lots[range.clone()];
            let started = Instant::now();

            let model = build_wave_model(wave_lots, &carry, self.groups, self.unavailable, origin, self.config)?;

            match solve_wave(&model, &self.config.solver) {
                Ok(placements) => {
                    for (key, placement) in placements {
                        let task = &model.tasks[key];
                        let machine = placement.machine.clone().expect("solved task carries its machine");

                        solved.push(SolvedOp {
                            lot_id: task.lot_id.clone(),
                            step: task.step.clone(),
                            step_idx: task.step_idx,
                            class: task.class,
                            machine: machine.clone(),
                            start: origin + Duration::minutes(placement.start_min),
                            end: origin + Duration::minutes(placement.end_min),
                            start_min: placement.start_min,
                            end_min: placement.end_min,
                        });
                        carry.insert(
                            (task.lot_id.clone(), task.step.clone()),
                            FixedInterval { start_min: placement.start_min, end_min: placement.end_min, machine },
                        );
                    }
                }
                Err(failure) => {
                    waves_failed += 1;
                    log::error!("Batch {}/{} failed: {}. Its lots stay unplanned; continuing.", wave_no + 1, waves_total, failure);
                }
            }

            let progress = ((wave_no + 1) * 100) / waves_total;
            log::info!(
                "Batch {}/{} ({} lots) done in {:.1}s. Progress {}%",
                wave_no + 1,
                waves_total,
                wave_lots.len(),
                started.elapsed().as_secs_f64(),
                progress
            );
        }

        Ok((solved, WaveStats { waves_total, waves_failed }))
    }
}
