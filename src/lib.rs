use chrono::Local;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::id::ScheduleId;
use crate::domain::plan::RunSummary;
use crate::engine::WaveScheduler;
use crate::error::{Error, Result};
use crate::store::loader::StoreLoader;

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logger;
pub mod model;
pub mod report;
pub mod solver;
pub mod store;

/// Runs one full scheduling pass: load, solve wave by wave, write back,
/// report utilization and emit artifacts.
///
/// Fatal errors (configuration, loader, model) abort before any writeback.
/// Wave failures and degraded writeback/artifact outcomes are logged and
/// reflected in the returned summary instead of failing the run.
pub fn run_schedule(config: &EngineConfig) -> Result<RunSummary> {
    let schedule_id = fresh_schedule_id();
    log::info!("Starting schedule {} with origin {}.", schedule_id, config.start_time);

    let conn = store::open_store(&config.db_path).map_err(Error::LoaderError)?;
    store::schema::init_schema(&conn).map_err(Error::LoaderError)?;

    let loader = StoreLoader::new(&conn, config.start_time);
    let exclude_completed = loader.exclude_completed_lots()?;
    let lots = loader.load_jobs(exclude_completed)?;

    if lots.is_empty() {
        log::info!("No lots to schedule; nothing to do.");
        return Ok(RunSummary {
            schedule_id,
            waves_total: 0,
            waves_failed: 0,
            lots_loaded: 0,
            has_solution: false,
            partial_write: false,
            earliest_start: None,
            latest_end: None,
            duration_str: "0:00:00".to_string(),
        });
    }

    let open_lots = lots.iter().filter(|l| l.has_normal_ops()).count();
    log::info!("{} of {} lot(s) still have unplanned operations.", open_lots, lots.len());

    let groups = loader.load_machine_groups()?;
    let unavailable = loader.load_unavailable_periods()?;

    let calc_start = Local::now().naive_local();
    let scheduler = WaveScheduler::new(config, &lots, &groups, &unavailable);
    let (solved, wave_stats) = scheduler.run()?;
    let calc_end = Local::now().naive_local();

    let writes = store::writer::build_updates(&lots, &solved);
    let write_outcome = match store::writer::write_plans(&config.db_path, writes, &schedule_id, &config.writer) {
        Ok(outcome) => outcome,
        // Writeback is degraded, never fatal: committed chunks stay in, the
        // run carries on to reporting and is flagged as partial.
        Err(e @ Error::WriterError { .. }) => {
            log::error!("{}", e);
            store::writer::WriteOutcome { chunks_total: 1, chunks_failed: 1, ops_written: 0 }
        }
        Err(e) => return Err(e),
    };

    if let Some((window, rows)) = report::utilization::compute_group_utilization(&groups, &solved) {
        match store::open_store(&config.db_path) {
            Ok(report_conn) => {
                if let Err(e) = report::utilization::persist_utilization(&report_conn, &schedule_id, &window, &rows) {
                    log::error!("Utilization rows could not be persisted: {}", e);
                }
            }
            Err(e) => log::error!("Utilization reporter could not open the store: {}", e),
        }
    }

    let bundle = report::artifacts::build_artifacts(&lots, &solved, &unavailable, calc_start, calc_end, wave_stats.waves_failed);
    if let Err(e) = report::artifacts::write_artifacts(&config.output_dir, &bundle) {
        log::error!("Artifact output failed (writer commits are unaffected): {}", e);
    }
    match store::open_store(&config.db_path) {
        Ok(history_conn) => {
            if let Err(e) = report::artifacts::persist_job_history(&history_conn, &schedule_id, calc_start, &bundle) {
                log::error!("Job history row could not be persisted: {}", e);
            }
        }
        Err(e) => log::error!("Job history writer could not open the store: {}", e),
    }

    let earliest_start = solved.iter().map(|o| o.start).min();
    let latest_end = solved.iter().map(|o| o.end).max();
    let summary = RunSummary {
        schedule_id,
        waves_total: wave_stats.waves_total,
        waves_failed: wave_stats.waves_failed,
        lots_loaded: lots.len(),
        has_solution: !solved.is_empty(),
        partial_write: write_outcome.is_partial(),
        earliest_start,
        latest_end,
        duration_str: bundle.plan_result.statistics.total_schedule_duration.clone(),
    };

    log::info!(
        "Schedule {} finished: {} wave(s), {} failed, {} placement(s), partial_write={}.",
        summary.schedule_id,
        summary.waves_total,
        summary.waves_failed,
        solved.len(),
        summary.partial_write
    );
    Ok(summary)
}

/// A fresh ScheduleId per run: timestamp for operators, short random tail
/// so back-to-back runs in the same second stay distinct.
fn fresh_schedule_id() -> ScheduleId {
    let tail: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    ScheduleId::new(format!("{}-{}", Local::now().format("%Y%m%d%H%M%S"), tail))
}
