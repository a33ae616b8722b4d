use chrono::Local;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::WriterSettings;
use crate::domain::id::{LotId, ScheduleId};
use crate::domain::lot::Lot;
use crate::domain::plan::{PlanHistoryEntry, SolvedClass, SolvedOp};
use crate::error::{Error, Result};
use crate::store::open_store;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Planned fields of one Normal operation, plus the history entry appended
/// alongside them. Completed/WIP/Frozen operations are never touched.
#[derive(Debug, Clone)]
pub struct OpUpdate {
    pub lot_id: LotId,
    pub step: String,
    pub plan_check_in_time: String,
    pub plan_check_out_time: String,
    pub plan_machine_id: String,
}

/// Lot-level aggregates derived from all solved operations of the lot.
#[derive(Debug, Clone)]
pub struct LotUpdate {
    pub lot_id: LotId,
    pub plan_start_time: String,
    pub plan_finish_date: String,
    pub delay_days: Option<f64>,
}

/// All updates belonging to a single lot; the unit the chunker works in.
#[derive(Debug, Clone)]
pub struct LotWrite {
    pub lot: LotUpdate,
    pub ops: Vec<OpUpdate>,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub ops_written: usize,
}

impl WriteOutcome {
    pub fn is_partial(&self) -> bool {
        self.chunks_failed > 0
    }
}

/// Builds the per-lot write set from the solved plan.
///
/// Only lots that received at least one Normal placement produce updates.
/// `Delay_Days` is the finish-to-due distance in days, rounded to two
/// decimals, and stays NULL for lots without a due date.
pub fn build_updates(lots: &[Lot], solved: &[SolvedOp]) -> Vec<LotWrite> {
    let lot_index: HashMap<&str, &Lot> = lots.iter().map(|l| (l.lot_id.as_str(), l)).collect();

    let mut by_lot: HashMap<&str, Vec<&SolvedOp>> = HashMap::new();
    for op in solved {
        by_lot.entry(op.lot_id.as_str()).or_default().push(op);
    }

    let mut writes = Vec::new();
    let mut lot_ids: Vec<&&str> = by_lot.keys().collect();
    lot_ids.sort();

    for lot_id in lot_ids {
        let ops = &by_lot[*lot_id];
        let normal_ops: Vec<&&SolvedOp> = ops.iter().filter(|o| o.class == SolvedClass::Normal).collect();
        if normal_ops.is_empty() {
            continue;
        }

        let plan_start = ops.iter().map(|o| o.start).min().expect("lot has solved ops");
        let plan_finish = ops.iter().map(|o| o.end).max().expect("lot has solved ops");

        let delay_days = lot_index.get(*lot_id).and_then(|lot| lot.due_date).map(|due| {
            let minutes = (plan_finish - due).num_minutes() as f64;
            (minutes / (24.0 * 60.0) * 100.0).round() / 100.0
        });

        writes.push(LotWrite {
            lot: LotUpdate {
                lot_id: LotId::new(*lot_id),
                plan_start_time: plan_start.format(TIMESTAMP_FORMAT).to_string(),
                plan_finish_date: plan_finish.format(TIMESTAMP_FORMAT).to_string(),
                delay_days,
            },
            ops: normal_ops
                .iter()
                .map(|o| OpUpdate {
                    lot_id: o.lot_id.clone(),
                    step: o.step.clone(),
                    plan_check_in_time: o.start.format(TIMESTAMP_FORMAT).to_string(),
                    plan_check_out_time: o.end.format(TIMESTAMP_FORMAT).to_string(),
                    plan_machine_id: o.machine.as_str().to_string(),
                })
                .collect(),
        });
    }
    writes
}

/// Applies the write set with a bounded worker pool.
///
/// The lots are partitioned into chunks of `chunk_size`; up to
/// `min(chunks, max_workers)` workers each open their own connection and
/// apply one chunk per transaction. A failing chunk rolls back alone and is
/// counted; the remaining chunks are unaffected.
pub fn write_plans(db_path: &Path, writes: Vec<LotWrite>, plan_id: &ScheduleId, settings: &WriterSettings) -> Result<WriteOutcome> {
    if writes.is_empty() {
        return Ok(WriteOutcome { chunks_total: 0, chunks_failed: 0, ops_written: 0 });
    }

    let chunk_size = settings.chunk_size.max(1);
    let chunks: Vec<Vec<LotWrite>> = writes.chunks(chunk_size).map(|c| c.to_vec()).collect();
    let chunks_total = chunks.len();
    let worker_count = chunks_total.min(settings.max_workers.max(1));

    let (job_tx, job_rx) = mpsc::channel::<Vec<LotWrite>>();
    let (result_tx, result_rx) = mpsc::channel::<std::result::Result<usize, String>>();
    for chunk in chunks {
        job_tx.send(chunk).expect("job channel open");
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let db_path: PathBuf = db_path.to_path_buf();
    let plan_id = plan_id.as_str().to_string();

    thread::scope(|scope| {
        for worker in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let db_path = db_path.clone();
            let plan_id = plan_id.clone();

            scope.spawn(move || {
                let mut conn = match open_store(&db_path) {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::error!("Writer worker {} could not open the store: {}", worker, e);
                        // Report every chunk this worker would have taken as failed.
                        while job_rx.lock().expect("job queue lock").recv().is_ok() {
                            let _ = result_tx.send(Err(format!("worker {}: no connection", worker)));
                        }
                        return;
                    }
                };

                loop {
                    let chunk = match job_rx.lock().expect("job queue lock").recv() {
                        Ok(chunk) => chunk,
                        Err(_) => break,
                    };
                    let outcome = apply_chunk(&mut conn, &chunk, &plan_id);
                    let _ = result_tx.send(outcome.map_err(|e| e.to_string()));
                }
            });
        }
    });
    drop(result_tx);

    let mut chunks_failed = 0;
    let mut ops_written = 0;
    for outcome in result_rx {
        match outcome {
            Ok(count) => ops_written += count,
            Err(e) => {
                chunks_failed += 1;
                log::error!("Writer chunk failed and was rolled back: {}", e);
            }
        }
    }

    if chunks_failed == chunks_total {
        return Err(Error::WriterError { failed: chunks_failed, total: chunks_total });
    }
    if chunks_failed > 0 {
        log::warn!("Writeback finished partially: {}/{} chunk(s) failed.", chunks_failed, chunks_total);
    } else {
        log::info!("Writeback finished: {} operation update(s) in {} chunk(s).", ops_written, chunks_total);
    }
    Ok(WriteOutcome { chunks_total, chunks_failed, ops_written })
}

/// One chunk, one transaction: planned fields and the `PlanHistory` append
/// commit or roll back together.
fn apply_chunk(conn: &mut Connection, chunk: &[LotWrite], plan_id: &str) -> Result<usize> {
    let tx = conn.transaction().map_err(Error::StoreError)?;
    let mut ops_written = 0;

    for lot_write in chunk {
        for op in &lot_write.ops {
            let entry = PlanHistoryEntry {
                plan_id: plan_id.to_string(),
                plan_check_in_time: op.plan_check_in_time.clone(),
                plan_check_out_time: op.plan_check_out_time.clone(),
                plan_machine_id: op.plan_machine_id.clone(),
                created_at: Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string(),
            };
            let entry_json = serde_json::to_string(&entry)?;

            tx.execute(
                "UPDATE LotOperations SET \
                 PlanCheckInTime = ?1, PlanCheckOutTime = ?2, PlanMachineId = ?3, \
                 PlanHistory = json_insert(COALESCE(PlanHistory, '[]'), '$[#]', json(?4)) \
                 WHERE LotId = ?5 AND Step = ?6",
                rusqlite::params![op.plan_check_in_time, op.plan_check_out_time, op.plan_machine_id, entry_json, op.lot_id.as_str(), op.step],
            )
            .map_err(Error::StoreError)?;
            ops_written += 1;
        }

        tx.execute(
            "UPDATE Lots SET PlanStartTime = ?1, PlanFinishDate = ?2, Delay_Days = ?3 WHERE LotId = ?4",
            rusqlite::params![lot_write.lot.plan_start_time, lot_write.lot.plan_finish_date, lot_write.lot.delay_days, lot_write.lot.lot_id.as_str()],
        )
        .map_err(Error::StoreError)?;
    }

    tx.commit().map_err(Error::StoreError)?;
    Ok(ops_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::id::MachineId;
    use chrono::NaiveDate;

    fn solved(lot: &str, step: &str, class: SolvedClass, start_min: i64, end_min: i64) -> SolvedOp {
        let origin = NaiveDate::from_ymd_opt(2026, 1, 9).unwrap().and_hms_opt(13, 0, 0).unwrap();
        SolvedOp {
            lot_id: LotId::new(lot),
            step: step.to_string(),
            step_idx: 1,
            class,
            machine: MachineId::new("M01-1"),
            start: origin + chrono::Duration::minutes(start_min),
            end: origin + chrono::Duration::minutes(end_min),
            start_min,
            end_min,
        }
    }

    fn lot(id: &str, due_minutes: Option<i64>) -> Lot {
        let origin = NaiveDate::from_ymd_opt(2026, 1, 9).unwrap().and_hms_opt(13, 0, 0).unwrap();
        Lot {
            lot_id: LotId::new(id),
            priority: 1,
            due_date: due_minutes.map(|m| origin + chrono::Duration::minutes(m)),
            actual_finish_date: None,
            lot_create_date: None,
            plan_start_time: None,
            operations: vec![],
        }
    }

    #[test]
    fn fully_fixed_lots_produce_no_updates() {
        let lots = vec![lot("L1", None)];
        let solved_ops = vec![solved("L1", "STEP1", SolvedClass::Completed, 0, 10)];
        assert!(build_updates(&lots, &solved_ops).is_empty());
    }

    #[test]
    fn aggregates_span_all_classes_of_the_lot() {
        let lots = vec![lot("L1", None)];
        let solved_ops = vec![solved("L1", "STEP1", SolvedClass::Completed, 0, 10), solved("L1", "STEP2", SolvedClass::Normal, 10, 30)];
        let writes = build_updates(&lots, &solved_ops);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].ops.len(), 1);
        assert!(writes[0].lot.plan_start_time.ends_with("13:00:00"));
        assert!(writes[0].lot.plan_finish_date.ends_with("13:30:00"));
    }

    #[test]
    fn delay_days_rounds_to_two_decimals() {
        let lots = vec![lot("L1", Some(0))];
        // Finishes 36 hours past due: 1.5 days.
        let solved_ops = vec![solved("L1", "STEP1", SolvedClass::Normal, 0, 36 * 60)];
        let writes = build_updates(&lots, &solved_ops);
        assert_eq!(writes[0].lot.delay_days, Some(1.5));
    }

    #[test]
    fn delay_days_null_without_due_date() {
        let lots = vec![lot("L1", None)];
        let solved_ops = vec![solved("L1", "STEP1", SolvedClass::Normal, 0, 10)];
        let writes = build_updates(&lots, &solved_ops);
        assert_eq!(writes[0].lot.delay_days, None);
    }
}
