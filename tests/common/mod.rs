#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use aps_engine::config::{BatchSettings, EngineConfig, ObjectiveKind, QTimePair, SolverSettings, WriterSettings};
use aps_engine::store;

pub const ORIGIN: &str = "2026-01-09 13:00:00";

pub fn origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 9).unwrap().and_hms_opt(13, 0, 0).unwrap()
}

/// Origin shifted by minutes; negative values go before the origin.
pub fn at(minutes: i64) -> NaiveDateTime {
    origin() + chrono::Duration::minutes(minutes)
}

/// A config with the deployment defaults but a makespan objective, so the
/// expected placements of the seeded scenarios are deterministic.
pub fn makespan_config(db_path: PathBuf, output_dir: PathBuf) -> EngineConfig {
    EngineConfig {
        start_time: origin(),
        db_path,
        output_dir,
        solver: SolverSettings { max_time_seconds: 30, num_search_workers: 8, log_search_progress: false },
        batch: BatchSettings { threshold: 30, initial_size: 30, step_size: 3 },
        writer: WriterSettings { chunk_size: 50, max_workers: 8 },
        fast_verification: false,
        objective: ObjectiveKind::Makespan,
        horizon_buffer_minutes: 50 * 24 * 60,
        delay_cost_scale: 1000,
        makespan_tiebreak_weight: 1,
        qtime_pairs: vec![QTimePair { earlier_step: "STEP3".to_string(), later_step: "STEP4".to_string(), max_gap_minutes: 200 }],
    }
}

pub fn open_seeded(db_path: &Path) -> Connection {
    let conn = store::open_store(db_path).expect("open store");
    store::schema::init_schema(&conn).expect("init schema");
    conn
}

pub fn insert_machine(conn: &Connection, machine: &str, group: &str) {
    conn.execute("INSERT OR REPLACE INTO MachineGroups (GroupId, GroupName) VALUES (?1, ?1)", [group]).unwrap();
    conn.execute("INSERT OR REPLACE INTO Machines (MachineId, GroupId, is_active) VALUES (?1, ?2, 1)", [machine, group]).unwrap();
}

pub fn insert_lot(conn: &Connection, lot: &str, priority: i64, due: Option<NaiveDateTime>) {
    conn.execute("INSERT INTO Lots (LotId, Priority, DueDate) VALUES (?1, ?2, ?3)", rusqlite::params![lot, priority, due]).unwrap();
}

pub fn insert_op(conn: &Connection, lot: &str, step: &str, group: &str, duration: i64, sequence: i64) {
    conn.execute(
        "INSERT INTO LotOperations (LotId, Step, MachineGroup, Duration, Sequence, StepStatus) VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        rusqlite::params![lot, step, group, duration, sequence],
    )
    .unwrap();
}

pub fn insert_wip_op(conn: &Connection, lot: &str, step: &str, group: &str, duration: i64, sequence: i64, machine: &str, check_in: NaiveDateTime) {
    conn.execute(
        "INSERT INTO LotOperations \
         (LotId, Step, MachineGroup, Duration, Sequence, StepStatus, CheckInTime, PlanCheckInTime, PlanCheckOutTime, PlanMachineId) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6, ?7, ?8)",
        rusqlite::params![lot, step, group, duration, sequence, check_in, check_in + chrono::Duration::minutes(duration), machine],
    )
    .unwrap();
}

pub fn insert_completed_op(
    conn: &Connection,
    lot: &str,
    step: &str,
    group: &str,
    duration: i64,
    sequence: i64,
    machine: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) {
    conn.execute(
        "INSERT INTO LotOperations \
         (LotId, Step, MachineGroup, Duration, Sequence, StepStatus, CheckInTime, CheckOutTime, PlanCheckInTime, PlanCheckOutTime, PlanMachineId) \
         VALUES (?1, ?2, ?3, ?4, ?5, 2, ?6, ?7, ?6, ?7, ?8)",
        rusqlite::params![lot, step, group, duration, sequence, start, end, machine],
    )
    .unwrap();
}

pub fn insert_frozen(conn: &Connection, lot: &str, step: &str, machine: &str, start: NaiveDateTime, end: NaiveDateTime) {
    conn.execute(
        "INSERT INTO FrozenOperations (LotId, Step, MachineId, StartTime, EndTime) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![lot, step, machine, start, end],
    )
    .unwrap();
}

pub fn insert_unavailable(conn: &Connection, machine: &str, start: NaiveDateTime, end: NaiveDateTime, kind: &str) {
    conn.execute(
        "INSERT INTO machine_unavailable_periods (MachineId, start_time, end_time, unavailable_type, status) VALUES (?1, ?2, ?3, ?4, 'ACTIVE')",
        rusqlite::params![machine, start, end, kind],
    )
    .unwrap();
}

/// Planned fields of one operation as the store holds them now.
pub fn planned_fields(conn: &Connection, lot: &str, step: &str) -> (Option<NaiveDateTime>, Option<NaiveDateTime>, Option<String>) {
    conn.query_row(
        "SELECT PlanCheckInTime, PlanCheckOutTime, PlanMachineId FROM LotOperations WHERE LotId = ?1 AND Step = ?2",
        [lot, step],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .unwrap()
}

pub fn plan_history(conn: &Connection, lot: &str, step: &str) -> Vec<serde_json::Value> {
    let raw: Option<String> = conn
        .query_row("SELECT PlanHistory FROM LotOperations WHERE LotId = ?1 AND Step = ?2", [lot, step], |row| row.get(0))
        .unwrap();
    match raw {
        Some(json) => serde_json::from_str(&json).unwrap(),
        None => Vec::new(),
    }
}

/// All planned intervals per machine, for exclusivity checks.
pub fn planned_intervals(conn: &Connection) -> Vec<(String, NaiveDateTime, NaiveDateTime)> {
    let mut stmt = conn
        .prepare(
            "SELECT PlanMachineId, PlanCheckInTime, PlanCheckOutTime FROM LotOperations \
             WHERE PlanMachineId IS NOT NULL AND PlanCheckInTime IS NOT NULL AND PlanCheckOutTime IS NOT NULL",
        )
        .unwrap();
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?))).unwrap();
    rows.map(|r| r.unwrap()).collect()
}

pub fn assert_pairwise_disjoint(intervals: &[(String, NaiveDateTime, NaiveDateTime)]) {
    for i in 0..intervals.len() {
        for j in (i + 1)..intervals.len() {
            let (ma, sa, ea) = &intervals[i];
            let (mb, sb, eb) = &intervals[j];
            if ma == mb {
                assert!(ea <= sb || eb <= sa, "overlap on {}: [{}, {}) vs [{}, {})", ma, sa, ea, sb, eb);
            }
        }
    }
}
