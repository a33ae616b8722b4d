use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::domain::id::{GroupId, ScheduleId};
use crate::domain::machine::MachineGroups;
use crate::domain::plan::SolvedOp;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct GroupUtilizationRow {
    pub group: GroupId,
    pub used_minutes: f64,
    pub capacity_minutes: f64,
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SolvedWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Computes per-group utilization over the solved window.
///
/// The window spans from the earliest solved start to the latest solved
/// end; a group's capacity is its member count times the window length.
pub fn compute_group_utilization(groups: &MachineGroups, solved: &[SolvedOp]) -> Option<(SolvedWindow, Vec<GroupUtilizationRow>)> {
    let window_start = solved.iter().map(|o| o.start).min()?;
    let window_end = solved.iter().map(|o| o.end).max()?;
    let window_minutes = (window_end - window_start).num_minutes() as f64;

    let mut rows: Vec<GroupUtilizationRow> = groups
        .iter()
        .map(|(group, members)| {
            let used_minutes: f64 = solved.iter().filter(|o| members.contains(&o.machine)).map(|o| o.duration_minutes() as f64).sum();
            let capacity_minutes = members.len() as f64 * window_minutes;
            let utilization = if capacity_minutes > 0.0 { used_minutes / capacity_minutes } else { 0.0 };
            GroupUtilizationRow { group: group.clone(), used_minutes, capacity_minutes, utilization }
        })
        .collect();

    rows.sort_by(|a, b| b.utilization.partial_cmp(&a.utilization).unwrap_or(std::cmp::Ordering::Equal));
    Some((SolvedWindow { start: window_start, end: window_end }, rows))
}

/// Persists one row per group for this schedule and logs the top five.
pub fn persist_utilization(conn: &Connection, schedule_id: &ScheduleId, window: &SolvedWindow, rows: &[GroupUtilizationRow]) -> Result<()> {
    for row in rows {
        conn.execute(
            "INSERT OR REPLACE INTO GroupUtilization \
             (ScheduleId, GroupId, used_minutes, capacity_minutes, utilization, window_start, window_end) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![schedule_id.as_str(), row.group.as_str(), row.used_minutes, row.capacity_minutes, row.utilization, window.start, window.end],
        )
        .map_err(Error::StoreError)?;
    }

    for (rank, row) in rows.iter().take(5).enumerate() {
        log::info!(
            "{}. {} | Utilization: {:.2}% | Used: {:.1} min | Capacity: {:.1} min",
            rank + 1,
            row.group,
            row.utilization * 100.0,
            row.used_minutes,
            row.capacity_minutes
        );
    }
    Ok(())
}
