use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;

use crate::config::{FALLBACK_MACHINE_GROUPS, UNAVAILABILITY_WINDOW_DAYS};
use crate::domain::id::{GroupId, LotId, MachineId};
use crate::domain::lot::{Lot, OpClass, Operation, StepStatus};
use crate::domain::machine::{MachineGroups, UnavailableMap, UnavailablePeriod, UnavailableType};
use crate::error::{Error, Result};

/// Read side of the engine: pulls lots, operations, machine groups and
/// unavailability windows from the store and classifies every operation
/// into its engine class before the model builder sees it.
///
/// The three loads are read-mostly and idempotent; no cross-read snapshot
/// is taken. Ordering within a lot is strictly by `Sequence`.
pub struct StoreLoader<'a> {
    conn: &'a Connection,
    origin: NaiveDateTime,
}

impl<'a> StoreLoader<'a> {
    pub fn new(conn: &'a Connection, origin: NaiveDateTime) -> Self {
        StoreLoader { conn, origin }
    }

    /// Reads the `scheduler_exclude_completed_lots` store setting.
    pub fn exclude_completed_lots(&self) -> Result<bool> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT parameter_value FROM ui_settings WHERE parameter_name = 'scheduler_exclude_completed_lots'", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map_err(Error::LoaderError)?
            .flatten();

        Ok(matches!(value.as_deref(), Some("true") | Some("1")))
    }

    /// Loads all lots with their operations, ordered by LotId and by
    /// `Sequence` within each lot, and classifies every operation.
    ///
    /// Frozen entries are read from their dedicated record set and take
    /// precedence over the step status of the matching operation.
    pub fn load_jobs(&self, exclude_completed_lots: bool) -> Result<Vec<Lot>> {
        let frozen = self.load_frozen_entries()?;

        let lot_sql = if exclude_completed_lots {
            "SELECT LotId, Priority, DueDate, ActualFinishDate, LotCreateDate, PlanStartTime FROM Lots WHERE ActualFinishDate IS NULL ORDER BY LotId"
        } else {
            "SELECT LotId, Priority, DueDate, ActualFinishDate, LotCreateDate, PlanStartTime FROM Lots ORDER BY LotId"
        };

        let mut stmt = self.conn.prepare(lot_sql).map_err(Error::LoaderError)?;
        let lot_rows = stmt
            .query_map([], |row| {
                Ok(Lot {
                    lot_id: LotId::new(row.get::<_, String>(0)?),
                    priority: row.get(1)?,
                    due_date: row.get(2)?,
                    actual_finish_date: row.get(3)?,
                    lot_create_date: row.get(4)?,
                    plan_start_time: row.get(5)?,
                    operations: Vec::new(),
                })
            })
            .map_err(Error::LoaderError)?;

        let mut lots = Vec::new();
        for lot_row in lot_rows {
            let mut lot = lot_row.map_err(Error::LoaderError)?;
            lot.operations = self.load_operations(&lot.lot_id, &frozen)?;
            lots.push(lot);
        }

        log::info!("Loaded {} lot(s) from the store (exclude_completed_lots={}).", lots.len(), exclude_completed_lots);
        Ok(lots)
    }

    fn load_operations(&self, lot_id: &LotId, frozen: &HashMap<(String, String), (MachineId, NaiveDateTime, NaiveDateTime)>) -> Result<Vec<Operation>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT Step, MachineGroup, Duration, Sequence, StepStatus, CheckInTime, CheckOutTime, \
                 PlanCheckInTime, PlanCheckOutTime, PlanMachineId \
                 FROM LotOperations WHERE LotId = ?1 ORDER BY Sequence",
            )
            .map_err(Error::LoaderError)?;

        let rows = stmt
            .query_map([lot_id.as_str()], |row| {
                Ok(Operation {
                    lot_id: lot_id.clone(),
                    step: row.get(0)?,
                    machine_group: GroupId::new(row.get::<_, String>(1)?),
                    duration_minutes: row.get(2)?,
                    sequence: row.get(3)?,
                    status: StepStatus::from_code(row.get(4)?),
                    check_in_time: row.get(5)?,
                    check_out_time: row.get(6)?,
                    plan_check_in_time: row.get(7)?,
                    plan_check_out_time: row.get(8)?,
                    plan_machine_id: row.get::<_, Option<String>>(9)?.map(MachineId::new),
                    class: OpClass::Normal,
                })
            })
            .map_err(Error::LoaderError)?;

        let mut operations = Vec::new();
        for row in rows {
            let mut op = row.map_err(Error::LoaderError)?;
            op.class = self.classify(&op, frozen);
            operations.push(op);
        }
        Ok(operations)
    }

    /// Derives the engine class of one operation.
    ///
    /// Completed needs its planned interval and machine to count as fixed;
    /// WIP needs a planned machine to keep occupying it. Rows that miss
    /// those fields degrade to Normal and get (re)planned.
    fn classify(&self, op: &Operation, frozen: &HashMap<(String, String), (MachineId, NaiveDateTime, NaiveDateTime)>) -> OpClass {
        if let Some((machine, start, end)) = frozen.get(&(op.lot_id.as_str().to_string(), op.step.clone())) {
            return OpClass::Frozen { machine: machine.clone(), start: *start, end: *end };
        }

        match op.status {
            StepStatus::Completed => match (&op.plan_machine_id, op.plan_check_in_time, op.plan_check_out_time) {
                (Some(machine), Some(start), Some(end)) => OpClass::Completed { machine: machine.clone(), start, end },
                _ => OpClass::Normal,
            },
            StepStatus::Wip => match &op.plan_machine_id {
                Some(machine) => {
                    let elapsed = op.check_in_time.map(|t| (self.origin - t).num_minutes().max(0)).unwrap_or(0);
                    OpClass::Wip { machine: machine.clone(), remaining_minutes: (op.duration_minutes - elapsed).max(0) }
                }
                None => OpClass::Normal,
            },
            StepStatus::NewAdd => OpClass::Normal,
        }
    }

    fn load_frozen_entries(&self) -> Result<HashMap<(String, String), (MachineId, NaiveDateTime, NaiveDateTime)>> {
        let mut stmt =
            self.conn.prepare("SELECT LotId, Step, MachineId, StartTime, EndTime FROM FrozenOperations").map_err(Error::LoaderError)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    (MachineId::new(row.get::<_, String>(2)?), row.get::<_, NaiveDateTime>(3)?, row.get::<_, NaiveDateTime>(4)?),
                ))
            })
            .map_err(Error::LoaderError)?;

        let mut frozen = HashMap::new();
        for row in rows {
            let (key, value) = row.map_err(Error::LoaderError)?;
            frozen.insert(key, value);
        }
        Ok(frozen)
    }

    /// Loads the active machines of every group.
    ///
    /// # Returns
    /// A map of GroupId to active member MachineIds. An empty store yields
    /// the configured fallback groups so development databases still run.
    pub fn load_machine_groups(&self) -> Result<MachineGroups> {
        let mut stmt =
            self.conn.prepare("SELECT MachineId, GroupId FROM Machines WHERE is_active = 1 ORDER BY MachineId").map_err(Error::LoaderError)?;
        let rows = stmt
            .query_map([], |row| Ok((MachineId::new(row.get::<_, String>(0)?), GroupId::new(row.get::<_, String>(1)?))))
            .map_err(Error::LoaderError)?;

        let mut groups = MachineGroups::new();
        for row in rows {
            let (machine, group) = row.map_err(Error::LoaderError)?;
            groups.entry(group).or_insert_with(Vec::new).push(machine);
        }

        if groups.is_empty() {
            log::warn!("Store holds no active machines; falling back to the built-in machine groups.");
            return Ok(FALLBACK_MACHINE_GROUPS.clone());
        }
        Ok(groups)
    }

    /// Loads ACTIVE unavailability windows intersecting the next
    /// `UNAVAILABILITY_WINDOW_DAYS` days from the wave origin.
    pub fn load_unavailable_periods(&self) -> Result<UnavailableMap> {
        let window_end = self.origin + Duration::days(UNAVAILABILITY_WINDOW_DAYS);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT MachineId, start_time, end_time, unavailable_type, reason \
                 FROM machine_unavailable_periods \
                 WHERE status = 'ACTIVE' AND end_time > ?1 AND start_time < ?2 \
                 ORDER BY MachineId, start_time",
            )
            .map_err(Error::LoaderError)?;

        let rows = stmt
            .query_map(rusqlite::params![self.origin, window_end], |row| {
                Ok(UnavailablePeriod {
                    machine_id: MachineId::new(row.get::<_, String>(0)?),
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    unavailable_type: UnavailableType::from_label(&row.get::<_, String>(3)?),
                    reason: row.get(4)?,
                })
            })
            .map_err(Error::LoaderError)?;

        let mut periods = UnavailableMap::new();
        for row in rows {
            let period = row.map_err(Error::LoaderError)?;
            periods.entry(period.machine_id.clone()).or_insert_with(Vec::new).push(period);
        }
        Ok(periods)
    }
}
