use rusqlite::Connection;

/// Creates every record set the engine reads or writes, when absent.
///
/// The shapes mirror the line-control collaborators: lots and their
/// operations (with the append-only `PlanHistory` JSON array), machines and
/// groups, frozen entries, unavailability windows, the job-history rows and
/// the per-group utilization rows.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS Lots (
            LotId            TEXT PRIMARY KEY,
            Priority         INTEGER NOT NULL DEFAULT 0,
            DueDate          DATETIME,
            ActualFinishDate DATETIME,
            LotCreateDate    DATETIME,
            PlanStartTime    DATETIME,
            PlanFinishDate   DATETIME,
            Delay_Days       REAL
        );

        CREATE TABLE IF NOT EXISTS LotOperations (
            LotId            TEXT NOT NULL,
            Step             TEXT NOT NULL,
            MachineGroup     TEXT NOT NULL,
            Duration         INTEGER NOT NULL,
            Sequence         INTEGER NOT NULL,
            StepStatus       INTEGER NOT NULL DEFAULT 0,
            CheckInTime      DATETIME,
            CheckOutTime     DATETIME,
            PlanCheckInTime  DATETIME,
            PlanCheckOutTime DATETIME,
            PlanMachineId    TEXT,
            PlanHistory      TEXT,
            PRIMARY KEY (LotId, Step)
        );

        CREATE TABLE IF NOT EXISTS MachineGroups (
            GroupId   TEXT PRIMARY KEY,
            GroupName TEXT
        );

        CREATE TABLE IF NOT EXISTS Machines (
            MachineId TEXT PRIMARY KEY,
            GroupId   TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS FrozenOperations (
            LotId     TEXT NOT NULL,
            Step      TEXT NOT NULL,
            MachineId TEXT NOT NULL,
            StartTime DATETIME NOT NULL,
            EndTime   DATETIME NOT NULL,
            PRIMARY KEY (LotId, Step)
        );

        CREATE TABLE IF NOT EXISTS machine_unavailable_periods (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            MachineId        TEXT NOT NULL,
            start_time       DATETIME NOT NULL,
            end_time         DATETIME NOT NULL,
            unavailable_type TEXT NOT NULL,
            reason           TEXT,
            status           TEXT NOT NULL DEFAULT 'ACTIVE'
        );

        CREATE TABLE IF NOT EXISTS DynamicSchedulingJob (
            ScheduleId         TEXT PRIMARY KEY,
            CreateDate         DATETIME,
            CreateUser         TEXT,
            PlanSummary        TEXT,
            LotStepResult      TEXT,
            LotPlanResult      TEXT,
            machineTaskSegment TEXT
        );

        CREATE TABLE IF NOT EXISTS GroupUtilization (
            ScheduleId       TEXT NOT NULL,
            GroupId          TEXT NOT NULL,
            used_minutes     REAL NOT NULL,
            capacity_minutes REAL NOT NULL,
            utilization      REAL NOT NULL,
            window_start     DATETIME,
            window_end       DATETIME,
            PRIMARY KEY (ScheduleId, GroupId)
        );

        CREATE TABLE IF NOT EXISTS ui_settings (
            parameter_name  TEXT PRIMARY KEY,
            parameter_value TEXT
        );
        "#,
    )
}
