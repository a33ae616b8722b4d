use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use std::path::PathBuf;

use crate::domain::id::{GroupId, MachineId};
use crate::domain::machine::MachineGroups;
use crate::error::{Error, Result};

pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Days of unavailability windows loaded ahead of the wave origin.
pub const UNAVAILABILITY_WINDOW_DAYS: i64 = 30;

lazy_static! {
    /// Machine groups used when the store holds none, so an empty database
    /// still produces a schedulable deployment during development.
    pub static ref FALLBACK_MACHINE_GROUPS: MachineGroups = {
        let mut groups = MachineGroups::new();
        for (group, members) in [
            ("M01", vec!["M01-1", "M01-2", "M01-3"]),
            ("M02", vec!["M02-1", "M02-2"]),
            ("M03", vec!["M03-1", "M03-2", "M03-3"]),
            ("M04", vec!["M04-1", "M04-2", "M04-3"]),
        ] {
            groups.insert(GroupId::new(group), members.into_iter().map(MachineId::new).collect());
        }
        groups
    };
}

#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub max_time_seconds: u64,
    pub num_search_workers: u32,
    pub log_search_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    Makespan,
    TotalCompletion,
    WeightedDelay,
    WeightedCompletion,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Lot count above which batching activates.
    pub threshold: usize,
    /// Lots in wave 0 once batching is active.
    pub initial_size: usize,
    /// Lots per subsequent wave.
    pub step_size: usize,
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub chunk_size: usize,
    pub max_workers: usize,
}

/// A maximum allowed gap between two step labels within the same lot.
#[derive(Debug, Clone, PartialEq)]
pub struct QTimePair {
    pub earlier_step: String,
    pub later_step: String,
    pub max_gap_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wave origin. All model time variables count minutes from here.
    pub start_time: NaiveDateTime,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,

    pub solver: SolverSettings,
    pub batch: BatchSettings,
    pub writer: WriterSettings,

    /// Feasibility-only solving: the objective is dropped entirely.
    pub fast_verification: bool,
    pub objective: ObjectiveKind,

    pub horizon_buffer_minutes: i64,
    pub delay_cost_scale: i64,
    pub makespan_tiebreak_weight: i64,
    pub qtime_pairs: Vec<QTimePair>,
}

impl EngineConfig {
    /// Builds the configuration from the process environment.
    ///
    /// `start_time` is the parsed `--start-time` CLI argument; everything
    /// else comes from the enumerated environment keys, with defaults that
    /// match the deployed scheduler.
    pub fn from_env(start_time: NaiveDateTime, db_path: PathBuf, output_dir: PathBuf) -> Result<EngineConfig> {
        Ok(EngineConfig {
            start_time,
            db_path,
            output_dir,
            solver: SolverSettings {
                max_time_seconds: env_parse("SOLVER_MAX_TIME_IN_SECONDS", 30u64)?,
                num_search_workers: env_parse("SOLVER_NUM_SEARCH_WORKERS", 8u32)?,
                log_search_progress: env_bool("SOLVER_LOG_SEARCH_PROGRESS", false)?,
            },
            batch: BatchSettings {
                threshold: env_parse("INCREMENTAL_BATCH_THRESHOLD", 30usize)?,
                initial_size: env_parse("INCREMENTAL_BATCH_INITIAL_SIZE", 30usize)?,
                step_size: env_parse("INCREMENTAL_BATCH_STEP_SIZE", 3usize)?,
            },
            writer: WriterSettings {
                chunk_size: env_parse("WRITER_CHUNK_SIZE", 50usize)?,
                max_workers: env_parse("WRITER_MAX_WORKERS", 8usize)?,
            },
            fast_verification: env_bool("SCHEDULER_FAST_VERIFICATION", true)?,
            objective: parse_objective(&std::env::var("SCHEDULER_OBJECTIVE").unwrap_or_else(|_| "weighted_delay".to_string()))?,
            horizon_buffer_minutes: env_parse("SCHEDULER_HORIZON_BUFFER_MINUTES", 50 * 24 * 60i64)?,
            delay_cost_scale: env_parse("SCHEDULER_DELAY_COST_SCALE", 1000i64)?,
            makespan_tiebreak_weight: env_parse("SCHEDULER_MAKESPAN_TIEBREAK_WEIGHT", 1i64)?,
            qtime_pairs: parse_qtime_pairs(&std::env::var("QTIME_PAIRS").unwrap_or_else(|_| "STEP3,STEP4,200".to_string()))?,
        })
    }

    pub fn parse_start_time(raw: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, START_TIME_FORMAT)
            .map_err(|e| Error::ConfigError(format!("malformed --start-time '{}': {} (expected {})", raw, e, START_TIME_FORMAT)))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| Error::ConfigError(format!("{}='{}': {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(Error::ConfigError(format!("{}='{}': expected a boolean", key, other))),
        },
        Err(_) => Ok(default),
    }
}

fn parse_objective(raw: &str) -> Result<ObjectiveKind> {
    match raw {
        "makespan" => Ok(ObjectiveKind::Makespan),
        "total_completion" => Ok(ObjectiveKind::TotalCompletion),
        "weighted_delay" => Ok(ObjectiveKind::WeightedDelay),
        "weighted_completion" => Ok(ObjectiveKind::WeightedCompletion),
        other => Err(Error::ConfigError(format!("SCHEDULER_OBJECTIVE='{}': unknown objective", other))),
    }
}

/// Parses `EARLIER,LATER,MAX_GAP` triples separated by `;`.
fn parse_qtime_pairs(raw: &str) -> Result<Vec<QTimePair>> {
    let mut pairs = Vec::new();
    for chunk in raw.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let fields: Vec<&str> = chunk.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(Error::ConfigError(format!("QTIME_PAIRS entry '{}': expected EARLIER,LATER,MAX_GAP", chunk)));
        }
        let max_gap = fields[2].parse::<i64>().map_err(|e| Error::ConfigError(format!("QTIME_PAIRS gap '{}': {}", fields[2], e)))?;
        pairs.push(QTimePair { earlier_step: fields[0].to_string(), later_step: fields[1].to_string(), max_gap_minutes: max_gap });
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_round_trip() {
        let parsed = EngineConfig::parse_start_time("2026-01-09 13:00:00").unwrap();
        assert_eq!(parsed.format(START_TIME_FORMAT).to_string(), "2026-01-09 13:00:00");
    }

    #[test]
    fn start_time_rejects_garbage() {
        assert!(EngineConfig::parse_start_time("today at noon").is_err());
    }

    #[test]
    fn qtime_pairs_default_shape() {
        let pairs = parse_qtime_pairs("STEP3,STEP4,200").unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].earlier_step, "STEP3");
        assert_eq!(pairs[0].later_step, "STEP4");
        assert_eq!(pairs[0].max_gap_minutes, 200);
    }

    #[test]
    fn qtime_pairs_multiple_entries() {
        let pairs = parse_qtime_pairs("STEP3,STEP4,200; STEP7,STEP8,90").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].max_gap_minutes, 90);
    }

    #[test]
    fn qtime_pairs_reject_short_entries() {
        assert!(parse_qtime_pairs("STEP3,STEP4").is_err());
    }

    #[test]
    fn objective_names() {
        assert_eq!(parse_objective("makespan").unwrap(), ObjectiveKind::Makespan);
        assert_eq!(parse_objective("weighted_delay").unwrap(), ObjectiveKind::WeightedDelay);
        assert!(parse_objective("fastest").is_err());
    }
}
