use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::id::ScheduleId;
use crate::domain::lot::Lot;
use crate::domain::machine::UnavailableMap;
use crate::domain::plan::{SolvedClass, SolvedOp};
use crate::error::Result;
use crate::report::booking::{booking_for, booking_for_unavailable, color_for};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const GANTT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

pub const FILE_STEP_RESULT: &str = "LotStepResult.json";
pub const FILE_PLAN_RESULT: &str = "LotPlanResult.json";
pub const FILE_GANTT: &str = "machineTaskSegment.json";

#[derive(Debug, Clone, Serialize)]
pub struct StepResultRow {
    #[serde(rename = "LotId")]
    pub lot_id: String,
    #[serde(rename = "Priority")]
    pub priority: i64,
    #[serde(rename = "StepIdx")]
    pub step_idx: i64,
    #[serde(rename = "Step")]
    pub step: String,
    #[serde(rename = "Machine")]
    pub machine: String,
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "End")]
    pub end: String,
    #[serde(rename = "Booking")]
    pub booking: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LotResultRow {
    #[serde(rename = "Lot")]
    pub lot: String,
    #[serde(rename = "Priority")]
    pub priority: i64,
    #[serde(rename = "Due Date")]
    pub due_date: Option<String>,
    #[serde(rename = "Plan Date")]
    pub plan_date: String,
    #[serde(rename = "delay time")]
    pub delay_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStatistics {
    pub batch_count: usize,
    pub calculation_start: String,
    pub calculation_end: String,
    pub calculation_duration: String,
    pub earliest_input_time: Option<String>,
    pub latest_output_time: Option<String>,
    pub total_schedule_duration: String,
    pub early_count: usize,
    pub on_time_count: usize,
    pub minor_delay_count: usize,
    pub major_delay_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub statistics: PlanStatistics,
    pub lot_results: Vec<LotResultRow>,
}

/// One record of the flat Gantt list: machine headers carry `parent: null`
/// and `render: "split"`; child rows carry their machine as parent.
#[derive(Debug, Clone, Serialize)]
pub struct GanttSegment {
    pub id: String,
    pub text: String,
    pub parent: Option<String>,
    pub render: Option<&'static str>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration: f64,
    #[serde(rename = "Booking", skip_serializing_if = "Option::is_none")]
    pub booking: Option<i64>,
    pub color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub step_results: Vec<StepResultRow>,
    pub plan_result: PlanResult,
    pub gantt: Vec<GanttSegment>,
    pub plan_summary: String,
}

/// Builds the three artifact documents and the job-history summary text
/// from the solved plan. Purely in-memory; writing happens separately so a
/// failed write degrades the run without losing the writer's commits.
pub fn build_artifacts(
    lots: &[Lot],
    solved: &[SolvedOp],
    unavailable: &UnavailableMap,
    calc_start: NaiveDateTime,
    calc_end: NaiveDateTime,
    waves_failed: usize,
) -> ArtifactBundle {
    let lot_index: HashMap<&str, &Lot> = lots.iter().map(|l| (l.lot_id.as_str(), l)).collect();
    let had_plan: HashMap<&str, bool> = lots.iter().map(|l| (l.lot_id.as_str(), l.had_previous_plan())).collect();

    let mut ordered: Vec<&SolvedOp> = solved.iter().collect();
    ordered.sort_by_key(|o| (o.start_min, o.lot_id.clone(), o.step_idx));

    let step_results: Vec<StepResultRow> = ordered
        .iter()
        .map(|op| StepResultRow {
            lot_id: op.lot_id.as_str().to_string(),
            priority: lot_index.get(op.lot_id.as_str()).map(|l| l.priority).unwrap_or(0),
            step_idx: op.step_idx,
            step: op.step.clone(),
            machine: op.machine.as_str().to_string(),
            start: op.start.format(TIMESTAMP_FORMAT).to_string(),
            end: op.end.format(TIMESTAMP_FORMAT).to_string(),
            booking: booking_for(op.class, had_plan.get(op.lot_id.as_str()).copied().unwrap_or(false)),
        })
        .collect();

    let lot_results = build_lot_results(&lot_index, solved);

    let earliest = solved.iter().map(|o| o.start).min();
    let latest = solved.iter().map(|o| o.end).max();
    let statistics = build_statistics(&lot_results, calc_start, calc_end, earliest, latest);

    let total_duration = statistics.total_schedule_duration.clone();
    let mut summary_lines = vec![format!("Scheduled {} lot(s) in {} step placement(s).", lot_results.len(), step_results.len())];
    match (earliest, latest) {
        (Some(s), Some(e)) => summary_lines.push(format!(
            "Earliest input: {}   Latest output: {}   Total: {}",
            s.format(TIMESTAMP_FORMAT),
            e.format(TIMESTAMP_FORMAT),
            total_duration
        )),
        _ => summary_lines.push("No feasible solution".to_string()),
    }
    if waves_failed > 0 {
        summary_lines.push(format!("{} wave(s) returned no solution.", waves_failed));
    }

    ArtifactBundle {
        step_results,
        plan_result: PlanResult { statistics, lot_results },
        gantt: build_gantt_segments(&ordered, &had_plan, unavailable),
        plan_summary: summary_lines.join("\n"),
    }
}

fn build_lot_results(lot_index: &HashMap<&str, &Lot>, solved: &[SolvedOp]) -> Vec<LotResultRow> {
    let mut last_per_lot: HashMap<&str, &SolvedOp> = HashMap::new();
    for op in solved {
        last_per_lot
            .entry(op.lot_id.as_str())
            .and_modify(|current| {
                if op.step_idx > current.step_idx {
                    *current = op;
                }
            })
            .or_insert(op);
    }

    let mut lot_ids: Vec<&&str> = last_per_lot.keys().collect();
    lot_ids.sort();

    lot_ids
        .iter()
        .map(|lot_id| {
            let last = last_per_lot[**lot_id];
            let lot = lot_index.get(**lot_id);
            let due = lot.and_then(|l| l.due_date);
            LotResultRow {
                lot: lot_id.to_string(),
                priority: lot.map(|l| l.priority).unwrap_or(0),
                due_date: due.map(|d| d.format(TIMESTAMP_FORMAT).to_string()),
                plan_date: last.end.format(TIMESTAMP_FORMAT).to_string(),
                delay_time: due.map(|d| delay_time_string(last.end, d)).unwrap_or_default(),
            }
        })
        .collect()
}

/// Days-and-hours distance between the planned finish and the due date, as
/// the front end prints it: `"D:HH"`, `-` prefixed when early, `"0:00"` on
/// the dot.
fn delay_time_string(plan_finish: NaiveDateTime, due: NaiveDateTime) -> String {
    let total_seconds = (plan_finish - due).num_seconds();
    if total_seconds == 0 {
        return "0:00".to_string();
    }
    let abs = total_seconds.abs();
    let days = abs / 86_400;
    let hours = (abs % 86_400) / 3_600;
    if total_seconds > 0 { format!("{}:{:02}", days, hours) } else { format!("-{}:{:02}", days, hours) }
}

fn build_statistics(
    lot_results: &[LotResultRow],
    calc_start: NaiveDateTime,
    calc_end: NaiveDateTime,
    earliest: Option<NaiveDateTime>,
    latest: Option<NaiveDateTime>,
) -> PlanStatistics {
    let mut early_count = 0;
    let mut on_time_count = 0;
    let mut minor_delay_count = 0;
    let mut major_delay_count = 0;

    for result in lot_results {
        let delay = result.delay_time.as_str();
        if delay.is_empty() {
            continue;
        }
        if delay == "0:00" || delay == "-0:00" {
            on_time_count += 1;
        } else if delay.starts_with('-') {
            early_count += 1;
        } else {
            let total_days = delay
                .split_once(':')
                .and_then(|(d, h)| Some(d.parse::<f64>().ok()? + h.parse::<f64>().ok()? / 24.0))
                .unwrap_or(f64::MAX);
            if total_days <= 2.0 {
                minor_delay_count += 1;
            } else {
                major_delay_count += 1;
            }
        }
    }

    let total_schedule_duration = match (earliest, latest) {
        (Some(s), Some(e)) => {
            let minutes = (e - s).num_minutes().max(0);
            format!("{}:{:02}:{:02}", minutes / (24 * 60), (minutes % (24 * 60)) / 60, minutes % 60)
        }
        _ => "0:00:00".to_string(),
    };

    let calc_seconds = (calc_end - calc_start).num_seconds().max(0);
    PlanStatistics {
        batch_count: lot_results.len(),
        calculation_start: calc_start.format(TIMESTAMP_FORMAT).to_string(),
        calculation_end: calc_end.format(TIMESTAMP_FORMAT).to_string(),
        calculation_duration: format!("{}:{:02}:{:02}", calc_seconds / 3600, (calc_seconds % 3600) / 60, calc_seconds % 60),
        earliest_input_time: earliest.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
        latest_output_time: latest.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
        total_schedule_duration,
        early_count,
        on_time_count,
        minor_delay_count,
        major_delay_count,
    }
}

fn build_gantt_segments(ordered: &[&SolvedOp], had_plan: &HashMap<&str, bool>, unavailable: &UnavailableMap) -> Vec<GanttSegment> {
    #[derive(Clone)]
    struct Child {
        start: NaiveDateTime,
        segment: GanttSegment,
    }

    let mut children: HashMap<String, Vec<Child>> = HashMap::new();

    for op in ordered {
        if op.start_min == op.end_min {
            continue;
        }
        let machine = op.machine.as_str().to_string();
        let booking = booking_for(op.class, had_plan.get(op.lot_id.as_str()).copied().unwrap_or(false));
        children.entry(machine.clone()).or_default().push(Child {
            start: op.start,
            segment: GanttSegment {
                id: format!("{}_{}_{}", machine, op.lot_id, op.step),
                text: format!("{} {}", op.lot_id, op.step),
                parent: Some(machine.clone()),
                render: None,
                start_date: Some(op.start.format(GANTT_DATE_FORMAT).to_string()),
                end_date: Some(op.end.format(GANTT_DATE_FORMAT).to_string()),
                duration: (op.end - op.start).num_seconds() as f64 / 3600.0,
                booking: Some(booking),
                color: Some(color_for(booking).to_string()),
            },
        });
    }

    for (machine, periods) in unavailable {
        for (idx, period) in periods.iter().enumerate() {
            let booking = booking_for_unavailable(period.unavailable_type);
            let text = period.reason.clone().unwrap_or_else(|| format!("{:?}", period.unavailable_type).to_uppercase());
            children.entry(machine.as_str().to_string()).or_default().push(Child {
                start: period.start_time,
                segment: GanttSegment {
                    id: format!("{}_UNAVAIL_{}", machine, idx),
                    text,
                    parent: Some(machine.as_str().to_string()),
                    render: None,
                    start_date: Some(period.start_time.format(GANTT_DATE_FORMAT).to_string()),
                    end_date: Some(period.end_time.format(GANTT_DATE_FORMAT).to_string()),
                    duration: (period.end_time - period.start_time).num_seconds() as f64 / 3600.0,
                    booking: Some(booking),
                    color: Some(color_for(booking).to_string()),
                },
            });
        }
    }

    let mut machines: Vec<&String> = children.keys().collect();
    machines.sort();

    let mut segments = Vec::new();
    for machine in machines {
        segments.push(GanttSegment {
            id: machine.clone(),
            text: machine.clone(),
            parent: None,
            render: Some("split"),
            start_date: None,
            end_date: None,
            duration: 0.0,
            booking: None,
            color: None,
        });
        let mut rows = children[machine].clone();
        rows.sort_by_key(|c| c.start);
        segments.extend(rows.into_iter().map(|c| c.segment));
    }
    segments
}

/// Writes the three JSON documents into the output directory.
pub fn write_artifacts(output_dir: &Path, bundle: &ArtifactBundle) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    fs::write(output_dir.join(FILE_STEP_RESULT), serde_json::to_string_pretty(&bundle.step_results)?)?;
    fs::write(output_dir.join(FILE_PLAN_RESULT), serde_json::to_string_pretty(&bundle.plan_result)?)?;
    fs::write(output_dir.join(FILE_GANTT), serde_json::to_string_pretty(&bundle.gantt)?)?;
    log::info!("Artifacts written to {}.", output_dir.display());
    Ok(())
}

/// Appends the job-history row for this schedule.
pub fn persist_job_history(conn: &Connection, schedule_id: &ScheduleId, created_at: NaiveDateTime, bundle: &ArtifactBundle) -> Result<()> {
    conn.execute(
        "INSERT INTO DynamicSchedulingJob \
         (ScheduleId, CreateDate, CreateUser, PlanSummary, LotStepResult, LotPlanResult, machineTaskSegment) \
         VALUES (?1, ?2, 'system', ?3, ?4, ?5, ?6)",
        rusqlite::params![
            schedule_id.as_str(),
            created_at,
            bundle.plan_summary,
            serde_json::to_string(&bundle.step_results)?,
            serde_json::to_string(&bundle.plan_result)?,
            serde_json::to_string(&bundle.gantt)?,
        ],
    )?;
    Ok(())
}
