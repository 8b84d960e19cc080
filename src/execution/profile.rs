//! Chrome trace-event profiles of a run

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::task::RunReport;

pub const PROFILE_PREFIX: &str = "Monorail-Profile";

/// One complete ("X") event, loadable in chrome://tracing or Perfetto
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceEvent {
    pub name: String,
    pub cat: String,
    pub ph: &'static str,
    /// Microseconds since the first task started
    pub ts: i64,
    pub dur: i64,
    pub pid: u32,
    pub tid: usize,
}

/// Build trace events for every task that ran. Tasks that overlap in time
/// are placed on separate lanes (`tid`), reusing the lowest free lane.
pub fn trace_events(report: &RunReport) -> Vec<TraceEvent> {
    let mut spans: Vec<(&str, DateTime<Utc>, DateTime<Utc>)> = report
        .runs
        .iter()
        .filter_map(|run| Some((run.name(), run.started_at?, run.finished_at?)))
        .collect();
    spans.sort_by_key(|(_, start, _)| *start);

    let Some(origin) = spans.first().map(|(_, start, _)| *start) else {
        return Vec::new();
    };

    let mut lanes: Vec<DateTime<Utc>> = Vec::new();
    let mut events = Vec::with_capacity(spans.len());

    for (name, start, end) in spans {
        let lane = match lanes.iter().position(|free_at| *free_at <= start) {
            Some(lane) => {
                lanes[lane] = end;
                lane
            }
            None => {
                lanes.push(end);
                lanes.len() - 1
            }
        };

        events.push(TraceEvent {
            name: name.to_string(),
            cat: report.script.clone(),
            ph: "X",
            ts: micros(start - origin),
            dur: micros(end - start),
            pid: 1,
            tid: lane,
        });
    }

    events
}

fn micros(delta: chrono::Duration) -> i64 {
    delta.num_microseconds().unwrap_or(i64::MAX).max(0)
}

/// `Monorail-Profile-YYYYMMDDTHHMMSS.json`
pub fn profile_file_name(at: DateTime<Local>) -> String {
    format!("{}-{}.json", PROFILE_PREFIX, at.format("%Y%m%dT%H%M%S"))
}

/// Write the profile into `dir`, creating it if needed, and return its path
pub fn write_profile(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(profile_file_name(Local::now()));

    let json = serde_json::to_string_pretty(&trace_events(report))?;
    fs::write(&path, json)?;

    info!("Wrote profile to {}", path.display());
    Ok(path)
}
