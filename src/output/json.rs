//! JSON run summary
//!
//! One document per client session: board, run outcome, snapshots written and
//! timing. Durations carry both microseconds and a human-readable form.

use crate::driver::{Exit, Params, RunReport};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// Summary of one client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// When the summary was produced (RFC 3339)
    pub timestamp: DateTime<Utc>,
    pub broker: String,
    pub width: usize,
    pub height: usize,
    pub workers: usize,
    pub requested_turns: u64,
    pub completed_turns: u64,
    /// `completed`, `quit` or `killed`
    pub exit: String,
    /// Live cells of the final grid, when the run completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive_cells: Option<usize>,
    pub snapshots: Vec<String>,
    pub elapsed: JsonDuration,
    /// Generations per second over the whole session
    pub turns_per_sec: f64,
}

/// Build the summary for a finished session
pub fn build_run_summary(params: &Params, report: &RunReport) -> RunSummary {
    let secs = report.elapsed.as_secs_f64();
    let turns_per_sec = if secs > 0.0 {
        report.turn as f64 / secs
    } else {
        0.0
    };

    RunSummary {
        timestamp: Utc::now(),
        broker: params.broker.clone(),
        width: params.width,
        height: params.height,
        workers: params.threads,
        requested_turns: params.turns,
        completed_turns: report.turn,
        exit: exit_name(report.exit).to_string(),
        alive_cells: report.alive_cells(),
        snapshots: report.snapshots.clone(),
        elapsed: JsonDuration::from_duration(report.elapsed),
        turns_per_sec,
    }
}

fn exit_name(exit: Exit) -> &'static str {
    match exit {
        Exit::Completed => "completed",
        Exit::Quit => "quit",
        Exit::Killed => "killed",
    }
}

/// Write JSON output to file
pub fn write_json_output(output_path: &Path, summary: &RunSummary, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;

    if pretty {
        serde_json::to_writer_pretty(file, summary)?;
    } else {
        serde_json::to_writer(file, summary)?;
    }

    Ok(())
}

/// Format duration in human-readable format
fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else if micros < 3_600_000_000 {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    } else {
        format!("{:.2}h", micros as f64 / 3_600_000_000.0)
    }
}
