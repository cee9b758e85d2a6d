//! Run log for pipeline audit.
//!
//! Stage events are stored in NDJSON format (one JSON object per line) next
//! to the other outputs of a run. The log is append-only so that a partial
//! run still leaves a usable trace of what executed.
//!
//! # Event Format
//!
//! Each event is a JSON object with the following fields:
//! - `ts`: RFC3339 timestamp
//! - `stage`: The pipeline stage that ran
//! - `actor`: The owner string (e.g., `user@HOST`)
//! - `scan`: Optional scan number for scan-specific events
//! - `details`: Freeform object with stage-specific details

use crate::error::{PostError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Pipeline stages that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Run started, configuration accepted
    RunStart,
    /// Reconstruction candidates loaded
    Load,
    /// Flip and mode-roll preprocessing
    Preprocess,
    /// Data range optimization and crop
    Crop,
    /// Candidate sorting
    Sort,
    /// Averaging over correlated candidates
    Average,
    /// Direct-space centering
    Center,
    /// Interpolation into the target frame
    Interpolate,
    /// Phase unwrapping
    UnwrapPhase,
    /// Phase ramp removal
    RemoveRamp,
    /// Apodization
    Apodize,
    /// Phase averaging and offset removal
    PhaseCleanup,
    /// Refraction correction
    Refraction,
    /// Strain computation
    Strain,
    /// Frame transform for saving
    FrameTransform,
    /// Outputs written
    Save,
    /// Run completed
    RunComplete,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::RunStart => write!(f, "run_start"),
            Stage::Load => write!(f, "load"),
            Stage::Preprocess => write!(f, "preprocess"),
            Stage::Crop => write!(f, "crop"),
            Stage::Sort => write!(f, "sort"),
            Stage::Average => write!(f, "average"),
            Stage::Center => write!(f, "center"),
            Stage::Interpolate => write!(f, "interpolate"),
            Stage::UnwrapPhase => write!(f, "unwrap_phase"),
            Stage::RemoveRamp => write!(f, "remove_ramp"),
            Stage::Apodize => write!(f, "apodize"),
            Stage::PhaseCleanup => write!(f, "phase_cleanup"),
            Stage::Refraction => write!(f, "refraction"),
            Stage::Strain => write!(f, "strain"),
            Stage::FrameTransform => write!(f, "frame_transform"),
            Stage::Save => write!(f, "save"),
            Stage::RunComplete => write!(f, "run_complete"),
        }
    }
}

/// An event record for the run log.
///
/// Events are serialized as single-line JSON objects and appended to
/// the run.ndjson file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The pipeline stage that ran.
    pub stage: Stage,

    /// The actor who ran the pipeline (e.g., `user@HOST`).
    pub actor: String,

    /// Optional scan number for scan-specific events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<i64>,

    /// Freeform details object with stage-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event for the given stage.
    ///
    /// The timestamp is set to the current time, and the actor is
    /// determined from the environment (USER@HOSTNAME).
    pub fn new(stage: Stage) -> Self {
        Self {
            ts: Utc::now(),
            stage,
            actor: get_actor_string(),
            scan: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the scan number for this event.
    pub fn with_scan(mut self, scan: i64) -> Self {
        self.scan = Some(scan);
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            PostError::OutputError(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// Get the actor string for event metadata.
fn get_actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// Append an event to a run log file.
///
/// The parent directory and the file are created if they do not exist. Each
/// append results in one line with a trailing newline, synced to disk.
pub fn append_event(log_path: &Path, event: &Event) -> Result<()> {
    let json_line = event.to_ndjson_line()?;

    if let Some(parent) = log_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            PostError::OutputError(format!(
                "failed to create run log directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| {
            PostError::OutputError(format!(
                "failed to open run log '{}': {}",
                log_path.display(),
                e
            ))
        })?;

    writeln!(file, "{}", json_line).map_err(|e| {
        PostError::OutputError(format!(
            "failed to write event to '{}': {}",
            log_path.display(),
            e
        ))
    })?;

    file.sync_all().map_err(|e| {
        PostError::OutputError(format!(
            "failed to sync run log '{}': {}",
            log_path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Collects events either into a file or in memory.
///
/// The in-memory variant backs `--dry-run` and tests, where a run log on
/// disk is not wanted.
#[derive(Debug)]
pub enum EventSink {
    File(std::path::PathBuf),
    Memory(Vec<Event>),
    Discard,
}

impl EventSink {
    pub fn record(&mut self, event: Event) -> Result<()> {
        match self {
            EventSink::File(path) => append_event(path, &event),
            EventSink::Memory(events) => {
                events.push(event);
                Ok(())
            }
            EventSink::Discard => Ok(()),
        }
    }

    /// Events recorded in memory; empty for the other variants.
    pub fn recorded(&self) -> &[Event] {
        match self {
            EventSink::Memory(events) => events,
            _ => &[],
        }
    }
}
