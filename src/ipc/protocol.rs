// IPC-Protokoll: Serde-Typen fuer alle Requests und Responses.
// NDJSON ueber stdin/stdout (JSON-RPC-aehnlich).

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::{EncoderConfig, ProgressTuning};
use crate::progress::display;
use crate::progress::snapshot::ProgressSnapshot;
use crate::progress::store::StoreView;

// ---------------------------------------------------------------------------
// Eingehend (vom Frontend)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Ohne `id` vergibt das Backend eine UUID (siehe encode_started).
    #[serde(rename = "start_encode")]
    StartEncode {
        #[serde(default)]
        id: String,
        input_path: String,
        #[serde(default)]
        options: EncoderConfig,
        #[serde(default)]
        tuning: ProgressTuning,
    },

    #[serde(rename = "cancel_encode")]
    CancelEncode { id: String },

    #[serde(rename = "get_snapshot")]
    GetSnapshot { id: String },

    #[serde(rename = "get_status")]
    GetStatus,

    #[serde(rename = "shutdown")]
    Shutdown,
}

// ---------------------------------------------------------------------------
// Ausgehend (zum Frontend)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "encode_started")]
    EncodeStarted { id: String, output_path: String },

    #[serde(rename = "encode_skipped")]
    EncodeSkipped { id: String, reason: String },

    #[serde(rename = "snapshot")]
    Snapshot {
        id: String,
        progress: ProgressReport,
        logs: Vec<String>,
        done: bool,
        error: Option<String>,
    },

    #[serde(rename = "encode_done")]
    EncodeDone {
        id: String,
        output_path: String,
        final_size: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        size_ratio: Option<f64>,
        within_size_limit: bool,
    },

    #[serde(rename = "encode_error")]
    EncodeError { id: String, message: String },

    #[serde(rename = "encode_cancelled")]
    EncodeCancelled { id: String },

    #[serde(rename = "status_report")]
    StatusReport { jobs: Vec<JobStatus> },
}

impl Response {
    /// Antwort auf get_snapshot aus einer Store-Kopie.
    pub fn snapshot(id: String, view: StoreView) -> Self {
        let progress = ProgressReport::new(&view.progress, view.succeeded, Instant::now());
        Response::Snapshot {
            id,
            progress,
            logs: view.logs,
            done: view.done,
            error: view.error,
        }
    }
}

/// Fortschritt fuer den Renderer: Rohwerte plus fertige Anzeige-Strings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressReport {
    /// None solange weder Framezahl noch Dauer bekannt sind und der Lauf
    /// nicht erfolgreich beendet wurde.
    pub percent: Option<f64>,
    pub percent_display: String,
    pub current_frame: u64,
    pub total_frames: u64,
    pub frame_count_estimated: bool,
    pub fps: f64,
    pub speed: String,
    pub bitrate: String,
    pub output_bytes: u64,
    pub output_size: String,
    pub media_time_secs: f64,
    pub total_duration_secs: f64,
    pub eta_secs: Option<f64>,
    pub eta: String,
    pub elapsed: String,
}

impl ProgressReport {
    pub fn new(s: &ProgressSnapshot, succeeded: bool, now: Instant) -> Self {
        let elapsed = s.elapsed_at(now).unwrap_or_default();
        Self {
            percent: (s.percent_known() || succeeded).then_some(s.completion_percent),
            percent_display: display::format_percentage(s, succeeded),
            current_frame: s.current_frame,
            total_frames: s.total_frames,
            frame_count_estimated: s.frame_count_estimated,
            fps: s.current_fps,
            speed: display::format_reading(s.speed.as_ref()),
            bitrate: display::format_reading(s.bitrate.as_ref()),
            output_bytes: s.total_output_bytes,
            output_size: display::format_size(s.total_output_bytes),
            media_time_secs: s.elapsed_media_micros as f64 / 1_000_000.0,
            total_duration_secs: s.total_duration.as_secs_f64(),
            eta_secs: s.eta.map(|d| d.as_secs_f64()),
            eta: display::format_eta(s.eta),
            elapsed: display::format_duration(elapsed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub input_path: String,
    pub output_path: String,
    pub status: JobState,
    /// Wie `ProgressReport::percent`.
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Skipped,
    Error,
    Cancelled,
}
