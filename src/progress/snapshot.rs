// Der Fortschrittszustand eines Encode-Laufs und wie ein Telemetrie-Block
// darauf angewendet wird.

use std::time::{Duration, Instant};

use crate::config::ProgressTuning;
use crate::ffmpeg::parse::Reading;
use crate::ffmpeg::progress::ProgressBatch;
use crate::progress::{eta, frames, percent};

/// Kompletter Fortschritt eines Laufs. Wird nur unter dem Lock des
/// ProgressStore veraendert; Leser bekommen Kopien.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub current_frame: u64,
    pub current_fps: f64,
    pub last_valid_fps: f64,
    pub bitrate: Option<Reading<String>>,
    pub total_output_bytes: u64,
    pub elapsed_media_micros: u64,
    pub speed: Option<Reading<f64>>,
    pub last_valid_speed: f64,
    /// Immer in [0, 100].
    pub completion_percent: f64,
    /// 0 = unbekannt.
    pub total_frames: u64,
    pub frame_count_estimated: bool,
    /// ZERO = unbekannt.
    pub total_duration: Duration,
    pub source_frame_rate: f64,
    pub source_rate_is_fallback: bool,
    /// None = keine ETA verfuegbar.
    pub eta: Option<Duration>,
    pub run_started_at: Option<Instant>,
}

impl ProgressSnapshot {
    /// Ohne Gesamtframes und Gesamtdauer ist 0 % kein echter Wert.
    pub fn percent_known(&self) -> bool {
        self.total_frames > 0 || !self.total_duration.is_zero()
    }

    pub fn eta_available(&self) -> bool {
        self.eta.is_some()
    }

    pub fn total_duration_micros(&self) -> u64 {
        u64::try_from(self.total_duration.as_micros()).unwrap_or(u64::MAX)
    }

    /// Wall-Clock seit Prozessstart.
    pub fn elapsed_at(&self, now: Instant) -> Option<Duration> {
        self.run_started_at
            .map(|start| now.saturating_duration_since(start))
    }

    /// Wendet einen kompletten Block an und berechnet Prozent und ETA neu.
    pub fn apply_batch(&mut self, batch: &ProgressBatch, now: Instant, tuning: &ProgressTuning) {
        if let Some(frame) = batch.frame {
            self.current_frame = self.current_frame.max(frame);
            frames::revise_for_frame(self, frame);
        }

        if let Some(fps) = batch.fps {
            self.current_fps = fps;
            if fps > 0.0 {
                self.last_valid_fps = fps;
            }
        }

        if let Some(bitrate) = &batch.bitrate {
            self.bitrate = Some(bitrate.clone());
        }

        if let Some(size) = batch.total_size {
            self.total_output_bytes = self.total_output_bytes.max(size);
        }

        if let Some(us) = batch.out_time_micros() {
            self.elapsed_media_micros = self.elapsed_media_micros.max(us);
        }

        if let Some(speed) = &batch.speed {
            // N/A loescht last_valid_speed nicht
            if let Some(&value) = speed.value() {
                if value > 0.0 {
                    self.last_valid_speed = value;
                }
            }
            self.speed = Some(speed.clone());
        }

        self.completion_percent = percent::reconcile(self, tuning);
        eta::update(self, now, tuning);
    }

    /// Abschluss eines erfolgreichen Laufs: die tatsaechliche Framezahl ist
    /// jetzt bekannt.
    pub fn finalize(&mut self) {
        if self.current_frame > 0 {
            self.total_frames = self.current_frame;
            self.frame_count_estimated = false;
        }
        self.completion_percent = 100.0;
        self.eta = None;
    }
}
