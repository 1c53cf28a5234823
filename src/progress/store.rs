// Gemeinsamer Zustand eines Laufs: Snapshot, Diagnose-Log und Ergebnis
// hinter einem einzigen Mutex. Unter dem Lock passiert keine I/O.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;

use crate::config::ProgressTuning;
use crate::ffmpeg::diagnostics::{is_log_worthy, parse_duration_announcement, parse_frame_rate_hint};
use crate::ffmpeg::progress::ProgressBatch;
use crate::progress::frames::{self, FrameEstimate};
use crate::progress::snapshot::ProgressSnapshot;

/// Ringpuffer der letzten N Log-Zeilen.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Kopie des Gesamtzustands fuer Leser.
#[derive(Debug, Clone)]
pub struct StoreView {
    pub progress: ProgressSnapshot,
    pub logs: Vec<String>,
    pub done: bool,
    /// Nur bei erfolgreichem Prozessende gesetzt, nicht bei Skip oder Fehler.
    pub succeeded: bool,
    pub error: Option<String>,
}

impl StoreView {
    /// Prozent fuer den Renderer. Ohne bekannte Gesamtwerte nur nach Erfolg.
    pub fn percent(&self) -> Option<f64> {
        (self.progress.percent_known() || self.succeeded).then_some(self.progress.completion_percent)
    }
}

#[derive(Debug)]
struct StoreState {
    snapshot: ProgressSnapshot,
    logs: LogBuffer,
    done: bool,
    succeeded: bool,
    error: Option<String>,
}

/// Einziger geteilter Zustand eines Laufs. Die Stream-Tasks schreiben,
/// beliebig viele Leser holen sich Kopien.
#[derive(Debug)]
pub struct ProgressStore {
    state: Mutex<StoreState>,
    tuning: ProgressTuning,
}

impl ProgressStore {
    pub fn new(tuning: ProgressTuning, log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                snapshot: ProgressSnapshot::default(),
                logs: LogBuffer::new(log_capacity),
                done: false,
                succeeded: false,
                error: None,
            }),
            tuning,
        }
    }

    // Jede Mutation ist ein einzelner Block; Poison wird ignoriert.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ergebnis der Probe-Kette uebernehmen (vor dem Start).
    pub fn seed_estimate(&self, estimate: &FrameEstimate) {
        frames::seed(&mut self.lock().snapshot, estimate);
    }

    /// Startzeit setzen; nur der erste Aufruf zaehlt.
    pub fn mark_started(&self) {
        self.mark_started_at(Instant::now());
    }

    pub fn mark_started_at(&self, at: Instant) {
        let mut state = self.lock();
        if state.snapshot.run_started_at.is_none() {
            state.snapshot.run_started_at = Some(at);
        }
    }

    pub fn apply_batch(&self, batch: &ProgressBatch) {
        self.apply_batch_at(batch, Instant::now());
    }

    pub fn apply_batch_at(&self, batch: &ProgressBatch, now: Instant) {
        let mut state = self.lock();
        state.snapshot.apply_batch(batch, now, &self.tuning);
    }

    /// Eine stderr-Zeile: Dauer und Bildrate (jeweils erster Treffer),
    /// sonst ins Log.
    pub fn apply_diagnostic_line(&self, line: &str) {
        let duration = parse_duration_announcement(line);
        let rate = parse_frame_rate_hint(line);

        let mut state = self.lock();
        if let Some(duration) = duration {
            if frames::apply_late_duration(&mut state.snapshot, duration) {
                debug!(secs = duration.as_secs_f64(), "Dauer aus stderr uebernommen");
            }
        }
        if let Some(rate) = rate {
            if frames::apply_rate_hint(&mut state.snapshot, rate) {
                debug!(rate, "Bildrate aus stderr uebernommen");
            }
        }
        if is_log_worthy(line) {
            state.logs.push(line.to_string());
        }
    }

    pub fn push_log(&self, line: impl Into<String>) {
        self.lock().logs.push(line.into());
    }

    /// progress=end: Framezahl festschreiben, 100 %, keine ETA.
    pub fn finalize(&self) {
        self.lock().snapshot.finalize();
    }

    /// Prozessende. Bei Erfolg wird finalisiert, bei Fehler bleibt der
    /// letzte Fortschritt fuer die Anzeige stehen.
    pub fn complete(&self, result: Result<(), String>) {
        let mut state = self.lock();
        match result {
            Ok(()) => {
                state.snapshot.finalize();
                state.logs.push("Encoding erfolgreich abgeschlossen".to_string());
                state.succeeded = true;
            }
            Err(message) => {
                state.logs.push(format!("Encoding-Fehler: {message}"));
                state.error = Some(message);
            }
        }
        state.done = true;
    }

    /// Lauf wurde vor dem Start uebersprungen. Kein Fehler, kein Fortschritt.
    pub fn mark_skipped(&self, reason: &str) {
        let mut state = self.lock();
        state.logs.push(format!("Uebersprungen: {reason}"));
        state.done = true;
    }

    pub fn snapshot(&self) -> StoreView {
        let state = self.lock();
        StoreView {
            progress: state.snapshot.clone(),
            logs: state.logs.to_vec(),
            done: state.done,
            succeeded: state.succeeded,
            error: state.error.clone(),
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.lock().snapshot.clone()
    }
}
