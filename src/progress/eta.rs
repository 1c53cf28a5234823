// Restzeit-Schaetzung mit drei Stufen und exponentieller Glaettung.

use std::time::{Duration, Instant};

use crate::config::ProgressTuning;
use crate::progress::snapshot::ProgressSnapshot;

/// Restliche Medienzeit / Speed-Multiplikator.
pub fn eta_from_speed(remaining_micros: u64, speed: f64) -> Option<Duration> {
    if remaining_micros == 0 || !(speed > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(remaining_micros as f64 / 1_000_000.0 / speed).ok()
}

/// Restliche Frames / Encoding-FPS.
pub fn eta_from_fps(remaining_frames: u64, fps: f64) -> Option<Duration> {
    if remaining_frames == 0 || !(fps > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(remaining_frames as f64 / fps).ok()
}

/// Hochrechnung: elapsed * (100 - p) / p.
pub fn eta_from_elapsed(elapsed: Duration, pct: f64) -> Option<Duration> {
    let remaining_pct = 100.0 - pct;
    if !(pct > 0.0) || !(remaining_pct > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(elapsed.as_secs_f64() * remaining_pct / pct).ok()
}

/// Rohe neue ETA ohne Glaettung. None = nicht verfuegbar.
pub fn estimate(s: &ProgressSnapshot, elapsed: Option<Duration>, tuning: &ProgressTuning) -> Option<Duration> {
    // Waehrend der Aufwaermphase sind die Werte zu unruhig
    if elapsed.is_some_and(|e| e < tuning.warmup()) {
        return None;
    }

    // 1. Speed-Multiplikator: Verhaeltnis Echtzeit zu Medienzeit direkt von FFmpeg
    let total_us = s.total_duration_micros();
    if s.last_valid_speed > 0.0 && total_us > 0 && s.elapsed_media_micros > 0 {
        let remaining = total_us.saturating_sub(s.elapsed_media_micros);
        if let Some(eta) = eta_from_speed(remaining, s.last_valid_speed) {
            return Some(eta);
        }
    }

    // 2. Encoding-FPS, nur mit exakter Framezahl
    if !s.frame_count_estimated && s.total_frames > 0 && s.current_frame > 0 {
        let remaining = s.total_frames.saturating_sub(s.current_frame);
        if let Some(eta) = eta_from_fps(remaining, s.last_valid_fps) {
            return Some(eta);
        }
    }

    // 3. Hochrechnung aus der bisherigen Laufzeit
    let elapsed = elapsed?;
    if s.completion_percent > tuning.extrapolation_min_percent
        && elapsed > tuning.extrapolation_min_elapsed()
    {
        return eta_from_elapsed(elapsed, s.completion_percent);
    }

    None
}

/// Mischt neue ETA mit der zuletzt angezeigten. Grosse Spruenge werden
/// staerker gedaempft als normales Rauschen.
pub fn smooth(previous: Option<Duration>, new: Duration, tuning: &ProgressTuning) -> Duration {
    let Some(old) = previous.filter(|d| !d.is_zero()) else {
        return new;
    };

    let old_s = old.as_secs_f64();
    let new_s = new.as_secs_f64();
    let weight = if (new_s - old_s).abs() > old_s * tuning.eta_jump_ratio {
        tuning.eta_jump_weight
    } else {
        tuning.eta_weight
    };

    Duration::try_from_secs_f64(new_s * weight + old_s * (1.0 - weight)).unwrap_or(new)
}

/// Berechnet die ETA fuer den aktuellen Snapshot neu.
pub fn update(s: &mut ProgressSnapshot, now: Instant, tuning: &ProgressTuning) {
    let elapsed = s.elapsed_at(now);
    s.eta = estimate(s, elapsed, tuning).map(|new| smooth(s.eta, new, tuning));
}
