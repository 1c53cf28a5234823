// Prozentberechnung aus Frames und Medienzeit.

use crate::config::ProgressTuning;
use crate::progress::snapshot::ProgressSnapshot;

/// Begrenzt auf [0, 100]; NaN wird zu 0.
pub fn clamp_percent(pct: f64) -> f64 {
    if pct.is_nan() {
        return 0.0;
    }
    pct.clamp(0.0, 100.0)
}

/// current / total * 100, 0 bei total == 0.
pub fn frame_percent(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(current as f64 / total as f64 * 100.0)
}

/// elapsed / total * 100, 0 bei total == 0.
pub fn time_percent(elapsed_micros: u64, total_micros: u64) -> f64 {
    if total_micros == 0 {
        return 0.0;
    }
    clamp_percent(elapsed_micros as f64 / total_micros as f64 * 100.0)
}

/// Waehlt zwischen frame- und zeitbasiertem Wert.
///
/// Die Container-Dauer ist meist exakt, die Gesamtframes oft hochgerechnet.
/// Deshalb gewinnt der Zeitwert, sobald die Framezahl geschaetzt ist oder
/// beide Werte um mehr als `disagreement_threshold` Punkte auseinanderliegen.
pub fn reconcile(s: &ProgressSnapshot, tuning: &ProgressTuning) -> f64 {
    let by_frames = (s.total_frames > 0 && s.current_frame > 0)
        .then(|| frame_percent(s.current_frame, s.total_frames));

    let total_us = s.total_duration_micros();
    let by_time = (total_us > 0 && s.elapsed_media_micros > 0)
        .then(|| time_percent(s.elapsed_media_micros, total_us));

    let pct = match (by_frames, by_time) {
        (Some(f), Some(t)) => {
            if s.frame_count_estimated || (f - t).abs() > tuning.disagreement_threshold {
                t
            } else {
                f
            }
        }
        (None, Some(t)) => t,
        (Some(f), None) => f,
        (None, None) => 0.0,
    };

    clamp_percent(pct)
}
