// Anzeige-Strings fuer den Renderer. Reine Nachbearbeitung, der
// gespeicherte Snapshot bleibt unveraendert.

use std::time::Duration;

use crate::ffmpeg::parse::Reading;
use crate::progress::snapshot::ProgressSnapshot;

const PLACEHOLDER: &str = "—";

/// Binaere Einheiten: "1023 B", "1.0 KiB", "1.5 MiB".
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {prefix}iB", bytes as f64 / div as f64)
}

/// "m:ss" bzw. "h:mm:ss", auf Sekunden gerundet.
pub fn format_duration(d: Duration) -> String {
    let total = (d.as_secs_f64()).round() as u64;
    let (h, m, s) = (total / 3600, total % 3600 / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

pub fn format_eta(eta: Option<Duration>) -> String {
    eta.map(format_duration)
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// "..." solange nichts bekannt ist; vor erfolgreichem Abschluss maximal
/// 99.9 %. Fehler und Skips zaehlen nicht als Abschluss.
pub fn format_percentage(s: &ProgressSnapshot, succeeded: bool) -> String {
    if !s.percent_known() && !succeeded {
        return "...".to_string();
    }
    let pct = if succeeded {
        s.completion_percent
    } else {
        s.completion_percent.min(99.9)
    };
    format!("{pct:.1}%")
}

pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return PLACEHOLDER.to_string();
    }
    format_bytes(bytes)
}

/// Speed oder Bitrate: Rohtext, "N/A" oder Platzhalter.
pub fn format_reading<T>(reading: Option<&Reading<T>>) -> String {
    match reading {
        None => PLACEHOLDER.to_string(),
        Some(r) if r.raw().is_empty() || r.raw() == "0x" => PLACEHOLDER.to_string(),
        Some(r) => r.raw().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_table() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MiB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GiB");
        assert_eq!(format_bytes(5 * 1024u64.pow(4)), "5.0 TiB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs_f64(38.4)), "0:38");
        assert_eq!(format_duration(Duration::from_secs(125)), "2:05");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(format_eta(None), "—");
    }

    #[test]
    fn percentage_placeholder_and_cap() {
        let unknown = ProgressSnapshot::default();
        assert_eq!(format_percentage(&unknown, false), "...");

        let almost = ProgressSnapshot {
            total_frames: 1000,
            completion_percent: 99.97,
            ..ProgressSnapshot::default()
        };
        assert_eq!(format_percentage(&almost, false), "99.9%");

        let finished = ProgressSnapshot {
            completion_percent: 100.0,
            ..ProgressSnapshot::default()
        };
        assert_eq!(format_percentage(&finished, true), "100.0%");

        // Abgebrochen oder fehlgeschlagen ohne Gesamtwerte bleibt unbekannt
        let failed = ProgressSnapshot {
            current_frame: 77,
            ..ProgressSnapshot::default()
        };
        assert_eq!(format_percentage(&failed, false), "...");
    }

    #[test]
    fn readings() {
        assert_eq!(format_reading::<f64>(None), "—");
        assert_eq!(format_reading::<f64>(Some(&Reading::NotAvailable)), "N/A");
        let zero = Reading::Value {
            value: 0.0,
            raw: "0x".to_string(),
        };
        assert_eq!(format_reading(Some(&zero)), "—");
        let speed = Reading::Value {
            value: 1.2,
            raw: "1.2x".to_string(),
        };
        assert_eq!(format_reading(Some(&speed)), "1.2x");
    }
}
