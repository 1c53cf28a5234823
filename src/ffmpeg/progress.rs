// Parst FFmpeg -progress pipe:1 Ausgabe (key=value Format auf stdout).
// Sammelt Bloecke bis "progress=continue" oder "progress=end".

use tracing::debug;

use crate::ffmpeg::parse::{
    parse_bitrate, parse_count, parse_out_time, parse_rate, parse_speed, Reading,
};

/// Alle Werte eines -progress Blocks. Jeder Wert ist nur gesetzt, wenn er
/// im Block vorkam und gueltig war.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressBatch {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub bitrate: Option<Reading<String>>,
    pub total_size: Option<u64>,
    pub out_time_us: Option<u64>,
    pub out_time_ms: Option<u64>,
    pub out_time: Option<u64>,
    pub speed: Option<Reading<f64>>,
}

impl ProgressBatch {
    /// Medienposition in Mikrosekunden. out_time_us hat Vorrang, dann
    /// out_time; out_time_ms (x1000) nur als letzte Quelle.
    pub fn out_time_micros(&self) -> Option<u64> {
        self.out_time_us
            .or(self.out_time)
            .or_else(|| self.out_time_ms.and_then(|ms| ms.checked_mul(1000)))
    }

    /// Ein Rest-Block am Streamende zaehlt nur mit Zaehlerwerten.
    fn has_counters(&self) -> bool {
        self.frame.is_some() || self.fps.is_some() || self.total_size.is_some()
    }
}

/// Art der Blockgrenze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Continue,
    End,
}

/// Sammelt key=value Zeilen und liefert einen ProgressBatch, sobald ein
/// Block komplett ist.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    current: ProgressBatch,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fuettert eine einzelne Zeile aus stdout.
    /// Gibt Some((batch, boundary)) zurueck wenn ein Block abgeschlossen ist.
    pub fn feed_line(&mut self, line: &str) -> Option<(ProgressBatch, Boundary)> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        let value = value.trim();

        if key == "progress" {
            let boundary = if value == "end" {
                Boundary::End
            } else {
                Boundary::Continue
            };
            return Some((std::mem::take(&mut self.current), boundary));
        }

        self.apply(key, value, line);
        None
    }

    /// Streamende ohne abschliessende Blockgrenze.
    pub fn finish(self) -> Option<ProgressBatch> {
        self.current.has_counters().then_some(self.current)
    }

    fn apply(&mut self, key: &str, value: &str, line: &str) {
        let batch = &mut self.current;
        let accepted = match key {
            "frame" => parse_count(value).map(|v| batch.frame = Some(v)),
            "fps" => parse_rate(value).map(|v| batch.fps = Some(v)),
            "bitrate" => parse_bitrate(line).map(|v| batch.bitrate = Some(v)),
            "total_size" => parse_count(value).map(|v| batch.total_size = Some(v)),
            "out_time_us" => parse_count(value).map(|v| batch.out_time_us = Some(v)),
            "out_time_ms" => parse_count(value).map(|v| batch.out_time_ms = Some(v)),
            "out_time" => parse_out_time(value).map(|v| batch.out_time = Some(v)),
            "speed" => parse_speed(line).map(|v| batch.speed = Some(v)),
            // Unbekannte Schluessel (stream_0_0_q, dup_frames, ...) ignorieren
            _ => return,
        };

        if accepted.is_none() {
            debug!(key, value, "Ungueltiger Telemetrie-Wert verworfen");
        }
    }
}
