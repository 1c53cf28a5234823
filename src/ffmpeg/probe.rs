// Metadaten-Abfragen vor dem Start. Jede Abfrage ist zeitlich begrenzt und
// liefert bei Fehlern None statt eines Fehlers.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::ffmpeg::parse::parse_frame_rate;

/// r_frame_rate und avg_frame_rate des ersten Video-Streams (0 = unbekannt).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameRates {
    pub real: f64,
    pub average: f64,
}

/// Quelle fuer Medien-Metadaten. `None` heisst "nicht verfuegbar".
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn frame_rates(&self, input: &Path) -> Option<FrameRates>;
    async fn frame_count(&self, input: &Path) -> Option<u64>;
    async fn duration(&self, input: &Path) -> Option<Duration>;
    /// Bitrate in kbps, zuerst aus dem Container, dann aus dem Stream.
    async fn bitrate_kbps(&self, input: &Path) -> Option<u64>;
}

/// MediaProbe ueber das ffprobe-Binary.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: String,
    timeout: Duration,
}

impl Ffprobe {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Fuehrt ffprobe mit `-v error ... -of csv=p=0` aus und gibt stdout
    /// getrimmt zurueck. Timeout, Startfehler und Exit-Code != 0 ergeben None.
    async fn query(&self, input: &Path, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-v")
            .arg("error")
            .args(args)
            .arg("-of")
            .arg("csv=p=0")
            .arg(input.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(program = %self.program, "ffprobe konnte nicht gestartet werden: {e}");
                return None;
            }
            Err(_) => {
                debug!(?args, "ffprobe Timeout nach {:?}", self.timeout);
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                ?args,
                "ffprobe beendet mit Exit-Code: {}",
                output.status.code().unwrap_or(-1)
            );
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaProbe for Ffprobe {
    async fn frame_rates(&self, input: &Path) -> Option<FrameRates> {
        let out = self
            .query(
                input,
                &["-select_streams", "v:0", "-show_entries", "stream=r_frame_rate,avg_frame_rate"],
            )
            .await?;
        Some(parse_frame_rates(&out))
    }

    async fn frame_count(&self, input: &Path) -> Option<u64> {
        let out = self
            .query(input, &["-select_streams", "v:0", "-show_entries", "stream=nb_frames"])
            .await?;
        parse_positive_int(&out)
    }

    async fn duration(&self, input: &Path) -> Option<Duration> {
        let out = self
            .query(input, &["-show_entries", "format=duration"])
            .await?;
        parse_duration_secs(&out)
    }

    async fn bitrate_kbps(&self, input: &Path) -> Option<u64> {
        let format = self
            .query(input, &["-select_streams", "v:0", "-show_entries", "format=bit_rate"])
            .await;
        if let Some(bps) = format.as_deref().and_then(parse_positive_int) {
            return Some(bps / 1000);
        }

        let stream = self
            .query(input, &["-select_streams", "v:0", "-show_entries", "stream=bit_rate"])
            .await?;
        parse_positive_int(&stream).map(|bps| bps / 1000)
    }
}

/// `r_frame_rate,avg_frame_rate` aus einer csv-Zeile.
fn parse_frame_rates(out: &str) -> FrameRates {
    let line = out.lines().next().unwrap_or_default();
    let mut parts = line.split(',');
    FrameRates {
        real: parts.next().map(parse_frame_rate).unwrap_or(0.0),
        average: parts.next().map(parse_frame_rate).unwrap_or(0.0),
    }
}

/// Ganzzahl > 0; "N/A" und leere Ausgabe sind nicht verfuegbar.
fn parse_positive_int(out: &str) -> Option<u64> {
    out.lines()
        .next()?
        .trim()
        .trim_end_matches(',')
        .parse::<u64>()
        .ok()
        .filter(|&n| n > 0)
}

/// Sekunden als Dezimalzahl ("5025.360000").
fn parse_duration_secs(out: &str) -> Option<Duration> {
    let secs = out.lines().next()?.trim().parse::<f64>().ok()?;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
