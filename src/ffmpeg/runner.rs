// Startet FFmpeg ueber tokio::process::Command. Zwei Pump-Tasks lesen
// stdout (Telemetrie) und stderr (Diagnose) und schreiben in den
// ProgressStore; der Runner wartet auf das Prozessende.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{EncodeError, EncodeResult};
use crate::ffmpeg::progress::{BatchAccumulator, Boundary};
use crate::progress::store::ProgressStore;

/// Wie ein Lauf geendet hat, wenn FFmpeg selbst keinen Fehler gemeldet hat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Baut die FFmpeg-Argumente fuer einen SVT-AV1 Encode zusammen.
pub fn build_ffmpeg_args(input_path: &Path, output_path: &Path, config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        // Telemetrie als key=value auf stdout
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input_path.to_string_lossy().to_string(),
        "-map".into(),
        "0".into(),
        // Data-Streams (tmcd etc.) entfernen
        "-map".into(),
        "-0:d".into(),
    ];

    for lang in &config.remove_languages {
        args.push("-map".into());
        args.push(format!("-0:a:m:language:{lang}"));
        args.push("-map".into());
        args.push(format!("-0:s:m:language:{lang}"));
    }

    // Cover-Art und andere Bild-Streams
    for codec in &config.remove_image_codecs {
        args.push("-map".into());
        args.push(format!("-0:v:m:codec_name:{codec}"));
    }

    let svt_params = format!(
        "tune={}:enable-variance-boost={}:variance-boost-strength={}:sharpness={}:enable-tf={}:film-grain={}",
        config.tune,
        u8::from(config.variance_boost),
        config.variance_boost_strength,
        config.sharpness,
        config.tf_strength,
        config.film_grain,
    );

    args.extend([
        "-c:v".into(),
        "libsvtav1".into(),
        "-crf".into(),
        config.crf.to_string(),
        "-preset".into(),
        config.preset.to_string(),
        // Keyframe alle 240 Frames, Szenenwechsel ab 48
        "-g".into(),
        "240".into(),
        "-keyint_min".into(),
        "48".into(),
        "-pix_fmt".into(),
        "yuv420p10le".into(),
        "-svtav1-params".into(),
        svt_params,
        "-c:a".into(),
        "copy".into(),
        "-c:s".into(),
        "copy".into(),
        "-y".into(),
        output_path.to_string_lossy().to_string(),
    ]);

    args
}

/// Liest die Telemetrie bis EOF. Jeder abgeschlossene Block wird sofort
/// angewendet; ein Rest ohne progress=-Zeile nur, wenn er Zaehler enthaelt.
pub async fn pump_telemetry<R>(reader: R, store: Arc<ProgressStore>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut acc = BatchAccumulator::new();

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                if let Some((batch, boundary)) = acc.feed_line(&line) {
                    store.apply_batch(&batch);
                    if boundary == Boundary::End {
                        store.finalize();
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Fehler beim Lesen von stdout");
                break;
            }
        }
    }

    if let Some(batch) = acc.finish() {
        debug!("Unvollstaendiger Telemetrie-Block am Ende uebernommen");
        store.apply_batch(&batch);
    }
}

/// Liest stderr bis EOF. FFmpeg trennt Statuszeilen mit '\r', daher wird
/// zusaetzlich daran gesplittet.
pub async fn pump_diagnostics<R>(reader: R, store: Arc<ProgressStore>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                for line in text.split('\r') {
                    store.apply_diagnostic_line(line.trim_end());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Fehler beim Lesen von stderr");
                break;
            }
        }
    }
}

/// Startet `program` mit `args`, pumpt beide Streams in den Store und
/// wartet auf das Ende. Der Endzustand wird erst nach dem Join beider
/// Pumps im Store vermerkt.
pub async fn run_encode(
    program: &str,
    args: &[String],
    store: Arc<ProgressStore>,
    cancel: CancellationToken,
) -> EncodeResult<RunOutcome> {
    store.push_log(format!("Command: {program} {}", args.join(" ")));

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let err = EncodeError::Spawn(e);
            store.complete(Err(err.to_string()));
            return Err(err);
        }
    };
    store.mark_started();

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.start_kill();
        let err = EncodeError::MissingPipe("stdout/stderr");
        store.complete(Err(err.to_string()));
        return Err(err);
    };

    let telemetry = tokio::spawn(pump_telemetry(stdout, store.clone()));
    let diagnostics = tokio::spawn(pump_diagnostics(stderr, store.clone()));

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            info!(program, "Abbruch angefordert, beende Prozess");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Prozess konnte nicht beendet werden");
            }
            let _ = child.wait().await;
            None
        }
        status = child.wait() => Some(status),
    };

    // Pumps sehen nach dem Prozessende EOF
    for (name, pump) in [("stdout", telemetry), ("stderr", diagnostics)] {
        if let Err(e) = pump.await {
            warn!(stream = name, error = %e, "Pump-Task beendet mit Fehler");
        }
    }

    match status {
        None => {
            store.complete(Err("Encoding abgebrochen".to_string()));
            Ok(RunOutcome::Cancelled)
        }
        Some(Ok(status)) if status.success() => {
            store.complete(Ok(()));
            Ok(RunOutcome::Completed)
        }
        Some(Ok(status)) => {
            let err = EncodeError::ExitStatus {
                code: status.code().unwrap_or(-1),
            };
            store.complete(Err(err.to_string()));
            Err(err)
        }
        Some(Err(e)) => {
            store.complete(Err(e.to_string()));
            Err(EncodeError::Io(e))
        }
    }
}
