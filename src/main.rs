// Einstiegspunkt des Rust-Backends.
// Startet den IPC-Server (stdin/stdout NDJSON) und die Job-Queue.

mod config;
mod error;
mod ffmpeg;
mod ipc;
mod jobs;
mod progress;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::BackendSettings;
use ffmpeg::probe::Ffprobe;
use ipc::protocol::Response;
use jobs::encode::{self, JobQueue};

/// stdout gehoert dem NDJSON-Kanal, Logs gehen immer nach stderr.
fn init_tracing() -> Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("av1_encode_backend=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_target(true),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let settings = BackendSettings::from_args(std::env::args());
    info!(
        probe_timeout_secs = settings.probe_timeout.as_secs(),
        log_capacity = settings.log_capacity,
        keep_finished = settings.keep_finished,
        ffmpeg = %settings.ffmpeg_path,
        ffprobe = %settings.ffprobe_path,
        "Backend startet"
    );

    // Channel fuer Responses (von Job-Queue an stdout-Writer)
    let (response_tx, response_rx) = mpsc::channel::<Response>(256);

    let (queue, cmd_rx) = JobQueue::new();
    let global_shutdown_token = queue.shutdown_token();
    let queue = Arc::new(queue);

    // Shutdown-Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    // stdout-Writer Task: Schreibt Response-Events als NDJSON
    let mut stdout_handle = tokio::spawn(ipc::server::write_stdout(response_rx));

    // Job-Queue Runner Task: Verarbeitet Job-Kommandos
    let probe = Arc::new(Ffprobe::new(settings.ffprobe_path.clone(), settings.probe_timeout));
    let queue_handle = tokio::spawn(encode::run_queue(
        cmd_rx,
        settings,
        probe,
        response_tx.clone(),
        global_shutdown_token.clone(),
    ));

    // stdin-Reader Task: Liest Requests und dispatcht sie
    let stdin_handle = tokio::spawn(ipc::server::read_stdin(
        queue.clone(),
        response_tx.clone(),
        shutdown_tx,
    ));
    let stdin_abort = stdin_handle.abort_handle();
    let mut stdout_finished = false;

    // Auf Shutdown warten (Shutdown-Request, stdin EOF oder stdout-Fehler)
    tokio::select! {
        _ = shutdown_rx => {
            info!("Shutdown-Signal empfangen, beende...");
        }
        result = stdin_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "stdin-Handler Fehler"),
                Err(e) => error!(error = %e, "stdin-Task Fehler"),
                Ok(Ok(())) => info!("stdin geschlossen, beende..."),
            }
        }
        result = &mut stdout_handle => {
            stdout_finished = true;
            match result {
                Ok(Err(e)) => error!(error = %e, "stdout-Writer Fehler, beende..."),
                Err(e) => error!(error = %e, "stdout-Writer Task Fehler, beende..."),
                Ok(Ok(())) => info!("stdout-Writer beendet, beende..."),
            }
        }
    }

    // --- Graceful Shutdown ---

    // 1. Alle laufenden FFmpeg-Prozesse via CancellationToken beenden
    global_shutdown_token.cancel();

    // 2. stdin-Reader abbrechen (haelt Arc<JobQueue>, muss weg damit cmd_tx geschlossen wird)
    stdin_abort.abort();

    // 3. Letzte cmd_tx-Referenz droppen, run_queue() wartet dann auf die Jobs
    drop(queue);
    drop(response_tx);

    // 4. Auf sauberes Beenden der Queue warten (mit Timeout-Fallback)
    let timeout = tokio::time::Duration::from_secs(5);
    if tokio::time::timeout(timeout, queue_handle).await.is_err() {
        warn!("Job-Queue beendet sich nicht, wird abgebrochen");
    }

    // 5. Writer endet, sobald der letzte response_tx weg ist und alles geschrieben wurde
    if !stdout_finished {
        let timeout = tokio::time::Duration::from_secs(2);
        if tokio::time::timeout(timeout, &mut stdout_handle).await.is_err() {
            warn!("stdout-Writer beendet sich nicht, wird abgebrochen");
            stdout_handle.abort();
        }
    }

    Ok(())
}
