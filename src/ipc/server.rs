// IPC-Server: Liest JSON-Requests von stdin, schreibt Responses auf stdout (NDJSON).

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::ipc::protocol::{Request, Response};
use crate::jobs::encode::{EncodeJob, JobQueue};

/// Liest Requests von stdin und gibt sie an die Queue weiter.
pub async fn read_stdin(
    queue: Arc<JobQueue>,
    response_tx: mpsc::Sender<Response>,
    shutdown_tx: oneshot::Sender<()>,
) -> Result<()> {
    read_requests(tokio::io::stdin(), queue, response_tx, shutdown_tx).await
}

/// Alle Responses laufen ueber `response_tx`, damit nur ein einziger
/// Writer-Task auf stdout schreibt.
pub async fn read_requests<R>(
    input: R,
    queue: Arc<JobQueue>,
    response_tx: mpsc::Sender<Response>,
    shutdown_tx: oneshot::Sender<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(input).lines();

    while let Some(line) = reader.next_line().await.context("stdin nicht lesbar")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Ungueltige JSON-Nachricht");
                continue;
            }
        };
        debug!(?request, "Request empfangen");

        match request {
            Request::StartEncode {
                id,
                input_path,
                options,
                tuning,
            } => {
                let id = if id.is_empty() { Uuid::new_v4().to_string() } else { id };
                let job_id = id.clone();
                let job = EncodeJob::new(id, input_path, options, tuning);
                if let Err(e) = queue.start(job).await {
                    error!(error = %e, "Fehler beim Starten des Jobs");
                    let _ = response_tx
                        .send(Response::EncodeError {
                            id: job_id,
                            message: format!("Job konnte nicht gestartet werden: {e}"),
                        })
                        .await;
                }
            }
            Request::CancelEncode { id } => {
                let cancel_id = id.clone();
                if let Err(e) = queue.cancel(id).await {
                    error!(error = %e, "Fehler beim Abbrechen des Jobs");
                    let _ = response_tx
                        .send(Response::EncodeError {
                            id: cancel_id,
                            message: format!("Job konnte nicht abgebrochen werden: {e}"),
                        })
                        .await;
                }
            }
            Request::GetSnapshot { id } => {
                let response = match queue.snapshot(id.clone()).await {
                    Ok(Some(view)) => Response::snapshot(id, view),
                    Ok(None) => Response::EncodeError {
                        id,
                        message: "Unbekannte Job-ID".to_string(),
                    },
                    Err(e) => {
                        error!(error = %e, "Fehler beim Abfragen des Snapshots");
                        continue;
                    }
                };
                if let Err(e) = response_tx.send(response).await {
                    error!(error = %e, "Fehler beim Senden der Snapshot-Response");
                }
            }
            Request::GetStatus => match queue.get_status().await {
                Ok(jobs) => {
                    if let Err(e) = response_tx.send(Response::StatusReport { jobs }).await {
                        error!(error = %e, "Fehler beim Senden der Status-Response");
                    }
                }
                Err(e) => error!(error = %e, "Fehler beim Abfragen des Status"),
            },
            Request::Shutdown => {
                let _ = shutdown_tx.send(());
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Schreibt Response-Events als NDJSON auf stdout.
/// Laeuft als eigener Task. Gibt Fehler zurueck wenn die stdout-Pipe geschlossen wird.
pub async fn write_stdout(rx: mpsc::Receiver<Response>) -> Result<()> {
    write_responses(tokio::io::stdout(), rx).await
}

pub async fn write_responses<W>(output: W, mut rx: mpsc::Receiver<Response>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(output);

    while let Some(response) = rx.recv().await {
        let json = match serde_json::to_string(&response) {
            Ok(j) => j,
            Err(e) => {
                error!(error = %e, "Fehler beim Serialisieren der Response");
                continue;
            }
        };

        writer.write_all(json.as_bytes()).await.context("stdout geschlossen")?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::encode::JobCommand;

    struct Wiring {
        queue: Arc<JobQueue>,
        cmd_rx: mpsc::Receiver<JobCommand>,
        response_tx: mpsc::Sender<Response>,
        response_rx: mpsc::Receiver<Response>,
    }

    fn wiring() -> Wiring {
        let (queue, cmd_rx) = JobQueue::new();
        let (response_tx, response_rx) = mpsc::channel(16);
        Wiring {
            queue: Arc::new(queue),
            cmd_rx,
            response_tx,
            response_rx,
        }
    }

    #[tokio::test]
    async fn requests_are_forwarded_and_garbage_skipped() {
        let mut w = wiring();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let input: &[u8] = b"not json\n\n{\"type\":\"start_encode\",\"id\":\"a\",\"input_path\":\"/x.mkv\"}\n\
            {\"type\":\"cancel_encode\",\"id\":\"a\"}\n{\"type\":\"shutdown\"}\n{\"type\":\"cancel_encode\",\"id\":\"b\"}\n";

        read_requests(input, w.queue.clone(), w.response_tx.clone(), shutdown_tx)
            .await
            .unwrap();

        match w.cmd_rx.recv().await {
            Some(JobCommand::Start(job)) => {
                assert_eq!(job.id, "a");
                assert_eq!(job.config.crf, 35);
            }
            _ => panic!("Start erwartet"),
        }
        assert!(matches!(w.cmd_rx.recv().await, Some(JobCommand::Cancel(id)) if id == "a"));
        // Nach shutdown wird nichts mehr gelesen
        assert!(w.cmd_rx.try_recv().is_err());
        assert!(shutdown_rx.try_recv().is_ok());
        assert!(w.response_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_id_gets_a_uuid() {
        let mut w = wiring();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        let input: &[u8] = b"{\"type\":\"start_encode\",\"input_path\":\"/x.mkv\"}\n";

        read_requests(input, w.queue.clone(), w.response_tx.clone(), shutdown_tx)
            .await
            .unwrap();

        match w.cmd_rx.recv().await {
            Some(JobCommand::Start(job)) => assert!(Uuid::parse_str(&job.id).is_ok(), "{}", job.id),
            _ => panic!("Start erwartet"),
        }
    }

    #[tokio::test]
    async fn unknown_snapshot_id_answers_with_error() {
        let mut w = wiring();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();

        // Minimaler Queue-Ersatz: kennt keine Jobs
        let mut cmd_rx = w.cmd_rx;
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let JobCommand::Snapshot(_, reply) = cmd {
                    let _ = reply.send(None);
                }
            }
        });

        let input: &[u8] = b"{\"type\":\"get_snapshot\",\"id\":\"zz\"}\n";
        read_requests(input, w.queue.clone(), w.response_tx.clone(), shutdown_tx)
            .await
            .unwrap();

        match w.response_rx.recv().await {
            Some(Response::EncodeError { id, message }) => {
                assert_eq!(id, "zz");
                assert_eq!(message, "Unbekannte Job-ID");
            }
            other => panic!("unerwartet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn writer_emits_one_json_object_per_line() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Response::EncodeCancelled { id: "a".into() }).await.unwrap();
        tx.send(Response::EncodeSkipped {
            id: "b".into(),
            reason: "zu klein".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_responses(&mut out, rx).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"encode_cancelled","id":"a"}"#);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "encode_skipped");
        assert_eq!(second["reason"], "zu klein");
    }
}
