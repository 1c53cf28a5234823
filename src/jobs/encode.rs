// Job-Queue: nimmt Encode-Auftraege entgegen und fuehrt jeden in einem
// eigenen Task aus. Jeder Job hat einen eigenen ProgressStore, den das
// Frontend ueber get_snapshot abfragt.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BackendSettings, EncoderConfig, ProgressTuning};
use crate::error::{EncodeError, EncodeResult};
use crate::ffmpeg::probe::MediaProbe;
use crate::ffmpeg::runner::{build_ffmpeg_args, run_encode, RunOutcome};
use crate::ipc::protocol::{JobState, JobStatus, Response};
use crate::jobs::output::{actual_output_size, check_output_size, output_path_for};
use crate::progress::frames::probe_estimate;
use crate::progress::store::{ProgressStore, StoreView};

/// Ein einzelner Encode-Auftrag.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub id: String,
    pub input_path: PathBuf,
    pub config: EncoderConfig,
    pub tuning: ProgressTuning,
}

impl EncodeJob {
    pub fn new(id: String, input_path: String, config: EncoderConfig, tuning: ProgressTuning) -> Self {
        Self {
            id,
            input_path: PathBuf::from(input_path),
            config,
            tuning,
        }
    }
}

/// Laufzeitdaten eines Jobs in der Queue.
struct JobEntry {
    input_path: PathBuf,
    output_path: PathBuf,
    state: JobState,
    store: Arc<ProgressStore>,
    cancel: CancellationToken,
}

impl JobEntry {
    fn is_active(&self) -> bool {
        matches!(self.state, JobState::Queued | JobState::Running)
    }

    fn to_status(&self, id: &str) -> JobStatus {
        JobStatus {
            id: id.to_string(),
            input_path: self.input_path.to_string_lossy().to_string(),
            output_path: self.output_path.to_string_lossy().to_string(),
            status: self.state,
            percent: self.store.snapshot().percent(),
        }
    }
}

/// Alle bekannten Jobs. Beendete bleiben fuer get_snapshot abfragbar, aber
/// nur die juengsten `keep_finished`.
struct JobTable {
    entries: HashMap<String, JobEntry>,
    /// IDs beendeter Jobs, aelteste vorne.
    finished: VecDeque<String>,
    keep_finished: usize,
}

impl JobTable {
    fn new(keep_finished: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            keep_finished,
        }
    }

    fn insert(&mut self, id: String, entry: JobEntry) {
        // Neustart einer ID: alter Eintrag zaehlt nicht mehr als beendet
        self.finished.retain(|f| f != &id);
        self.entries.insert(id, entry);
    }

    fn finish(&mut self, id: &str, state: JobState) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.state = state;
        self.finished.push_back(id.to_string());

        while self.finished.len() > self.keep_finished {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(id = %oldest, "Beendeten Job verworfen");
        }
    }
}

type JobMap = Arc<RwLock<JobTable>>;

/// Kommandos die an die JobQueue geschickt werden koennen.
pub enum JobCommand {
    Start(EncodeJob),
    Cancel(String),
    Snapshot(String, oneshot::Sender<Option<StoreView>>),
    GetStatus(oneshot::Sender<Vec<JobStatus>>),
}

/// Handle auf die Queue; der eigentliche Zustand lebt in `run_queue`.
pub struct JobQueue {
    cmd_tx: mpsc::Sender<JobCommand>,
    shutdown_token: CancellationToken,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::Receiver<JobCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let shutdown_token = CancellationToken::new();
        (Self { cmd_tx, shutdown_token }, cmd_rx)
    }

    /// Gibt das Shutdown-Token zurueck, um es beim Herunterfahren zu cancellen.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(&self, job: EncodeJob) -> Result<()> {
        self.cmd_tx.send(JobCommand::Start(job)).await?;
        Ok(())
    }

    pub async fn cancel(&self, id: String) -> Result<()> {
        self.cmd_tx.send(JobCommand::Cancel(id)).await?;
        Ok(())
    }

    /// None, wenn die ID unbekannt ist.
    pub async fn snapshot(&self, id: String) -> Result<Option<StoreView>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(JobCommand::Snapshot(id, tx)).await?;
        Ok(rx.await?)
    }

    pub async fn get_status(&self) -> Result<Vec<JobStatus>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(JobCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }
}

/// Alles, was ein Job-Task ausser dem Auftrag selbst braucht.
#[derive(Clone)]
struct JobContext {
    probe: Arc<dyn MediaProbe>,
    ffmpeg_path: String,
    jobs: JobMap,
    response_tx: mpsc::Sender<Response>,
}

/// Laeuft als eigener Task und verarbeitet Job-Kommandos. Endet, wenn alle
/// Sender geschlossen sind, und wartet dann auf die noch laufenden Jobs.
pub async fn run_queue(
    mut cmd_rx: mpsc::Receiver<JobCommand>,
    settings: BackendSettings,
    probe: Arc<dyn MediaProbe>,
    response_tx: mpsc::Sender<Response>,
    shutdown_token: CancellationToken,
) {
    let jobs: JobMap = Arc::new(RwLock::new(JobTable::new(settings.keep_finished)));
    let ctx = JobContext {
        probe,
        ffmpeg_path: settings.ffmpeg_path.clone(),
        jobs: jobs.clone(),
        response_tx: response_tx.clone(),
    };
    let mut tasks = JoinSet::new();

    while let Some(cmd) = cmd_rx.recv().await {
        // Fertige Tasks einsammeln
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Job-Task Panik");
            }
        }

        match cmd {
            JobCommand::Start(job) => {
                let id = job.id.clone();
                let mut map = jobs.write().await;
                if map.entries.get(&id).is_some_and(JobEntry::is_active) {
                    drop(map);
                    let _ = response_tx
                        .send(Response::EncodeError {
                            id,
                            message: "Job mit dieser ID laeuft bereits".to_string(),
                        })
                        .await;
                    continue;
                }

                let store = Arc::new(ProgressStore::new(job.tuning.clone(), settings.log_capacity));
                let cancel = shutdown_token.child_token();
                map.insert(
                    id.clone(),
                    JobEntry {
                        input_path: job.input_path.clone(),
                        output_path: output_path_for(&job.input_path),
                        state: JobState::Queued,
                        store: store.clone(),
                        cancel: cancel.clone(),
                    },
                );
                drop(map);

                info!(%id, input = ?job.input_path, "Encode-Job angenommen");
                tasks.spawn(run_job(job, store, cancel, ctx.clone()));
            }
            JobCommand::Cancel(id) => {
                let map = jobs.read().await;
                match map.entries.get(&id) {
                    Some(entry) if entry.is_active() => entry.cancel.cancel(),
                    Some(_) => debug!(%id, "Job bereits beendet, Abbruch ignoriert"),
                    None => {
                        drop(map);
                        let _ = response_tx
                            .send(Response::EncodeError {
                                id,
                                message: "Unbekannte Job-ID".to_string(),
                            })
                            .await;
                    }
                }
            }
            JobCommand::Snapshot(id, reply) => {
                let view = jobs.read().await.entries.get(&id).map(|entry| entry.store.snapshot());
                let _ = reply.send(view);
            }
            JobCommand::GetStatus(reply) => {
                let map = jobs.read().await;
                let mut statuses: Vec<JobStatus> =
                    map.entries.iter().map(|(id, entry)| entry.to_status(id)).collect();
                statuses.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(statuses);
            }
        }
    }

    // Bei Shutdown ist das globale Token bereits gecancelt
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Job-Task Panik");
        }
    }
}

async fn set_state(jobs: &JobMap, id: &str, state: JobState) {
    if let Some(entry) = jobs.write().await.entries.get_mut(id) {
        entry.state = state;
    }
}

/// Ein kompletter Job: Ablauf ausfuehren, Endzustand vermerken, Antwort senden.
async fn run_job(job: EncodeJob, store: Arc<ProgressStore>, cancel: CancellationToken, ctx: JobContext) {
    let id = job.id.clone();
    let (state, response) = match execute(&job, &store, cancel, &ctx).await {
        Ok(end) => end,
        Err(e) => {
            warn!(%id, error = %e, "Encode-Job fehlgeschlagen");
            // Fehler vor dem Start hat der Runner nicht vermerkt
            if !store.snapshot().done {
                store.complete(Err(e.to_string()));
            }
            (
                JobState::Error,
                Response::EncodeError {
                    id: id.clone(),
                    message: e.to_string(),
                },
            )
        }
    };

    ctx.jobs.write().await.finish(&id, state);
    let _ = ctx.response_tx.send(response).await;
}

/// Validieren, Bitraten-Gate, Probe, FFmpeg, Groessenpruefung.
async fn execute(
    job: &EncodeJob,
    store: &Arc<ProgressStore>,
    cancel: CancellationToken,
    ctx: &JobContext,
) -> EncodeResult<(JobState, Response)> {
    let id = job.id.clone();

    // Pfad validieren (Path-Traversal-Schutz)
    let input = tokio::fs::canonicalize(&job.input_path)
        .await
        .map_err(|source| EncodeError::InvalidInput {
            path: job.input_path.clone(),
            source,
        })?;
    let output = output_path_for(&input);
    if let Some(entry) = ctx.jobs.write().await.entries.get_mut(&id) {
        entry.input_path = input.clone();
        entry.output_path = output.clone();
    }

    let min_kbps = job.config.min_bitrate_kbps;
    if min_kbps > 0 {
        // Unbekannte Bitrate: trotzdem encoden
        match ctx.probe.bitrate_kbps(&input).await {
            Some(kbps) if kbps > 0 && kbps < min_kbps => {
                let reason = format!("Quell-Bitrate {kbps} kbps liegt unter dem Minimum von {min_kbps} kbps");
                info!(%id, kbps, min_kbps, "Job uebersprungen");
                store.mark_skipped(&reason);
                return Ok((JobState::Skipped, Response::EncodeSkipped { id, reason }));
            }
            Some(_) => {}
            None => debug!(%id, "Quell-Bitrate unbekannt"),
        }
    }

    let estimate = probe_estimate(ctx.probe.as_ref(), &input).await;
    store.seed_estimate(&estimate);

    if cancel.is_cancelled() {
        store.complete(Err("Encoding abgebrochen".to_string()));
        return Ok((JobState::Cancelled, Response::EncodeCancelled { id }));
    }

    store.push_log(format!("Starting encode: {}", input.display()));
    store.push_log(format!("Output: {}", output.display()));
    set_state(&ctx.jobs, &id, JobState::Running).await;
    let _ = ctx
        .response_tx
        .send(Response::EncodeStarted {
            id: id.clone(),
            output_path: output.to_string_lossy().to_string(),
        })
        .await;

    let args = build_ffmpeg_args(&input, &output, &job.config);
    match run_encode(&ctx.ffmpeg_path, &args, store.clone(), cancel).await? {
        RunOutcome::Cancelled => {
            info!(%id, "Encode abgebrochen");
            Ok((JobState::Cancelled, Response::EncodeCancelled { id }))
        }
        RunOutcome::Completed => {
            let final_size = actual_output_size(&output, store.progress().total_output_bytes).await;
            let (within_size_limit, size_ratio) =
                match check_output_size(&input, &output, job.config.max_size_percent).await {
                    Ok(check) => (check.within_limit, check.ratio_percent),
                    Err(e) => {
                        warn!(%id, error = %e, "Groessenpruefung fehlgeschlagen");
                        (false, None)
                    }
                };

            if let Some(ratio) = size_ratio {
                let line = if within_size_limit {
                    format!("{ratio:.1}% der Originalgroesse")
                } else {
                    format!(
                        "{ratio:.1}% der Originalgroesse (ueber dem Limit von {}%)",
                        job.config.max_size_percent
                    )
                };
                store.push_log(line);
            }

            info!(%id, final_size, "Encode abgeschlossen");
            Ok((
                JobState::Done,
                Response::EncodeDone {
                    id,
                    output_path: output.to_string_lossy().to_string(),
                    final_size,
                    size_ratio,
                    within_size_limit,
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::ffmpeg::probe::FrameRates;

    /// Probe mit festen Antworten.
    #[derive(Default)]
    struct FixedProbe {
        bitrate_kbps: Option<u64>,
        frame_count: Option<u64>,
    }

    #[async_trait]
    impl MediaProbe for FixedProbe {
        async fn frame_rates(&self, _input: &Path) -> Option<FrameRates> {
            Some(FrameRates {
                real: 24.0,
                average: 24.0,
            })
        }
        async fn frame_count(&self, _input: &Path) -> Option<u64> {
            self.frame_count
        }
        async fn duration(&self, _input: &Path) -> Option<Duration> {
            Some(Duration::from_secs(60))
        }
        async fn bitrate_kbps(&self, _input: &Path) -> Option<u64> {
            self.bitrate_kbps
        }
    }

    struct Harness {
        queue: JobQueue,
        responses: mpsc::Receiver<Response>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_queue(probe: FixedProbe) -> Harness {
        spawn_queue_with(probe, BackendSettings::default())
    }

    fn spawn_queue_with(probe: FixedProbe, settings: BackendSettings) -> Harness {
        let (queue, cmd_rx) = JobQueue::new();
        let (response_tx, responses) = mpsc::channel(64);
        let settings = BackendSettings {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            ..settings
        };
        let handle = tokio::spawn(run_queue(
            cmd_rx,
            settings,
            Arc::new(probe),
            response_tx,
            queue.shutdown_token(),
        ));
        Harness {
            queue,
            responses,
            handle,
        }
    }

    fn job(id: &str, input: &Path, config: EncoderConfig) -> EncodeJob {
        EncodeJob::new(
            id.to_string(),
            input.to_string_lossy().to_string(),
            config,
            ProgressTuning::default(),
        )
    }

    async fn next(responses: &mut mpsc::Receiver<Response>) -> Response {
        tokio::time::timeout(Duration::from_secs(5), responses.recv())
            .await
            .expect("keine Antwort")
            .expect("Channel geschlossen")
    }

    #[tokio::test]
    async fn missing_input_reports_error() {
        let mut h = spawn_queue(FixedProbe::default());
        h.queue
            .start(job("j1", Path::new("/nonexistent/input.mkv"), EncoderConfig::default()))
            .await
            .unwrap();

        match next(&mut h.responses).await {
            Response::EncodeError { id, message } => {
                assert_eq!(id, "j1");
                assert!(message.contains("Ungueltiger Input-Pfad"), "{message}");
            }
            other => panic!("unerwartet: {other:?}"),
        }

        let view = h.queue.snapshot("j1".into()).await.unwrap().unwrap();
        assert!(view.done);
        assert!(view.error.is_some());

        let status = h.queue.get_status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].status, JobState::Error);
        assert_eq!(status[0].percent, None);
    }

    #[tokio::test]
    async fn low_bitrate_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("low.mkv");
        std::fs::write(&input, b"data").unwrap();

        let mut h = spawn_queue(FixedProbe {
            bitrate_kbps: Some(800),
            ..FixedProbe::default()
        });
        let config = EncoderConfig {
            min_bitrate_kbps: 1500,
            ..EncoderConfig::default()
        };
        h.queue.start(job("j2", &input, config)).await.unwrap();

        match next(&mut h.responses).await {
            Response::EncodeSkipped { id, reason } => {
                assert_eq!(id, "j2");
                assert!(reason.contains("800 kbps"), "{reason}");
            }
            other => panic!("unerwartet: {other:?}"),
        }
        let status = h.queue.get_status().await.unwrap();
        assert_eq!(status[0].status, JobState::Skipped);
        assert_eq!(status[0].percent, None);
    }

    #[tokio::test]
    async fn spawn_failure_after_start_keeps_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("film.mkv");
        std::fs::write(&input, b"data").unwrap();

        let mut h = spawn_queue(FixedProbe {
            bitrate_kbps: None,
            frame_count: Some(1440),
        });
        let config = EncoderConfig {
            min_bitrate_kbps: 1500,
            ..EncoderConfig::default()
        };
        h.queue.start(job("j3", &input, config)).await.unwrap();

        match next(&mut h.responses).await {
            Response::EncodeStarted { id, output_path } => {
                assert_eq!(id, "j3");
                assert!(output_path.ends_with("film.av1.mkv"), "{output_path}");
            }
            other => panic!("unerwartet: {other:?}"),
        }
        assert!(matches!(next(&mut h.responses).await, Response::EncodeError { .. }));

        // Exakte Framezahl bekannt, Fortschritt 0 % statt unbekannt
        let status = h.queue.get_status().await.unwrap();
        assert_eq!(status[0].percent, Some(0.0));

        let view = h.queue.snapshot("j3".into()).await.unwrap().unwrap();
        assert_eq!(view.progress.total_frames, 1440);
        assert!(!view.progress.frame_count_estimated);
        assert!(view.logs.iter().any(|l| l.starts_with("Starting encode: ")));
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_dropped() {
        let mut h = spawn_queue_with(
            FixedProbe::default(),
            BackendSettings {
                keep_finished: 2,
                ..BackendSettings::default()
            },
        );
        let missing = Path::new("/nonexistent/input.mkv");

        for id in ["a", "b", "c"] {
            h.queue.start(job(id, missing, EncoderConfig::default())).await.unwrap();
            assert!(matches!(next(&mut h.responses).await, Response::EncodeError { .. }));
        }

        let ids: Vec<String> = h.queue.get_status().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["b", "c"]);
        assert!(h.queue.snapshot("a".into()).await.unwrap().is_none());

        // Neustart von "b" zaehlt als neuer Lauf, "c" bleibt
        h.queue.start(job("b", missing, EncoderConfig::default())).await.unwrap();
        assert!(matches!(next(&mut h.responses).await, Response::EncodeError { .. }));
        let ids: Vec<String> = h.queue.get_status().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["b", "c"]);

        h.queue.start(job("d", missing, EncoderConfig::default())).await.unwrap();
        assert!(matches!(next(&mut h.responses).await, Response::EncodeError { .. }));
        let ids: Vec<String> = h.queue.get_status().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["b", "d"]);
    }

    #[tokio::test]
    async fn unknown_ids() {
        let mut h = spawn_queue(FixedProbe::default());
        assert!(h.queue.snapshot("nope".into()).await.unwrap().is_none());

        h.queue.cancel("nope".into()).await.unwrap();
        assert!(matches!(
            next(&mut h.responses).await,
            Response::EncodeError { id, .. } if id == "nope"
        ));
    }

    #[tokio::test]
    async fn queue_ends_when_handles_are_dropped() {
        let h = spawn_queue(FixedProbe::default());
        h.queue.shutdown_token().cancel();
        drop(h.queue);
        tokio::time::timeout(Duration::from_secs(5), h.handle)
            .await
            .expect("run_queue endet nicht")
            .unwrap();
    }
}
