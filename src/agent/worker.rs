//! Detection worker loop.
//!
//! A worker owns one pipeline and one feed. Each iteration reads the next
//! sample, evaluates it and, on a positive detection, exports evidence and
//! records an alert. Failures and panics inside an iteration are logged and
//! followed by a backoff; they never end the loop.

use crate::alerts::{NewAlert, SharedAlertStore, StoreError};
use crate::capture::evidence::evidence_tag;
use crate::capture::{ClipWriter, EvidenceError, SampleFeed, SharedEvidenceBuffer};
use crate::detection::{DetectionError, DetectionPipeline};
use crate::stats::SharedAgentStats;
use crossbeam_channel::Sender;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep, so a cleared running flag is seen promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Something that can write the current contents of a buffer as a clip.
pub trait EvidenceExport: Send + Sync {
    fn export(&self, tag: &str) -> Result<Option<PathBuf>, EvidenceError>;
}

/// A buffer paired with the writer and directory its clips go to.
pub struct ClipExport<T> {
    buffer: SharedEvidenceBuffer<T>,
    writer: Arc<dyn ClipWriter<T>>,
    dir: PathBuf,
}

impl<T> ClipExport<T> {
    pub fn new(buffer: SharedEvidenceBuffer<T>, writer: Arc<dyn ClipWriter<T>>, dir: PathBuf) -> Self {
        Self {
            buffer,
            writer,
            dir,
        }
    }
}

impl<T: Clone + Send + 'static> EvidenceExport for ClipExport<T> {
    fn export(&self, tag: &str) -> Result<Option<PathBuf>, EvidenceError> {
        self.buffer.export(self.writer.as_ref(), &self.dir, tag)
    }
}

/// Delays between iterations.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// After each evaluated sample
    pub interval: Duration,
    /// When no new sample is available
    pub idle_retry: Duration,
    /// After a failed iteration
    pub error_backoff: Duration,
}

/// Shared handles every worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: SharedAlertStore,
    pub stats: SharedAgentStats,
    pub running: Arc<AtomicBool>,
}

/// A pipeline bound to its input feed and evidence sources.
pub struct Worker<P: DetectionPipeline> {
    name: String,
    pipeline: P,
    feed: SampleFeed<P::Sample>,
    video: Option<Box<dyn EvidenceExport>>,
    audio: Option<Box<dyn EvidenceExport>>,
    pacing: Pacing,
    context: WorkerContext,
}

impl<P: DetectionPipeline> Worker<P> {
    pub fn new(
        name: impl Into<String>,
        pipeline: P,
        feed: SampleFeed<P::Sample>,
        pacing: Pacing,
        context: WorkerContext,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline,
            feed,
            video: None,
            audio: None,
            pacing,
            context,
        }
    }

    pub fn with_video_evidence(mut self, export: impl EvidenceExport + 'static) -> Self {
        self.video = Some(Box::new(export));
        self
    }

    pub fn with_audio_evidence(mut self, export: Option<Box<dyn EvidenceExport>>) -> Self {
        self.audio = export;
        self
    }

    /// Run on a named thread. `done` receives the worker name when the loop exits.
    pub fn spawn(self, done: Sender<String>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("worker-{}", self.name))
            .spawn(move || {
                let name = self.name.clone();
                self.run();
                let _ = done.send(name);
            })
    }

    /// Loop until the running flag is cleared.
    pub fn run(mut self) {
        tracing::info!(worker = %self.name, kind = %self.pipeline.kind(), "Worker started");

        while self.context.running.load(Ordering::SeqCst) {
            let Some(sample) = self.feed.read_sample() else {
                self.pause(self.pacing.idle_retry);
                continue;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| self.iterate(&sample)));
            match outcome {
                Ok(Ok(())) => self.pause(self.pacing.interval),
                Ok(Err(e)) => {
                    tracing::warn!(worker = %self.name, "Detection iteration failed: {e}");
                    self.context.stats.record_iteration_failure();
                    self.pause(self.pacing.error_backoff);
                }
                Err(panic) => {
                    tracing::error!(
                        worker = %self.name,
                        "Detection iteration panicked: {}",
                        panic_message(panic.as_ref())
                    );
                    self.context.stats.record_iteration_failure();
                    self.pause(self.pacing.error_backoff);
                }
            }
        }

        tracing::info!(worker = %self.name, "Worker stopped");
    }

    fn iterate(&mut self, sample: &P::Sample) -> Result<(), IterationError> {
        let detection = self.pipeline.evaluate(sample)?;
        self.context.stats.record_detection_run();
        if !detection.detected {
            return Ok(());
        }

        let kind = self.pipeline.kind();
        tracing::warn!(worker = %self.name, kind = %kind, "{}", detection.description);

        let id = self.context.store.reserve_id();
        let tag = evidence_tag(kind.slug(), &id);
        let video_path = self.export_evidence(self.video.as_deref(), &tag, "video");
        let audio_path = self.export_evidence(self.audio.as_deref(), &tag, "audio");

        let alert = NewAlert::new(kind, detection.description)
            .with_id(id)
            .with_video(video_path.clone())
            .with_audio(audio_path.clone());
        match self.context.store.add(alert) {
            Ok(_) => {
                self.context.stats.record_alert_raised();
                Ok(())
            }
            Err(e) => {
                self.context.stats.record_store_failure();
                // No record points at these clips any more.
                for path in video_path.iter().chain(audio_path.iter()) {
                    if let Err(err) = std::fs::remove_file(path) {
                        tracing::warn!(worker = %self.name, path = %path.display(), "Could not remove orphaned evidence: {err}");
                    }
                }
                Err(IterationError::Store(e))
            }
        }
    }

    /// Missing or failed evidence never blocks the alert.
    fn export_evidence(
        &self,
        export: Option<&dyn EvidenceExport>,
        tag: &str,
        medium: &str,
    ) -> Option<PathBuf> {
        match export?.export(tag) {
            Ok(Some(path)) => {
                self.context.stats.record_evidence_exported();
                Some(path)
            }
            Ok(None) => {
                tracing::debug!(worker = %self.name, medium, "No buffered {medium} to export");
                None
            }
            Err(e) => {
                tracing::warn!(worker = %self.name, medium, "Evidence export failed: {e}");
                None
            }
        }
    }

    /// Sleep for `duration`, waking early once the running flag is cleared.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.context.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Why a single worker iteration failed.
#[derive(Debug)]
enum IterationError {
    Detection(DetectionError),
    Store(StoreError),
}

impl From<DetectionError> for IterationError {
    fn from(e: DetectionError) -> Self {
        IterationError::Detection(e)
    }
}

impl std::fmt::Display for IterationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationError::Detection(e) => write!(f, "{e}"),
            IterationError::Store(e) => write!(f, "Alert could not be stored: {e}"),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertKind, AlertStore};
    use crate::capture::{AudioChunk, RollingEvidenceBuffer, SampleSource, StreamCapture, WavClipWriter};
    use crate::detection::Detection;
    use crate::stats::AgentStats;
    use std::sync::atomic::AtomicU64;

    /// Fires on every third sample, fails on every fifth, panics on the seventh.
    struct Flaky {
        calls: Arc<AtomicU64>,
    }

    impl DetectionPipeline for Flaky {
        type Sample = AudioChunk;

        fn kind(&self) -> AlertKind {
            AlertKind::OffensiveLanguage
        }

        fn evaluate(&mut self, _chunk: &AudioChunk) -> Result<Detection, DetectionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 7 {
                panic!("provider crashed");
            }
            if n % 5 == 0 {
                return Err(DetectionError::Inference("timeout".into()));
            }
            if n % 3 == 0 {
                return Ok(Detection::positive(format!("hit {n}")));
            }
            Ok(Detection::none())
        }
    }

    struct Counter(u64);

    impl SampleSource for Counter {
        type Sample = AudioChunk;

        fn name(&self) -> &str {
            "counter"
        }

        fn read_sample(&mut self) -> Option<AudioChunk> {
            self.0 += 1;
            Some(AudioChunk::new(self.0, 100, vec![0.1; 10]))
        }
    }

    fn pacing() -> Pacing {
        Pacing {
            interval: Duration::from_millis(1),
            idle_retry: Duration::from_millis(1),
            error_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_worker_survives_failures_and_panics() {
        let dir = tempfile::tempdir().unwrap();
        let capture = StreamCapture::start(Counter(0), 500, 20).unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let context = WorkerContext {
            store: Arc::new(AlertStore::in_memory()),
            stats: Arc::new(AgentStats::new()),
            running: Arc::new(AtomicBool::new(true)),
        };

        let audio: Box<dyn EvidenceExport> = Box::new(ClipExport::new(
            capture.buffer(),
            Arc::new(WavClipWriter::new()),
            dir.path().to_path_buf(),
        ));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let handle = Worker::new(
            "flaky",
            Flaky {
                calls: calls.clone(),
            },
            capture.subscribe(),
            pacing(),
            context.clone(),
        )
        .with_audio_evidence(Some(audio))
        .spawn(done_tx)
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 12 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        context.running.store(false, Ordering::SeqCst);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "flaky");
        handle.join().unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 12);
        let stats = context.stats.snapshot();
        assert!(stats.iteration_failures >= 3, "fifth, seventh and tenth calls fail");
        assert!(stats.alerts_raised >= 3);

        let alerts = context.store.get_all();
        assert_eq!(alerts.len() as u64, stats.alerts_raised);
        assert!(alerts.iter().all(|a| a.kind == AlertKind::OffensiveLanguage));
        assert!(alerts.iter().all(|a| a.audio_path.is_some() && a.video_path.is_none()));
    }

    struct AlwaysFires;

    impl DetectionPipeline for AlwaysFires {
        type Sample = AudioChunk;

        fn kind(&self) -> AlertKind {
            AlertKind::ObjectTheft
        }

        fn evaluate(&mut self, _chunk: &AudioChunk) -> Result<Detection, DetectionError> {
            Ok(Detection::positive("gone"))
        }
    }

    #[test]
    fn test_empty_evidence_does_not_block_alert() {
        let dir = tempfile::tempdir().unwrap();
        let capture = StreamCapture::start(Counter(0), 200, 5).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let context = WorkerContext {
            store: Arc::new(AlertStore::in_memory()),
            stats: Arc::new(AgentStats::new()),
            running: running.clone(),
        };

        let empty = ClipExport::new(
            Arc::new(RollingEvidenceBuffer::<AudioChunk>::new(5)),
            Arc::new(WavClipWriter::new()),
            dir.path().to_path_buf(),
        );
        let (done_tx, _done_rx) = crossbeam_channel::bounded(1);
        let handle = Worker::new("fires", AlwaysFires, capture.subscribe(), pacing(), context.clone())
            .with_video_evidence(empty)
            .spawn(done_tx)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while context.store.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let alert = &context.store.get_all()[0];
        assert_eq!(alert.description, "gone");
        assert!(alert.video_path.is_none());
        assert_eq!(context.stats.snapshot().evidence_exported, 0);
    }

    fn spawn_always_fires(
        store: SharedAlertStore,
        evidence_dir: &std::path::Path,
    ) -> (StreamCapture<AudioChunk>, WorkerContext, JoinHandle<()>) {
        let capture = StreamCapture::start(Counter(0), 200, 5).unwrap();
        let context = WorkerContext {
            store,
            stats: Arc::new(AgentStats::new()),
            running: Arc::new(AtomicBool::new(true)),
        };
        let audio: Box<dyn EvidenceExport> = Box::new(ClipExport::new(
            capture.buffer(),
            Arc::new(WavClipWriter::new()),
            evidence_dir.to_path_buf(),
        ));
        let (done_tx, _done_rx) = crossbeam_channel::bounded(1);
        let handle = Worker::new("fires", AlwaysFires, capture.subscribe(), pacing(), context.clone())
            .with_audio_evidence(Some(audio))
            .spawn(done_tx)
            .unwrap();
        (capture, context, handle)
    }

    #[test]
    fn test_alerts_in_same_second_get_own_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedAlertStore = Arc::new(AlertStore::in_memory());
        let (_capture, context, handle) = spawn_always_fires(store.clone(), dir.path());

        let with_audio = |store: &AlertStore| {
            store
                .get_all()
                .into_iter()
                .filter(|a| a.audio_path.is_some())
                .collect::<Vec<_>>()
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while with_audio(&store).len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        context.running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let alerts = with_audio(&store);
        assert!(alerts.len() >= 3);
        let paths: std::collections::HashSet<_> =
            alerts.iter().filter_map(|a| a.audio_path.clone()).collect();
        assert_eq!(paths.len(), alerts.len(), "every alert has its own clip");
        for alert in &alerts {
            let name = alert.audio_path.as_ref().unwrap().to_string_lossy().into_owned();
            assert!(name.contains(&alert.id));
        }

        assert!(store.delete(&alerts[0].id).unwrap());
        assert!(alerts[1..]
            .iter()
            .all(|a| a.audio_path.as_ref().unwrap().exists()));
    }

    #[test]
    fn test_failed_store_write_discards_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("alerts.json");
        std::fs::create_dir(&store_path).unwrap();
        let evidence_dir = dir.path().join("evidence");
        std::fs::create_dir(&evidence_dir).unwrap();

        let store: SharedAlertStore = Arc::new(AlertStore::open(&store_path));
        let (_capture, context, handle) = spawn_always_fires(store.clone(), &evidence_dir);

        let deadline = Instant::now() + Duration::from_secs(5);
        while context.stats.snapshot().store_failures < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        context.running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let stats = context.stats.snapshot();
        assert!(stats.store_failures >= 3);
        assert!(stats.iteration_failures >= stats.store_failures);
        assert_eq!(stats.alerts_raised, 0);
        assert!(store.is_empty());
        assert_eq!(std::fs::read_dir(&evidence_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_panic_message() {
        let caught = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");
    }
}
