//! The monitoring agent.
//!
//! The agent owns one capture per configured camera plus the optional audio
//! capture, and one worker thread per detection pipeline bound to its
//! designated stream:
//!
//! ```text
//!  camera[theft]   ──▶ buffer ──▶ TheftPipeline   ─┐
//!  camera[contact] ──▶ buffer ──▶ ContactPipeline ─┼─▶ evidence export ──▶ AlertStore
//!  microphone      ──▶ buffer ──▶ SpeechPipeline  ─┘
//! ```
//!
//! Without detection capabilities the agent runs in reduced mode: captures
//! and evidence buffers stay active but no workers are spawned.

pub mod worker;

use crate::alerts::{open_shared_store, SharedAlertStore};
use crate::capture::{
    AudioCapture, CaptureError, GifClipWriter, VideoCapture, VideoFrame, WavClipWriter,
};
use crate::config::{Config, ConfigError};
use crate::detection::{
    load_capabilities, Capabilities, CapabilityError, ContactPipeline, DetectionPipeline,
    SpeechPipeline, TheftPipeline,
};
use crate::stats::{create_shared_stats_with_persistence, SharedAgentStats};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub use worker::{ClipExport, EvidenceExport, Pacing, Worker, WorkerContext};

/// Seconds of audio the speech worker may fall behind before chunks are dropped.
const SPEECH_QUEUE_SECS: usize = 2;

/// Whether detection is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMode {
    Full,
    /// Capture and buffering only
    Reduced { reason: String },
}

impl AgentMode {
    pub fn is_reduced(&self) -> bool {
        matches!(self, AgentMode::Reduced { .. })
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Full => write!(f, "full"),
            AgentMode::Reduced { reason } => write!(f, "reduced ({reason})"),
        }
    }
}

/// Orchestrates captures and detection workers.
pub struct Agent {
    config: Config,
    store: SharedAlertStore,
    stats: SharedAgentStats,
    capabilities: Option<Capabilities>,
    mode: AgentMode,
    running: Arc<AtomicBool>,
    video: Vec<VideoCapture>,
    audio: Option<AudioCapture>,
    workers: Vec<JoinHandle<()>>,
    done: Option<Receiver<String>>,
}

impl Agent {
    /// Create an agent from already-resolved collaborators.
    ///
    /// A capability error does not fail construction; it puts the agent in
    /// reduced mode. Safe mode forces reduced mode regardless.
    pub fn new(
        config: Config,
        store: SharedAlertStore,
        stats: SharedAgentStats,
        capabilities: Result<Capabilities, CapabilityError>,
    ) -> Self {
        let (capabilities, mode) = match capabilities {
            _ if config.safe_mode => (
                None,
                AgentMode::Reduced {
                    reason: CapabilityError::Disabled.to_string(),
                },
            ),
            Ok(capabilities) => (Some(capabilities), AgentMode::Full),
            Err(e) => (
                None,
                AgentMode::Reduced {
                    reason: e.to_string(),
                },
            ),
        };

        if let AgentMode::Reduced { reason } = &mode {
            tracing::warn!("Running in reduced mode, detection disabled: {reason}");
            stats.set_reduced_mode(reason.clone());
        }

        Self {
            config,
            store,
            stats,
            capabilities,
            mode,
            running: Arc::new(AtomicBool::new(false)),
            video: Vec::new(),
            audio: None,
            workers: Vec::new(),
            done: None,
        }
    }

    /// Create an agent with the store, statistics and capabilities named by `config`.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.ensure_directories()?;
        let store = open_shared_store(config.alerts_path());
        let stats = create_shared_stats_with_persistence(config.stats_path());
        let capabilities = if config.safe_mode {
            Err(CapabilityError::Disabled)
        } else {
            load_capabilities(&config.capabilities)
        };
        Ok(Self::new(config, store, stats, capabilities))
    }

    pub fn mode(&self) -> &AgentMode {
        &self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> SharedAlertStore {
        self.store.clone()
    }

    pub fn stats(&self) -> SharedAgentStats {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of detection worker threads currently owned.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of open captures, audio included.
    pub fn capture_count(&self) -> usize {
        self.video.len() + usize::from(self.audio.is_some())
    }

    /// Open all captures and spawn the detection workers.
    ///
    /// Calling this while already running does nothing. On failure every
    /// capture opened so far is released and the agent is left stopped.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.is_running() {
            tracing::debug!("Agent already running");
            return Ok(());
        }

        if !self.mode.is_reduced() {
            self.validate_bindings()?;
        }

        if let Err(e) = self.open_captures() {
            self.release_captures();
            return Err(e);
        }

        self.running.store(true, Ordering::SeqCst);

        if let Some(capabilities) = self.capabilities.clone() {
            if let Err(e) = self.spawn_workers(&capabilities) {
                self.stop();
                return Err(e);
            }
        }

        tracing::info!(
            mode = %self.mode,
            captures = self.capture_count(),
            workers = self.workers.len(),
            "Agent started"
        );
        Ok(())
    }

    /// Stop workers and release every capture.
    ///
    /// Workers get `stop_timeout` in total to exit; any still running after
    /// that are detached. Safe to call at any time, any number of times.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if !was_running && self.workers.is_empty() && self.capture_count() == 0 {
            return;
        }
        tracing::info!("Stopping agent");

        self.join_workers();
        self.release_captures();

        if let Err(e) = self.stats.save() {
            tracing::warn!("Could not save statistics: {e}");
        }
        tracing::info!("Agent stopped");
    }

    fn validate_bindings(&self) -> Result<(), StartError> {
        let available = self.config.video_sources.len();
        let detection = &self.config.detection;
        for (role, index) in [
            ("contact", detection.contact_source),
            ("theft", detection.theft_source),
            ("speech", detection.speech_video_source),
        ] {
            if index >= available {
                return Err(StartError::InvalidBinding {
                    role,
                    index,
                    available,
                });
            }
        }
        Ok(())
    }

    fn open_captures(&mut self) -> Result<(), StartError> {
        for source in &self.config.video_sources {
            let capture = VideoCapture::open(source, &self.config.capture).map_err(|error| {
                StartError::Capture {
                    source: source.label(),
                    error,
                }
            })?;
            self.video.push(capture);
        }

        if let Some(source) = &self.config.audio {
            let capture = AudioCapture::open(source, &self.config.capture).map_err(|error| {
                StartError::Capture {
                    source: "audio".to_string(),
                    error,
                }
            })?;
            self.audio = Some(capture);
        }
        Ok(())
    }

    fn release_captures(&mut self) {
        let captured: u64 = self
            .video
            .iter()
            .map(|c| c.captured_count())
            .chain(self.audio.iter().map(|c| c.captured_count()))
            .sum();
        self.stats.record_samples_captured(captured);

        for mut capture in self.video.drain(..) {
            capture.release();
        }
        if let Some(mut capture) = self.audio.take() {
            capture.release();
        }
    }

    fn spawn_workers(&mut self, capabilities: &Capabilities) -> Result<(), StartError> {
        let (done_tx, done_rx) = unbounded();
        self.done = Some(done_rx);

        let detection = self.config.detection.clone();
        let pacing = &detection.pacing;
        let pacing_for = |interval: Duration| Pacing {
            interval,
            idle_retry: pacing.idle_retry,
            error_backoff: pacing.error_backoff,
        };

        let contact = ContactPipeline::new(capabilities.pose.clone(), detection.contact.clone());
        self.spawn_video_worker(
            "contact",
            contact,
            detection.contact_source,
            pacing_for(pacing.contact_interval),
            &done_tx,
        )?;

        let theft = TheftPipeline::new(capabilities.objects.clone(), &detection.theft);
        self.spawn_video_worker(
            "theft",
            theft,
            detection.theft_source,
            pacing_for(pacing.theft_interval),
            &done_tx,
        )?;

        let depth = self.config.capture.audio_chunks_per_sec as usize * SPEECH_QUEUE_SECS;
        let audio_feed = self.audio.as_ref().map(|audio| audio.subscribe_queued(depth));
        match (capabilities.speech.clone(), audio_feed) {
            (Some(speech), Some(feed)) => {
                if detection.speech.lexicon.is_empty() {
                    tracing::warn!("Speech lexicon is empty; no speech alerts will be raised");
                }
                let worker = Worker::new(
                    "speech",
                    SpeechPipeline::new(speech, &detection.speech),
                    feed,
                    pacing_for(pacing.speech_interval),
                    self.worker_context(),
                )
                .with_video_evidence(self.video_export(detection.speech_video_source))
                .with_audio_evidence(self.audio_export());
                self.spawn(worker, &done_tx)?;
            }
            (None, _) => tracing::info!("No speech capability; speech screening skipped"),
            (_, None) => tracing::info!("No audio source; speech screening skipped"),
        }
        Ok(())
    }

    fn spawn_video_worker<P>(
        &mut self,
        name: &str,
        pipeline: P,
        source: usize,
        pacing: Pacing,
        done: &Sender<String>,
    ) -> Result<(), StartError>
    where
        P: DetectionPipeline<Sample = VideoFrame>,
    {
        let worker = Worker::new(
            name,
            pipeline,
            self.video[source].subscribe(),
            pacing,
            self.worker_context(),
        )
        .with_video_evidence(self.video_export(source))
        .with_audio_evidence(self.audio_export());
        self.spawn(worker, done)
    }

    fn spawn<P: DetectionPipeline>(&mut self, worker: Worker<P>, done: &Sender<String>) -> Result<(), StartError> {
        let handle = worker
            .spawn(done.clone())
            .map_err(|e| StartError::Spawn(e.to_string()))?;
        self.workers.push(handle);
        Ok(())
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            store: self.store.clone(),
            stats: self.stats.clone(),
            running: self.running.clone(),
        }
    }

    fn video_export(&self, source: usize) -> ClipExport<VideoFrame> {
        ClipExport::new(
            self.video[source].buffer(),
            Arc::new(GifClipWriter::new(self.config.capture.fps)),
            self.config.video_evidence_dir(),
        )
    }

    fn audio_export(&self) -> Option<Box<dyn EvidenceExport>> {
        self.audio.as_ref().map(|audio| {
            Box::new(ClipExport::new(
                audio.buffer(),
                Arc::new(WavClipWriter::new()),
                self.config.audio_evidence_dir(),
            )) as Box<dyn EvidenceExport>
        })
    }

    fn join_workers(&mut self) {
        let deadline = Instant::now() + self.config.stop_timeout;
        let mut pending = self.workers.len();

        if let Some(done) = self.done.take() {
            while pending > 0 {
                match done.recv_deadline(deadline) {
                    Ok(name) => {
                        tracing::debug!(worker = %name, "Worker exited");
                        pending -= 1;
                    }
                    Err(_) => break,
                }
            }
        }

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if !handle.is_finished() {
                tracing::warn!(thread = %name, "Worker did not stop in time; detaching");
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(thread = %name, "Worker thread panicked");
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors that prevent the agent from starting.
#[derive(Debug)]
pub enum StartError {
    /// A pipeline is bound to a camera that is not configured
    InvalidBinding {
        role: &'static str,
        index: usize,
        available: usize,
    },
    Capture {
        source: String,
        error: CaptureError,
    },
    Spawn(String),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::InvalidBinding {
                role,
                index,
                available,
            } => write!(
                f,
                "{role} detection bound to video source {index}, but only {available} configured"
            ),
            StartError::Capture { source, error } => {
                write!(f, "Failed to open capture {source}: {error}")
            }
            StartError::Spawn(e) => write!(f, "Failed to spawn worker: {e}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::Capture { error, .. } => Some(error),
            _ => None,
        }
    }
}
