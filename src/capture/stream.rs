//! Stream capture: one input source pumped at a fixed rate.
//!
//! Each capture owns a background thread that reads from its source, copies
//! every sample into the rolling evidence buffer and publishes it to
//! subscribers. Latest-value subscribers always see the newest sample; stale
//! ones are dropped instead of queueing up behind a slow worker. Queued
//! subscribers read in order from a short queue that drops its oldest entry
//! on overflow.

use crate::capture::buffer::{RollingEvidenceBuffer, SharedEvidenceBuffer};
use crate::capture::source::{
    open_audio_source, open_video_source, CaptureError, SampleSource,
};
use crate::capture::types::{AudioChunk, Sample, VideoFrame};
use crate::config::{AudioSourceConfig, CaptureConfig, VideoSourceConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Video capture with its frame buffer.
pub type VideoCapture = StreamCapture<VideoFrame>;

/// Audio capture with its chunk buffer.
pub type AudioCapture = StreamCapture<AudioChunk>;

/// Sending half of a subscription. The pump keeps a receiver clone so it can
/// evict the stale sample when the slot is full.
struct Publisher<T> {
    sender: Sender<T>,
    evict: Receiver<T>,
}

type Publishers<T> = Arc<Mutex<Vec<Publisher<T>>>>;

/// A running capture of one stream.
pub struct StreamCapture<T: Sample> {
    name: String,
    rate: u32,
    buffer: SharedEvidenceBuffer<T>,
    publishers: Publishers<T>,
    running: Arc<AtomicBool>,
    captured: Arc<AtomicU64>,
    pump: Option<JoinHandle<()>>,
}

impl<T: Sample> StreamCapture<T> {
    /// Start pumping an already-opened source at `rate` samples per second.
    pub fn start<S>(source: S, rate: u32, buffer_capacity: usize) -> Result<Self, CaptureError>
    where
        S: SampleSource<Sample = T>,
    {
        if rate == 0 {
            return Err(CaptureError::InvalidConfig(
                "capture rate must be non-zero".to_string(),
            ));
        }

        let name = source.name().to_string();
        let buffer = Arc::new(RollingEvidenceBuffer::new(buffer_capacity));
        let publishers: Publishers<T> = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let captured = Arc::new(AtomicU64::new(0));

        let pump = {
            let buffer = buffer.clone();
            let publishers = publishers.clone();
            let running = running.clone();
            let captured = captured.clone();
            let tick = Duration::from_secs_f64(1.0 / rate as f64);

            thread::Builder::new()
                .name(format!("capture-{name}"))
                .spawn(move || {
                    run_pump(source, tick, buffer, publishers, running, captured);
                })
                .map_err(|e| CaptureError::Spawn(e.to_string()))?
        };

        tracing::info!(source = %name, rate, capacity = buffer_capacity, "Capture opened");

        Ok(Self {
            name,
            rate,
            buffer,
            publishers,
            running,
            captured,
            pump: Some(pump),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Check if the capture is still pumping samples.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of samples read from the source so far.
    pub fn captured_count(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// The rolling evidence buffer fed by this capture.
    pub fn buffer(&self) -> SharedEvidenceBuffer<T> {
        self.buffer.clone()
    }

    /// Subscribe to the newest samples of this stream.
    pub fn subscribe(&self) -> SampleFeed<T> {
        self.add_subscriber(1, true)
    }

    /// Subscribe to every sample in order, keeping at most `depth` unread.
    pub fn subscribe_queued(&self, depth: usize) -> SampleFeed<T> {
        self.add_subscriber(depth.max(1), false)
    }

    fn add_subscriber(&self, depth: usize, latest_only: bool) -> SampleFeed<T> {
        let (sender, receiver) = bounded(depth);
        let publisher = Publisher {
            sender,
            evict: receiver.clone(),
        };
        self.publishers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(publisher);
        SampleFeed {
            receiver,
            latest_only,
        }
    }

    /// Stop the pump and drop buffered samples.
    ///
    /// Safe to call any number of times.
    pub fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.pump.take() else {
            return;
        };

        if handle.join().is_err() {
            tracing::error!(source = %self.name, "Capture thread panicked");
        }
        self.publishers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.buffer.clear();
        tracing::info!(source = %self.name, captured = self.captured_count(), "Capture released");
    }
}

impl VideoCapture {
    /// Open a configured video source and start capturing.
    pub fn open(config: &VideoSourceConfig, capture: &CaptureConfig) -> Result<Self, CaptureError> {
        let source = open_video_source(config, capture)?;
        Self::start(
            source,
            capture.fps,
            capture.video_buffer_capacity(),
        )
    }
}

impl AudioCapture {
    /// Open a configured audio source and start capturing.
    pub fn open(config: &AudioSourceConfig, capture: &CaptureConfig) -> Result<Self, CaptureError> {
        let source = open_audio_source(config, capture)?;
        Self::start(
            source,
            capture.audio_chunks_per_sec,
            capture.audio_buffer_capacity(),
        )
    }
}

impl<T: Sample> Drop for StreamCapture<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    type Sample = S::Sample;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_sample(&mut self) -> Option<Self::Sample> {
        (**self).read_sample()
    }
}

fn run_pump<S: SampleSource>(
    mut source: S,
    tick: Duration,
    buffer: SharedEvidenceBuffer<S::Sample>,
    publishers: Publishers<S::Sample>,
    running: Arc<AtomicBool>,
    captured: Arc<AtomicU64>,
) {
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();

        if let Some(sample) = source.read_sample() {
            buffer.push(sample.clone());
            captured.fetch_add(1, Ordering::Relaxed);
            publish(&publishers, sample);
        }

        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

fn publish<T: Clone>(publishers: &Publishers<T>, sample: T) {
    let publishers = publishers.lock().unwrap_or_else(|e| e.into_inner());
    for publisher in publishers.iter() {
        match publisher.sender.try_send(sample.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(latest)) => {
                // Drop the oldest unread sample to make room.
                let _ = publisher.evict.try_recv();
                let _ = publisher.sender.try_send(latest);
            }
        }
    }
}

/// Receiving side of a capture subscription.
pub struct SampleFeed<T> {
    receiver: Receiver<T>,
    latest_only: bool,
}

impl<T> SampleFeed<T> {
    /// The next sample to process, if any.
    ///
    /// Never blocks. `None` means nothing new has arrived or the capture has
    /// been released.
    pub fn read_sample(&self) -> Option<T> {
        if self.latest_only {
            self.receiver.try_iter().last()
        } else {
            self.receiver.try_recv().ok()
        }
    }
}
