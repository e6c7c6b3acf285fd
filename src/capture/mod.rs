//! Stream capture for the monitoring agent.
//!
//! This module provides the per-stream capture threads, the rolling evidence
//! buffers they feed, and the clip writers used to export evidence.

pub mod buffer;
pub mod evidence;
pub mod source;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use buffer::{RollingEvidenceBuffer, SharedEvidenceBuffer};
pub use evidence::{evidence_tag, ClipWriter, EvidenceError, GifClipWriter, WavClipWriter};
pub use source::{
    open_audio_source, open_video_source, AudioSource, CaptureError, SampleSource, VideoSource,
};
pub use stream::{AudioCapture, SampleFeed, StreamCapture, VideoCapture};
pub use types::{AudioChunk, Sample, VideoFrame};
