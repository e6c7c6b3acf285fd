//! Evidence clip encoding.
//!
//! Video evidence is written as an animated GIF, audio evidence as a 16-bit
//! mono PCM WAV file. File names carry the alert type and id, so clips of
//! different alerts never share a path, plus the export time.

use crate::capture::types::{AudioChunk, VideoFrame};
use chrono::Utc;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame};
use statrs::statistics::Statistics;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Encodes a run of buffered samples into a single evidence file.
pub trait ClipWriter<T>: Send + Sync {
    /// File extension (without the dot) of the produced clip.
    fn extension(&self) -> &'static str;

    /// Write `samples` (oldest first) to `path`.
    fn write_clip(&self, samples: &[T], path: &Path) -> Result<(), EvidenceError>;
}

/// Build the tag identifying the alert an export belongs to.
pub fn evidence_tag(kind_slug: &str, alert_id: &str) -> String {
    format!("{kind_slug}_{alert_id}")
}

/// File name for an evidence clip: `alert_<tag>_<YYYYmmdd_HHMMSS>.<ext>`.
pub fn evidence_file_name(tag: &str, extension: &str) -> String {
    format!(
        "alert_{tag}_{}.{extension}",
        Utc::now().format("%Y%m%d_%H%M%S")
    )
}

/// Animated GIF encoder for video evidence.
#[derive(Debug, Clone)]
pub struct GifClipWriter {
    fps: u32,
}

impl GifClipWriter {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }
}

impl ClipWriter<VideoFrame> for GifClipWriter {
    fn extension(&self) -> &'static str {
        "gif"
    }

    fn write_clip(&self, samples: &[VideoFrame], path: &Path) -> Result<(), EvidenceError> {
        let file = File::create(path).map_err(|e| EvidenceError::Io(e.to_string()))?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| EvidenceError::Encode(e.to_string()))?;

        let delay = Delay::from_numer_denom_ms(1000, self.fps);
        let frames = samples.iter().map(|frame| {
            let rgba = DynamicImage::ImageRgb8(frame.image.clone()).to_rgba8();
            Frame::from_parts(rgba, 0, 0, delay)
        });

        encoder
            .encode_frames(frames)
            .map_err(|e| EvidenceError::Encode(e.to_string()))
    }
}

/// PCM WAV encoder for audio evidence.
#[derive(Debug, Clone, Default)]
pub struct WavClipWriter;

impl WavClipWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ClipWriter<AudioChunk> for WavClipWriter {
    fn extension(&self) -> &'static str {
        "wav"
    }

    fn write_clip(&self, samples: &[AudioChunk], path: &Path) -> Result<(), EvidenceError> {
        let sample_rate = samples
            .first()
            .map(|c| c.sample_rate)
            .ok_or(EvidenceError::Empty)?;
        let pcm: Vec<f32> = samples
            .iter()
            .flat_map(|c| c.samples.iter().copied())
            .collect();

        let file = File::create(path).map_err(|e| EvidenceError::Io(e.to_string()))?;
        let mut out = BufWriter::new(file);
        write_wav(&mut out, sample_rate, &normalize(&pcm))
            .and_then(|_| out.flush())
            .map_err(|e| EvidenceError::Io(e.to_string()))
    }
}

/// Scale samples so the loudest one reaches full scale.
pub fn normalize(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().map(|s| *s as f64).abs_max();
    if !peak.is_finite() || peak <= f64::EPSILON {
        return samples.to_vec();
    }
    samples.iter().map(|s| (*s as f64 / peak) as f32).collect()
}

fn write_wav<W: Write>(out: &mut W, sample_rate: u32, samples: &[f32]) -> std::io::Result<()> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;

    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_len = (samples.len() * block_align as usize) as u32;

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_len).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&CHANNELS.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Errors that can occur while exporting evidence.
#[derive(Debug)]
pub enum EvidenceError {
    Empty,
    Io(String),
    Encode(String),
}

impl std::fmt::Display for EvidenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceError::Empty => write!(f, "No samples to export"),
            EvidenceError::Io(e) => write!(f, "IO error: {e}"),
            EvidenceError::Encode(e) => write!(f, "Encode error: {e}"),
        }
    }
}

impl std::error::Error for EvidenceError {}
