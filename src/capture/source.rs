//! Input sources for stream captures.
//!
//! A source yields samples one at a time. `None` means either the end of the
//! stream or a transient read failure; callers skip and retry.

use crate::capture::types::{AudioChunk, Sample, VideoFrame};
use crate::config::{AudioSourceConfig, CaptureConfig, VideoSourceConfig};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Image extensions accepted by [`ImageSequenceSource`].
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// A producer of samples for one stream.
pub trait SampleSource: Send + 'static {
    type Sample: Sample;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Read the next sample.
    fn read_sample(&mut self) -> Option<Self::Sample>;
}

/// Boxed video source.
pub type VideoSource = Box<dyn SampleSource<Sample = VideoFrame>>;

/// Boxed audio source.
pub type AudioSource = Box<dyn SampleSource<Sample = AudioChunk>>;

/// Open the video source described by `config`.
pub fn open_video_source(
    config: &VideoSourceConfig,
    capture: &CaptureConfig,
) -> Result<VideoSource, CaptureError> {
    let (width, height) = (capture.frame_width, capture.frame_height);
    match config {
        VideoSourceConfig::ImageSequence { dir, looped } => Ok(Box::new(
            ImageSequenceSource::open(dir, *looped, width, height)?,
        )),
        VideoSourceConfig::TestPattern { name } => {
            Ok(Box::new(TestPatternSource::new(name.clone(), width, height)))
        }
    }
}

/// Open the audio source described by `config`.
pub fn open_audio_source(
    config: &AudioSourceConfig,
    capture: &CaptureConfig,
) -> Result<AudioSource, CaptureError> {
    let chunk_len = capture.audio_chunk_len();
    if chunk_len == 0 {
        return Err(CaptureError::InvalidConfig(
            "audio chunk length must be non-zero".to_string(),
        ));
    }
    match config {
        AudioSourceConfig::RawPcm { path, looped } => Ok(Box::new(RawPcmSource::open(
            path,
            *looped,
            capture.audio_sample_rate,
            chunk_len,
        )?)),
        AudioSourceConfig::Silence => Ok(Box::new(SilenceSource::new(
            capture.audio_sample_rate,
            chunk_len,
        ))),
    }
}

/// Plays a directory of still images as a video stream, in file-name order.
pub struct ImageSequenceSource {
    name: String,
    frames: Vec<PathBuf>,
    position: usize,
    looped: bool,
    width: u32,
    height: u32,
    next_index: u64,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, looped: bool, width: u32, height: u32) -> Result<Self, CaptureError> {
        let name = dir.display().to_string();
        let entries = std::fs::read_dir(dir).map_err(|e| CaptureError::Open {
            source: name.clone(),
            reason: e.to_string(),
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| FRAME_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(CaptureError::Open {
                source: name,
                reason: "no image frames found".to_string(),
            });
        }

        Ok(Self {
            name,
            frames,
            position: 0,
            looped,
            width,
            height,
            next_index: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl SampleSource for ImageSequenceSource {
    type Sample = VideoFrame;

    fn name(&self) -> &str {
        &self.name
    }

    fn read_sample(&mut self) -> Option<VideoFrame> {
        if self.position >= self.frames.len() {
            if !self.looped {
                return None;
            }
            self.position = 0;
        }

        let path = &self.frames[self.position];
        self.position += 1;

        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                tracing::warn!(source = %self.name, frame = %path.display(), "Failed to decode frame: {e}");
                return None;
            }
        };

        let image = if image.width() != self.width || image.height() != self.height {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        } else {
            image
        };

        let frame = VideoFrame::new(self.next_index, image);
        self.next_index += 1;
        Some(frame)
    }
}

/// Generated frames with a sweeping bar, for dry runs without a camera.
pub struct TestPatternSource {
    name: String,
    width: u32,
    height: u32,
    next_index: u64,
}

impl TestPatternSource {
    pub fn new(name: String, width: u32, height: u32) -> Self {
        Self {
            name,
            width,
            height,
            next_index: 0,
        }
    }
}

impl SampleSource for TestPatternSource {
    type Sample = VideoFrame;

    fn name(&self) -> &str {
        &self.name
    }

    fn read_sample(&mut self) -> Option<VideoFrame> {
        let bar = (self.next_index % self.width.max(1) as u64) as u32;
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            if x.abs_diff(bar) < 4 {
                Rgb([255, 255, 255])
            } else {
                Rgb([(x % 256) as u8, (y % 256) as u8, 64])
            }
        });
        let frame = VideoFrame::new(self.next_index, image);
        self.next_index += 1;
        Some(frame)
    }
}

/// Reads little-endian f32 mono samples from a file.
pub struct RawPcmSource {
    name: String,
    reader: BufReader<File>,
    looped: bool,
    sample_rate: u32,
    chunk_len: usize,
    next_index: u64,
}

impl RawPcmSource {
    pub fn open(
        path: &Path,
        looped: bool,
        sample_rate: u32,
        chunk_len: usize,
    ) -> Result<Self, CaptureError> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| CaptureError::Open {
            source: name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name,
            reader: BufReader::new(file),
            looped,
            sample_rate,
            chunk_len,
            next_index: 0,
        })
    }

    fn fill(&mut self, bytes: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < bytes.len() {
            match self.reader.read(&mut bytes[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

impl SampleSource for RawPcmSource {
    type Sample = AudioChunk;

    fn name(&self) -> &str {
        &self.name
    }

    fn read_sample(&mut self) -> Option<AudioChunk> {
        let mut bytes = vec![0u8; self.chunk_len * 4];
        let mut filled = match self.fill(&mut bytes) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(source = %self.name, "Audio read failed: {e}");
                return None;
            }
        };

        if filled == 0 && self.looped {
            if let Err(e) = self.reader.seek(SeekFrom::Start(0)) {
                tracing::warn!(source = %self.name, "Audio rewind failed: {e}");
                return None;
            }
            filled = self.fill(&mut bytes).ok()?;
        }

        let whole = filled - filled % 4;
        if whole == 0 {
            return None;
        }

        let samples = bytes[..whole]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let chunk = AudioChunk::new(self.next_index, self.sample_rate, samples);
        self.next_index += 1;
        Some(chunk)
    }
}

/// Endless silent audio.
pub struct SilenceSource {
    sample_rate: u32,
    chunk_len: usize,
    next_index: u64,
}

impl SilenceSource {
    pub fn new(sample_rate: u32, chunk_len: usize) -> Self {
        Self {
            sample_rate,
            chunk_len,
            next_index: 0,
        }
    }
}

impl SampleSource for SilenceSource {
    type Sample = AudioChunk;

    fn name(&self) -> &str {
        "silence"
    }

    fn read_sample(&mut self) -> Option<AudioChunk> {
        let chunk = AudioChunk::new(self.next_index, self.sample_rate, vec![0.0; self.chunk_len]);
        self.next_index += 1;
        Some(chunk)
    }
}

/// Errors that can occur while acquiring or running a capture.
#[derive(Debug)]
pub enum CaptureError {
    Open { source: String, reason: String },
    InvalidConfig(String),
    Spawn(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Open { source, reason } => {
                write!(f, "Failed to open source {source}: {reason}")
            }
            CaptureError::InvalidConfig(e) => write!(f, "Invalid capture configuration: {e}"),
            CaptureError::Spawn(e) => write!(f, "Failed to start capture thread: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_sequence_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ImageSequenceSource::open(&missing, false, 32, 24),
            Err(CaptureError::Open { .. })
        ));
    }

    #[test]
    fn test_image_sequence_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();
        assert!(ImageSequenceSource::open(dir.path(), false, 32, 24).is_err());
    }

    #[test]
    fn test_image_sequence_plays_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..2 {
            RgbImage::from_pixel(10, 10, Rgb([i * 100, 0, 0]))
                .save(dir.path().join(format!("frame_{i:03}.png")))
                .unwrap();
        }

        let mut source = ImageSequenceSource::open(dir.path(), false, 32, 24).unwrap();
        assert_eq!(source.frame_count(), 2);

        let first = source.read_sample().unwrap();
        assert_eq!((first.width(), first.height()), (32, 24));
        assert_eq!(first.index, 0);
        assert_eq!(source.read_sample().unwrap().index, 1);
        assert!(source.read_sample().is_none());
    }

    #[test]
    fn test_image_sequence_loops() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("only.png")).unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), true, 4, 4).unwrap();
        for expected in 0..3 {
            assert_eq!(source.read_sample().unwrap().index, expected);
        }
    }

    #[test]
    fn test_raw_pcm_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.f32");
        let bytes: Vec<u8> = (0..10).flat_map(|i| (i as f32 / 10.0).to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();

        let mut source = RawPcmSource::open(&path, false, 100, 4).unwrap();
        assert_eq!(source.read_sample().unwrap().samples.len(), 4);
        assert_eq!(source.read_sample().unwrap().samples.len(), 4);
        let tail = source.read_sample().unwrap();
        assert_eq!(tail.samples.len(), 2);
        assert!((tail.samples[1] - 0.9).abs() < 1e-6);
        assert!(source.read_sample().is_none());
    }

    #[test]
    fn test_raw_pcm_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RawPcmSource::open(&dir.path().join("missing.f32"), false, 100, 4).is_err());
    }

    #[test]
    fn test_silence_is_endless() {
        let mut source = SilenceSource::new(16_000, 1_600);
        for _ in 0..3 {
            let chunk = source.read_sample().unwrap();
            assert_eq!(chunk.samples.len(), 1_600);
            assert!(chunk.samples.iter().all(|s| *s == 0.0));
        }
    }
}
