//! Sample types produced by stream captures.
//!
//! A sample is owned by the capture that produced it. Buffers and subscribers
//! each receive their own copy; nothing is shared by reference across threads.

use chrono::{DateTime, Utc};
use image::RgbImage;

/// Common view over captured samples.
pub trait Sample: Clone + Send + 'static {
    /// Monotonically increasing position of this sample within its stream.
    fn index(&self) -> u64;
    /// Wall-clock time at which the sample was captured.
    fn captured_at(&self) -> DateTime<Utc>;
}

/// A single video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
}

impl VideoFrame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            captured_at: Utc::now(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl Sample for VideoFrame {
    fn index(&self) -> u64 {
        self.index
    }

    fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// A chunk of mono audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub sample_rate: u32,
    /// Samples in the range [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(index: u64, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            index,
            captured_at: Utc::now(),
            sample_rate,
            samples,
        }
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

impl Sample for AudioChunk {
    fn index(&self) -> u64 {
        self.index
    }

    fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_chunk_duration() {
        let chunk = AudioChunk::new(0, 16_000, vec![0.0; 1_600]);
        assert!((chunk.duration_secs() - 0.1).abs() < 1e-9);

        let degenerate = AudioChunk::new(0, 0, vec![0.0; 10]);
        assert_eq!(degenerate.duration_secs(), 0.0);
    }

    #[test]
    fn test_video_frame_dimensions() {
        let frame = VideoFrame::new(3, RgbImage::new(64, 48));
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(Sample::index(&frame), 3);
    }
}
