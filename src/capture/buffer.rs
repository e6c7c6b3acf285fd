//! Rolling evidence buffer.
//!
//! Holds the most recent samples of one stream so that a clip can be exported
//! when an alert fires. The capture pump writes while workers export, so the
//! contents live behind a mutex and exports work from a snapshot.

use crate::capture::evidence::{evidence_file_name, ClipWriter, EvidenceError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Bounded FIFO of recent samples.
#[derive(Debug)]
pub struct RollingEvidenceBuffer<T> {
    capacity: usize,
    samples: Mutex<VecDeque<T>>,
}

impl<T: Clone> RollingEvidenceBuffer<T> {
    /// Create a buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Create a buffer sized for `duration_secs` of a stream running at `rate` samples/s.
    pub fn for_duration(duration_secs: u64, rate: u32) -> Self {
        Self::new((duration_secs as usize).saturating_mul(rate as usize))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest ones once capacity is exceeded.
    pub fn push(&self, sample: T) {
        if self.capacity == 0 {
            return;
        }
        let mut samples = self.lock();
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// Most recently pushed sample.
    pub fn latest(&self) -> Option<T> {
        self.lock().back().cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Materialize the current contents as a single clip in `dir`.
    ///
    /// Returns `Ok(None)` when the buffer is empty. The buffer itself is left
    /// untouched so capture keeps accumulating.
    pub fn export(
        &self,
        writer: &dyn ClipWriter<T>,
        dir: &Path,
        tag: &str,
    ) -> Result<Option<PathBuf>, EvidenceError> {
        let samples = self.snapshot();
        if samples.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(dir).map_err(|e| EvidenceError::Io(e.to_string()))?;
        let path = dir.join(evidence_file_name(tag, writer.extension()));
        writer.write_clip(&samples, &path)?;
        Ok(Some(path))
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Buffer shared between a capture pump and the workers exporting from it.
pub type SharedEvidenceBuffer<T> = Arc<RollingEvidenceBuffer<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingWriter {
        written: StdMutex<Vec<Vec<u32>>>,
    }

    impl ClipWriter<u32> for RecordingWriter {
        fn extension(&self) -> &'static str {
            "txt"
        }

        fn write_clip(&self, samples: &[u32], path: &Path) -> Result<(), EvidenceError> {
            std::fs::write(path, format!("{samples:?}")).map_err(|e| EvidenceError::Io(e.to_string()))?;
            self.written.lock().unwrap().push(samples.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_keeps_last_capacity_items_in_order() {
        for capacity in 1..6 {
            let buffer = RollingEvidenceBuffer::new(capacity);
            let total = capacity as u32 * 3 + 1;
            for i in 0..total {
                buffer.push(i);
            }
            let expected: Vec<u32> = (total - capacity as u32..total).collect();
            assert_eq!(buffer.snapshot(), expected);
            assert_eq!(buffer.len(), capacity);
        }
    }

    #[test]
    fn test_capacity_from_duration() {
        let buffer: RollingEvidenceBuffer<u8> = RollingEvidenceBuffer::for_duration(10, 30);
        assert_eq!(buffer.capacity(), 300);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let buffer = RollingEvidenceBuffer::new(0);
        buffer.push(1u8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_export_empty_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let buffer: RollingEvidenceBuffer<u32> = RollingEvidenceBuffer::new(4);
        let writer = RecordingWriter {
            written: StdMutex::new(Vec::new()),
        };

        let result = buffer.export(&writer, dir.path(), "object_theft_1").unwrap();
        assert!(result.is_none());
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_export_does_not_clear() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = RollingEvidenceBuffer::new(4);
        for i in 0..6u32 {
            buffer.push(i);
        }
        let writer = RecordingWriter {
            written: StdMutex::new(Vec::new()),
        };

        let path = buffer
            .export(&writer, dir.path(), "object_theft_1")
            .unwrap()
            .expect("non-empty buffer exports a clip");

        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("alert_object_theft_1_"));
        assert_eq!(writer.written.lock().unwrap()[0], vec![2, 3, 4, 5]);
        assert_eq!(buffer.len(), 4);
    }
}
