//! Offensive speech screening.
//!
//! Audio chunks are gathered into fixed-length analysis windows. Consecutive
//! windows overlap by half so a phrase straddling a boundary is still heard
//! whole in one of them.

use crate::alerts::AlertKind;
use crate::capture::evidence::normalize;
use crate::capture::AudioChunk;
use crate::config::SpeechConfig;
use crate::detection::{Detection, DetectionError, DetectionPipeline, SpeechCapability};
use std::sync::Arc;

/// Fixed set of flagged terms.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    terms: Vec<String>,
}

impl Lexicon {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        terms.sort();
        terms.dedup();
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Flagged terms occurring anywhere in `text`, case-insensitively.
    pub fn flagged_terms(&self, text: &str) -> Vec<&str> {
        let text = text.to_lowercase();
        self.terms
            .iter()
            .filter(|term| text.contains(term.as_str()))
            .map(|term| term.as_str())
            .collect()
    }

    pub fn contains_flagged(&self, text: &str) -> bool {
        !self.flagged_terms(text).is_empty()
    }
}

/// Collects audio into half-overlapping analysis windows.
#[derive(Debug)]
pub struct SpeechWindow {
    window_secs: f64,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl SpeechWindow {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            sample_rate: 0,
            pending: Vec::new(),
        }
    }

    fn window_len(&self) -> usize {
        (self.window_secs * self.sample_rate as f64).round() as usize
    }

    /// Number of samples waiting for the next window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Add a chunk; returns a full window once enough audio has arrived.
    pub fn push(&mut self, chunk: &AudioChunk) -> Option<Vec<f32>> {
        if chunk.sample_rate != self.sample_rate {
            self.sample_rate = chunk.sample_rate;
            self.pending.clear();
        }
        self.pending.extend_from_slice(&chunk.samples);

        let window_len = self.window_len();
        if window_len == 0 || self.pending.len() < window_len {
            return None;
        }

        let window = self.pending[..window_len].to_vec();
        self.pending.drain(..window_len / 2);
        Some(window)
    }
}

/// Transcribes audio windows and screens them against a [`Lexicon`].
pub struct SpeechPipeline {
    speech: Arc<dyn SpeechCapability>,
    window: SpeechWindow,
    lexicon: Lexicon,
}

impl SpeechPipeline {
    pub fn new(speech: Arc<dyn SpeechCapability>, config: &SpeechConfig) -> Self {
        Self {
            speech,
            window: SpeechWindow::new(config.window_secs),
            lexicon: Lexicon::new(&config.lexicon),
        }
    }
}

impl DetectionPipeline for SpeechPipeline {
    type Sample = AudioChunk;

    fn kind(&self) -> AlertKind {
        AlertKind::OffensiveLanguage
    }

    fn evaluate(&mut self, chunk: &AudioChunk) -> Result<Detection, DetectionError> {
        let Some(window) = self.window.push(chunk) else {
            return Ok(Detection::none());
        };

        let transcript = self
            .speech
            .transcribe(&normalize(&window), chunk.sample_rate)?;
        let flagged = self.lexicon.flagged_terms(&transcript);
        if flagged.is_empty() {
            return Ok(Detection::none());
        }

        tracing::debug!(terms = ?flagged, "Flagged speech");
        Ok(Detection::positive(format!(
            "Offensive language detected: {}",
            flagged.join(", ")
        )))
    }
}
