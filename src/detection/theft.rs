//! Object presence tracking for theft detection.
//!
//! Objects have no stable identity from the detector, so each one is keyed by
//! its class plus coarse position and size buckets. A key that stops
//! appearing is held as absent; once it has been absent for longer than the
//! grace period it is reported missing exactly once and forgotten.
//!
//! The bucketing tolerates detector jitter but not real movement: an object
//! nudged across a bucket boundary looks like one object vanishing and
//! another appearing.

use crate::alerts::AlertKind;
use crate::capture::VideoFrame;
use crate::config::TheftConfig;
use crate::detection::{Detection, DetectionError, DetectionPipeline, ObjectCapability, ObjectDetection};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Derived identity of a tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub class: String,
    pub x_bucket: i64,
    pub y_bucket: i64,
    pub size_bucket: i64,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.class, self.x_bucket, self.y_bucket, self.size_bucket
        )
    }
}

/// An object seen by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub key: ObjectKey,
    pub class: String,
    pub position: (f32, f32),
    pub size: f32,
    pub last_seen: DateTime<Utc>,
}

/// State machine inferring disappearance from per-tick detection sets.
#[derive(Debug)]
pub struct ObjectPresenceTracker {
    watched: HashSet<String>,
    min_confidence: f32,
    grace_period: chrono::Duration,
    position_bucket: f32,
    size_bucket: f32,
    /// Objects present in the latest tick
    present: HashMap<ObjectKey, TrackedObject>,
    /// Objects gone from view but still inside the grace period
    absent: HashMap<ObjectKey, TrackedObject>,
    seeded: bool,
}

impl ObjectPresenceTracker {
    pub fn new(config: &TheftConfig) -> Self {
        Self {
            watched: config.watched_classes.iter().cloned().collect(),
            min_confidence: config.min_confidence,
            grace_period: chrono::Duration::from_std(config.grace_period)
                .unwrap_or_else(|_| chrono::Duration::seconds(3)),
            position_bucket: config.position_bucket_px.max(1.0),
            size_bucket: config.size_bucket_px2.max(1.0),
            present: HashMap::new(),
            absent: HashMap::new(),
            seeded: false,
        }
    }

    /// Derive the identity of a detection.
    pub fn key_for(&self, detection: &ObjectDetection) -> ObjectKey {
        let (cx, cy) = detection.bbox.center();
        ObjectKey {
            class: detection.label.clone(),
            x_bucket: (cx / self.position_bucket).floor() as i64,
            y_bucket: (cy / self.position_bucket).floor() as i64,
            size_bucket: (detection.bbox.area() / self.size_bucket).floor() as i64,
        }
    }

    /// Advance the tracker by one tick and return the objects that became missing.
    ///
    /// The first tick only seeds the tracker.
    pub fn update(&mut self, detections: &[ObjectDetection], now: DateTime<Utc>) -> Vec<TrackedObject> {
        let current: HashMap<ObjectKey, TrackedObject> = detections
            .iter()
            .filter(|d| self.watched.contains(&d.label) && d.confidence >= self.min_confidence)
            .map(|d| {
                let key = self.key_for(d);
                let object = TrackedObject {
                    key: key.clone(),
                    class: d.label.clone(),
                    position: d.bbox.center(),
                    size: d.bbox.area(),
                    last_seen: now,
                };
                (key, object)
            })
            .collect();

        if !self.seeded {
            self.present = current;
            self.seeded = true;
            return Vec::new();
        }

        let previous = std::mem::replace(&mut self.present, current);
        for (key, object) in previous {
            if !self.present.contains_key(&key) {
                self.absent.insert(key, object);
            }
        }
        self.absent.retain(|key, _| !self.present.contains_key(key));

        let grace = self.grace_period;
        let mut missing: Vec<TrackedObject> = Vec::new();
        self.absent.retain(|_, object| {
            if now - object.last_seen > grace {
                missing.push(object.clone());
                false
            } else {
                true
            }
        });
        missing.sort_by(|a, b| a.key.cmp(&b.key));

        for object in &missing {
            tracing::debug!(object = %object.key, last_seen = %object.last_seen, "Tracked object missing");
        }
        missing
    }

    /// Objects present in the latest tick.
    pub fn present(&self) -> impl Iterator<Item = &TrackedObject> {
        self.present.values()
    }

    /// Objects out of view but not yet reported missing.
    pub fn absent_count(&self) -> usize {
        self.absent.len()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }
}

/// Summarize missing objects as a detection.
pub fn describe_missing(missing: &[TrackedObject]) -> Detection {
    if missing.is_empty() {
        return Detection::none();
    }
    let classes: BTreeSet<&str> = missing.iter().map(|o| o.class.as_str()).collect();
    let names: Vec<&str> = classes.into_iter().collect();
    Detection::positive(format!(
        "Potential theft detected: {} missing",
        names.join(", ")
    ))
}

/// Feeds object detections into an [`ObjectPresenceTracker`].
pub struct TheftPipeline {
    objects: Arc<dyn ObjectCapability>,
    tracker: ObjectPresenceTracker,
}

impl TheftPipeline {
    pub fn new(objects: Arc<dyn ObjectCapability>, config: &TheftConfig) -> Self {
        Self {
            objects,
            tracker: ObjectPresenceTracker::new(config),
        }
    }

    pub fn tracker(&self) -> &ObjectPresenceTracker {
        &self.tracker
    }
}

impl DetectionPipeline for TheftPipeline {
    type Sample = VideoFrame;

    fn kind(&self) -> AlertKind {
        AlertKind::ObjectTheft
    }

    fn evaluate(&mut self, frame: &VideoFrame) -> Result<Detection, DetectionError> {
        let detections = self.objects.detect(frame)?;
        let missing = self.tracker.update(&detections, frame.captured_at);
        Ok(describe_missing(&missing))
    }
}
