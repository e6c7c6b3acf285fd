//! Physical contact heuristic.
//!
//! Two people are flagged when all of the following hold:
//! 1. Their shoulders/hips come within `proximity_px` of each other
//! 2. Their trunks point in opposite directions (facing each other)
//! 3. A wrist of one is within `contact_px` of the other's torso
//!
//! Distances are raw frame pixels, so thresholds depend on camera resolution
//! and distance to the subjects.

use crate::alerts::AlertKind;
use crate::capture::VideoFrame;
use crate::config::ContactConfig;
use crate::detection::{Detection, DetectionError, DetectionPipeline, PersonPose, PoseCapability};
use std::sync::Arc;

// COCO keypoint indices
pub const LEFT_SHOULDER: usize = 5;
pub const RIGHT_SHOULDER: usize = 6;
pub const LEFT_WRIST: usize = 9;
pub const RIGHT_WRIST: usize = 10;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;

const TORSO: [usize; 4] = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP];
const WRISTS: [usize; 2] = [LEFT_WRIST, RIGHT_WRIST];

/// Check every pair of people for physical contact.
pub fn check_contact(people: &[PersonPose], config: &ContactConfig) -> Detection {
    for (i, first) in people.iter().enumerate() {
        for second in &people[i + 1..] {
            let Some(distance) = minimum_torso_distance(first, second, config.min_confidence)
            else {
                continue;
            };
            if distance >= config.proximity_px {
                continue;
            }
            if !facing_each_other(first, second) {
                continue;
            }
            if wrist_on_torso(first, second, config) || wrist_on_torso(second, first, config) {
                return Detection::positive(
                    "Detected inappropriate physical contact between people",
                );
            }
        }
    }
    Detection::none()
}

/// Smallest distance between confident shoulder/hip landmarks of two people.
fn minimum_torso_distance(a: &PersonPose, b: &PersonPose, min_confidence: f32) -> Option<f32> {
    let mut minimum: Option<f32> = None;
    for &ia in &TORSO {
        let Some(pa) = a.confident(ia, min_confidence) else {
            continue;
        };
        for &ib in &TORSO {
            let Some(pb) = b.confident(ib, min_confidence) else {
                continue;
            };
            let d = pa.distance(pb);
            minimum = Some(minimum.map_or(d, |m| m.min(d)));
        }
    }
    minimum
}

/// Unit vector from hip midpoint to shoulder midpoint.
fn trunk_direction(person: &PersonPose) -> Option<(f32, f32)> {
    let point = |i: usize| person.keypoints.get(i);
    let (ls, rs) = (point(LEFT_SHOULDER)?, point(RIGHT_SHOULDER)?);
    let (lh, rh) = (point(LEFT_HIP)?, point(RIGHT_HIP)?);

    let dx = (ls.x + rs.x) / 2.0 - (lh.x + rh.x) / 2.0;
    let dy = (ls.y + rs.y) / 2.0 - (lh.y + rh.y) / 2.0;
    let norm = (dx * dx + dy * dy).sqrt();
    if norm <= f32::EPSILON {
        return None;
    }
    Some((dx / norm, dy / norm))
}

fn facing_each_other(a: &PersonPose, b: &PersonPose) -> bool {
    match (trunk_direction(a), trunk_direction(b)) {
        (Some(da), Some(db)) => da.0 * db.0 + da.1 * db.1 < 0.0,
        _ => false,
    }
}

/// Whether a confident wrist of `toucher` is close to a confident torso landmark of `touched`.
fn wrist_on_torso(toucher: &PersonPose, touched: &PersonPose, config: &ContactConfig) -> bool {
    WRISTS
        .iter()
        .filter_map(|&w| toucher.confident(w, config.min_confidence))
        .any(|wrist| {
            TORSO
                .iter()
                .filter_map(|&t| touched.confident(t, config.min_confidence))
                .any(|body| wrist.distance(body) < config.contact_px)
        })
}

/// Runs the contact heuristic on poses from a [`PoseCapability`].
pub struct ContactPipeline {
    pose: Arc<dyn PoseCapability>,
    config: ContactConfig,
}

impl ContactPipeline {
    pub fn new(pose: Arc<dyn PoseCapability>, config: ContactConfig) -> Self {
        Self { pose, config }
    }
}

impl DetectionPipeline for ContactPipeline {
    type Sample = VideoFrame;

    fn kind(&self) -> AlertKind {
        AlertKind::InappropriateContact
    }

    fn evaluate(&mut self, frame: &VideoFrame) -> Result<Detection, DetectionError> {
        let people = self.pose.detect(frame)?;
        if people.len() < 2 {
            return Ok(Detection::none());
        }
        Ok(check_contact(&people, &self.config))
    }
}
