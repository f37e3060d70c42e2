// Zone-crossing counter
//
// Counts each track identity at most once, on the first frame its centroid
// lies strictly inside the gate band with confidence at or above the floor.

use crate::pipeline::types::{CounterState, DetectionRecord, GateRegion, TrackState};

/// Detections below this confidence neither count nor get drawn in video runs.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// Owns the counting state of one video run.
#[derive(Debug)]
pub struct ZoneCounter {
    state: CounterState,
    min_confidence: f32,
}

impl Default for ZoneCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl ZoneCounter {
    pub fn new(min_confidence: f32) -> Self {
        Self {
            state: CounterState::default(),
            min_confidence,
        }
    }

    /// Whether a detection passes the confidence gate.
    pub fn is_confident(&self, detection: &DetectionRecord) -> bool {
        detection.confidence >= self.min_confidence
    }

    pub fn total_count(&self) -> u64 {
        self.state.total_count
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }

    /// Feeds one frame of detections, in order, and returns the updated state.
    pub fn observe(&mut self, frame_detections: &[DetectionRecord], gate: &GateRegion) -> &CounterState {
        for detection in frame_detections {
            if !self.is_confident(detection) {
                continue;
            }
            let Some(track_id) = detection.track_id else {
                continue;
            };

            let cy = detection.bbox.to_pixels().centroid_y();
            let entry = self.state.seen.entry(track_id).or_insert(TrackState {
                track_id,
                counted: false,
            });

            if !entry.counted && gate.contains_row(cy) {
                entry.counted = true;
                self.state.total_count += 1;
                tracing::debug!(
                    track_id,
                    cy,
                    total = self.state.total_count,
                    "Track crossed gate"
                );
            }
        }

        &self.state
    }
}
