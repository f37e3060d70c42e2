// Detection record adapter: flattens raw tracker/detector output into records
//
// The inference side reports parallel arrays (boxes, confidences, optional
// identities). Nothing is filtered here; confidence gating belongs to the
// counter and the annotator.

use crate::inference::RawDetections;
use crate::pipeline::types::{BoxXyxy, DetectionRecord};

/// Converts one frame's raw output into ordered detection records.
///
/// Records keep the order of `raw.boxes`. A box without a matching identity
/// (no `id` array at all, or an `id` array shorter than `boxes`) gets
/// `track_id = None`. A box without a matching confidence is treated as
/// malformed and dropped, with a warning.
pub fn to_records(raw: &RawDetections) -> Vec<DetectionRecord> {
    if raw.conf.len() < raw.boxes.len() {
        tracing::warn!(
            "Inference output has {} boxes but only {} confidences; extra boxes ignored",
            raw.boxes.len(),
            raw.conf.len()
        );
    }

    raw.boxes
        .iter()
        .zip(raw.conf.iter())
        .enumerate()
        .map(|(i, (xyxy, &confidence))| DetectionRecord {
            bbox: BoxXyxy::from(*xyxy),
            confidence,
            track_id: raw.id.as_ref().and_then(|ids| ids.get(i).copied()),
        })
        .collect()
}

/// Image-path variant: every box is kept, a missing confidence reads as 0.
/// Identities are never carried.
pub fn to_image_records(raw: &RawDetections) -> Vec<DetectionRecord> {
    raw.boxes
        .iter()
        .enumerate()
        .map(|(i, xyxy)| DetectionRecord {
            bbox: BoxXyxy::from(*xyxy),
            confidence: raw.conf.get(i).copied().unwrap_or(0.0),
            track_id: None,
        })
        .collect()
}
