// Bindings to the object detector / tracker.
//
// The pipelines only see these traits. Handles are built once at startup and
// shared; per-run tracker state lives in a `TrackSession`.

pub mod local;
pub mod remote;

use anyhow::{Context, Result};
use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Raw per-frame output, in the tracker's parallel-array layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetections {
    /// `[x1, y1, x2, y2]` in frame pixels
    #[serde(default)]
    pub boxes: Vec<[f32; 4]>,
    #[serde(default)]
    pub conf: Vec<f32>,
    /// Absent when the tracker has no identities for this frame
    #[serde(default)]
    pub id: Option<Vec<i64>>,
}

/// Tracker call parameters. Passed through to the tracker as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackParams {
    pub confidence_floor: f32,
    pub iou_threshold: f32,
    pub tracker_config: String,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            confidence_floor: 0.1,
            iou_threshold: 0.5,
            tracker_config: "botsort.yaml".to_string(),
        }
    }
}

/// Identity-preserving tracking state for one video run.
pub trait TrackSession: Send {
    /// Detects and tracks objects in the next frame of the run.
    fn track(&mut self, frame: &Mat) -> Result<RawDetections>;

    /// Releases tracker state held for this run.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait Tracker: Send + Sync {
    /// Starts a fresh session; identities never leak between sessions.
    fn start_session(&self, params: &TrackParams) -> Result<Box<dyn TrackSession>>;
}

/// Stateless single-image detection. Results carry no identities.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &Mat, confidence_floor: f32) -> Result<RawDetections>;
}

/// Process-wide inference handles, built once and shared by all runs.
#[derive(Clone)]
pub struct Backends {
    pub tracker: Arc<dyn Tracker>,
    pub detector: Arc<dyn Detector>,
}

impl Backends {
    /// Tracking always goes to the inference service. Image detection runs
    /// in-process when a local model is given, remotely otherwise.
    pub fn new(inference_url: &str, local_model: Option<&str>) -> Result<Self> {
        let remote = remote::RemoteInference::new(inference_url);
        tracing::info!("Inference service at {}", remote.endpoint());

        let detector: Arc<dyn Detector> = match local_model {
            Some(model_path) => Arc::new(
                local::LocalDetector::new(model_path)
                    .with_context(|| format!("Failed to load model: {}", model_path))?,
            ),
            None => Arc::new(remote.clone()),
        };

        Ok(Self {
            tracker: Arc::new(remote),
            detector,
        })
    }
}
