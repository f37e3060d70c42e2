use super::{Detector, RawDetections, TrackParams, TrackSession, Tracker};
use anyhow::{anyhow, Context, Result};
use opencv::core::{Mat, Vector, VectorToVec};
use opencv::imgcodecs;

/// Client of an HTTP inference service hosting the detector and tracker.
///
/// Frames travel as JPEG bodies; replies are `RawDetections` JSON. Calls are
/// blocking and carry no timeout of their own.
#[derive(Clone)]
pub struct RemoteInference {
    agent: ureq::Agent,
    endpoint: String,
}

impl RemoteInference {
    pub fn new(endpoint: &str) -> Self {
        Self {
            agent: ureq::Agent::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post_frame(&self, request: ureq::Request, frame: &Mat) -> Result<RawDetections> {
        let body = encode_jpeg(frame)?;
        let response = request
            .set("Content-Type", "image/jpeg")
            .send_bytes(&body)
            .map_err(|e| anyhow!("Inference request failed: {}", e))?;
        let detections: RawDetections = response
            .into_json()
            .context("Malformed inference response")?;
        Ok(detections)
    }
}

fn encode_jpeg(frame: &Mat) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    if !imgcodecs::imencode(".jpg", frame, &mut buf, &Vector::new())? {
        return Err(anyhow!("Failed to JPEG-encode frame"));
    }
    Ok(buf.to_vec())
}

impl Tracker for RemoteInference {
    fn start_session(&self, params: &TrackParams) -> Result<Box<dyn TrackSession>> {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("Opening tracker session {} at {}", session_id, self.endpoint);
        Ok(Box::new(RemoteSession {
            client: self.clone(),
            session_id,
            params: params.clone(),
        }))
    }
}

impl Detector for RemoteInference {
    fn detect(&self, image: &Mat, confidence_floor: f32) -> Result<RawDetections> {
        let request = self
            .agent
            .post(&format!("{}/detect", self.endpoint))
            .query("conf", &confidence_floor.to_string());
        let mut detections = self.post_frame(request, image)?;
        // The image path never carries identities
        detections.id = None;
        Ok(detections)
    }
}

pub struct RemoteSession {
    client: RemoteInference,
    session_id: String,
    params: TrackParams,
}

impl RemoteSession {
    fn track_request(&self) -> ureq::Request {
        self.client
            .agent
            .post(&format!("{}/track", self.client.endpoint))
            .query("session", &self.session_id)
            .query("persist", "true")
            .query("conf", &self.params.confidence_floor.to_string())
            .query("iou", &self.params.iou_threshold.to_string())
            .query("tracker", &self.params.tracker_config)
    }
}

impl TrackSession for RemoteSession {
    fn track(&mut self, frame: &Mat) -> Result<RawDetections> {
        let request = self.track_request();
        self.client.post_frame(request, frame)
    }

    fn close(&mut self) -> Result<()> {
        let url = format!(
            "{}/track/{}/close",
            self.client.endpoint, self.session_id
        );
        self.client
            .agent
            .post(&url)
            .call()
            .map_err(|e| anyhow!("Failed to close tracker session {}: {}", self.session_id, e))?;
        Ok(())
    }
}
