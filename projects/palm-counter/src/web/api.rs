use crate::inference::Backends;
use crate::pipeline::error::MediaKind;
use crate::pipeline::image::detect_image;
use crate::pipeline::types::DetectionResult;
use crate::pipeline::video::{detect_video, FrameResult, VideoSettings};
use crate::storage::{is_allowed, save_upload, StorageLayout};
use axum::{
    extract::{multipart::MultipartError, Host, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Shared by every request. Each run still builds its own counter and gate.
#[derive(Clone)]
pub struct AppState {
    pub layout: Arc<StorageLayout>,
    pub backends: Backends,
    pub video_settings: Arc<VideoSettings>,
    pub image_confidence: f32,
    pub max_upload_mb: usize,
    /// Reported by /health
    pub environment: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    TooLarge(usize),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TooLarge(mb) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File too large (max {}MB)", mb),
            ),
            ApiError::Internal(e) => {
                tracing::error!("Request failed: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize, Debug)]
pub struct DetectionResponse {
    #[serde(flatten)]
    pub result: DetectionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
}

pub async fn index_handler() -> Json<serde_json::Value> {
    Json(json!({
        "project": "Palm Tree Detection API",
        "status": "Online",
        "endpoints": {
            "health": "/health",
            "image": "/detect/image",
            "video": "/detect/video",
            "outputs": "/outputs/<file>"
        }
    }))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "Backend running",
        "environment": state.environment,
    }))
}

pub async fn detect_image_handler(
    State(state): State<AppState>,
    Host(host): Host,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DetectionResponse>), ApiError> {
    let (filename, data) = read_upload(&mut multipart, "image", state.max_upload_mb)
        .await?
        .ok_or_else(|| ApiError::BadRequest("No image file provided".to_string()))?;
    if !is_allowed(MediaKind::Image, &filename) {
        return Err(ApiError::BadRequest(format!("Unsupported image type: {}", filename)));
    }

    let upload_dir = state.layout.upload_dir(MediaKind::Image);
    let output_dir = state.layout.output_dir(MediaKind::Image);
    let detector = state.backends.detector.clone();
    let confidence = state.image_confidence;

    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<DetectionResult> {
        let input = save_upload(&upload_dir, &filename, &data)?;
        Ok(detect_image(&input, &output_dir, detector.as_ref(), confidence))
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?;

    Ok(respond(result, &host, MediaKind::Image))
}

pub async fn detect_video_handler(
    State(state): State<AppState>,
    Host(host): Host,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DetectionResponse>), ApiError> {
    let (filename, data) = read_upload(&mut multipart, "video", state.max_upload_mb)
        .await?
        .ok_or_else(|| ApiError::BadRequest("No video file provided".to_string()))?;
    if !is_allowed(MediaKind::Video, &filename) {
        return Err(ApiError::BadRequest(format!("Unsupported video type: {}", filename)));
    }

    let upload_dir = state.layout.upload_dir(MediaKind::Video);
    let output_dir = state.layout.output_dir(MediaKind::Video);
    let tracker = state.backends.tracker.clone();
    let settings = state.video_settings.clone();

    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<DetectionResult> {
        let input = save_upload(&upload_dir, &filename, &data)?;
        Ok(detect_video(
            &input,
            &output_dir,
            tracker.as_ref(),
            &settings,
            &mut |_: &FrameResult| {},
        ))
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?;

    Ok(respond(result, &host, MediaKind::Video))
}

/// Reads the named file field, skipping any others.
async fn read_upload(
    multipart: &mut Multipart,
    field_name: &str,
    max_upload_mb: usize,
) -> Result<Option<(String, Vec<u8>)>, ApiError> {
    let upload_err = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::TooLarge(max_upload_mb)
        } else {
            ApiError::BadRequest(e.body_text())
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(upload_err)? {
        if field.name() != Some(field_name) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Ok(None);
        }
        let data = field.bytes().await.map_err(upload_err)?;
        return Ok(Some((filename, data.to_vec())));
    }
    Ok(None)
}

/// 200 with a public URL when an output exists, 500 with the bare record otherwise.
fn respond(result: DetectionResult, host: &str, kind: MediaKind) -> (StatusCode, Json<DetectionResponse>) {
    let file_name = result
        .output_path
        .as_deref()
        .and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_string_lossy().to_string());

    match file_name {
        Some(name) => {
            let route = match kind {
                MediaKind::Image => "images",
                MediaKind::Video => "videos",
            };
            let output_url = format!("http://{}/outputs/{}/{}", host, route, name);
            (
                StatusCode::OK,
                Json(DetectionResponse {
                    result,
                    output_url: Some(output_url),
                }),
            )
        }
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(DetectionResponse {
                result,
                output_url: None,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::remote::RemoteInference;

    #[test]
    fn test_respond_success_builds_public_url() {
        let result = DetectionResult::success(3, "/srv/outputs/videos/abc.mp4".to_string());
        let (status, Json(body)) = respond(result, "10.0.0.2:5000", MediaKind::Video);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.output_url.as_deref(),
            Some("http://10.0.0.2:5000/outputs/videos/abc.mp4")
        );

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["output_path"], "/srv/outputs/videos/abc.mp4");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_respond_failure_is_500_without_url() {
        let result = DetectionResult::failure("Could not open video");
        let (status, Json(body)) = respond(result, "localhost", MediaKind::Video);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            json!({"count": 0, "output_path": null, "error": "Could not open video"})
        );
    }

    #[test]
    fn test_error_statuses() {
        let missing = ApiError::BadRequest("No image file provided".to_string()).into_response();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        let big = ApiError::TooLarge(32).into_response();
        assert_eq!(big.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    fn test_state(environment: &str) -> AppState {
        let remote = RemoteInference::new("http://127.0.0.1:9");
        AppState {
            layout: Arc::new(StorageLayout::new("/tmp/palm-counter-test")),
            backends: Backends {
                tracker: Arc::new(remote.clone()),
                detector: Arc::new(remote),
            },
            video_settings: Arc::new(VideoSettings::default()),
            image_confidence: 0.3,
            max_upload_mb: 32,
            environment: environment.to_string(),
        }
    }

    #[tokio::test]
    async fn test_health_reports_configured_environment() {
        let Json(body) = health_handler(State(test_state("production"))).await;
        assert_eq!(body["status"], "Backend running");
        assert_eq!(body["environment"], "production");
    }

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let Json(body) = index_handler().await;
        assert_eq!(body["endpoints"]["video"], "/detect/video");
    }
}
