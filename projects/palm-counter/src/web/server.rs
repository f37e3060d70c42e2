use crate::pipeline::error::MediaKind;
use crate::web::api::{
    detect_image_handler, detect_video_handler, health_handler, index_handler, AppState,
};
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_mb * 1024 * 1024;
    let images = ServeDir::new(state.layout.output_dir(MediaKind::Image));
    let videos = ServeDir::new(state.layout.output_dir(MediaKind::Video));

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/detect/image", post(detect_image_handler))
        .route("/detect/video", post(detect_video_handler))
        .nest_service("/outputs/images", images)
        .nest_service("/outputs/videos", videos)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(host: IpAddr, port: u16, state: AppState) -> Result<()> {
    state.layout.ensure_dirs()?;

    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Must be non-blocking before tokio takes it over
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let app = build_router(state);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Palm counter API listening on http://{}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
