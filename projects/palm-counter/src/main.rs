mod cli;
mod inference;
mod pipeline;
mod storage;
mod video;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use inference::Backends;
use pipeline::error::MediaKind;
use pipeline::image::detect_image;
use pipeline::types::DetectionResult;
use pipeline::video::detect_video;
use std::sync::Arc;
use storage::StorageLayout;
use tracing_subscriber::EnvFilter;
use video::processor::ProgressObserver;
use web::api::AppState;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();
    args.validate()?;

    let backends = Backends::new(&args.inference_url, args.model_path.as_deref())?;
    let layout = StorageLayout::new(&args.storage_root);

    match args.command() {
        Command::Serve => {
            let state = AppState {
                layout: Arc::new(layout),
                backends,
                video_settings: Arc::new(args.video_settings()),
                image_confidence: args.image_confidence,
                max_upload_mb: args.max_upload_mb,
                environment: args.environment.clone(),
            };
            run_server(args.host, args.port, state).await?;
        }
        Command::Video { input, output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| layout.output_dir(MediaKind::Video));
            let settings = args.video_settings();
            let tracker = backends.tracker.clone();

            let result = tokio::task::spawn_blocking(move || -> Result<DetectionResult> {
                let mut progress = ProgressObserver::new()?;
                let result =
                    detect_video(&input, &output_dir, tracker.as_ref(), &settings, &mut progress);
                progress.finish(result.count);
                Ok(result)
            })
            .await??;

            report(&result)?;
        }
        Command::Image { input, output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| layout.output_dir(MediaKind::Image));
            let detector = backends.detector.clone();
            let confidence = args.image_confidence;

            let result = tokio::task::spawn_blocking(move || {
                detect_image(&input, &output_dir, detector.as_ref(), confidence)
            })
            .await?;

            report(&result)?;
        }
    }

    Ok(())
}

/// Prints the result record; a failed run exits non-zero.
fn report(result: &DetectionResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if result.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{}",
            result.error.as_deref().unwrap_or("run failed")
        ))
    }
}
