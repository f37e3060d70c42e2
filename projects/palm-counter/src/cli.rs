use crate::inference::TrackParams;
use crate::pipeline::counter::DEFAULT_MIN_CONFIDENCE;
use crate::pipeline::image::DEFAULT_IMAGE_CONFIDENCE;
use crate::pipeline::video::VideoSettings;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Palm tree detection and zone-crossing counter", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Root directory holding uploads/ and outputs/
    #[arg(long, global = true, env = "PALM_COUNTER_STORAGE_ROOT", default_value = ".")]
    pub storage_root: PathBuf,

    /// Base URL of the detector/tracker inference service
    #[arg(
        long,
        global = true,
        env = "PALM_COUNTER_INFERENCE_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    pub inference_url: String,

    /// Local RT-DETR model for image detection (remote service when unset)
    #[arg(long, global = true, env = "PALM_COUNTER_MODEL_PATH")]
    pub model_path: Option<String>,

    /// Top of the counting gate, as a fraction of frame height
    #[arg(long, global = true, default_value_t = 0.70)]
    pub gate_top: f64,

    /// Bottom of the counting gate, as a fraction of frame height
    #[arg(long, global = true, default_value_t = 0.85)]
    pub gate_bottom: f64,

    /// Minimum confidence for a video detection to count or be drawn
    #[arg(long, global = true, default_value_t = DEFAULT_MIN_CONFIDENCE)]
    pub min_confidence: f32,

    /// Confidence floor passed to the tracker
    #[arg(long, global = true, default_value_t = 0.1)]
    pub track_confidence: f32,

    /// IOU threshold passed to the tracker
    #[arg(long, global = true, default_value_t = 0.5)]
    pub iou: f32,

    /// Tracker profile passed to the tracker
    #[arg(long, global = true, default_value = "botsort.yaml")]
    pub tracker_config: String,

    /// Confidence floor passed to the detector on the image path
    #[arg(long, global = true, default_value_t = DEFAULT_IMAGE_CONFIDENCE)]
    pub image_confidence: f32,

    /// Host to bind to
    #[arg(long, global = true, env = "PALM_COUNTER_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, global = true, env = "PALM_COUNTER_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Largest accepted upload, in MiB
    #[arg(long, global = true, env = "PALM_COUNTER_MAX_UPLOAD_MB", default_value_t = 32)]
    pub max_upload_mb: usize,

    /// Deployment label reported by /health
    #[arg(long, global = true, env = "PALM_COUNTER_ENV", default_value = "development")]
    pub environment: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Count palms in one video file
    Video {
        input: PathBuf,
        /// Defaults to <storage-root>/outputs/videos
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Detect palms in one image file
    Image {
        input: PathBuf,
        /// Defaults to <storage-root>/outputs/images
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Subcommand to run; serving when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.gate_top)
            || !(0.0..=1.0).contains(&self.gate_bottom)
            || self.gate_top >= self.gate_bottom
        {
            anyhow::bail!(
                "Invalid gate fractions: top={} bottom={} (need 0 <= top < bottom <= 1)",
                self.gate_top,
                self.gate_bottom
            );
        }
        Ok(())
    }

    pub fn video_settings(&self) -> VideoSettings {
        VideoSettings {
            gate_top_fraction: self.gate_top,
            gate_bottom_fraction: self.gate_bottom,
            min_confidence: self.min_confidence,
            track_params: TrackParams {
                confidence_floor: self.track_confidence,
                iou_threshold: self.iou,
                tracker_config: self.tracker_config.clone(),
            },
        }
    }
}
