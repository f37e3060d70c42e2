use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Image => write!(f, "image"),
        }
    }
}

/// Failures that end a run. Per-frame detector failures are absorbed by the
/// video pipeline and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not open {kind}")]
    InputOpen {
        kind: MediaKind,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Detector failed: {0}")]
    Detector(#[source] anyhow::Error),

    #[error("Could not write output {path}")]
    OutputWrite {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}
