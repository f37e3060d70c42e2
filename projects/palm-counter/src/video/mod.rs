pub mod opencv_reader;
pub mod opencv_writer;
pub mod processor;

use crate::pipeline::types::StreamInfo;
use anyhow::Result;
use opencv::core::Mat;

/// Fallback when the container does not report a frame rate.
pub const DEFAULT_FPS: f64 = 25.0;

/// Container frame rate, or `DEFAULT_FPS` when it is missing or nonsensical.
pub fn resolve_fps(reported: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        tracing::warn!(
            "Container reports fps {}, falling back to {}",
            reported,
            DEFAULT_FPS
        );
        DEFAULT_FPS
    }
}

/// Decoded input stream.
pub trait FrameSource {
    fn info(&self) -> StreamInfo;
    /// Container-reported frame count, if any.
    fn frame_count_hint(&self) -> Option<usize> {
        None
    }
    /// Next decoded frame, `None` at end of stream or on a decode failure.
    fn next_frame(&mut self) -> Option<Mat>;
    fn close(&mut self) -> Result<()>;
}

/// Encoded output stream.
pub trait FrameSink {
    fn write(&mut self, frame: &Mat) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}
