use super::FrameSink;
use crate::pipeline::types::StreamInfo;
use anyhow::{anyhow, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};

/// MPEG-4 (`mp4v`) writer matching the input's resolution and frame rate.
pub struct OpencvWriter {
    writer: VideoWriter,
    path: String,
}

impl OpencvWriter {
    pub fn create(path: &str, info: &StreamInfo) -> Result<Self> {
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path,
            fourcc,
            info.fps,
            Size::new(info.width, info.height),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(anyhow!("VideoWriter failed to open {}", path));
        }
        Ok(Self {
            writer,
            path: path.to_string(),
        })
    }
}

impl FrameSink for OpencvWriter {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        self.writer
            .write(frame)
            .map_err(|e| anyhow!("Failed to write frame to {}: {}", self.path, e))
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}
