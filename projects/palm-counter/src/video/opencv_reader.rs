use super::{resolve_fps, FrameSource};
use crate::pipeline::types::StreamInfo;
use anyhow::{anyhow, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH,
    },
};

pub struct OpencvReader {
    capture: VideoCapture,
    info: StreamInfo,
    total_frames: usize,
    frames_read: usize,
}

impl OpencvReader {
    pub fn open(path: &str) -> Result<Self> {
        let capture = VideoCapture::from_file(path, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path));
        }

        let width = capture.get(CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(CAP_PROP_FRAME_HEIGHT)? as i32;
        let fps = resolve_fps(capture.get(CAP_PROP_FPS)?);
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT)? as usize;

        tracing::info!(
            "OpencvReader: opened {}, {}x{}, fps={:.2}, stream_frames={}",
            path,
            width,
            height,
            fps,
            raw_count
        );

        Ok(Self {
            capture,
            info: StreamInfo { width, height, fps },
            total_frames: raw_count,
            frames_read: 0,
        })
    }
}

impl FrameSource for OpencvReader {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn frame_count_hint(&self) -> Option<usize> {
        (self.total_frames > 0).then_some(self.total_frames)
    }

    fn next_frame(&mut self) -> Option<Mat> {
        let mut frame = Mat::default();
        match self.capture.read(&mut frame) {
            Ok(true) if !frame.empty() => {
                self.frames_read += 1;
                Some(frame)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    "OpencvReader: decode failed after {} frames: {}",
                    self.frames_read,
                    e
                );
                None
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}
