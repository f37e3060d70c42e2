use crate::pipeline::types::StreamInfo;
use crate::pipeline::video::{FrameObserver, FrameResult};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Terminal progress bar for offline video runs.
pub struct ProgressObserver {
    pb: ProgressBar,
}

impl ProgressObserver {
    pub fn new() -> Result<Self> {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta}) {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { pb })
    }

    pub fn finish(&self, total_count: u64) {
        self.pb
            .finish_with_message(format!("Done, palm count {}", total_count));
    }
}

impl FrameObserver for ProgressObserver {
    fn on_start(&mut self, _info: &StreamInfo, frame_count_hint: Option<usize>) {
        if let Some(n) = frame_count_hint {
            self.pb.set_length(n as u64);
        }
    }

    fn on_frame(&mut self, result: &FrameResult) {
        self.pb.inc(1);
        self.pb.set_message(format!("count {}", result.running_count));
    }
}
