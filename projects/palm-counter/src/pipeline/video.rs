// Video pipeline: decode -> track -> count -> annotate -> encode
//
// One run walks Opening -> Streaming -> Closing. Frames are processed strictly
// in order with a single frame in flight. Input, output and the tracker
// session are released on every exit path.

use crate::inference::{RawDetections, TrackParams, TrackSession, Tracker};
use crate::pipeline::adapter::to_records;
use crate::pipeline::annotate::{draw_video_overlay, plan_boxes, BoxOverlay};
use crate::pipeline::counter::{ZoneCounter, DEFAULT_MIN_CONFIDENCE};
use crate::pipeline::error::{MediaKind, PipelineError};
use crate::pipeline::types::{DetectionResult, GateRegion, StreamInfo};
use crate::video::opencv_reader::OpencvReader;
use crate::video::opencv_writer::OpencvWriter;
use crate::video::{FrameSink, FrameSource};
use opencv::core::Mat;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    pub gate_top_fraction: f64,
    pub gate_bottom_fraction: f64,
    pub min_confidence: f32,
    pub track_params: TrackParams,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            gate_top_fraction: 0.70,
            gate_bottom_fraction: 0.85,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            track_params: TrackParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Opening,
    Streaming,
    Closing,
}

/// One processed frame, handed to observers after it reached the sink.
pub struct FrameResult<'a> {
    /// 1-based
    pub index: usize,
    pub annotated_frame: &'a Mat,
    pub running_count: u64,
    pub boxes: &'a [BoxOverlay],
}

/// Receives per-frame progress from a video run.
pub trait FrameObserver {
    fn on_start(&mut self, _info: &StreamInfo, _frame_count_hint: Option<usize>) {}
    fn on_frame(&mut self, result: &FrameResult);
}

/// Any closure taking a `FrameResult` is an observer.
impl<F> FrameObserver for F
where
    F: FnMut(&FrameResult),
{
    fn on_frame(&mut self, result: &FrameResult) {
        self(result)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total_count: u64,
    pub frames: usize,
    pub gate: GateRegion,
    pub info: StreamInfo,
}

pub struct VideoPipeline<'a> {
    tracker: &'a dyn Tracker,
    settings: &'a VideoSettings,
}

fn enter(phase: RunPhase, path: &str) {
    tracing::debug!("{:?}: {}", phase, path);
}

impl<'a> VideoPipeline<'a> {
    pub fn new(tracker: &'a dyn Tracker, settings: &'a VideoSettings) -> Self {
        Self { tracker, settings }
    }

    /// Processes `input` into an annotated video at `output`.
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        observer: &mut dyn FrameObserver,
    ) -> Result<RunSummary, PipelineError> {
        let input_str = input.to_string_lossy().to_string();
        let output_str = output.to_string_lossy().to_string();
        enter(RunPhase::Opening, &input_str);

        let mut source =
            OpencvReader::open(&input_str).map_err(|source| PipelineError::InputOpen {
                kind: MediaKind::Video,
                path: input_str.clone(),
                source,
            })?;

        let sink = output
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .map_err(anyhow::Error::from)
            .and_then(|_| OpencvWriter::create(&output_str, &source.info()));
        let mut sink = match sink {
            Ok(sink) => sink,
            Err(source_err) => {
                if let Err(e) = source.close() {
                    tracing::warn!("Failed to release input {}: {}", input_str, e);
                }
                return Err(PipelineError::OutputWrite {
                    path: output_str,
                    source: source_err,
                });
            }
        };

        self.run_stream(&mut source, &mut sink, &output_str, observer)
    }

    /// Runs Streaming and Closing over already-opened endpoints.
    /// Both endpoints are closed before returning, whatever the outcome.
    pub fn run_stream(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        output_label: &str,
        observer: &mut dyn FrameObserver,
    ) -> Result<RunSummary, PipelineError> {
        let info = source.info();
        let gate = GateRegion::from_frame_height(
            info.height,
            self.settings.gate_top_fraction,
            self.settings.gate_bottom_fraction,
        );
        tracing::info!(
            "Counting {}x{} @ {:.2} fps, gate rows ({}, {})",
            info.width,
            info.height,
            info.fps,
            gate.top,
            gate.bottom
        );

        let mut session = match self.tracker.start_session(&self.settings.track_params) {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = close_endpoints(source, sink, output_label) {
                    tracing::warn!("Failed to finalize {}: {:#}", output_label, close_err);
                }
                return Err(PipelineError::Detector(e));
            }
        };

        observer.on_start(&info, source.frame_count_hint());
        let mut counter = ZoneCounter::new(self.settings.min_confidence);

        enter(RunPhase::Streaming, output_label);
        let start = Instant::now();
        let streamed = stream_frames(
            source,
            sink,
            session.as_mut(),
            &mut counter,
            &gate,
            &info,
            output_label,
            observer,
        );

        enter(RunPhase::Closing, output_label);
        if let Err(e) = session.close() {
            tracing::warn!("Tracker session close failed: {:#}", e);
        }
        let finished = close_endpoints(source, sink, output_label);

        let frames = streamed?;
        finished.map_err(|source| PipelineError::OutputWrite {
            path: output_label.to_string(),
            source,
        })?;

        tracing::info!(
            "Finished {}: {} frames in {:.1}s, palm count {}",
            output_label,
            frames,
            start.elapsed().as_secs_f64(),
            counter.total_count()
        );

        Ok(RunSummary {
            total_count: counter.total_count(),
            frames,
            gate,
            info,
        })
    }
}

/// Releases input then output. Input errors are logged, output errors returned.
fn close_endpoints(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    output_label: &str,
) -> anyhow::Result<()> {
    if let Err(e) = source.close() {
        tracing::warn!("Failed to release input for {}: {:#}", output_label, e);
    }
    sink.finish()
}

#[allow(clippy::too_many_arguments)]
fn stream_frames(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    session: &mut dyn TrackSession,
    counter: &mut ZoneCounter,
    gate: &GateRegion,
    info: &StreamInfo,
    output_label: &str,
    observer: &mut dyn FrameObserver,
) -> Result<usize, PipelineError> {
    let mut index = 0;

    while let Some(mut frame) = source.next_frame() {
        index += 1;

        let raw = session.track(&frame).unwrap_or_else(|e| {
            tracing::warn!("Frame {}: tracker failed, treating as empty: {:#}", index, e);
            RawDetections::default()
        });
        let records = to_records(&raw);
        counter.observe(&records, gate);

        let boxes = plan_boxes(&records, counter);
        if let Err(e) = draw_video_overlay(&mut frame, &boxes, gate, info.width, counter.total_count())
        {
            tracing::warn!("Frame {}: annotation failed: {:#}", index, e);
        }

        sink.write(&frame)
            .map_err(|source| PipelineError::OutputWrite {
                path: output_label.to_string(),
                source,
            })?;

        observer.on_frame(&FrameResult {
            index,
            annotated_frame: &frame,
            running_count: counter.total_count(),
            boxes: &boxes,
        });
    }

    Ok(index)
}

/// Output file for an input: same base name, under `output_dir`.
pub fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    match input.file_name() {
        Some(name) => output_dir.join(name),
        None => output_dir.join("output.mp4"),
    }
}

/// Runs one video and folds the outcome into the caller-facing record.
pub fn detect_video(
    input: &Path,
    output_dir: &Path,
    tracker: &dyn Tracker,
    settings: &VideoSettings,
    observer: &mut dyn FrameObserver,
) -> DetectionResult {
    let output = output_path_for(input, output_dir);
    match VideoPipeline::new(tracker, settings).run(input, &output, observer) {
        Ok(summary) => {
            tracing::info!(
                "{}: {} frames at {}x{} ({:.1} fps), gate rows {}..{}, palm count {}",
                input.display(),
                summary.frames,
                summary.info.width,
                summary.info.height,
                summary.info.fps,
                summary.gate.top,
                summary.gate.bottom,
                summary.total_count
            );
            DetectionResult::success(summary.total_count, output.to_string_lossy().to_string())
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(
                "Video run for {} failed: {:#}",
                input.display(),
                anyhow::Error::from(e)
            );
            DetectionResult::failure(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::annotate::BoxStyle;
    use anyhow::{anyhow, Result};
    use opencv::core::{Scalar, Vec3b, CV_8UC3};
    use opencv::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const W: i32 = 200;
    const H: i32 = 100; // gate rows (70, 85)

    struct VecSource {
        frames: VecDeque<Mat>,
        info: StreamInfo,
        closed: bool,
    }

    impl VecSource {
        fn blank(n: usize) -> Self {
            let frames = (0..n)
                .map(|_| Mat::new_rows_cols_with_default(H, W, CV_8UC3, Scalar::all(0.0)).unwrap())
                .collect();
            Self {
                frames,
                info: StreamInfo {
                    width: W,
                    height: H,
                    fps: 25.0,
                },
                closed: false,
            }
        }
    }

    impl FrameSource for VecSource {
        fn info(&self) -> StreamInfo {
            self.info
        }
        fn frame_count_hint(&self) -> Option<usize> {
            Some(self.frames.len())
        }
        fn next_frame(&mut self) -> Option<Mat> {
            self.frames.pop_front()
        }
        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Mat>,
        fail_at: Option<usize>,
        finished: bool,
    }

    impl FrameSink for RecordingSink {
        fn write(&mut self, frame: &Mat) -> Result<()> {
            if self.fail_at == Some(self.frames.len() + 1) {
                return Err(anyhow!("disk full"));
            }
            self.frames.push(frame.clone());
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    type Script = fn(usize) -> Result<RawDetections>;

    struct ScriptedTracker {
        script: Script,
        closed_sessions: Arc<AtomicUsize>,
    }

    impl ScriptedTracker {
        fn new(script: Script) -> Self {
            Self {
                script,
                closed_sessions: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ScriptedSession {
        script: Script,
        frame: usize,
        closed: Arc<AtomicUsize>,
    }

    impl Tracker for ScriptedTracker {
        fn start_session(&self, _params: &TrackParams) -> Result<Box<dyn TrackSession>> {
            Ok(Box::new(ScriptedSession {
                script: self.script,
                frame: 0,
                closed: self.closed_sessions.clone(),
            }))
        }
    }

    impl TrackSession for ScriptedSession {
        fn track(&mut self, _frame: &Mat) -> Result<RawDetections> {
            self.frame += 1;
            (self.script)(self.frame)
        }
        fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn one_track(cy: f32, conf: f32) -> RawDetections {
        RawDetections {
            boxes: vec![[20.0, cy - 5.0, 60.0, cy + 5.0]],
            conf: vec![conf],
            id: Some(vec![1]),
        }
    }

    /// Track 1 sits above the gate until frame 10, then inside it.
    fn crossing_at_ten(frame: usize) -> Result<RawDetections> {
        let cy = if frame < 10 { 40.0 } else { 77.0 };
        Ok(one_track(cy, 0.5))
    }

    fn nothing(_frame: usize) -> Result<RawDetections> {
        Ok(RawDetections::default())
    }

    fn pixel(mat: &Mat, row: i32, col: i32) -> [u8; 3] {
        let v = mat.at_2d::<Vec3b>(row, col).unwrap();
        [v[0], v[1], v[2]]
    }

    #[test]
    fn test_track_crossing_mid_video() {
        let tracker = ScriptedTracker::new(crossing_at_ten);
        let settings = VideoSettings::default();
        let mut source = VecSource::blank(30);
        let mut sink = RecordingSink::default();
        let mut styles = Vec::new();
        let mut observer = |r: &FrameResult| {
            assert_eq!(r.boxes.len(), 1);
            assert_eq!(r.annotated_frame.cols(), W);
            styles.push((r.index, r.boxes[0].style, r.running_count));
        };

        let summary = VideoPipeline::new(&tracker, &settings)
            .run_stream(&mut source, &mut sink, "mem", &mut observer)
            .unwrap();

        assert_eq!(summary.total_count, 1);
        assert_eq!(summary.frames, 30);
        assert_eq!(styles.len(), 30);
        for (index, style, count) in styles {
            if index < 10 {
                assert_eq!(style, BoxStyle::Uncounted, "frame {}", index);
                assert_eq!(count, 0);
            } else {
                assert_eq!(style, BoxStyle::Counted, "frame {}", index);
                assert_eq!(count, 1);
            }
        }

        // Left box edge on the written frames: blue before, green after
        assert_eq!(pixel(&sink.frames[8], 40, 20), [255, 0, 0]);
        assert_eq!(pixel(&sink.frames[9], 77, 20), [0, 255, 0]);
        assert!(source.closed);
        assert!(sink.finished);
        assert_eq!(tracker.closed_sessions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_video_keeps_every_frame() {
        let tracker = ScriptedTracker::new(nothing);
        let settings = VideoSettings::default();
        let mut source = VecSource::blank(12);
        let mut sink = RecordingSink::default();
        let mut counts = Vec::new();
        let mut observer = |r: &FrameResult| counts.push(r.running_count);

        let summary = VideoPipeline::new(&tracker, &settings)
            .run_stream(&mut source, &mut sink, "mem", &mut observer)
            .unwrap();

        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.gate, GateRegion { top: 70, bottom: 85 });
        assert_eq!(sink.frames.len(), 12);
        assert!(counts.iter().all(|&c| c == 0));
        for frame in &sink.frames {
            assert_eq!(frame.rows(), H);
            assert_eq!(frame.cols(), W);
            // Gate outline present on every frame
            assert_eq!(pixel(frame, 70, 5), [0, 255, 255]);
        }
    }

    #[test]
    fn test_tracker_failure_is_not_fatal() {
        fn flaky(frame: usize) -> Result<RawDetections> {
            match frame {
                3 | 4 => Err(anyhow!("inference timeout")),
                f if f < 5 => Ok(one_track(40.0, 0.9)),
                _ => Ok(one_track(77.0, 0.9)),
            }
        }
        let tracker = ScriptedTracker::new(flaky);
        let settings = VideoSettings::default();
        let mut source = VecSource::blank(8);
        let mut sink = RecordingSink::default();
        let mut empty_frames = Vec::new();
        let mut observer = |r: &FrameResult| {
            if r.boxes.is_empty() {
                empty_frames.push(r.index);
            }
        };

        let summary = VideoPipeline::new(&tracker, &settings)
            .run_stream(&mut source, &mut sink, "mem", &mut observer)
            .unwrap();

        assert_eq!(summary.total_count, 1);
        assert_eq!(sink.frames.len(), 8);
        assert_eq!(empty_frames, vec![3, 4]);
    }

    #[test]
    fn test_sink_failure_aborts_and_releases() {
        let tracker = ScriptedTracker::new(crossing_at_ten);
        let settings = VideoSettings::default();
        let mut source = VecSource::blank(30);
        let mut sink = RecordingSink {
            fail_at: Some(3),
            ..Default::default()
        };
        let mut observer = |_: &FrameResult| {};

        let err = VideoPipeline::new(&tracker, &settings)
            .run_stream(&mut source, &mut sink, "mem", &mut observer)
            .unwrap_err();

        assert!(matches!(err, PipelineError::OutputWrite { .. }));
        assert_eq!(sink.frames.len(), 2);
        // Nothing read past the failing frame
        assert_eq!(source.frames.len(), 27);
        assert!(source.closed);
        assert!(sink.finished);
        assert_eq!(tracker.closed_sessions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_low_confidence_track_never_counted_or_drawn() {
        fn faint(_frame: usize) -> Result<RawDetections> {
            Ok(one_track(77.0, 0.25))
        }
        let tracker = ScriptedTracker::new(faint);
        let settings = VideoSettings::default();
        let mut source = VecSource::blank(5);
        let mut sink = RecordingSink::default();
        let mut drawn = 0;
        let mut observer = |r: &FrameResult| drawn += r.boxes.len();

        let summary = VideoPipeline::new(&tracker, &settings)
            .run_stream(&mut source, &mut sink, "mem", &mut observer)
            .unwrap();
        assert_eq!(summary.total_count, 0);
        assert_eq!(drawn, 0);
    }

    #[test]
    fn test_unopenable_video_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ScriptedTracker::new(nothing);
        let settings = VideoSettings::default();
        let missing = dir.path().join("missing.mp4");
        let out_dir = dir.path().join("outputs");

        let result = detect_video(
            &missing,
            &out_dir,
            &tracker,
            &settings,
            &mut |_: &FrameResult| {},
        );

        assert_eq!(
            result,
            DetectionResult {
                count: 0,
                output_path: None,
                error: Some("Could not open video".to_string()),
            }
        );
        assert!(!out_dir.exists());
    }

    /// Writes a short MJPEG clip with OpenCV's built-in encoder.
    fn write_clip(path: &Path, frames: usize) {
        use opencv::core::Size;
        use opencv::videoio::{VideoWriter, CAP_OPENCV_MJPEG};

        let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer = VideoWriter::new_with_backend(
            path.to_str().unwrap(),
            CAP_OPENCV_MJPEG,
            fourcc,
            10.0,
            Size::new(W, H),
            true,
        )
        .unwrap();
        assert!(writer.is_opened().unwrap());
        let frame = Mat::new_rows_cols_with_default(H, W, CV_8UC3, Scalar::all(90.0)).unwrap();
        for _ in 0..frames {
            writer.write(&frame).unwrap();
        }
        writer.release().unwrap();
    }

    #[test]
    fn test_opening_reads_stream_info() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.avi");
        write_clip(&clip, 5);

        let mut reader = OpencvReader::open(clip.to_str().unwrap()).unwrap();
        let info = reader.info();
        assert_eq!((info.width, info.height), (W, H));
        assert!(info.fps > 0.0);
        assert!(reader.next_frame().is_some());
        reader.close().unwrap();
    }

    #[test]
    fn test_unwritable_output_fails_before_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.avi");
        write_clip(&clip, 3);
        // Parent of the output is a regular file, so no directory can be made
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let tracker = ScriptedTracker::new(nothing);
        let settings = VideoSettings::default();
        let err = VideoPipeline::new(&tracker, &settings)
            .run(&clip, &blocker.join("clip.avi"), &mut |_: &FrameResult| {})
            .unwrap_err();
        assert!(matches!(err, PipelineError::OutputWrite { .. }));
        assert_eq!(tracker.closed_sessions.load(Ordering::SeqCst), 0);

        let result = detect_video(
            &clip,
            &blocker,
            &tracker,
            &settings,
            &mut |_: &FrameResult| {},
        );
        assert_eq!(result.count, 0);
        assert!(result.output_path.is_none());
        assert!(result.error.unwrap().starts_with("Could not write output"));
    }

    #[test]
    fn test_output_path_keeps_input_name() {
        let out = output_path_for(Path::new("/up/videos/abc.mp4"), Path::new("/out/videos"));
        assert_eq!(out, PathBuf::from("/out/videos/abc.mp4"));
    }
}
