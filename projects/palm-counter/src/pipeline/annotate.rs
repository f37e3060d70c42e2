// Frame annotator: projects counter state onto frames
//
// Drawing never touches the counter. `plan_boxes` decides what each box looks
// like, `draw_video_overlay` and `draw_image_boxes` put pixels on the Mat.

use crate::pipeline::counter::ZoneCounter;
use crate::pipeline::types::{DetectionRecord, GateRegion, PixelBox};
use anyhow::Result;
use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc::{put_text, rectangle_points, FONT_HERSHEY_SIMPLEX, LINE_8};

// BGR
const COUNTED_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0); // Green
const UNCOUNTED_COLOR: (f64, f64, f64) = (255.0, 0.0, 0.0); // Blue
const GATE_COLOR: (f64, f64, f64) = (0.0, 255.0, 255.0); // Yellow
const COUNT_TEXT_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const IMAGE_BOX_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f64 = 0.6;
const LABEL_OFFSET_Y: i32 = 10;
const COUNT_ORIGIN: (i32, i32) = (30, 50);
const COUNT_SCALE: f64 = 1.2;
const COUNT_THICKNESS: i32 = 3;

fn bgr(c: (f64, f64, f64)) -> Scalar {
    Scalar::new(c.0, c.1, c.2, 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxStyle {
    /// Track already contributed to the total
    Counted,
    Uncounted,
}

impl BoxStyle {
    fn color(self) -> Scalar {
        match self {
            BoxStyle::Counted => bgr(COUNTED_COLOR),
            BoxStyle::Uncounted => bgr(UNCOUNTED_COLOR),
        }
    }
}

/// What to draw for one surviving detection.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxOverlay {
    pub rect: PixelBox,
    pub style: BoxStyle,
    pub label: String,
    pub track_id: Option<i64>,
}

/// `ID:<id> <conf>` with the confidence at two decimals. `?` marks a missing id.
pub fn detection_label(detection: &DetectionRecord) -> String {
    match detection.track_id {
        Some(id) => format!("ID:{} {:.2}", id, detection.confidence),
        None => format!("ID:? {:.2}", detection.confidence),
    }
}

/// Styles every detection that clears the counter's confidence floor.
/// Must be called after `ZoneCounter::observe` for the same frame.
pub fn plan_boxes(detections: &[DetectionRecord], counter: &ZoneCounter) -> Vec<BoxOverlay> {
    detections
        .iter()
        .filter(|d| counter.is_confident(d))
        .map(|d| {
            let counted = d
                .track_id
                .map(|id| counter.state().is_counted(id))
                .unwrap_or(false);
            BoxOverlay {
                rect: d.bbox.to_pixels(),
                style: if counted {
                    BoxStyle::Counted
                } else {
                    BoxStyle::Uncounted
                },
                label: detection_label(d),
                track_id: d.track_id,
            }
        })
        .collect()
}

/// Draws boxes, labels, the gate band and the running count onto a video frame.
pub fn draw_video_overlay(
    frame: &mut Mat,
    boxes: &[BoxOverlay],
    gate: &GateRegion,
    frame_width: i32,
    total_count: u64,
) -> Result<()> {
    for b in boxes {
        let color = b.style.color();
        rectangle_points(
            frame,
            Point::new(b.rect.x1, b.rect.y1),
            Point::new(b.rect.x2, b.rect.y2),
            color,
            BOX_THICKNESS,
            LINE_8,
            0,
        )?;
        put_text(
            frame,
            &b.label,
            Point::new(b.rect.x1, b.rect.y1 - LABEL_OFFSET_Y),
            FONT_HERSHEY_SIMPLEX,
            LABEL_SCALE,
            color,
            BOX_THICKNESS,
            LINE_8,
            false,
        )?;
    }

    rectangle_points(
        frame,
        Point::new(0, gate.top),
        Point::new(frame_width, gate.bottom),
        bgr(GATE_COLOR),
        BOX_THICKNESS,
        LINE_8,
        0,
    )?;

    put_text(
        frame,
        &count_caption(total_count),
        Point::new(COUNT_ORIGIN.0, COUNT_ORIGIN.1),
        FONT_HERSHEY_SIMPLEX,
        COUNT_SCALE,
        bgr(COUNT_TEXT_COLOR),
        COUNT_THICKNESS,
        LINE_8,
        false,
    )?;

    Ok(())
}

pub fn count_caption(total_count: u64) -> String {
    format!("Palm Count: {}", total_count)
}

/// Image path: every box in one color, no labels, no gate.
pub fn draw_image_boxes(image: &mut Mat, detections: &[DetectionRecord]) -> Result<()> {
    for d in detections {
        let r = d.bbox.to_pixels();
        rectangle_points(
            image,
            Point::new(r.x1, r.y1),
            Point::new(r.x2, r.y2),
            bgr(IMAGE_BOX_COLOR),
            BOX_THICKNESS,
            LINE_8,
            0,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BoxXyxy;
    use opencv::core::{Vec3b, CV_8UC3};
    use opencv::prelude::*;

    const GATE: GateRegion = GateRegion { top: 70, bottom: 85 };

    fn det(track_id: Option<i64>, y1: f32, y2: f32, confidence: f32) -> DetectionRecord {
        DetectionRecord {
            bbox: BoxXyxy::new(20.0, y1, 60.0, y2),
            confidence,
            track_id,
        }
    }

    fn pixel(mat: &Mat, row: i32, col: i32) -> [u8; 3] {
        let v = mat.at_2d::<Vec3b>(row, col).unwrap();
        [v[0], v[1], v[2]]
    }

    #[test]
    fn test_label_format() {
        assert_eq!(detection_label(&det(Some(12), 0.0, 1.0, 0.876)), "ID:12 0.88");
        assert_eq!(detection_label(&det(None, 0.0, 1.0, 0.5)), "ID:? 0.50");
    }

    #[test]
    fn test_plan_styles_follow_counter_state() {
        let mut counter = ZoneCounter::default();
        let frame = vec![
            det(Some(1), 70.0, 84.0, 0.9), // cy 77, inside
            det(Some(2), 10.0, 30.0, 0.9), // above gate
            det(Some(3), 70.0, 84.0, 0.2), // below confidence floor
            det(None, 70.0, 84.0, 0.9),    // no identity
        ];
        counter.observe(&frame, &GATE);
        let plan = plan_boxes(&frame, &counter);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].style, BoxStyle::Counted);
        assert_eq!(plan[1].style, BoxStyle::Uncounted);
        assert_eq!(plan[2].track_id, None);
        assert_eq!(plan[2].style, BoxStyle::Uncounted);
        assert_eq!(counter.total_count(), 1);
    }

    #[test]
    fn test_planning_does_not_mutate_counter() {
        let counter = ZoneCounter::default();
        let frame = vec![det(Some(1), 70.0, 84.0, 0.9)];
        let plan = plan_boxes(&frame, &counter);
        assert_eq!(plan[0].style, BoxStyle::Uncounted);
        assert_eq!(counter.total_count(), 0);
        assert!(counter.state().seen.is_empty());
    }

    #[test]
    fn test_draw_video_overlay_colors() {
        let mut frame =
            Mat::new_rows_cols_with_default(100, 200, CV_8UC3, Scalar::all(0.0)).unwrap();
        let boxes = vec![
            BoxOverlay {
                rect: PixelBox { x1: 20, y1: 56, x2: 60, y2: 66 },
                style: BoxStyle::Counted,
                label: "ID:1 0.90".to_string(),
                track_id: Some(1),
            },
            BoxOverlay {
                rect: PixelBox { x1: 100, y1: 56, x2: 140, y2: 66 },
                style: BoxStyle::Uncounted,
                label: "ID:2 0.90".to_string(),
                track_id: Some(2),
            },
        ];
        draw_video_overlay(&mut frame, &boxes, &GATE, 200, 1).unwrap();

        // Rows below the count caption and above the gate
        assert_eq!(pixel(&frame, 61, 20), [0, 255, 0]);
        assert_eq!(pixel(&frame, 61, 140), [255, 0, 0]);
        // Gate band outline
        assert_eq!(pixel(&frame, 70, 5), [0, 255, 255]);
        assert_eq!(pixel(&frame, 85, 5), [0, 255, 255]);
        // Inside the band stays untouched
        assert_eq!(pixel(&frame, 78, 100), [0, 0, 0]);
    }

    #[test]
    fn test_draw_image_boxes_single_color() {
        let mut image =
            Mat::new_rows_cols_with_default(100, 100, CV_8UC3, Scalar::all(0.0)).unwrap();
        let dets = vec![det(None, 10.0, 50.0, 0.1), det(Some(4), 60.0, 90.0, 0.9)];
        draw_image_boxes(&mut image, &dets).unwrap();
        assert_eq!(pixel(&image, 30, 20), [0, 255, 0]);
        assert_eq!(pixel(&image, 75, 20), [0, 255, 0]);
    }
}
