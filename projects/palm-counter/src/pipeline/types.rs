use serde::Serialize;
use std::collections::HashMap;

/// Axis-aligned box in frame pixel coordinates (corner form)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxXyxy {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoxXyxy {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Snaps the box onto the pixel grid. Coordinates truncate toward zero.
    pub fn to_pixels(&self) -> PixelBox {
        PixelBox {
            x1: self.x1 as i32,
            y1: self.y1 as i32,
            x2: self.x2 as i32,
            y2: self.y2 as i32,
        }
    }
}

impl From<[f32; 4]> for BoxXyxy {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// Integer pixel box, the form used for gate tests and drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    /// Vertical midpoint, floored.
    pub fn centroid_y(&self) -> i32 {
        (self.y1 + self.y2).div_euclid(2)
    }
}

/// One detection of one frame, as handed to the counter and the annotator.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub bbox: BoxXyxy,
    pub confidence: f32,
    /// Tracker identity; `None` when the tracker did not assign one.
    pub track_id: Option<i64>,
}

/// Horizontal counting band, in pixel rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRegion {
    pub top: i32,
    pub bottom: i32,
}

impl GateRegion {
    /// Builds the band from fractions of the frame height.
    pub fn from_frame_height(height: i32, top_fraction: f64, bottom_fraction: f64) -> Self {
        Self {
            top: (height as f64 * top_fraction) as i32,
            bottom: (height as f64 * bottom_fraction) as i32,
        }
    }

    /// Open-interval membership: rows equal to either bound are outside.
    pub fn contains_row(&self, y: i32) -> bool {
        self.top < y && y < self.bottom
    }
}

/// Per-identity counting status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackState {
    pub track_id: i64,
    pub counted: bool,
}

/// Running state of one video run.
#[derive(Debug, Clone, Default)]
pub struct CounterState {
    pub total_count: u64,
    pub seen: HashMap<i64, TrackState>,
}

impl CounterState {
    pub fn is_counted(&self, track_id: i64) -> bool {
        self.seen.get(&track_id).map(|s| s.counted).unwrap_or(false)
    }
}

/// Video stream properties read at open time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
}

/// Result record handed back to callers of either pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub count: u64,
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionResult {
    pub fn success(count: u64, output_path: String) -> Self {
        Self {
            count,
            output_path: Some(output_path),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            count: 0,
            output_path: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.output_path.is_some()
    }
}
