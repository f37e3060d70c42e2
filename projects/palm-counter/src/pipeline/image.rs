// Image pipeline: one detector call, every returned box drawn, no counting state.

use crate::inference::Detector;
use crate::pipeline::adapter::to_image_records;
use crate::pipeline::annotate::draw_image_boxes;
use crate::pipeline::error::{MediaKind, PipelineError};
use crate::pipeline::types::DetectionResult;
use crate::pipeline::video::output_path_for;
use anyhow::anyhow;
use opencv::core::Vector;
use opencv::imgcodecs::{imread, imwrite, IMREAD_COLOR};
use opencv::prelude::*;
use std::path::Path;

/// Confidence floor handed to the detector on the image path.
pub const DEFAULT_IMAGE_CONFIDENCE: f32 = 0.3;

pub fn run_image(
    input: &Path,
    output: &Path,
    detector: &dyn Detector,
    confidence_floor: f32,
) -> Result<u64, PipelineError> {
    let input_str = input.to_string_lossy().to_string();
    let output_str = output.to_string_lossy().to_string();

    let open_err = |source: anyhow::Error| PipelineError::InputOpen {
        kind: MediaKind::Image,
        path: input_str.clone(),
        source,
    };
    let mut image = imread(&input_str, IMREAD_COLOR).map_err(|e| open_err(e.into()))?;
    if image.empty() {
        return Err(open_err(anyhow!("Failed to decode image: {}", input_str)));
    }

    let raw = detector
        .detect(&image, confidence_floor)
        .map_err(PipelineError::Detector)?;
    let records = to_image_records(&raw);
    tracing::info!("{}: {} detections", input_str, records.len());

    let write_err = |source: anyhow::Error| PipelineError::OutputWrite {
        path: output_str.clone(),
        source,
    };
    draw_image_boxes(&mut image, &records).map_err(write_err)?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.into()))?;
    }
    let written = imwrite(&output_str, &image, &Vector::new()).map_err(|e| write_err(e.into()))?;
    if !written {
        return Err(write_err(anyhow!("Encoder refused {}", output_str)));
    }

    Ok(records.len() as u64)
}

/// Runs one image and folds the outcome into the caller-facing record.
pub fn detect_image(
    input: &Path,
    output_dir: &Path,
    detector: &dyn Detector,
    confidence_floor: f32,
) -> DetectionResult {
    let output = output_path_for(input, output_dir);
    match run_image(input, &output, detector, confidence_floor) {
        Ok(count) => DetectionResult::success(count, output.to_string_lossy().to_string()),
        Err(e) => {
            let message = e.to_string();
            tracing::error!(
                "Image run for {} failed: {:#}",
                input.display(),
                anyhow::Error::from(e)
            );
            DetectionResult::failure(message)
        }
    }
}
