use super::{Detector, RawDetections};
use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use std::sync::Mutex;
use usls::models::RTDETR;
use usls::{Config, Image};

/// In-process RT-DETR detector for the image path.
///
/// The model needs `&mut` to run, so calls are serialized behind a mutex.
pub struct LocalDetector {
    model: Mutex<RTDETR>,
}

impl LocalDetector {
    pub fn new(model_path: &str) -> Result<Self> {
        let config = Config::default().with_model_file(model_path);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        tracing::info!("Loaded local detector model from {}", model_path);
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Detector for LocalDetector {
    fn detect(&self, image: &Mat, confidence_floor: f32) -> Result<RawDetections> {
        let dynamic_image = mat_to_dynamic_image(image)?;
        let (x_corr, y_corr) = aspect_correction(image)?;

        let results = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("Detector mutex poisoned"))?;
            model.forward(&[Image::from(dynamic_image)])?
        };

        let mut out = RawDetections::default();
        for y in results {
            for hbb in y.hbbs {
                let conf = hbb.confidence().unwrap_or(0.0);
                if conf < confidence_floor {
                    continue;
                }
                let x1 = hbb.xmin() * x_corr;
                let y1 = hbb.ymin() * y_corr;
                out.boxes.push([
                    x1,
                    y1,
                    x1 + hbb.width() * x_corr,
                    y1 + hbb.height() * y_corr,
                ]);
                out.conf.push(conf);
            }
        }
        Ok(out)
    }
}

/// RT-DETR in usls reports boxes squashed along the longer side of
/// non-square inputs; these factors undo it.
fn aspect_correction(image: &Mat) -> Result<(f32, f32)> {
    let size = image.size()?;
    let w = size.width as f32;
    let h = size.height as f32;
    Ok(if w > h {
        (w / h, 1.0)
    } else if h > w {
        (1.0, h / w)
    } else {
        (1.0, 1.0)
    })
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    let img_buffer =
        ImageBuffer::<Rgb<u8>, _>::from_vec(size.width as u32, size.height as u32, buffer)
            .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}
