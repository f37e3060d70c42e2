use crate::pipeline::error::MediaKind;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const ALLOWED_IMAGE_EXT: &[&str] = &["jpg", "jpeg", "png"];
pub const ALLOWED_VIDEO_EXT: &[&str] = &["mp4", "avi"];

/// On-disk layout for uploads and rendered outputs.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn upload_dir(&self, kind: MediaKind) -> PathBuf {
        self.root.join("uploads").join(kind_dir(kind))
    }

    pub fn output_dir(&self, kind: MediaKind) -> PathBuf {
        self.root.join("outputs").join(kind_dir(kind))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for kind in [MediaKind::Image, MediaKind::Video] {
            for dir in [self.upload_dir(kind), self.output_dir(kind)] {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

fn kind_dir(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "images",
        MediaKind::Video => "videos",
    }
}

/// Text after the last `.`; the whole name when there is none.
pub fn upload_extension(filename: &str) -> &str {
    filename.rsplit('.').next().unwrap_or(filename)
}

pub fn is_allowed(kind: MediaKind, filename: &str) -> bool {
    let ext = upload_extension(filename).to_lowercase();
    let allowed = match kind {
        MediaKind::Image => ALLOWED_IMAGE_EXT,
        MediaKind::Video => ALLOWED_VIDEO_EXT,
    };
    allowed.contains(&ext.as_str())
}

/// Stores an upload under a fresh UUID name, keeping the client's extension.
pub fn save_upload(dir: &Path, original_name: &str, data: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let filename = format!("{}.{}", uuid::Uuid::new_v4(), upload_extension(original_name));
    let path = dir.join(filename);
    fs::write(&path, data).with_context(|| format!("Failed to save upload {}", path.display()))?;
    tracing::debug!("Saved upload {} as {}", original_name, path.display());
    Ok(path)
}
