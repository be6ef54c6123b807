//! Render surfaces
//!
//! The real display is external; these surfaces let the binary run headless.

use super::{DecodedFrame, RenderSurface};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

/// Logs every painted frame
#[derive(Debug, Default)]
pub struct TracingSurface {
    painted: AtomicU64,
}

impl TracingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn painted(&self) -> u64 {
        self.painted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RenderSurface for TracingSurface {
    async fn paint(&self, frame: DecodedFrame) -> Result<()> {
        let count = self.painted.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            sequence = frame.sequence_number,
            captured_at = frame.capture_timestamp,
            width = frame.image.width(),
            height = frame.image.height(),
            quality = ?frame.quality_hint,
            painted = count,
            "Frame painted"
        );
        Ok(())
    }

    async fn clear(&self) {
        tracing::debug!("Surface cleared");
    }
}

/// Writes the latest frame to a PNG file, with a small JSON sidecar
///
/// The image is written to a temp file and renamed so readers never see a
/// partial frame.
#[derive(Debug, Clone)]
pub struct FileSurface {
    path: PathBuf,
}

impl FileSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn meta_path(&self) -> PathBuf {
        self.path.with_extension("meta.json")
    }
}

#[async_trait]
impl RenderSurface for FileSurface {
    async fn paint(&self, frame: DecodedFrame) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let image = frame.image;
        let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut out = Vec::new();
            image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
            Ok(out)
        })
        .await
        .map_err(|e| Error::Internal(format!("encode task failed: {}", e)))??;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &png).await?;
        fs::rename(&tmp_path, &self.path).await?;

        let meta = serde_json::json!({
            "sequence_number": frame.sequence_number,
            "capture_timestamp": frame.capture_timestamp,
            "quality": frame.quality_hint,
            "size_bytes": png.len(),
        });
        fs::write(self.meta_path(), meta.to_string()).await?;

        Ok(())
    }

    async fn clear(&self) {
        for path in [self.path.clone(), self.meta_path()] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to clear frame file");
                }
            }
        }
    }
}
