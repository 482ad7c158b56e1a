//! Directory-backed frame source standing in for a camera.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bws_core::GrayscaleImage;
use bws_session::Frame;
use tokio::sync::mpsc;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Decode an image file of any supported format into luminance.
pub fn load_image(path: &Path) -> Result<GrayscaleImage> {
    let img = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(GrayscaleImage::from_luma(img.to_luma8()))
}

/// Image files in `dir`, sorted by file name.
pub fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load every frame in `dir`. Fails when the directory holds no images.
pub fn load_frames(dir: &Path) -> Result<Vec<GrayscaleImage>> {
    let paths = frame_paths(dir)?;
    if paths.is_empty() {
        bail!("no image files in {}", dir.display());
    }
    let frames = paths
        .iter()
        .map(|path| load_image(path))
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(dir = %dir.display(), count = frames.len(), "frames loaded");
    Ok(frames)
}

/// Post `frames` to the session one per `interval`, in order. Stops early
/// when the session is gone. Dropping the sender on return tells the session
/// the camera is done.
pub async fn replay(
    frames: Vec<GrayscaleImage>,
    interval: Duration,
    sink: mpsc::UnboundedSender<Frame>,
) {
    let mut ticker = tokio::time::interval(interval);
    for (n, image) in frames.into_iter().enumerate() {
        ticker.tick().await;
        if sink.send(Frame::upright(image)).is_err() {
            return;
        }
        tracing::trace!(frame = n, "frame posted");
    }
    tracing::debug!("frame source exhausted");
}
