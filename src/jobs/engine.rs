//! Conversion engines.
//!
//! The runner only talks to [`ConversionEngine`]. [`MediaEngine`] is the
//! default implementation: images are re-encoded in-process with the `image`
//! crate, audio and video are handed to an external `ffmpeg`.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::media::MediaCategory;

/// Execution-time failures. These are recorded on the job, never returned to
/// an HTTP caller directly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{tool} is required for {category} conversion but was not found on the system PATH")]
    Unavailable {
        tool: String,
        category: MediaCategory,
    },

    #[error("{tool} conversion failed: {details}")]
    Failed { tool: String, details: String },

    #[error("conversion for type {0} is not supported")]
    NotSupported(MediaCategory),

    #[error("conversion timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("image conversion failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error during conversion: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversion aborted unexpectedly: {0}")]
    Panicked(String),

    #[error("conversion cancelled")]
    Cancelled,
}

impl EngineError {
    /// Machine-readable kind stored alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Unavailable { .. } => "engine_unavailable",
            EngineError::NotSupported(_) => "conversion_not_supported",
            EngineError::Failed { .. }
            | EngineError::TimedOut(_)
            | EngineError::Image(_)
            | EngineError::Io(_)
            | EngineError::Panicked(_)
            | EngineError::Cancelled => "conversion_failed",
        }
    }
}

/// One conversion to perform.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: MediaCategory,
    pub target_extension: String,
    /// Set by the runner when it gives up on the conversion. Engines must
    /// stop and leave nothing at `destination` once it fires.
    pub cancel: CancellationToken,
}

/// Produces `request.destination` from `request.source`. May be slow; the
/// runner bounds it with a timeout and then cancels `request.cancel`.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    async fn convert(&self, request: &ConversionRequest) -> Result<(), EngineError>;

    /// Whether the external tools this engine needs are present.
    fn available(&self) -> bool {
        true
    }
}

/// Default engine backed by the `image` crate and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct MediaEngine {
    ffmpeg: String,
}

impl MediaEngine {
    /// `ffmpeg` is a program name looked up on `PATH`, or a path.
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn locate_ffmpeg(&self, category: MediaCategory) -> Result<PathBuf, EngineError> {
        which::which(&self.ffmpeg).map_err(|_| EngineError::Unavailable {
            tool: self.ffmpeg.clone(),
            category,
        })
    }

    async fn run_ffmpeg(&self, request: &ConversionRequest) -> Result<(), EngineError> {
        let program = self.locate_ffmpeg(request.category)?;
        debug!(
            "Running {} on {} -> {}",
            program.display(),
            request.source.display(),
            request.destination.display()
        );

        // kill_on_drop: dropping the child, on cancellation or when the
        // runner gives up on this future, kills ffmpeg.
        let child = Command::new(&program)
            .arg("-y")
            .arg("-i")
            .arg(&request.source)
            .arg(&request.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = request.cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EngineError::Failed {
                tool: self.ffmpeg.clone(),
                details: format!("exited with {}: {}", output.status, stderr.trim()),
            })
        }
    }
}

impl Default for MediaEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl ConversionEngine for MediaEngine {
    async fn convert(&self, request: &ConversionRequest) -> Result<(), EngineError> {
        match request.category {
            MediaCategory::Image => {
                let source = request.source.clone();
                let destination = request.destination.clone();
                let target = request.target_extension.clone();
                let cancel = request.cancel.clone();
                tokio::task::spawn_blocking(move || {
                    convert_image(&source, &destination, &target, &cancel)
                })
                .await
                    .map_err(|e| EngineError::Panicked(e.to_string()))?
            }
            MediaCategory::Audio | MediaCategory::Video => self.run_ffmpeg(request).await,
            category @ (MediaCategory::Document | MediaCategory::Other) => {
                Err(EngineError::NotSupported(category))
            }
        }
    }

    fn available(&self) -> bool {
        which::which(&self.ffmpeg).is_ok()
    }
}

/// Re-encode an image. JPEG has no alpha channel, so transparent pixels are
/// composited onto white first.
///
/// The encoded image is written to a staging file next to `destination` and
/// only renamed into place if `cancel` has not fired by then. Decoding and
/// encoding cannot be interrupted, so `cancel` is checked between steps.
pub fn convert_image(
    source: &Path,
    destination: &Path,
    target: &str,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let format =
        ImageFormat::from_extension(target).ok_or(EngineError::NotSupported(MediaCategory::Image))?;
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let image = image::open(source)?;
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(flatten_on_white(&image))
    } else {
        image
    };

    let staging = staging_path(destination);
    if let Err(e) = image.save_with_format(&staging, format) {
        discard(&staging);
        return Err(e.into());
    }
    if cancel.is_cancelled() {
        discard(&staging);
        return Err(EngineError::Cancelled);
    }
    if let Err(e) = std::fs::rename(&staging, destination) {
        discard(&staging);
        return Err(e.into());
    }
    Ok(())
}

/// `<dir>/.<name>.part` for `<dir>/<name>`
fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    destination.with_file_name(format!(".{}.part", name))
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staging file {}: {}", path.display(), e),
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |channel: u8| -> u8 {
            let alpha = u16::from(a);
            ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn request(dir: &Path, category: MediaCategory, source: &str, target: &str) -> ConversionRequest {
        ConversionRequest {
            source: dir.join(source),
            destination: dir.join(format!("out.{}", target)),
            category,
            target_extension: target.to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn converts_transparent_png_to_jpeg_on_white() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = RgbaImage::new(4, 4);
        for pixel in png.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        png.save(dir.path().join("in.png")).unwrap();

        let req = request(dir.path(), MediaCategory::Image, "in.png", "jpg");
        MediaEngine::default().convert(&req).await.unwrap();

        let out = image::open(&req.destination).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        let [r, g, b, _] = out.get_pixel(1, 1).0;
        assert!(r > 240 && g > 240 && b > 240);
    }

    #[tokio::test]
    async fn cancelled_image_conversion_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::new(8, 8).save(dir.path().join("in.png")).unwrap();

        let req = request(dir.path(), MediaCategory::Image, "in.png", "bmp");
        req.cancel.cancel();
        let err = MediaEngine::default().convert(&req).await.unwrap_err();

        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(err.kind(), "conversion_failed");
        assert!(!req.destination.exists());
        assert!(!staging_path(&req.destination).exists());
    }

    #[test]
    fn staging_file_sits_next_to_destination() {
        assert_eq!(
            staging_path(Path::new("/srv/converted/clip.jpg")),
            PathBuf::from("/srv/converted/.clip.jpg.part")
        );
    }

    #[tokio::test]
    async fn unreadable_image_is_a_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.png"), b"definitely not a png").unwrap();

        let req = request(dir.path(), MediaCategory::Image, "in.png", "bmp");
        let err = MediaEngine::default().convert(&req).await.unwrap_err();
        assert_eq!(err.kind(), "conversion_failed");
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_reported_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.wav"), b"RIFF").unwrap();

        let engine = MediaEngine::new("ffmpeg-that-does-not-exist-4821");
        assert!(!engine.available());

        let req = request(dir.path(), MediaCategory::Audio, "in.wav", "mp3");
        let err = engine.convert(&req).await.unwrap_err();
        assert_eq!(err.kind(), "engine_unavailable");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn documents_are_not_convertible() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), MediaCategory::Document, "in.pdf", "txt");
        let err = MediaEngine::default().convert(&req).await.unwrap_err();
        assert_eq!(err.kind(), "conversion_not_supported");
        assert_eq!(err.to_string(), "conversion for type document is not supported");
    }

    #[test]
    fn flattening_keeps_opaque_pixels() {
        let mut rgba = RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        let flat = flatten_on_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(flat.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
