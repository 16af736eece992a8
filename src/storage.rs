//! On-disk layout for uploads and converted artifacts.
//!
//! Each upload gets its own directory so that two clients uploading the same
//! filename never collide:
//!
//! ```text
//! <root>/<category>/<upload key>/source/<filename>
//! <root>/<category>/<upload key>/converted/<stem>.<target extension>
//! ```
//!
//! Sources and outputs live in sibling directories, so no client filename
//! can shadow the output directory.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::media::MediaCategory;

/// Where the uploaded bytes come from.
#[derive(Debug, Clone)]
pub enum UploadPayload {
    /// A file already spooled to disk, e.g. a multipart temp file.
    TempFile(PathBuf),
    Bytes(Vec<u8>),
}

impl UploadPayload {
    pub async fn size(&self) -> io::Result<u64> {
        match self {
            UploadPayload::TempFile(path) => Ok(tokio::fs::metadata(path).await?.len()),
            UploadPayload::Bytes(bytes) => Ok(bytes.len() as u64),
        }
    }
}

/// Result of persisting an upload.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub filename: String,
    pub converted_filename: String,
}

#[derive(Debug, Clone)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Copy the upload into place and compute where its converted artifact
    /// will live. `filename` must already be sanitized.
    pub async fn persist(
        &self,
        category: MediaCategory,
        filename: &str,
        target_extension: &str,
        payload: &UploadPayload,
    ) -> io::Result<StoredUpload> {
        let dir = self
            .root
            .join(category.as_str())
            .join(Uuid::new_v4().simple().to_string());
        let source_dir = dir.join("source");
        tokio::fs::create_dir_all(&source_dir).await?;

        let source_path = source_dir.join(filename);
        match payload {
            UploadPayload::TempFile(path) => {
                tokio::fs::copy(path, &source_path).await?;
            }
            UploadPayload::Bytes(bytes) => {
                tokio::fs::write(&source_path, bytes).await?;
            }
        }
        debug!("Stored upload at {}", source_path.display());

        let converted_filename = converted_filename(filename, target_extension);
        Ok(StoredUpload {
            destination_path: dir.join("converted").join(&converted_filename),
            source_path,
            filename: filename.to_string(),
            converted_filename,
        })
    }
}

/// `<stem>.<target>` for a stored filename.
pub fn converted_filename(filename: &str, target_extension: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("upload");
    format!("{}.{}", stem, target_extension)
}

/// Reduce a client-supplied filename to a safe single path component:
/// ASCII alphanumerics, `.`, `-` and `_` only, whitespace turned into `_`,
/// no leading dots. Returns `None` if nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    // Browsers on Windows may send the full client path
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_like_a_browser_upload() {
        assert_eq!(sanitize_filename("My Photo.PNG").as_deref(), Some("My_Photo.PNG"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\Users\\me\\song.mp3").as_deref(), Some("song.mp3"));
        assert_eq!(sanitize_filename(".hidden.wav").as_deref(), Some("hidden.wav"));
        assert_eq!(sanitize_filename("ü.png").as_deref(), Some("png"));
        assert_eq!(sanitize_filename("../"), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn converted_filename_swaps_extension() {
        assert_eq!(converted_filename("clip.mov", "mp4"), "clip.mp4");
        assert_eq!(converted_filename("archive.tar.png", "jpg"), "archive.tar.jpg");
        assert_eq!(converted_filename("noext", "wav"), "noext.wav");
    }

    #[tokio::test]
    async fn persists_each_upload_in_its_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = UploadStorage::new(dir.path());
        let payload = UploadPayload::Bytes(b"pixels".to_vec());

        let first = storage
            .persist(MediaCategory::Image, "a.png", "png", &payload)
            .await
            .unwrap();
        let second = storage
            .persist(MediaCategory::Image, "a.png", "png", &payload)
            .await
            .unwrap();

        assert_ne!(first.source_path, second.source_path);
        assert_ne!(first.source_path, first.destination_path);
        assert!(first.source_path.starts_with(dir.path().join("image")));
        assert_eq!(std::fs::read(&first.source_path).unwrap(), b"pixels");
        assert_eq!(first.converted_filename, "a.png");
        assert!(first.source_path.ends_with("source/a.png"));
        assert!(first.destination_path.ends_with("converted/a.png"));
    }

    #[tokio::test]
    async fn filename_matching_output_directory_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let storage = UploadStorage::new(dir.path());
        let stored = storage
            .persist(
                MediaCategory::Audio,
                "converted",
                "mp3",
                &UploadPayload::Bytes(b"RIFF".to_vec()),
            )
            .await
            .unwrap();

        let output_dir = stored.destination_path.parent().unwrap();
        assert!(!output_dir.exists());
        std::fs::create_dir_all(output_dir).unwrap();
        assert_eq!(std::fs::read(&stored.source_path).unwrap(), b"RIFF");
        assert_eq!(stored.converted_filename, "converted.mp3");
    }

    #[tokio::test]
    async fn copies_spooled_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let spooled = dir.path().join("spool.tmp");
        std::fs::write(&spooled, b"RIFF....WAVE").unwrap();
        let payload = UploadPayload::TempFile(spooled.clone());
        assert_eq!(payload.size().await.unwrap(), 12);

        let storage = UploadStorage::new(dir.path().join("uploads"));
        let stored = storage
            .persist(MediaCategory::Audio, "take.wav", "mp3", &payload)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&stored.source_path).unwrap(), b"RIFF....WAVE");
        assert_eq!(stored.converted_filename, "take.mp3");
        assert!(spooled.exists());
    }
}
