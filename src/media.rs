use serde::{Deserialize, Serialize};
use std::fmt;

/// Media class an extension belongs to. Conversions are only allowed within
/// the same category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Image,
    Audio,
    Video,
    Document,
    Other,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Audio => "audio",
            MediaCategory::Video => "video",
            MediaCategory::Document => "document",
            MediaCategory::Other => "other",
        }
    }

    /// Whether a conversion path exists for files of this category.
    pub fn is_convertible(&self) -> bool {
        matches!(
            self,
            MediaCategory::Image | MediaCategory::Audio | MediaCategory::Video
        )
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported extensions and their category. This table is input validation
/// data, not configuration.
const SUPPORTED_EXTENSIONS: &[(&str, MediaCategory)] = &[
    ("jpg", MediaCategory::Image),
    ("jpeg", MediaCategory::Image),
    ("png", MediaCategory::Image),
    ("bmp", MediaCategory::Image),
    ("flv", MediaCategory::Video),
    ("mov", MediaCategory::Video),
    ("mp4", MediaCategory::Video),
    ("avi", MediaCategory::Video),
    ("wav", MediaCategory::Audio),
    ("mp3", MediaCategory::Audio),
    // both spellings are accepted for 3GPP audio
    ("3gp", MediaCategory::Audio),
    ("3gg", MediaCategory::Audio),
    ("mid", MediaCategory::Audio),
    ("midi", MediaCategory::Audio),
];

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("bmp", "image/bmp"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("flv", "video/x-flv"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mid", "audio/midi"),
    ("midi", "audio/midi"),
    ("3gp", "audio/3gpp"),
    ("3gg", "audio/3gpp"),
];

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Lowercase an extension and strip leading dots. Returns `None` when nothing
/// is left.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let ext = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Category of a normalized extension, or `None` if it is not supported.
pub fn category_for(extension: &str) -> Option<MediaCategory> {
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, category)| *category)
}

/// Every supported extension, sorted.
pub fn supported_extensions() -> Vec<&'static str> {
    let mut extensions: Vec<&'static str> =
        SUPPORTED_EXTENSIONS.iter().map(|(ext, _)| *ext).collect();
    extensions.sort_unstable();
    extensions
}

pub fn content_type_for(extension: &str) -> &'static str {
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_leading_dot() {
        assert_eq!(normalize_extension(".PNG").as_deref(), Some("png"));
        assert_eq!(normalize_extension("Mp3").as_deref(), Some("mp3"));
        assert_eq!(normalize_extension(" . "), None);
        assert_eq!(normalize_extension(""), None);
    }

    #[test]
    fn maps_extensions_to_categories() {
        assert_eq!(category_for("jpeg"), Some(MediaCategory::Image));
        assert_eq!(category_for("avi"), Some(MediaCategory::Video));
        assert_eq!(category_for("3gg"), Some(MediaCategory::Audio));
        assert_eq!(category_for("midi"), Some(MediaCategory::Audio));
        assert_eq!(category_for("xyz"), None);
        assert_eq!(category_for("PNG"), None);
    }

    #[test]
    fn supported_extensions_are_sorted_and_complete() {
        let extensions = supported_extensions();
        assert_eq!(extensions.len(), 14);
        let mut sorted = extensions.clone();
        sorted.sort();
        assert_eq!(extensions, sorted);
        assert!(extensions.contains(&"bmp"));
        assert!(extensions.contains(&"flv"));
    }

    #[test]
    fn content_types_fall_back_to_octet_stream() {
        assert_eq!(content_type_for("jpg"), "image/jpeg");
        assert_eq!(content_type_for("3gp"), "audio/3gpp");
        assert_eq!(content_type_for("wav"), "audio/wav");
        assert_eq!(content_type_for("docx"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn only_media_categories_are_convertible() {
        assert!(MediaCategory::Image.is_convertible());
        assert!(MediaCategory::Video.is_convertible());
        assert!(!MediaCategory::Document.is_convertible());
        assert!(!MediaCategory::Other.is_convertible());
    }
}
