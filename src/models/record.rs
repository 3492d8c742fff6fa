//! Represents a stored object (record) owned by a single tenant.

use super::ident::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "webp", "svg"];
const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm"];
const DOCUMENT_EXTENSIONS: [&str; 11] = [
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "json", "xml",
];

/// Logical kind tag derived from the record's file extension.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RecordKind {
    Image,
    Video,
    Document,
    Other,
}

impl RecordKind {
    /// Classify a display name by its (case-insensitive) extension.
    pub fn from_name(name: &str) -> Self {
        let extension = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return Self::Other,
        };
        let ext = extension.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Self::Document
        } else {
            Self::Other
        }
    }

    /// Parse a query-string filter; unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A single record in the Active Store.
///
/// Holds metadata only; the payload lives in the blob store under
/// `payload_handle`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Record {
    pub id: ObjectId,

    /// Tenant that owns this record.
    pub owner_id: String,

    /// Display name, unique per owner among active records.
    pub name: String,

    pub size_bytes: i64,

    pub kind: RecordKind,

    /// Opaque blob store handle.
    pub payload_handle: String,

    pub created_at: DateTime<Utc>,

    pub description: String,

    /// Public sharing token, if the record is currently shared.
    pub share_token: Option<String>,

    /// When the share token stops resolving. `None` means no expiry.
    pub share_expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_extension() {
        assert_eq!(RecordKind::from_name("photo.JPG"), RecordKind::Image);
        assert_eq!(RecordKind::from_name("clip.webm"), RecordKind::Video);
        assert_eq!(RecordKind::from_name("report(2).pdf"), RecordKind::Document);
        assert_eq!(RecordKind::from_name("archive.tar.gz"), RecordKind::Other);
        assert_eq!(RecordKind::from_name("README"), RecordKind::Other);
    }

    #[test]
    fn parse_filter() {
        assert_eq!(RecordKind::parse("Video"), Some(RecordKind::Video));
        assert_eq!(RecordKind::parse("music"), None);
    }
}
