use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the scanner will pick up, lowercase, without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "arw", "cr2", "nef", "dng", "mp4", "mov", "avi",
];

/// Video formats: scanned and importable, but never thumbnailed.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi"];

/// Proprietary RAW formats eligible for the platform-utility decode path.
pub const RAW_EXTENSIONS: &[&str] = &["arw", "cr2", "nef", "dng"];

/// A single media file discovered by a scan.
///
/// Value record: a fresh scan always produces a new set, never mutates one
/// in place. `capture_date` is resolved lazily via the metadata resolver
/// and is `None` straight out of a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    pub capture_date: Option<DateTime<Utc>>,
}

/// Capture date resolved for a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDates {
    /// `original_date` formatted as `YYYY-MM-DD`.
    pub display_date: String,
    /// EXIF capture time when available, else the filesystem timestamp.
    pub original_date: DateTime<Utc>,
}

/// Running totals emitted once per processed file during an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProgress {
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_processed: u64,
    /// Wall-clock time spent on the file this event reports.
    pub last_file_duration: Duration,
    /// Final name at the destination, set only when the copy succeeded
    /// (it differs from the source name after a collision rename).
    pub file_name: Option<String>,
}

/// Events emitted asynchronously by a running import job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImportEvent {
    /// One per file, success or failure, in processing order.
    Progress(ImportProgress),
    /// Terminal; emitted only if the job ran to natural completion.
    Complete { succeeded: usize, failed: usize },
    /// Terminal; emitted only if cancellation took effect first.
    Cancelled,
}

/// Lowercased extension of `path`, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

pub fn is_video_extension(ext: &str) -> bool {
    VIDEO_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

pub fn is_raw_extension(ext: &str) -> bool {
    RAW_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

/// True for anything the metadata resolver should attempt EXIF parsing on.
pub fn is_image_extension(ext: &str) -> bool {
    is_supported_extension(ext) && !is_video_extension(ext)
}
