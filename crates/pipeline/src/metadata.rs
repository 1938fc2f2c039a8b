use std::fs;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use core_types::{extension_of, is_image_extension, FileDates};
use exif::{In, Tag, Value as ExifValue};
use tracing::debug;

/// Resolve the best-known capture date for a file.
///
/// EXIF `DateTimeOriginal` wins when present and parseable; otherwise the
/// filesystem creation time (modification time where creation time is not
/// supported). This never fails hard: a file we cannot stat at all resolves
/// to the current time, mirroring how the rest of the pipeline treats
/// metadata as best-effort.
pub async fn resolve_date(path: &Path) -> FileDates {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || resolve_date_blocking(&path)).await {
        Ok(dates) => dates,
        Err(_) => dates_from(Utc::now()),
    }
}

/// Synchronous core of [`resolve_date`].
pub fn resolve_date_blocking(path: &Path) -> FileDates {
    let fallback = filesystem_date(path).unwrap_or_else(Utc::now);

    let date = match extension_of(path) {
        Some(ext) if is_image_extension(&ext) => exif_original_date(path).unwrap_or(fallback),
        _ => fallback,
    };

    dates_from(date)
}

fn dates_from(date: DateTime<Utc>) -> FileDates {
    FileDates {
        display_date: date.format("%Y-%m-%d").to_string(),
        original_date: date,
    }
}

fn filesystem_date(path: &Path) -> Option<DateTime<Utc>> {
    let meta = fs::metadata(path).ok()?;
    meta.created()
        .or_else(|_| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Missing or corrupt EXIF never propagates; the caller falls back to
/// the filesystem timestamp.
fn exif_original_date(path: &Path) -> Option<DateTime<Utc>> {
    let file = fs::File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)?;
    let parsed = parse_exif_datetime(&field.value);
    if parsed.is_none() {
        debug!(path = %path.display(), "unparseable DateTimeOriginal, using filesystem date");
    }
    parsed
}

fn parse_exif_datetime(value: &ExifValue) -> Option<DateTime<Utc>> {
    let raw = exif_string(value)?;
    NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn exif_string(value: &ExifValue) -> Option<String> {
    match value {
        ExifValue::Ascii(values) if !values.is_empty() => {
            String::from_utf8(values[0].clone())
                .ok()
                .map(|s| s.trim_matches('\u{0}').trim().to_string())
                .filter(|s| !s.is_empty())
        }
        _ => None,
    }
}
