use std::fs;
use std::path::{Path, PathBuf};

use core_types::{extension_of, is_supported_extension, MediaFile};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot access scan root {path}: {source}")]
    RootAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("scan task was aborted")]
    TaskAborted,
}

/// Recursively enumerate supported media files under `root`.
///
/// The walk runs on the blocking pool; the returned list is eager because
/// downstream consumers (duplicate indexing, grid rendering) need the full
/// set. An unreadable root is a hard error; anything below it degrades to
/// a logged skip.
pub async fn scan_directory(root: &Path) -> Result<Vec<MediaFile>, ScanError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_directory_blocking(&root))
        .await
        .map_err(|_| ScanError::TaskAborted)?
}

/// Synchronous core of [`scan_directory`].
pub fn scan_directory_blocking(root: &Path) -> Result<Vec<MediaFile>, ScanError> {
    let root_meta = fs::metadata(root).map_err(|source| ScanError::RootAccess {
        path: root.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(ScanError::RootNotDirectory(root.to_path_buf()));
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|res| res.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => continue,
        };

        // Dotfiles and AppleDouble sidecars ("._IMG_0001.ARW") both start
        // with a dot, so one check covers them.
        if name.starts_with('.') {
            continue;
        }

        match extension_of(entry.path()) {
            Some(ext) if is_supported_extension(&ext) => {}
            _ => continue,
        }

        match entry.metadata() {
            Ok(meta) => out.push(MediaFile {
                path: entry.into_path(),
                name,
                size: meta.len(),
                capture_date: None,
            }),
            Err(err) => {
                warn!(path = %entry.path().display(), %err, "skipping unreadable file");
            }
        }
    }

    debug!(root = %root.display(), found = out.len(), "scan complete");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn filters_to_supported_visible_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("one.JPG"), b"aa").unwrap();
        fs::write(dir.path().join("two.arw"), b"bbb").unwrap();
        fs::write(dir.path().join("clip.mov"), b"cccc").unwrap();
        fs::write(dir.path().join("notes.txt"), b"nope").unwrap();
        fs::write(dir.path().join(".hidden.jpg"), b"nope").unwrap();
        fs::write(dir.path().join("._one.JPG"), b"nope").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/three.png"), b"ddddd").unwrap();

        let mut results = scan_directory_blocking(dir.path()).expect("scan");
        results.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<&str> = results.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["clip.mov", "one.JPG", "three.png", "two.arw"]);
    }

    #[test]
    fn records_file_sizes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("photo.jpg"), vec![0u8; 1234]).unwrap();

        let results = scan_directory_blocking(dir.path()).expect("scan");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].size, 1234);
        assert!(results[0].path.is_absolute() || results[0].path.starts_with(dir.path()));
        assert!(results[0].capture_date.is_none());
    }

    #[test]
    fn empty_directory_scans_to_empty_list() {
        let dir = tempdir().unwrap();
        let results = scan_directory_blocking(dir.path()).expect("scan");
        assert!(results.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");
        let err = scan_directory_blocking(&gone).unwrap_err();
        assert!(matches!(err, ScanError::RootAccess { .. }));
    }

    #[test]
    fn file_root_is_an_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.jpg");
        fs::write(&file, b"x").unwrap();
        let err = scan_directory_blocking(&file).unwrap_err();
        assert!(matches!(err, ScanError::RootNotDirectory(_)));
    }

    #[tokio::test]
    async fn async_wrapper_delegates_to_blocking_scan() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("photo.png"), b"img").unwrap();
        let results = scan_directory(dir.path()).await.expect("scan");
        assert_eq!(results.len(), 1);
    }
}
