use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Local};
use core_types::{ImportEvent, ImportProgress, MediaFile};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::scanner::scan_directory_blocking;

/// Per-file import failures. None of these stop the batch; they are
/// counted, logged and the job moves on.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source {0} has no usable file name")]
    MissingFileName(PathBuf),

    #[error("failed to create destination folder {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy to {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cooperative cancellation token, polled at file boundaries only: an
/// in-flight single-file copy always finishes before it takes effect.
#[derive(Clone, Default, Debug)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running import job. Dropping it detaches from the job but
/// does not cancel it.
pub struct ImportHandle {
    events: mpsc::UnboundedReceiver<ImportEvent>,
    cancel: CancellationFlag,
}

impl ImportHandle {
    /// Request cancellation; acknowledged immediately, takes effect at the
    /// next file boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Next event from the job; `None` once the terminal event was taken.
    pub async fn next_event(&mut self) -> Option<ImportEvent> {
        self.events.recv().await
    }
}

/// Start copying `paths` into date-bucketed folders under `destination`.
///
/// Returns immediately; the transfer runs as a spawned task that reports
/// exclusively through the handle's event stream. Only one job may be
/// active at a time; starting a second while one runs is a caller bug
/// this module does not detect.
pub fn start_import(paths: Vec<PathBuf>, destination: PathBuf) -> ImportHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationFlag::default();
    let flag = cancel.clone();

    tokio::spawn(async move {
        run_import(
            &paths,
            &destination,
            move |event| {
                // The receiver may have been dropped; the job finishes anyway.
                let _ = tx.send(event);
            },
            &flag,
        )
        .await;
    });

    ImportHandle { events: rx, cancel }
}

/// The job loop itself, callback-style. [`start_import`] wraps it in a
/// spawned task and a channel; tests drive it directly since `emit` is
/// invoked synchronously at each file boundary.
///
/// Files are processed strictly in input order, one at a time, so
/// progress accounting stays deterministic and disk contention bounded.
/// Exactly one `Progress` event is emitted per file, then a single
/// terminal `Complete` or `Cancelled`.
pub async fn run_import<F>(paths: &[PathBuf], destination: &Path, emit: F, cancel: &CancellationFlag)
where
    F: Fn(ImportEvent),
{
    let total = paths.len();
    let mut processed = 0usize;
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut bytes_processed = 0u64;

    for path in paths {
        if cancel.is_canceled() {
            info!(processed, total, "import cancelled");
            emit(ImportEvent::Cancelled);
            return;
        }

        let started = Instant::now();
        let mut file_name = None;
        match copy_one(path, destination).await {
            Ok(copied) => {
                succeeded += 1;
                bytes_processed += copied.size;
                file_name = Some(copied.final_name);
            }
            Err(err) => {
                warn!(source = %path.display(), error = %err, "import failed for file");
                failed += 1;
            }
        }

        processed += 1;
        emit(ImportEvent::Progress(ImportProgress {
            processed,
            total,
            succeeded,
            failed,
            bytes_processed,
            last_file_duration: started.elapsed(),
            file_name,
        }));
    }

    info!(succeeded, failed, "import complete");
    emit(ImportEvent::Complete { succeeded, failed });
}

struct CopiedFile {
    size: u64,
    final_name: String,
}

/// Copy a single file into its `YYYYMMDD` bucket. The bucket comes from
/// the source mtime, not the EXIF resolver: metadata reads are too slow
/// for bulk copy. Collisions rename to `{stem}_copy{ext}`; never
/// overwrite, never skip.
async fn copy_one(source: &Path, destination: &Path) -> Result<CopiedFile, ImportError> {
    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|source_err| ImportError::Stat {
            path: source.to_path_buf(),
            source: source_err,
        })?;
    let modified = meta.modified().map_err(|source_err| ImportError::Stat {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    let bucket = destination.join(bucket_name(modified));
    tokio::fs::create_dir_all(&bucket)
        .await
        .map_err(|source_err| ImportError::CreateDir {
            path: bucket.clone(),
            source: source_err,
        })?;

    let file_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ImportError::MissingFileName(source.to_path_buf()))?;

    let mut target = bucket.join(file_name);
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        target = bucket.join(copy_variant_name(file_name));
    }

    tokio::fs::copy(source, &target)
        .await
        .map_err(|source_err| ImportError::Copy {
            path: target.clone(),
            source: source_err,
        })?;

    let final_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name)
        .to_string();

    Ok(CopiedFile {
        size: meta.len(),
        final_name,
    })
}

/// Destination subfolder for a given modification time, local calendar date.
fn bucket_name(modified: SystemTime) -> String {
    DateTime::<Local>::from(modified).format("%Y%m%d").to_string()
}

/// `IMG_0001.ARW` -> `IMG_0001_copy.ARW`; extensionless names get a bare
/// `_copy` suffix.
fn copy_variant_name(file_name: &str) -> String {
    let path = Path::new(file_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{stem}_copy.{ext}"),
        _ => format!("{file_name}_copy"),
    }
}

/// Membership index over a destination tree, used to flag files that are
/// already present before an import. Derived state: rebuilt by re-scanning
/// whenever needed, never persisted.
#[derive(Debug, Clone, Default)]
pub struct DestinationIndex {
    keys: HashSet<String>,
}

impl DestinationIndex {
    /// Index scanner output: both the plain name and a `{name}_{size}`
    /// composite key are recorded per file.
    pub fn from_files(files: &[MediaFile]) -> Self {
        let mut keys = HashSet::with_capacity(files.len() * 2);
        for file in files {
            keys.insert(file.name.clone());
            keys.insert(format!("{}_{}", file.name, file.size));
        }
        Self { keys }
    }

    /// Scan `root` and index it. An unreadable destination degrades to an
    /// empty index (everything looks new) rather than blocking the import.
    pub fn build(root: &Path) -> Self {
        match scan_directory_blocking(root) {
            Ok(files) => Self::from_files(&files),
            Err(err) => {
                warn!(root = %root.display(), error = %err, "destination scan failed, assuming empty");
                Self::default()
            }
        }
    }

    pub fn contains(&self, name: &str, size: u64) -> bool {
        self.keys.contains(name) || self.keys.contains(&format!("{name}_{size}"))
    }

    /// Record a freshly imported name so live duplicate marks stay current
    /// without re-scanning mid-job.
    pub fn insert_name(&mut self, name: &str) {
        self.keys.insert(name.to_string());
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

const ETA_WINDOW: usize = 20;

/// Rolling-average estimated time remaining over the last [`ETA_WINDOW`]
/// per-file durations.
#[derive(Debug, Default)]
pub struct EtaEstimator {
    durations: VecDeque<Duration>,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero durations carry no signal and are dropped.
    pub fn record(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.durations.push_back(duration);
        if self.durations.len() > ETA_WINDOW {
            self.durations.pop_front();
        }
    }

    /// `None` until at least one duration has been recorded.
    pub fn estimate(&self, remaining: usize) -> Option<Duration> {
        if self.durations.is_empty() {
            return None;
        }
        let sum: Duration = self.durations.iter().sum();
        let average = sum / self.durations.len() as u32;
        Some(average * remaining as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    fn expected_bucket(path: &Path) -> String {
        bucket_name(fs::metadata(path).unwrap().modified().unwrap())
    }

    async fn drain(handle: &mut ImportHandle) -> Vec<ImportEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn imports_into_date_bucket() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("IMG_0001.jpg");
        fs::write(&source, b"picture bytes").unwrap();
        let dest = dir.path().join("library");

        let mut handle = start_import(vec![source.clone()], dest.clone());
        let events = drain(&mut handle).await;

        let copied = dest.join(expected_bucket(&source)).join("IMG_0001.jpg");
        assert_eq!(fs::read(&copied).unwrap(), b"picture bytes");

        assert_eq!(events.len(), 2);
        match &events[0] {
            ImportEvent::Progress(p) => {
                assert_eq!((p.processed, p.total, p.succeeded, p.failed), (1, 1, 1, 0));
                assert_eq!(p.bytes_processed, 13);
                assert_eq!(p.file_name.as_deref(), Some("IMG_0001.jpg"));
            }
            other => panic!("expected progress event, got {other:?}"),
        }
        assert!(matches!(
            events[1],
            ImportEvent::Complete { succeeded: 1, failed: 0 }
        ));
    }

    #[tokio::test]
    async fn collision_renames_instead_of_overwriting() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("IMG_0002.jpg");
        fs::write(&source, b"new content").unwrap();
        let dest = dir.path().join("library");

        let bucket = dest.join(expected_bucket(&source));
        fs::create_dir_all(&bucket).unwrap();
        fs::write(bucket.join("IMG_0002.jpg"), b"old content").unwrap();

        let mut handle = start_import(vec![source], dest);
        let events = drain(&mut handle).await;

        assert_eq!(fs::read(bucket.join("IMG_0002.jpg")).unwrap(), b"old content");
        assert_eq!(
            fs::read(bucket.join("IMG_0002_copy.jpg")).unwrap(),
            b"new content"
        );
        match &events[0] {
            ImportEvent::Progress(p) => {
                assert_eq!(p.file_name.as_deref(), Some("IMG_0002_copy.jpg"));
            }
            other => panic!("expected progress event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn per_file_failure_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.jpg");
        let missing = dir.path().join("gone.jpg");
        let last = dir.path().join("b.jpg");
        fs::write(&first, b"aa").unwrap();
        fs::write(&last, b"bb").unwrap();
        let dest = dir.path().join("library");

        let mut handle = start_import(vec![first, missing, last.clone()], dest.clone());
        let events = drain(&mut handle).await;

        match events.last().unwrap() {
            ImportEvent::Complete { succeeded, failed } => {
                assert_eq!((*succeeded, *failed), (2, 1));
                assert_eq!(succeeded + failed, 3);
            }
            other => panic!("expected complete event, got {other:?}"),
        }
        // The file after the failing one was still attempted and copied.
        let copied = dest.join(expected_bucket(&last)).join("b.jpg");
        assert!(copied.exists());
    }

    #[tokio::test]
    async fn cancelling_after_second_file_leaves_two_copies() {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("f{i}.jpg"));
            fs::write(&path, format!("file {i}")).unwrap();
            paths.push(path);
        }
        let dest = dir.path().join("library");

        let cancel = CancellationFlag::default();
        let events = RefCell::new(Vec::new());
        {
            let cancel = cancel.clone();
            run_import(
                &paths,
                &dest,
                |event| {
                    if let ImportEvent::Progress(p) = &event {
                        if p.processed == 2 {
                            cancel.cancel();
                        }
                    }
                    events.borrow_mut().push(event);
                },
                &cancel.clone(),
            )
            .await;
        }

        let events = events.into_inner();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ImportEvent::Progress(_)));
        assert!(matches!(events[1], ImportEvent::Progress(_)));
        assert!(matches!(events[2], ImportEvent::Cancelled));

        // Already-copied files stay copied; nothing past the boundary ran.
        let remaining = scan_directory_blocking(&dest).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn precancelled_job_copies_nothing() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"aa").unwrap();
        let dest = dir.path().join("library");

        let cancel = CancellationFlag::default();
        cancel.cancel();
        let events = RefCell::new(Vec::new());
        run_import(
            &[source],
            &dest,
            |event| events.borrow_mut().push(event),
            &cancel,
        )
        .await;

        let events = events.into_inner();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ImportEvent::Cancelled));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn imported_file_round_trips_through_a_destination_scan() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("DSC_0100.png");
        fs::write(&source, vec![7u8; 512]).unwrap();
        let dest = dir.path().join("library");

        let mut handle = start_import(vec![source], dest.clone());
        drain(&mut handle).await;

        let found = scan_directory_blocking(&dest).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size, 512);
        assert!(found[0].name == "DSC_0100.png" || found[0].name == "DSC_0100_copy.png");
    }

    #[test]
    fn copy_variant_names() {
        assert_eq!(copy_variant_name("IMG_0001.ARW"), "IMG_0001_copy.ARW");
        assert_eq!(copy_variant_name("clip.mov"), "clip_copy.mov");
        assert_eq!(copy_variant_name("noext"), "noext_copy");
    }

    #[test]
    fn destination_index_membership() {
        let files = vec![
            MediaFile {
                path: PathBuf::from("/lib/20240101/a.jpg"),
                name: "a.jpg".into(),
                size: 100,
                capture_date: None,
            },
            MediaFile {
                path: PathBuf::from("/lib/20240101/b.jpg"),
                name: "b.jpg".into(),
                size: 200,
                capture_date: None,
            },
        ];
        let mut index = DestinationIndex::from_files(&files);
        assert_eq!(index.len(), 4);

        // Plain-name key matches regardless of size; composite key is exact.
        assert!(index.contains("a.jpg", 100));
        assert!(index.contains("a.jpg", 999));
        assert!(!index.contains("c.jpg", 100));

        index.insert_name("c.jpg");
        assert!(index.contains("c.jpg", 1));
    }

    #[test]
    fn destination_index_of_missing_root_is_empty() {
        let index = DestinationIndex::build(Path::new("/definitely/not/here"));
        assert!(index.is_empty());
    }

    #[test]
    fn eta_rolling_average() {
        let mut eta = EtaEstimator::new();
        assert_eq!(eta.estimate(10), None);

        eta.record(Duration::ZERO); // ignored
        assert_eq!(eta.estimate(10), None);

        eta.record(Duration::from_secs(1));
        eta.record(Duration::from_secs(3));
        assert_eq!(eta.estimate(5), Some(Duration::from_secs(10)));
        assert_eq!(eta.estimate(0), Some(Duration::ZERO));
    }

    #[test]
    fn eta_window_caps_at_twenty() {
        let mut eta = EtaEstimator::new();
        for _ in 0..30 {
            eta.record(Duration::from_secs(10));
        }
        for _ in 0..20 {
            eta.record(Duration::from_secs(2));
        }
        // Only the newest twenty samples remain.
        assert_eq!(eta.estimate(1), Some(Duration::from_secs(2)));
    }
}
