use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use app_settings::AppSettings;
use clap::Parser;
use core_types::{ImportEvent, MediaFile};
use pipeline::{
    import, metadata, scanner, thumbs::ThumbnailService, DestinationIndex, EtaEstimator,
};
use rfd::FileDialog;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "cardbridge")]
#[command(about = "Import photos and videos from a card into a date-organized library")]
struct Cli {
    /// Source directory; a folder picker opens when omitted
    source: Option<PathBuf>,

    /// Destination library root; a folder picker opens when omitted
    destination: Option<PathBuf>,

    /// Pre-generate thumbnails for everything found
    #[arg(long)]
    thumbs: bool,

    /// List what would be imported, then exit
    #[arg(long)]
    dry_run: bool,

    /// Also copy files already present at the destination
    #[arg(long)]
    include_duplicates: bool,

    /// Thumbnail cache directory override
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut settings = AppSettings::load().unwrap_or_default();

    let source = resolve_dir(
        cli.source,
        settings.last_source.clone(),
        "Choose the source directory",
    )?;
    let destination = resolve_dir(
        cli.destination,
        settings.last_destination.clone(),
        "Choose the destination library",
    )?;
    settings.remember_source(source.clone());
    settings.remember_destination(destination.clone());
    if let Err(err) = settings.save() {
        warn!(error = %err, "could not persist settings");
    }

    let files = scanner::scan_directory(&source)
        .await
        .with_context(|| format!("failed to scan {}", source.display()))?;
    println!("{} media file(s) under {}", files.len(), source.display());

    let index = {
        let destination = destination.clone();
        tokio::task::spawn_blocking(move || DestinationIndex::build(&destination))
            .await
            .context("destination scan was aborted")?
    };

    for file in &files {
        let dates = metadata::resolve_date(&file.path).await;
        let marker = if index.contains(&file.name, file.size) {
            "existing"
        } else {
            ""
        };
        println!(
            "  {}  {:>8.1} MB  {:<40} {}",
            dates.display_date,
            megabytes(file.size),
            file.name,
            marker
        );
    }

    if cli.thumbs {
        generate_thumbnails(&cli.cache_dir, &files).await?;
    }

    let to_import: Vec<PathBuf> = files
        .iter()
        .filter(|f| cli.include_duplicates || !index.contains(&f.name, f.size))
        .map(|f| f.path.clone())
        .collect();

    if cli.dry_run {
        println!(
            "dry run: {} of {} file(s) would be imported",
            to_import.len(),
            files.len()
        );
        return Ok(());
    }
    if to_import.is_empty() {
        println!("nothing to import");
        return Ok(());
    }

    run_import(to_import, destination).await
}

/// Drive one import job to its terminal event, rendering progress lines
/// and wiring Ctrl-C to cooperative cancellation.
async fn run_import(paths: Vec<PathBuf>, destination: PathBuf) -> Result<()> {
    let total = paths.len();
    println!("importing {} file(s) into {}", total, destination.display());

    let mut handle = import::start_import(paths, destination);
    let cancel = handle.cancellation_flag();
    let mut eta = EtaEstimator::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("cancellation requested, finishing current file...");
                cancel.cancel();
            }
            event = handle.next_event() => match event {
                Some(ImportEvent::Progress(p)) => {
                    eta.record(p.last_file_duration);
                    let remaining = p.total.saturating_sub(p.processed);
                    let eta_text = eta
                        .estimate(remaining)
                        .map(format_duration)
                        .unwrap_or_else(|| "--".to_string());
                    println!(
                        "[{}/{}] ok {} failed {}  {:.1} MB  eta {}  {}",
                        p.processed,
                        p.total,
                        p.succeeded,
                        p.failed,
                        megabytes(p.bytes_processed),
                        eta_text,
                        p.file_name.as_deref().unwrap_or("(failed)"),
                    );
                }
                Some(ImportEvent::Complete { succeeded, failed }) => {
                    println!("import finished: {succeeded} succeeded, {failed} failed");
                    break;
                }
                Some(ImportEvent::Cancelled) => {
                    println!("import cancelled; already-copied files were kept");
                    break;
                }
                None => break,
            }
        }
    }

    Ok(())
}

async fn generate_thumbnails(cache_dir: &Option<PathBuf>, files: &[MediaFile]) -> Result<()> {
    let cache_dir = match cache_dir {
        Some(dir) => dir.clone(),
        None => default_cache_dir()?,
    };
    let service = Arc::new(
        ThumbnailService::new(cache_dir).context("failed to create thumbnail cache directory")?,
    );

    // Fire everything at once; the service itself bounds how many
    // generations actually run concurrently.
    let mut tasks = Vec::with_capacity(files.len());
    for file in files {
        let service = Arc::clone(&service);
        let path = file.path.clone();
        tasks.push(tokio::spawn(async move {
            let ready = service.get_thumbnail(&path).await.is_some();
            (ready, path)
        }));
    }

    let mut ready = 0usize;
    let mut unavailable = 0usize;
    for task in tasks {
        match task.await {
            Ok((true, _)) => ready += 1,
            Ok((false, path)) => {
                unavailable += 1;
                debug!(path = %path.display(), "no thumbnail available");
            }
            Err(_) => unavailable += 1,
        }
    }
    println!("thumbnails: {ready} ready, {unavailable} unavailable");
    Ok(())
}

fn resolve_dir(arg: Option<PathBuf>, remembered: Option<PathBuf>, prompt: &str) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }
    if let Some(path) = remembered {
        if path.is_dir() {
            println!("using remembered directory {}", path.display());
            return Ok(path);
        }
    }
    match FileDialog::new().set_title(prompt).pick_folder() {
        Some(path) => Ok(path),
        None => bail!("no directory chosen"),
    }
}

fn default_cache_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "cardbridge")
        .context("could not determine a cache directory")?;
    Ok(dirs.cache_dir().join("thumbnails"))
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m05s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m00s");
    }

    #[test]
    fn megabyte_conversion() {
        assert_eq!(megabytes(0), 0.0);
        assert!((megabytes(1_048_576) - 1.0).abs() < f64::EPSILON);
    }
}
