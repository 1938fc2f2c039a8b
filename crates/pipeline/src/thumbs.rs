use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use core_types::{extension_of, is_raw_extension, is_video_extension};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Square footprint of generated previews, in pixels.
pub const THUMBNAIL_SIZE: u32 = 200;

const JPEG_QUALITY: u8 = 80;

/// Decode and resize are CPU- and I/O-heavy; more than two at once just
/// thrashes the disk with no throughput gain.
const MAX_CONCURRENT_GENERATIONS: usize = 2;

/// Seam for the decode/resize/encode step so tests can instrument it.
pub trait ThumbnailRenderer: Send + Sync + 'static {
    /// Decode `source` and write a finished thumbnail to `dest`. Blocking;
    /// the service runs it on the blocking pool.
    fn render(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// General-purpose path: cover-fit crop to [`THUMBNAIL_SIZE`] square,
/// encoded as JPEG at fixed quality.
pub struct CoverFitRenderer;

impl ThumbnailRenderer for CoverFitRenderer {
    fn render(&self, source: &Path, dest: &Path) -> Result<()> {
        let img = image::open(source)
            .with_context(|| format!("failed to decode {}", source.display()))?;
        let thumb = img
            .resize_to_fill(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3)
            .to_rgb8();

        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder
            .encode_image(&thumb)
            .with_context(|| format!("failed to encode thumbnail for {}", source.display()))?;

        std::fs::write(dest, out)
            .with_context(|| format!("failed to write thumbnail {}", dest.display()))
    }
}

/// On-disk, get-or-create thumbnail store with a bounded generation pool.
///
/// Entries are keyed by a hash of the source *path*, so replacing a file's
/// content at the same path keeps serving the old preview. Accepted
/// staleness trade-off; see DESIGN.md.
pub struct ThumbnailService {
    cache_dir: PathBuf,
    permits: Arc<Semaphore>,
    renderer: Arc<dyn ThumbnailRenderer>,
}

impl ThumbnailService {
    pub fn new(cache_dir: PathBuf) -> std::io::Result<Self> {
        Self::with_renderer(cache_dir, Arc::new(CoverFitRenderer))
    }

    pub fn with_renderer(
        cache_dir: PathBuf,
        renderer: Arc<dyn ThumbnailRenderer>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_GENERATIONS)),
            renderer,
        })
    }

    /// Deterministic on-disk location for `source`'s thumbnail.
    pub fn cache_path(&self, source: &Path) -> PathBuf {
        let digest = blake3::hash(source.to_string_lossy().as_bytes());
        self.cache_dir.join(format!("{}.jpg", digest.to_hex()))
    }

    /// Return the cached thumbnail for `source`, generating it on miss.
    ///
    /// `None` means "no thumbnail available": videos, undecodable files and
    /// every generation failure all land here so a single bad file degrades
    /// to a placeholder instead of aborting anything.
    pub async fn get_thumbnail(&self, source: &Path) -> Option<PathBuf> {
        match extension_of(source) {
            Some(ext) if !is_video_extension(&ext) => {}
            _ => return None,
        }

        let dest = self.cache_path(source);
        if path_exists(&dest).await {
            return Some(dest);
        }

        let _permit = self.permits.acquire().await.ok()?;
        // A request queued behind the semaphore may find its entry was
        // generated while it waited.
        if path_exists(&dest).await {
            return Some(dest);
        }

        match self.generate(source, &dest).await {
            Ok(()) => Some(dest),
            Err(err) => {
                warn!(source = %source.display(), error = %err, "thumbnail generation failed");
                None
            }
        }
    }

    /// Two-tier fallback: optional platform fast path for RAW, then the
    /// general decoder, then one platform-utility retry before giving up.
    async fn generate(&self, source: &Path, dest: &Path) -> Result<()> {
        let ext = extension_of(source).unwrap_or_default();

        if cfg!(target_os = "macos") && is_raw_extension(&ext) {
            match sips_thumbnail(source, dest).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(source = %source.display(), error = %err, "RAW fast path failed, trying general decoder");
                }
            }
        }

        let render_result = {
            let renderer = Arc::clone(&self.renderer);
            let source = source.to_path_buf();
            let dest = dest.to_path_buf();
            tokio::task::spawn_blocking(move || renderer.render(&source, &dest))
                .await
                .map_err(|_| anyhow!("thumbnail render task aborted"))?
        };

        match render_result {
            Ok(()) => Ok(()),
            Err(primary) if cfg!(target_os = "macos") => {
                warn!(source = %source.display(), error = %primary, "primary decode failed, retrying with platform utility");
                sips_thumbnail(source, dest)
                    .await
                    .with_context(|| format!("platform utility retry failed after: {primary}"))
            }
            Err(primary) => Err(primary),
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// `sips -Z 200 -s format jpeg <source> --out <dest>`, the macOS image
/// utility. Trusted to decode proprietary RAW faster than the general
/// decoder, and doubles as the last-resort fallback.
async fn sips_thumbnail(source: &Path, dest: &Path) -> Result<()> {
    let status = tokio::process::Command::new("sips")
        .arg("-Z")
        .arg(THUMBNAIL_SIZE.to_string())
        .args(["-s", "format", "jpeg"])
        .arg(source)
        .arg("--out")
        .arg(dest)
        .status()
        .await
        .context("failed to spawn sips")?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("sips exited with {status}"))
    }
}
