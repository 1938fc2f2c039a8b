//! The media import pipeline: scanning, metadata resolution, thumbnail
//! generation and the cancellable batch-copy job.
//!
//! The presentation layer is an external caller: it invokes these
//! operations and renders the events they emit, nothing here blocks on it.

pub mod import;
pub mod metadata;
pub mod scanner;
pub mod thumbs;

pub use import::{start_import, CancellationFlag, DestinationIndex, EtaEstimator, ImportHandle};
pub use metadata::resolve_date;
pub use scanner::{scan_directory, ScanError};
pub use thumbs::{ThumbnailRenderer, ThumbnailService};
