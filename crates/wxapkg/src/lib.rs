//! # wxapkg
//!
//! Decoder and project reconstructor for `.wxapkg` mini-program packages.
//!
//! A package is a flat container: a 14-byte header, a file table and a
//! payload region. This library validates the container, writes every entry
//! below an output directory and then rebuilds the developer-facing project
//! layout (`app.json`, per-page configs, deduplicated tabBar icons) from the
//! merged manifest the packager produced.
//!
//! Filesystem work goes through a per-invocation [`Context`] holding a
//! bounded scheduler and an I/O completion barrier, so several packages can
//! be processed at once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wxapkg::{probe, unpack, UnpackOptions};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), wxapkg::UnpackError> {
//! // Inspect the file table
//! let info = probe(Path::new("_-123.wxapkg")).await?;
//! println!("{} entries", info.entries.len());
//!
//! // Unpack into `_-123/` and reconstruct the project
//! let progress_cb = Arc::new(|name: &str, done: u64, total: u64| {
//!     println!("[{}/{}] {}", done, total, name);
//! });
//! let report = unpack(
//!     Path::new("_-123.wxapkg"),
//!     UnpackOptions::default(),
//!     Some(progress_cb),
//! )
//! .await?;
//!
//! println!(
//!     "Extracted {} files into {}",
//!     report.stats.files_extracted,
//!     report.output_dir.display()
//! );
//! # Ok(())
//! # }
//! ```

pub mod barrier;
pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod paths;
pub mod reader;
pub mod realize;
pub mod safety;
pub mod sched;
pub mod types;
pub mod unpack;
pub mod workers;

// Re-export main types
pub use barrier::CompletionBarrier;
pub use collab::{FrameReconstructor, ModuleSplitter, NoopFrames, NoopSplitter};
pub use config::{AppManifest, ConfigReconstructor, MergedManifest};
pub use context::Context;
pub use error::{FormatError, SecurityError, StageError, UnpackError};
pub use realize::{ContentRealizer, Formatter, RawRealizer, RealizeError};
pub use sched::BoundedScheduler;
pub use types::{
    ArchiveHeader, ArchiveInfo, DeletionWeights, ExtractStats, FileEntry, UnpackOptions,
    UnpackReport, DELETE_THRESHOLD,
};
pub use unpack::Unpacker;

use std::path::Path;
use std::sync::Arc;

/// Type alias for progress callback functions.
///
/// The callback receives:
/// - `file`: Name of the entry that just finished
/// - `done`: Number of entries finished so far
/// - `total`: Number of entries in the package
pub type ProgressCallback = dyn Fn(&str, u64, u64) + Send + Sync;

/// Read the header and file table of a package without extracting it.
///
/// # Errors
///
/// Returns an error if:
/// - The package file doesn't exist or cannot be read
/// - The header markers are wrong or the table is truncated
/// - An entry points outside the container
pub async fn probe(path: &Path) -> Result<ArchiveInfo, UnpackError> {
    reader::probe_archive(path).await
}

/// Unpack a package next to itself and reconstruct the project tree.
///
/// # Arguments
///
/// * `archive_path` - Path to the `.wxapkg` file
/// * `options` - Unpack options (keep intermediates, report only, main dir)
/// * `progress_cb` - Optional callback for per-entry progress
///
/// # Errors
///
/// Returns an error if the package is structurally invalid, an entry name
/// escapes the output directory, a directory path is occupied by a file, or
/// a subpackage is unpacked without its main package directory.
pub async fn unpack(
    archive_path: &Path,
    options: UnpackOptions,
    progress_cb: Option<Arc<ProgressCallback>>,
) -> Result<UnpackReport, UnpackError> {
    Unpacker::new(options)
        .process_archive(archive_path, progress_cb)
        .await
}
