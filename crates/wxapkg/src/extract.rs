//! Package extraction.

use crate::barrier::CompletionBarrier;
use crate::context::{write_file, Context};
use crate::error::UnpackError;
use crate::reader::{check_bounds, read_index};
use crate::realize::ContentRealizer;
use crate::safety::validate_entry_name;
use crate::types::{ExtractStats, FileEntry};
use crate::ProgressCallback;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract a package file into `output_dir`.
///
/// The container is read whole, its header and file table are validated, and
/// only then is anything written. Structural errors abort before the first
/// write.
///
/// # Arguments
///
/// * `ctx` - I/O context of the current invocation
/// * `archive_path` - Path to the `.wxapkg` file
/// * `output_dir` - Directory the package tree is materialized under
/// * `realizer` - Content transform applied to each entry
/// * `progress_cb` - Optional callback for progress updates
pub async fn extract_archive(
    ctx: &Context,
    archive_path: &Path,
    output_dir: &Path,
    realizer: Arc<dyn ContentRealizer>,
    progress_cb: Option<Arc<ProgressCallback>>,
) -> Result<ExtractStats, UnpackError> {
    let buf = tokio::fs::read(archive_path)
        .await
        .map_err(|e| UnpackError::reading(archive_path, e))?;
    let (_, entries) = read_index(&buf)?;
    info!(
        archive = %archive_path.display(),
        entries = entries.len(),
        "unpacking package"
    );
    extract_entries(ctx, Arc::new(buf), &entries, output_dir, realizer, progress_cb).await
}

/// Materialize `entries` of the container `buf` below `output_dir`.
///
/// Every write goes through the context's scheduler; a local barrier counts
/// the writes and this function returns once all of them have reported.
/// Per-file I/O failures are collected in [`ExtractStats::failed`]; a path
/// conflict is returned as an error after the remaining writes have drained.
pub async fn extract_entries(
    ctx: &Context,
    buf: Arc<Vec<u8>>,
    entries: &[FileEntry],
    output_dir: &Path,
    realizer: Arc<dyn ContentRealizer>,
    progress_cb: Option<Arc<ProgressCallback>>,
) -> Result<ExtractStats, UnpackError> {
    let start_time = Instant::now();

    let planned = plan_entries(entries, buf.len(), output_dir)?;

    let total = planned.len() as u64;
    let tally = Arc::new(Mutex::new(Tally::default()));
    let barrier = CompletionBarrier::new();
    barrier.increment(planned.len());

    for (entry, dest) in planned {
        let unit = ctx.io_unit();
        let write = write_entry(
            Arc::clone(&buf),
            entry.clone(),
            dest.clone(),
            Arc::clone(&realizer),
        );
        let task = async move {
            let _unit = unit;
            write.await
        };
        let tally = Arc::clone(&tally);
        let barrier = barrier.clone();
        let progress_cb = progress_cb.clone();

        ctx.scheduler.run_with_completion(task, move |result| {
            let done = {
                let mut tally = tally.lock();
                tally.record(&entry, dest, result);
                tally.finished
            };
            if let Some(cb) = &progress_cb {
                cb(&entry.name, done, total);
            }
            barrier.decrement();
        });
    }

    barrier.drained().await;

    let tally = std::mem::take(&mut *tally.lock());
    let stats = ExtractStats {
        files_extracted: tally.files,
        bytes_written: tally.bytes,
        failed: tally.failed,
        duration: start_time.elapsed(),
    };

    if let Some(path) = tally.conflict {
        return Err(UnpackError::Conflict(path));
    }

    info!(
        files = stats.files_extracted,
        bytes = stats.bytes_written,
        failed = stats.failed.len(),
        "unpack done"
    );
    Ok(stats)
}

/// Validate every entry and resolve its destination before the first write.
///
/// An entry whose path runs through another entry's file can never be
/// written; that is reported as a [`UnpackError::Conflict`] on the shorter
/// entry's destination, independent of write order.
fn plan_entries(
    entries: &[FileEntry],
    container_len: usize,
    output_dir: &Path,
) -> Result<Vec<(FileEntry, PathBuf)>, UnpackError> {
    let mut relative = Vec::with_capacity(entries.len());
    for entry in entries {
        check_bounds(entry, container_len)?;
        relative.push(validate_entry_name(&entry.name)?);
    }

    let files: BTreeSet<&Path> = relative.iter().map(PathBuf::as_path).collect();
    for rel in &relative {
        if let Some(file) = rel.ancestors().skip(1).find(|a| files.contains(a)) {
            return Err(UnpackError::Conflict(output_dir.join(file)));
        }
    }

    Ok(entries
        .iter()
        .cloned()
        .zip(relative.iter().map(|rel| output_dir.join(rel)))
        .collect())
}

/// Realize and write one entry. Returns the number of bytes written.
async fn write_entry(
    buf: Arc<Vec<u8>>,
    entry: FileEntry,
    dest: PathBuf,
    realizer: Arc<dyn ContentRealizer>,
) -> Result<u64, UnpackError> {
    let raw = &buf[entry.range()];
    let content = realize_or_raw(realizer.as_ref(), &entry, raw);
    write_file(&dest, &content).await?;
    Ok(content.len() as u64)
}

/// Run the realizer, falling back to the raw bytes on error or panic.
fn realize_or_raw(realizer: &dyn ContentRealizer, entry: &FileEntry, raw: &[u8]) -> Vec<u8> {
    let extension = entry.extension();
    let realized = panic::catch_unwind(AssertUnwindSafe(|| {
        realizer.realize(&entry.name, &extension, raw)
    }));
    match realized {
        Ok(Ok(content)) => content,
        Ok(Err(e)) => {
            debug!(entry = %entry.name, error = %e, "keeping raw bytes");
            raw.to_vec()
        }
        Err(_) => {
            warn!(entry = %entry.name, "content realizer panicked, keeping raw bytes");
            raw.to_vec()
        }
    }
}

#[derive(Default)]
struct Tally {
    finished: u64,
    files: u64,
    bytes: u64,
    failed: Vec<(String, String)>,
    conflict: Option<PathBuf>,
}

impl Tally {
    fn record(&mut self, entry: &FileEntry, dest: PathBuf, result: Result<u64, UnpackError>) {
        self.finished += 1;
        match result {
            Ok(bytes) => {
                self.files += 1;
                self.bytes += bytes;
            }
            Err(UnpackError::Conflict(path)) => {
                warn!(entry = %entry.name, conflict = %path.display(), "path occupied by a file");
                self.failed
                    .push((entry.name.clone(), format!("conflict at {}", path.display())));
                self.conflict.get_or_insert(path);
            }
            Err(e) => {
                warn!(entry = %entry.name, dest = %dest.display(), error = %e, "failed to write entry");
                self.failed.push((entry.name.clone(), e.to_string()));
            }
        }
    }
}
