//! Per-invocation I/O context.
//!
//! One [`Context`] is built for each top-level unpack and handed to every
//! stage, so several packages can be processed concurrently without sharing
//! a scheduler or an I/O barrier.

use crate::barrier::CompletionBarrier;
use crate::error::UnpackError;
use crate::sched::BoundedScheduler;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct Context {
    /// Ceiling on in-flight filesystem tasks
    pub scheduler: BoundedScheduler,
    /// Tracks every file write and removal issued through this context
    pub io: CompletionBarrier,
}

impl Context {
    /// Create a context on the current tokio runtime.
    pub fn new(io_limit: usize) -> Self {
        Self {
            scheduler: BoundedScheduler::new(io_limit),
            io: CompletionBarrier::new(),
        }
    }

    /// Write `contents` to `path`, creating parent directories as needed.
    ///
    /// The write is submitted immediately; the returned future only reports
    /// its outcome.
    pub fn save(
        &self,
        path: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> impl Future<Output = Result<(), UnpackError>> {
        let path = path.into();
        let contents = contents.into();
        let unit = IoUnit::new(&self.io);
        let done = self.scheduler.run(async move {
            let _unit = unit;
            write_file(&path, &contents).await
        });
        async move { done.await? }
    }

    /// Read a file through the scheduler.
    pub fn read(
        &self,
        path: impl Into<PathBuf>,
    ) -> impl Future<Output = Result<Vec<u8>, UnpackError>> {
        let path = path.into();
        let done = self.scheduler.run(async move {
            tokio::fs::read(&path)
                .await
                .map_err(|e| UnpackError::reading(&path, e))
        });
        async move { done.await? }
    }

    /// Remove a file in the background. Await [`idle`](Self::idle) to know
    /// when every removal has finished.
    pub fn remove(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let unit = IoUnit::new(&self.io);
        self.scheduler.submit(async move {
            let _unit = unit;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed intermediate file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
            }
        });
    }

    /// Count one unit of work on the I/O barrier until the guard drops.
    pub(crate) fn io_unit(&self) -> IoUnit {
        IoUnit::new(&self.io)
    }

    /// Wait until no write or removal issued through this context is outstanding.
    pub async fn idle(&self) {
        self.io.drained().await;
    }
}

/// One outstanding unit on an I/O barrier, released on drop.
pub(crate) struct IoUnit {
    barrier: CompletionBarrier,
}

impl IoUnit {
    fn new(barrier: &CompletionBarrier) -> Self {
        barrier.increment(1);
        Self {
            barrier: barrier.clone(),
        }
    }
}

impl Drop for IoUnit {
    fn drop(&mut self) {
        self.barrier.decrement();
    }
}

/// Create `dir` and any missing ancestors.
///
/// Safe under concurrent creation: a directory that appears between the check
/// and the create counts as success. A plain file anywhere on the chain is a
/// [`UnpackError::Conflict`].
pub async fn ensure_dir(dir: &Path) -> Result<(), UnpackError> {
    let mut missing = Vec::new();
    let mut current = Some(dir);

    while let Some(path) = current {
        if path.as_os_str().is_empty() {
            break;
        }
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => return Err(UnpackError::Conflict(path.to_path_buf())),
            // NotFound, or NotADirectory when an ancestor is a file; keep
            // climbing and let the file ancestor report the conflict.
            Err(_) => {
                missing.push(path);
                current = path.parent();
            }
        }
    }

    for path in missing.into_iter().rev() {
        match tokio::fs::create_dir(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !tokio::fs::metadata(path).await?.is_dir() {
                    return Err(UnpackError::Conflict(path.to_path_buf()));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Write a file after making sure its parent directory exists.
pub async fn write_file(path: &Path, contents: &[u8]) -> Result<(), UnpackError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}
