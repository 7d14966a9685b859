//! Reconstruction collaborators.
//!
//! Splitting bundled scripts back into modules and decompiling page frames
//! and stylesheets are pluggable. Each collaborator reports the deletion
//! weights of the intermediate files it has made redundant.
//!
//! Collaborators are synchronous and run on the blocking pool.

use crate::error::StageError;
use crate::types::{DeletionWeights, UnpackOptions};
use std::path::Path;

/// Splits a bundled script (`app-service.js`, `workers.js`, `game.js`,
/// `subContext.js`) into its source modules.
pub trait ModuleSplitter: Send + Sync {
    /// `root_hint` is the project-relative directory the modules live under,
    /// when it is known.
    fn split(&self, script: &Path, root_hint: Option<&str>) -> Result<DeletionWeights, StageError>;
}

/// Rebuilds page templates and stylesheets from compiled frame scripts.
pub trait FrameReconstructor: Send + Sync {
    /// `target` is `page-frame.html`, `page-frame.js` or `app-wxss.js`.
    fn frames(
        &self,
        target: &Path,
        options: &UnpackOptions,
        main_dir: Option<&Path>,
    ) -> Result<DeletionWeights, StageError>;

    /// Rebuild the stylesheets of the package rooted at `dir`.
    fn stylesheets(
        &self,
        dir: &Path,
        options: &UnpackOptions,
        main_dir: Option<&Path>,
    ) -> Result<DeletionWeights, StageError>;
}

/// Leaves bundled scripts as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSplitter;

impl ModuleSplitter for NoopSplitter {
    fn split(&self, _script: &Path, _root_hint: Option<&str>) -> Result<DeletionWeights, StageError> {
        Ok(DeletionWeights::new())
    }
}

/// Leaves frames and stylesheets as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFrames;

impl FrameReconstructor for NoopFrames {
    fn frames(
        &self,
        _target: &Path,
        _options: &UnpackOptions,
        _main_dir: Option<&Path>,
    ) -> Result<DeletionWeights, StageError> {
        Ok(DeletionWeights::new())
    }

    fn stylesheets(
        &self,
        _dir: &Path,
        _options: &UnpackOptions,
        _main_dir: Option<&Path>,
    ) -> Result<DeletionWeights, StageError> {
        Ok(DeletionWeights::new())
    }
}

/// Run a collaborator call on the blocking pool. A panic becomes a
/// [`StageError::Collaborator`].
pub(crate) async fn run_blocking<F>(call: F) -> Result<DeletionWeights, StageError>
where
    F: FnOnce() -> Result<DeletionWeights, StageError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| StageError::Collaborator(e.to_string()))?
}
