//! Package orchestration: extraction, post-extraction dispatch and the
//! deletion policy.

use crate::barrier::CompletionBarrier;
use crate::collab::{run_blocking, FrameReconstructor, ModuleSplitter, NoopFrames, NoopSplitter};
use crate::config::{rewrite_game_config, ConfigReconstructor, MERGED_MANIFEST};
use crate::context::Context;
use crate::error::{StageError, UnpackError};
use crate::extract::extract_archive;
use crate::realize::{ContentRealizer, Formatter};
use crate::types::{DeletionWeights, ExtractStats, UnpackOptions, UnpackReport, DELETE_THRESHOLD};
use crate::workers::worker_root;
use crate::ProgressCallback;
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SERVICE_SCRIPT: &str = "app-service.js";
const WORKERS_SCRIPT: &str = "workers.js";
const GAME_SCRIPT: &str = "game.js";
const SUB_CONTEXT_SCRIPT: &str = "subContext.js";
const FRAME_HTML: &str = "page-frame.html";
const FRAME_SCRIPT: &str = "page-frame.js";
const STYLE_SCRIPT: &str = "app-wxss.js";

type Stage = Pin<Box<dyn Future<Output = Result<DeletionWeights, StageError>> + Send>>;

/// Output directory for a package: the package path without `.wxapkg`.
///
/// Files with another extension get an `_unpacked` suffix so the directory
/// never collides with the package itself.
pub fn output_dir_for(archive: &Path) -> PathBuf {
    let is_wxapkg = archive
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("wxapkg"))
        .unwrap_or(false);
    if is_wxapkg {
        archive.with_extension("")
    } else {
        let mut name = archive.as_os_str().to_os_string();
        name.push("_unpacked");
        PathBuf::from(name)
    }
}

/// Unpacks packages and runs the reconstruction stages on the result.
#[derive(Clone)]
pub struct Unpacker {
    options: UnpackOptions,
    realizer: Arc<dyn ContentRealizer>,
    splitter: Arc<dyn ModuleSplitter>,
    frames: Arc<dyn FrameReconstructor>,
}

impl Unpacker {
    /// Unpacker with the [`Formatter`] realizer and no-op collaborators.
    pub fn new(options: UnpackOptions) -> Self {
        Self {
            options,
            realizer: Arc::new(Formatter),
            splitter: Arc::new(NoopSplitter),
            frames: Arc::new(NoopFrames),
        }
    }

    pub fn with_realizer(mut self, realizer: Arc<dyn ContentRealizer>) -> Self {
        self.realizer = realizer;
        self
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn ModuleSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_frames(mut self, frames: Arc<dyn FrameReconstructor>) -> Self {
        self.frames = frames;
        self
    }

    pub fn options(&self) -> &UnpackOptions {
        &self.options
    }

    /// Unpack one package and reconstruct the project tree.
    ///
    /// Structural errors abort before anything is written. Stage failures are
    /// logged and only cost that stage's output.
    pub async fn process_archive(
        &self,
        archive: &Path,
        progress_cb: Option<Arc<ProgressCallback>>,
    ) -> Result<UnpackReport, UnpackError> {
        let ctx = Context::new(self.options.io_limit);
        let output_dir = output_dir_for(archive);

        let stats =
            extract_archive(&ctx, archive, &output_dir, Arc::clone(&self.realizer), progress_cb)
                .await?;

        if self.options.report_only {
            ctx.idle().await;
            return Ok(UnpackReport {
                output_dir,
                stats,
                ..Default::default()
            });
        }

        let weights = self.post_process(&ctx, &output_dir).await?;
        let deleted = self.apply_deletions(&ctx, &weights).await;

        Ok(UnpackReport {
            output_dir,
            stats,
            weights,
            deleted,
        })
    }

    /// Reconstruct an already extracted `app-config.json` on its own.
    pub async fn process_config(&self, config_file: &Path) -> Result<UnpackReport, UnpackError> {
        if !is_file(config_file).await {
            return Err(UnpackError::NotFound(config_file.to_path_buf()));
        }
        let ctx = Context::new(self.options.io_limit);
        let weights = ConfigReconstructor::new(ctx.clone())
            .reconstruct(config_file)
            .await;
        let deleted = self.apply_deletions(&ctx, &weights).await;

        Ok(UnpackReport {
            output_dir: config_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            stats: ExtractStats::default(),
            weights,
            deleted,
        })
    }

    /// Process several packages, one after another or concurrently when
    /// [`UnpackOptions::parallel`] is set. Results keep the input order.
    pub async fn process_all(
        &self,
        archives: &[PathBuf],
        progress_cb: Option<Arc<ProgressCallback>>,
    ) -> Vec<(PathBuf, Result<UnpackReport, UnpackError>)> {
        let mut results = Vec::with_capacity(archives.len());

        if !self.options.parallel {
            for archive in archives {
                let result = self.process_archive(archive, progress_cb.clone()).await;
                results.push((archive.clone(), result));
            }
            return results;
        }

        let handles: Vec<_> = archives
            .iter()
            .map(|archive| {
                let unpacker = self.clone();
                let archive = archive.clone();
                let progress_cb = progress_cb.clone();
                tokio::spawn(async move { unpacker.process_archive(&archive, progress_cb).await })
            })
            .collect();

        for (archive, handle) in archives.iter().zip(handles) {
            let result = handle.await.unwrap_or(Err(UnpackError::TaskAborted));
            results.push((archive.clone(), result));
        }
        results
    }

    /// Decide what kind of package `dir` holds and run its stages.
    async fn post_process(&self, ctx: &Context, dir: &Path) -> Result<DeletionWeights, UnpackError> {
        if is_file(&dir.join(SERVICE_SCRIPT)).await {
            info!(dir = %dir.display(), "mini-program package");
            return self.run_stages(ctx, dir, None).await;
        }
        if is_file(&dir.join(GAME_SCRIPT)).await {
            info!(dir = %dir.display(), "mini-game package");
            return Ok(self.process_game(ctx, dir).await);
        }

        info!(dir = %dir.display(), "subpackage");
        let main_dir = match &self.options.main_dir {
            Some(main) => dir.join(main),
            None => return Err(UnpackError::MainDirRequired(dir.to_path_buf())),
        };
        let service_dir = find_service_dir(dir)
            .await
            .ok_or_else(|| UnpackError::MainDirRequired(dir.to_path_buf()))?;
        debug!(service_dir = %service_dir.display(), main_dir = %main_dir.display(), "subpackage layout");
        self.run_stages(ctx, &service_dir, Some(main_dir)).await
    }

    /// Launch the independent reconstruction stages for the package in `dir`
    /// and collect their weights once all of them have reported.
    async fn run_stages(
        &self,
        ctx: &Context,
        dir: &Path,
        main_dir: Option<PathBuf>,
    ) -> Result<DeletionWeights, UnpackError> {
        let mut frame_weights = DeletionWeights::new();
        let frame_target = match &main_dir {
            Some(_) => {
                let script = dir.join(FRAME_SCRIPT);
                is_file(&script).await.then_some(script)
            }
            None => {
                let html = dir.join(FRAME_HTML);
                let styles = dir.join(STYLE_SCRIPT);
                if is_file(&html).await {
                    Some(html)
                } else if is_file(&styles).await {
                    frame_weights.add_if_absent(dir.join(FRAME_SCRIPT), DELETE_THRESHOLD);
                    Some(styles)
                } else {
                    return Err(UnpackError::FrameNotFound(dir.to_path_buf()));
                }
            }
        };

        let mut stages: Vec<(&'static str, Stage)> = Vec::new();

        let config_file = dir.join(MERGED_MANIFEST);
        if is_file(&config_file).await {
            let reconstructor = ConfigReconstructor::new(ctx.clone());
            stages.push((
                "config",
                Box::pin(async move {
                    Ok::<_, StageError>(reconstructor.reconstruct(&config_file).await)
                }),
            ));
        }

        stages.push(("scripts", self.split_scripts(ctx, dir, main_dir.is_some())));

        if let Some(target) = frame_target {
            let frames = Arc::clone(&self.frames);
            let options = self.options.clone();
            let main = main_dir.clone();
            stages.push((
                "frames",
                Box::pin(async move {
                    let mut weights = run_blocking(move || {
                        frames.frames(&target, &options, main.as_deref())
                    })
                    .await?;
                    weights.merge(frame_weights);
                    Ok::<_, StageError>(weights)
                }),
            ));
        }

        let frames = Arc::clone(&self.frames);
        let options = self.options.clone();
        let styles_dir = dir.to_path_buf();
        stages.push((
            "stylesheets",
            Box::pin(run_blocking(move || {
                frames.stylesheets(&styles_dir, &options, main_dir.as_deref())
            })),
        ));

        Ok(fan_in(stages).await)
    }

    /// Split `app-service.js` and then `workers.js` when present.
    fn split_scripts(&self, ctx: &Context, dir: &Path, has_main_dir: bool) -> Stage {
        let splitter = Arc::clone(&self.splitter);
        let ctx = ctx.clone();
        let service = dir.join(SERVICE_SCRIPT);
        let workers = dir.join(WORKERS_SCRIPT);

        Box::pin(async move {
            let service_splitter = Arc::clone(&splitter);
            let mut weights = run_blocking(move || service_splitter.split(&service, None)).await?;

            if is_file(&workers).await {
                let hint = if has_main_dir {
                    None
                } else {
                    let script = ctx.read(&workers).await?;
                    worker_root(&String::from_utf8_lossy(&script))
                };
                debug!(root = ?hint, "worker root");
                weights.merge(run_blocking(move || splitter.split(&workers, hint.as_deref())).await?);
            }
            Ok::<_, StageError>(weights)
        })
    }

    /// Mini-game layout: `game.json` from the merged manifest, then the
    /// sub-context and game scripts through the splitter.
    async fn process_game(&self, ctx: &Context, dir: &Path) -> DeletionWeights {
        let mut weights = DeletionWeights::new();

        let config_file = dir.join(MERGED_MANIFEST);
        if is_file(&config_file).await {
            match rewrite_game_config(ctx, dir).await {
                Ok(sub_context) => {
                    weights.add(config_file, DELETE_THRESHOLD);
                    let script = dir.join(SUB_CONTEXT_SCRIPT);
                    if sub_context.is_some() && is_file(&script).await {
                        let splitter = Arc::clone(&self.splitter);
                        let target = script.clone();
                        match run_blocking(move || splitter.split(&target, None)).await {
                            Ok(w) => weights.merge(w),
                            Err(e) => warn!(error = %e, "failed to split {}", SUB_CONTEXT_SCRIPT),
                        }
                        weights.add(script, DELETE_THRESHOLD);
                    }
                }
                Err(e) => warn!(error = %e, "failed to write game.json"),
            }
        }

        let splitter = Arc::clone(&self.splitter);
        let game = dir.join(GAME_SCRIPT);
        match run_blocking(move || splitter.split(&game, None)).await {
            Ok(w) => weights.merge(w),
            Err(e) => warn!(error = %e, "failed to split {}", GAME_SCRIPT),
        }
        weights
    }

    /// Remove every path that reached the threshold, unless intermediates
    /// are kept, and wait for all outstanding I/O.
    async fn apply_deletions(&self, ctx: &Context, weights: &DeletionWeights) -> Vec<PathBuf> {
        let deleted = if self.options.keep_intermediate {
            Vec::new()
        } else {
            let paths = weights.deletable();
            for path in &paths {
                ctx.remove(path);
            }
            paths
        };
        ctx.idle().await;
        if !deleted.is_empty() {
            info!(count = deleted.len(), "removed intermediate files");
        }
        deleted
    }
}

impl std::fmt::Debug for Unpacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unpacker")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Decrements the stage barrier when a stage ends, even by panicking.
struct Arrival(CompletionBarrier);

impl Drop for Arrival {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Run every stage concurrently and merge the weights of those that succeed.
async fn fan_in(stages: Vec<(&'static str, Stage)>) -> DeletionWeights {
    let ledger = Arc::new(Mutex::new(DeletionWeights::new()));
    let barrier = CompletionBarrier::new();
    barrier.increment(stages.len());

    for (name, stage) in stages {
        let arrival = Arrival(barrier.clone());
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            let _arrival = arrival;
            match stage.await {
                Ok(weights) => {
                    debug!(stage = name, paths = weights.iter().count(), "stage done");
                    ledger.lock().merge(weights);
                }
                Err(e) => warn!(stage = name, error = %e, "stage failed"),
            }
        });
    }

    barrier.drained().await;
    let weights = std::mem::take(&mut *ledger.lock());
    weights
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// First directory below `root` (depth first, sorted) holding the service script.
async fn find_service_dir(root: &Path) -> Option<PathBuf> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == SERVICE_SCRIPT)
            .and_then(|e| e.path().parent().map(Path::to_path_buf))
    })
    .await
    .ok()
    .flatten()
}
