//! Manifest reconstruction.
//!
//! A package ships one merged `app-config.json`. [`ConfigReconstructor`]
//! turns it back into a project-style `app.json` plus one `<page>.json` per
//! page override, and rewrites inline tabBar icons to files already present
//! in the output tree.
//!
//! Every stage is best-effort: a failing stage is logged and contributes
//! nothing, the remaining stages still run.

use crate::barrier::CompletionBarrier;
use crate::context::Context;
use crate::error::{StageError, UnpackError};
use crate::paths::{change_ext, display_relative, normalize, relative_path};
use crate::safety::destination;
use crate::types::{DeletionWeights, DELETE_THRESHOLD};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name of the reconstructed manifest.
pub const APP_MANIFEST: &str = "app.json";

/// File name of the merged manifest inside a package.
pub const MERGED_MANIFEST: &str = "app-config.json";

/// Inline icon payloads come with or without padding.
const ICON_PAYLOAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// SHA-256 of a file or payload; used for equality only.
pub type ContentDigest = [u8; 32];

/// Serialize `value` as JSON indented with four spaces.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Aggregated configuration found in `app-config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedManifest {
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub entry_page_path: Option<String>,
    #[serde(default, alias = "subpackages")]
    pub sub_packages: Option<Vec<SubPackage>>,
    #[serde(default)]
    pub tab_bar: Option<TabBar>,
    /// Per-page overrides keyed by page path
    #[serde(default)]
    pub page: Map<String, Value>,
    #[serde(default)]
    pub global: Option<GlobalSettings>,
    #[serde(default)]
    pub network_timeout: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub window: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPackage {
    pub root: String,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabBar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<TabBarItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabBarItem {
    #[serde(default)]
    pub page_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_icon_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_icon_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `app.json` written next to the merged manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    pub pages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_bar: Option<TabBar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_timeout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_packages: Option<Vec<SubPackage>>,
}

/// Move `entry` to the front of `pages`.
///
/// Returns `false` and leaves the list untouched when `entry` is not listed.
pub fn reorder_pages(pages: &mut Vec<String>, entry: &str) -> bool {
    let Some(pos) = pages.iter().position(|p| p == entry) else {
        return false;
    };
    let page = pages.remove(pos);
    pages.retain(|p| p != entry);
    pages.insert(0, page);
    true
}

/// Root with exactly one trailing `/` and no leading `/`.
pub fn normalize_root(root: &str) -> String {
    let root = normalize(root);
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Normalize subpackage roots, rewrite their pages relative to the root and
/// drop those pages from the top-level list.
pub fn partition_subpackages(pages: &mut Vec<String>, subs: &mut [SubPackage]) {
    for sub in subs.iter_mut() {
        sub.root = normalize_root(&sub.root);
        let mut relative = Vec::with_capacity(sub.pages.len());
        for page in &sub.pages {
            let page = normalize(page);
            let page = page.trim_start_matches('/');
            let rel = page.strip_prefix(sub.root.as_str()).unwrap_or(page).to_string();
            let full = format!("{}{}", sub.root, rel);
            pages.retain(|p| *p != full);
            relative.push(rel);
        }
        sub.pages = relative;
    }
}

/// Digest of a byte slice.
pub fn digest(bytes: &[u8]) -> ContentDigest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Every regular file below `dir`, sorted by path.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Rewrite inline icons of `items` that match a candidate digest.
///
/// `candidates` are searched in order and the first match wins. Returns the
/// number of icons replaced.
pub fn apply_icon_digests(
    items: &mut [TabBarItem],
    candidates: &[(PathBuf, ContentDigest)],
    root: &Path,
) -> usize {
    let mut replaced = 0;
    for item in items.iter_mut() {
        let slots = [
            (&mut item.icon_data, &mut item.icon_path),
            (&mut item.selected_icon_data, &mut item.selected_icon_path),
        ];
        for (data, path) in slots {
            let Some(payload) = data.as_deref() else {
                continue;
            };
            let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            let decoded = match ICON_PAYLOAD.decode(compact) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(page = %item.page_path, error = %e, "undecodable inline icon");
                    continue;
                }
            };
            let wanted = digest(&decoded);
            if let Some((file, _)) = candidates.iter().find(|(_, d)| *d == wanted) {
                let rel = display_relative(file, root);
                *path = Some(relative_path(&rel, APP_MANIFEST));
                *data = None;
                replaced += 1;
            }
        }
    }
    replaced
}

/// Rebuilds `app.json` and per-page configs from a merged manifest.
#[derive(Debug, Clone)]
pub struct ConfigReconstructor {
    ctx: Context,
}

impl ConfigReconstructor {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Run every stage on `config_file` and report deletion weights.
    ///
    /// The merged manifest gets weight 8 unless a page config was written
    /// over it or `app.json` could not be persisted, in which case it gets 0.
    /// A manifest that cannot be parsed yields no weights at all.
    pub async fn reconstruct(&self, config_file: &Path) -> DeletionWeights {
        let manifest = match self.parse_manifest(config_file).await {
            Ok(m) => m,
            Err(e) => {
                warn!(file = %config_file.display(), error = %e, "cannot parse merged manifest");
                return DeletionWeights::new();
            }
        };
        let dir = config_file.parent().unwrap_or_else(|| Path::new("."));
        let mut weight = DELETE_THRESHOLD;

        let mut app = AppManifest {
            pages: manifest.pages.clone(),
            window: manifest.global.as_ref().and_then(|g| g.window.clone()),
            tab_bar: manifest.tab_bar.clone(),
            network_timeout: manifest.network_timeout.clone(),
            sub_packages: manifest.sub_packages.clone(),
        };

        match &manifest.entry_page_path {
            Some(entry) => {
                let entry = change_ext(entry, "");
                if !reorder_pages(&mut app.pages, &entry) {
                    warn!(entry = %entry, "entry page is not in the page list");
                }
            }
            None => warn!(error = %StageError::MissingField("entryPagePath"), "skipping page reorder"),
        }

        if let Some(subs) = app.sub_packages.as_mut() {
            partition_subpackages(&mut app.pages, subs);
        }

        let (overwrites_manifest, split) =
            self.split_page_configs(config_file, dir, &manifest.page).await;
        if overwrites_manifest {
            weight = 0;
        }
        if let Err(e) = split {
            warn!(error = %e, "failed to split page configs");
        }

        if let Some(list) = app.tab_bar.as_mut().and_then(|t| t.list.as_mut()) {
            for item in list.iter_mut() {
                item.page_path = change_ext(&item.page_path, "");
            }
            if let Err(e) = self.resolve_tab_bar_icons(list, dir).await {
                warn!(error = %e, "failed to resolve tabBar icons");
            }
        }

        if let Err(e) = self.persist(&app, dir).await {
            warn!(error = %e, "failed to write {}", APP_MANIFEST);
            weight = 0;
        }

        info!(file = %config_file.display(), pages = app.pages.len(), "config reconstructed");
        DeletionWeights::single(config_file, weight)
    }

    async fn parse_manifest(&self, config_file: &Path) -> Result<MergedManifest, StageError> {
        let raw = self.ctx.read(config_file).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Write each page override's `window` as `<page>.json`.
    ///
    /// The flag is `true` when one of the targets is `config_file` itself.
    /// It is computed for every page, so it holds even when another page
    /// fails; a failing page is skipped and the first error is returned
    /// next to the flag.
    pub async fn split_page_configs(
        &self,
        config_file: &Path,
        dir: &Path,
        pages: &Map<String, Value>,
    ) -> (bool, Result<usize, StageError>) {
        let mut overwrites_manifest = false;
        let mut first_error: Option<StageError> = None;
        let mut pending = Vec::with_capacity(pages.len());

        for (page, settings) in pages {
            let target = match destination(dir, &change_ext(page, ".json")) {
                Ok(target) => target,
                Err(e) => {
                    warn!(page = %page, error = %e, "skipping page config");
                    first_error.get_or_insert(UnpackError::from(e).into());
                    continue;
                }
            };
            if target == config_file {
                overwrites_manifest = true;
            }
            let window = settings
                .get("window")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            match to_pretty_json(&window) {
                Ok(bytes) => pending.push(self.ctx.save(target, bytes)),
                Err(e) => {
                    first_error.get_or_insert(e.into());
                }
            }
        }

        let mut written = 0;
        for write in pending {
            match write.await {
                Ok(()) => written += 1,
                Err(e) => {
                    first_error.get_or_insert(e.into());
                }
            }
        }
        debug!(written, "page configs written");

        let result = match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        };
        (overwrites_manifest, result)
    }

    /// Replace inline icons with references to identical files below `root`.
    pub async fn resolve_tab_bar_icons(
        &self,
        items: &mut [TabBarItem],
        root: &Path,
    ) -> Result<usize, StageError> {
        let has_inline = items
            .iter()
            .any(|i| i.icon_data.is_some() || i.selected_icon_data.is_some());
        if !has_inline {
            return Ok(0);
        }

        let scan_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || list_files(&scan_root))
            .await
            .map_err(|_| UnpackError::TaskAborted)?;
        let candidates = self.digest_files(files).await;
        let replaced = apply_icon_digests(items, &candidates, root);
        debug!(replaced, candidates = candidates.len(), "tabBar icons resolved");
        Ok(replaced)
    }

    /// Digest every file through the scheduler; unreadable files are skipped.
    async fn digest_files(&self, files: Vec<PathBuf>) -> Vec<(PathBuf, ContentDigest)> {
        let barrier = CompletionBarrier::new();
        let digests: Arc<Mutex<Vec<Option<ContentDigest>>>> =
            Arc::new(Mutex::new(vec![None; files.len()]));
        barrier.increment(files.len());

        for (i, path) in files.iter().enumerate() {
            let path = path.clone();
            let digests = Arc::clone(&digests);
            let barrier = barrier.clone();
            self.ctx.scheduler.run_with_completion(
                async move {
                    let result = tokio::fs::read(&path).await.map(|bytes| digest(&bytes));
                    (path, result)
                },
                move |(path, result)| {
                    match result {
                        Ok(d) => digests.lock()[i] = Some(d),
                        Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable candidate"),
                    }
                    barrier.decrement();
                },
            );
        }
        barrier.drained().await;

        let digests = std::mem::take(&mut *digests.lock());
        files
            .into_iter()
            .zip(digests)
            .filter_map(|(path, d)| d.map(|d| (path, d)))
            .collect()
    }

    async fn persist(&self, app: &AppManifest, dir: &Path) -> Result<(), StageError> {
        self.ctx
            .save(dir.join(APP_MANIFEST), to_pretty_json(app)?)
            .await?;
        Ok(())
    }
}

/// Rewrite a mini-game's merged manifest into `game.json`.
///
/// The `subContext` key is dropped. Returns its value when present so the
/// caller can locate the sub-context script.
pub async fn rewrite_game_config(ctx: &Context, dir: &Path) -> Result<Option<Value>, StageError> {
    let raw = ctx.read(dir.join(MERGED_MANIFEST)).await?;
    let mut config: Map<String, Value> = serde_json::from_slice(&raw)?;
    let sub_context = config.remove("subContext");
    ctx.save(dir.join("game.json"), to_pretty_json(&config)?).await?;
    Ok(sub_context)
}
