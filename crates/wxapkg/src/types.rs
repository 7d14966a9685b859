//! Type definitions shared across the unpack pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Accumulated weight at which an intermediate file may be deleted.
pub const DELETE_THRESHOLD: u32 = 8;

/// Default ceiling on in-flight filesystem tasks.
pub const DEFAULT_IO_LIMIT: usize = 4096;

/// Fixed 14-byte container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Unused field between the first marker and the table length
    pub reserved: u32,

    /// Byte length of the file table that follows the header
    pub table_length: u32,

    /// Declared payload length (informational only)
    pub data_length: u32,
}

/// One file stored in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Name as stored, usually starting with `/`
    pub name: String,

    /// Absolute offset of the payload within the container
    pub offset: u32,

    /// Payload size in bytes
    pub size: u32,
}

impl FileEntry {
    /// Byte range of the payload within the container.
    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.size as usize
    }

    /// Lowercased extension of the entry name, without the dot.
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }
}

/// Metadata about a package, read without extracting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Parsed header fields
    pub header: ArchiveHeader,

    /// Total container size in bytes
    pub container_len: u64,

    /// Entries in declaration order
    pub entries: Vec<FileEntry>,
}

/// Options for unpacking a package.
#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Keep intermediate files even when every stage agrees they are redundant
    pub keep_intermediate: bool,

    /// Stop after extraction, skip all reconstruction
    pub report_only: bool,

    /// Output directory of the already-unpacked main package, for subpackages
    pub main_dir: Option<PathBuf>,

    /// Maximum number of filesystem tasks in flight
    pub io_limit: usize,

    /// Process several packages concurrently instead of one after another
    pub parallel: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            keep_intermediate: false,
            report_only: false,
            main_dir: None,
            io_limit: DEFAULT_IO_LIMIT,
            parallel: false,
        }
    }
}

/// Statistics about a completed extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Number of entries written
    pub files_extracted: u64,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Entries that could not be written, with the reason
    pub failed: Vec<(String, String)>,

    /// Duration of the extraction (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Per-path deletion scores contributed by reconstruction stages.
///
/// Contributions are additive; a path becomes deletable once its total
/// reaches [`DELETE_THRESHOLD`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionWeights(BTreeMap<PathBuf, u32>);

impl DeletionWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map holding a single contribution.
    pub fn single(path: impl Into<PathBuf>, weight: u32) -> Self {
        let mut weights = Self::new();
        weights.add(path, weight);
        weights
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, weight: u32) {
        *self.0.entry(path.into()).or_insert(0) += weight;
    }

    /// Add `weight` only if the path has no contribution yet.
    pub fn add_if_absent(&mut self, path: impl Into<PathBuf>, weight: u32) {
        self.0.entry(path.into()).or_insert(weight);
    }

    pub fn merge(&mut self, other: DeletionWeights) {
        for (path, weight) in other.0 {
            self.add(path, weight);
        }
    }

    pub fn get(&self, path: &Path) -> Option<u32> {
        self.0.get(path).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, u32)> {
        self.0.iter().map(|(p, w)| (p.as_path(), *w))
    }

    /// Paths whose accumulated weight reached the threshold.
    pub fn deletable(&self) -> Vec<PathBuf> {
        self.0
            .iter()
            .filter(|(_, w)| **w >= DELETE_THRESHOLD)
            .map(|(p, _)| p.clone())
            .collect()
    }
}

/// Outcome of processing one package.
#[derive(Debug, Clone, Default)]
pub struct UnpackReport {
    /// Directory the package was unpacked into
    pub output_dir: PathBuf,

    /// Extraction statistics
    pub stats: ExtractStats,

    /// Accumulated weights reported by reconstruction stages
    pub weights: DeletionWeights,

    /// Intermediate files removed after reconstruction
    pub deleted: Vec<PathBuf>,
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_reach_threshold() {
        let mut weights = DeletionWeights::new();
        weights.add("a.js", 4);
        weights.add("b.js", 8);
        weights.add("c.js", 0);
        assert_eq!(weights.deletable(), vec![PathBuf::from("b.js")]);

        weights.add("a.js", 4);
        assert_eq!(weights.get(Path::new("a.js")), Some(8));
        assert_eq!(
            weights.deletable(),
            vec![PathBuf::from("a.js"), PathBuf::from("b.js")]
        );
    }

    #[test]
    fn test_weights_zero_contribution_blocks_nothing_alone() {
        let mut weights = DeletionWeights::single("app-config.json", 0);
        assert!(weights.deletable().is_empty());

        weights.merge(DeletionWeights::single("app-config.json", 8));
        assert_eq!(weights.deletable(), vec![PathBuf::from("app-config.json")]);
    }

    #[test]
    fn test_add_if_absent() {
        let mut weights = DeletionWeights::single("page-frame.js", 3);
        weights.add_if_absent("page-frame.js", 8);
        weights.add_if_absent("other.js", 8);
        assert_eq!(weights.get(Path::new("page-frame.js")), Some(3));
        assert_eq!(weights.get(Path::new("other.js")), Some(8));
    }

    #[test]
    fn test_entry_range_and_extension() {
        let entry = FileEntry {
            name: "/pages/index/Index.JSON".to_string(),
            offset: 10,
            size: 5,
        };
        assert_eq!(entry.range(), 10..15);
        assert_eq!(entry.extension(), "json");
    }
}
