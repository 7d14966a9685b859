//! Shared helpers for building packages in tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const FIRST_MARK: u8 = 0xBE;
pub const LAST_MARK: u8 = 0xED;
pub const HEADER_LEN: usize = 14;

/// Helper function to create a test directory
pub fn setup_test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Encode `files` into a package with payloads laid out in order.
pub fn encode_package(files: &[(&str, &[u8])]) -> Vec<u8> {
    let table_len: usize = 4 + files.iter().map(|(name, _)| 12 + name.len()).sum::<usize>();
    let data_len: usize = files.iter().map(|(_, data)| data.len()).sum();

    let mut table = Vec::with_capacity(table_len);
    table.extend_from_slice(&(files.len() as u32).to_be_bytes());
    let mut offset = HEADER_LEN + table_len;
    for (name, data) in files {
        table.extend_from_slice(&(name.len() as u32).to_be_bytes());
        table.extend_from_slice(name.as_bytes());
        table.extend_from_slice(&(offset as u32).to_be_bytes());
        table.extend_from_slice(&(data.len() as u32).to_be_bytes());
        offset += data.len();
    }

    let mut out = header(FIRST_MARK, table_len as u32, data_len as u32, LAST_MARK);
    out.extend_from_slice(&table);
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

/// Raw 14-byte header.
pub fn header(first: u8, table_length: u32, data_length: u32, last: u8) -> Vec<u8> {
    let mut out = vec![first];
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&table_length.to_be_bytes());
    out.extend_from_slice(&data_length.to_be_bytes());
    out.push(last);
    out
}

/// Write an encoded package named `name` into `dir`.
pub fn write_package(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, encode_package(files)).expect("Failed to write package");
    path
}

/// Read a file as UTF-8, panicking with the path on failure.
pub fn read_text(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}

/// Read a JSON file.
pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&read_text(path)).unwrap_or_else(|e| panic!("bad JSON in {}: {}", path.display(), e))
}
