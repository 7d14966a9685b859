//! Decoder for the wxapkg container format.
//!
//! Layout (all integers big-endian `u32`):
//!
//! ```text
//! 0      1          5              9             13     14
//! | 0xBE | reserved | table_length | data_length | 0xED |
//! | file_count | { name_len | name | offset | size } * file_count |
//! | payload ...                                                   |
//! ```
//!
//! The table section is `table_length` bytes long and starts right after the
//! header; entry offsets are absolute positions within the whole container.

use crate::error::{FormatError, UnpackError};
use crate::types::{ArchiveHeader, ArchiveInfo, FileEntry};
use std::path::Path;
use tracing::debug;

/// Sentinel at offset 0.
pub const FIRST_MARK: u8 = 0xBE;

/// Sentinel at offset 13.
pub const LAST_MARK: u8 = 0xED;

/// Size of the fixed header.
pub const HEADER_LEN: usize = 14;

/// Parse the fixed header from the first 14 bytes of a container.
///
/// Both markers must match; a mismatch means none of the following offsets
/// can be trusted, so there is no partial recovery.
pub fn parse_header(bytes: &[u8]) -> Result<ArchiveHeader, FormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(FormatError::TruncatedHeader { len: bytes.len() });
    }

    let first = bytes[0];
    let last = bytes[13];
    if first != FIRST_MARK || last != LAST_MARK {
        return Err(FormatError::BadMarker { first, last });
    }

    let header = ArchiveHeader {
        reserved: be_u32(&bytes[1..5]),
        table_length: be_u32(&bytes[5..9]),
        data_length: be_u32(&bytes[9..13]),
    };
    debug!(
        reserved = header.reserved,
        table_length = header.table_length,
        data_length = header.data_length,
        "parsed package header"
    );
    Ok(header)
}

/// Parse the file table section into entries, in declaration order.
///
/// Any length field that points past the end of `table` is fatal.
pub fn parse_table(table: &[u8]) -> Result<Vec<FileEntry>, FormatError> {
    let mut cursor = TableCursor { buf: table, pos: 0 };

    let count = cursor.read_u32()? as usize;
    // Each record takes at least 12 bytes; don't trust the count for capacity.
    let mut entries = Vec::with_capacity(count.min(table.len() / 12));

    for _ in 0..count {
        let name_len = cursor.read_u32()? as usize;
        let name_at = cursor.pos;
        let name_bytes = cursor.take(name_len)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| FormatError::InvalidName { offset: name_at })?
            .to_string();
        let offset = cursor.read_u32()?;
        let size = cursor.read_u32()?;
        entries.push(FileEntry { name, offset, size });
    }

    if cursor.pos < table.len() {
        debug!(
            trailing = table.len() - cursor.pos,
            "ignoring padding after file table"
        );
    }

    Ok(entries)
}

/// Parse header and table of a whole container and validate every entry range.
///
/// An entry whose `offset + size` exceeds the container invalidates the whole
/// package; nothing is extracted from it.
pub fn read_index(buf: &[u8]) -> Result<(ArchiveHeader, Vec<FileEntry>), FormatError> {
    let header = parse_header(buf)?;

    let table_end = HEADER_LEN + header.table_length as usize;
    if table_end > buf.len() {
        return Err(FormatError::TruncatedTable {
            offset: HEADER_LEN,
            needed: header.table_length as usize,
            available: buf.len() - HEADER_LEN,
        });
    }

    let entries = parse_table(&buf[HEADER_LEN..table_end])?;
    for entry in &entries {
        check_bounds(entry, buf.len())?;
    }

    debug!(entries = entries.len(), "parsed file table");
    Ok((header, entries))
}

/// Fail if the entry's byte range does not fit in the container.
pub fn check_bounds(entry: &FileEntry, container_len: usize) -> Result<(), FormatError> {
    let end = entry.offset as u64 + entry.size as u64;
    if end > container_len as u64 {
        return Err(FormatError::EntryOutOfBounds {
            name: entry.name.clone(),
            offset: entry.offset,
            size: entry.size,
            container_len,
        });
    }
    Ok(())
}

/// Probe a package to retrieve its header and file table without extracting.
pub async fn probe_archive(path: &Path) -> Result<ArchiveInfo, UnpackError> {
    let buf = tokio::fs::read(path)
        .await
        .map_err(|e| UnpackError::reading(path, e))?;
    let (header, entries) = read_index(&buf)?;
    Ok(ArchiveInfo {
        header,
        container_len: buf.len() as u64,
        entries,
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

struct TableCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TableCursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let available = self.buf.len() - self.pos;
        if len > available {
            return Err(FormatError::TruncatedTable {
                offset: self.pos,
                needed: len,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, FormatError> {
        self.take(4).map(be_u32)
    }
}
