//! The binary layout of a segment file.
//!
//! ```text
//! [ prefix (32 bytes) ][ directory (dir_len bytes) ][ blocks ... ]
//! ```
//!
//! The prefix holds the magic bytes, the format version, the codec, the
//! column and row counts along with the length and CRC32 of the directory.
//! The directory lists every block in the file, the row id block first.
//! All integers are little endian.

use super::{BlockMeta, Codec, ColumnChunkMeta};
use crate::StoreError;

pub(crate) const MAGIC: &[u8; 8] = b"STRATSEG";
pub(crate) const FORMAT_VERSION: u16 = 1;
pub(crate) const HEADER_LEN: usize = 32;
const ROW_IDS_TAG: u8 = 0;

#[derive(Debug, Clone, PartialEq)]
/// A single entry of the block directory.
pub(crate) struct DirectoryEntry {
    pub name: String,
    /// `0` for the row id block, otherwise the column type tag.
    pub type_tag: u8,
    pub block: BlockMeta,
}

impl DirectoryEntry {
    pub(crate) fn row_ids(block: BlockMeta) -> Self {
        Self {
            name: String::new(),
            type_tag: ROW_IDS_TAG,
            block,
        }
    }

    pub(crate) fn column(meta: &ColumnChunkMeta) -> Self {
        Self {
            name: meta.name.clone(),
            type_tag: meta.data_type.as_u8(),
            block: meta.block,
        }
    }

    fn encoded_len(&self) -> usize {
        2 + self.name.len() + 1 + 8 + 8 + 4
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SegmentHeader {
    pub codec: Codec,
    pub row_count: u64,
    /// The row id block followed by one entry per column.
    pub entries: Vec<DirectoryEntry>,
}

impl SegmentHeader {
    /// The length of the prefix plus the directory.
    pub(crate) fn encoded_len(entries: &[DirectoryEntry]) -> usize {
        HEADER_LEN + entries.iter().map(DirectoryEntry::encoded_len).sum::<usize>()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut directory = Vec::new();
        for entry in self.entries.iter() {
            directory.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            directory.extend_from_slice(entry.name.as_bytes());
            directory.push(entry.type_tag);
            directory.extend_from_slice(&entry.block.offset.to_le_bytes());
            directory.extend_from_slice(&entry.block.length.to_le_bytes());
            directory.extend_from_slice(&entry.block.checksum.to_le_bytes());
        }

        let column_count = self.entries.len().saturating_sub(1) as u32;

        let mut buffer = Vec::with_capacity(HEADER_LEN + directory.len());
        buffer.extend_from_slice(MAGIC);
        buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buffer.push(self.codec.as_u8());
        buffer.push(0);
        buffer.extend_from_slice(&column_count.to_le_bytes());
        buffer.extend_from_slice(&self.row_count.to_le_bytes());
        buffer.extend_from_slice(&(directory.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&crc32fast::hash(&directory).to_le_bytes());
        buffer.extend_from_slice(&directory);
        buffer
    }

    /// Decodes the fixed prefix, returning its fields and the directory length.
    pub(crate) fn decode_prefix(
        prefix: &[u8; HEADER_LEN],
    ) -> Result<(PrefixInfo, usize), StoreError> {
        if &prefix[0..8] != MAGIC {
            return Err(StoreError::Corrupted("segment magic bytes mismatch".into()));
        }

        let version = u16::from_le_bytes([prefix[8], prefix[9]]);
        if version != FORMAT_VERSION {
            return Err(StoreError::Corrupted(format!(
                "unsupported segment format version {version}"
            )));
        }

        let codec = Codec::from_u8(prefix[10]).ok_or_else(|| {
            StoreError::Corrupted(format!("unknown segment codec {}", prefix[10]))
        })?;
        let column_count = read_u32(&prefix[12..16]);
        let row_count = read_u64(&prefix[16..24]);
        let dir_len = read_u32(&prefix[24..28]) as usize;
        let dir_crc = read_u32(&prefix[28..32]);

        let info = PrefixInfo {
            codec,
            column_count,
            row_count,
            dir_crc,
        };

        Ok((info, dir_len))
    }

    pub(crate) fn decode_directory(
        info: PrefixInfo,
        directory: &[u8],
    ) -> Result<Self, StoreError> {
        if crc32fast::hash(directory) != info.dir_crc {
            return Err(StoreError::Corrupted(
                "segment directory checksum mismatch".into(),
            ));
        }

        let expected_entries = info.column_count as usize + 1;
        let mut entries = Vec::with_capacity(expected_entries);
        let mut cursor = directory;
        while !cursor.is_empty() {
            let (entry, rest) = decode_entry(cursor)?;
            entries.push(entry);
            cursor = rest;
        }

        if entries.len() != expected_entries {
            return Err(StoreError::Corrupted(format!(
                "segment directory lists {} blocks, expected {expected_entries}",
                entries.len()
            )));
        }

        if entries[0].type_tag != ROW_IDS_TAG {
            return Err(StoreError::Corrupted(
                "segment directory does not start with the row id block".into(),
            ));
        }

        Ok(Self {
            codec: info.codec,
            row_count: info.row_count,
            entries,
        })
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct PrefixInfo {
    codec: Codec,
    column_count: u32,
    row_count: u64,
    dir_crc: u32,
}

fn decode_entry(buf: &[u8]) -> Result<(DirectoryEntry, &[u8]), StoreError> {
    let truncated = || StoreError::Corrupted("segment directory is truncated".into());

    if buf.len() < 2 {
        return Err(truncated());
    }
    let name_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let entry_len = 2 + name_len + 1 + 8 + 8 + 4;
    if buf.len() < entry_len {
        return Err(truncated());
    }

    let name = std::str::from_utf8(&buf[2..2 + name_len])
        .map_err(|_| StoreError::Corrupted("segment column name is not UTF-8".into()))?
        .to_string();

    let mut pos = 2 + name_len;
    let type_tag = buf[pos];
    pos += 1;
    let offset = read_u64(&buf[pos..pos + 8]);
    pos += 8;
    let length = read_u64(&buf[pos..pos + 8]);
    pos += 8;
    let checksum = read_u32(&buf[pos..pos + 4]);

    let entry = DirectoryEntry {
        name,
        type_tag,
        block: BlockMeta {
            offset,
            length,
            checksum,
        },
    };

    Ok((entry, &buf[entry_len..]))
}

fn read_u32(buf: &[u8]) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&buf[..4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(bytes)
}
