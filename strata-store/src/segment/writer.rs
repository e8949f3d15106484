use std::io;
use std::path::Path;

use serde::Serialize;
use strata_types::{ColumnData, Field};
use tokio::io::AsyncWriteExt;
use tracing::{instrument, trace};

use super::format::{DirectoryEntry, SegmentHeader};
use super::{
    get_segment_file_path,
    get_temp_file_path,
    BlockMeta,
    Codec,
    ColumnChunkMeta,
    SegmentDescriptor,
};
use crate::manifest::SegmentId;
use crate::StoreError;

/// A fully encoded segment ready to be written to disk.
#[derive(Debug)]
pub(crate) struct EncodedSegment {
    pub descriptor: SegmentDescriptor,
    pub bytes: Vec<u8>,
}

/// Encodes a set of rows into the segment file format.
///
/// `row_ids` must be ascending and of the same length as every column.
pub(crate) fn encode_segment(
    row_ids: &[u64],
    fields: &[Field],
    columns: &[ColumnData],
    compression_level: i32,
) -> Result<EncodedSegment, StoreError> {
    debug_assert_eq!(fields.len(), columns.len());

    let (Some(&first), Some(&last)) = (row_ids.first(), row_ids.last()) else {
        return Err(StoreError::Encode("cannot encode an empty segment".into()));
    };

    if let Some(column) = columns.iter().find(|c| c.len() != row_ids.len()) {
        return Err(StoreError::Encode(format!(
            "column of {} values does not match {} row ids",
            column.len(),
            row_ids.len(),
        )));
    }

    let codec = Codec::from_compression_level(compression_level);

    let mut blocks = Vec::with_capacity(columns.len() + 1);
    blocks.push(encode_block(row_ids, codec, compression_level)?);
    for column in columns {
        blocks.push(encode_block(column, codec, compression_level)?);
    }

    // Directory entries are fixed width for a given name, so offsets can be
    // assigned before the directory itself is encoded.
    let names = std::iter::once("").chain(fields.iter().map(|f| f.name.as_str()));
    let placeholder: Vec<DirectoryEntry> = names
        .map(|name| DirectoryEntry {
            name: name.to_string(),
            type_tag: 0,
            block: BlockMeta {
                offset: 0,
                length: 0,
                checksum: 0,
            },
        })
        .collect();
    let mut offset = SegmentHeader::encoded_len(&placeholder) as u64;

    let mut metas = Vec::with_capacity(blocks.len());
    for block in blocks.iter() {
        let length = block.len() as u64;
        metas.push(BlockMeta {
            offset,
            length,
            checksum: crc32fast::hash(block),
        });
        offset += length;
    }

    let row_ids_block = metas[0];
    let chunks: Vec<ColumnChunkMeta> = fields
        .iter()
        .zip(columns)
        .zip(&metas[1..])
        .map(|((field, column), block)| ColumnChunkMeta {
            name: field.name.clone(),
            data_type: field.data_type,
            block: *block,
            stats: column.stats(),
        })
        .collect();

    let mut entries = Vec::with_capacity(chunks.len() + 1);
    entries.push(DirectoryEntry::row_ids(row_ids_block));
    entries.extend(chunks.iter().map(DirectoryEntry::column));

    let header = SegmentHeader {
        codec,
        row_count: row_ids.len() as u64,
        entries,
    };

    let mut bytes = header.encode();
    bytes.reserve((offset as usize).saturating_sub(bytes.len()));
    for block in blocks {
        bytes.extend_from_slice(&block);
    }
    debug_assert_eq!(bytes.len() as u64, offset);

    let descriptor = SegmentDescriptor {
        id: SegmentId::new(),
        row_range: first..last + 1,
        row_count: row_ids.len() as u64,
        file_len: bytes.len() as u64,
        codec,
        row_ids: row_ids_block,
        columns: chunks,
    };

    Ok(EncodedSegment { descriptor, bytes })
}

fn encode_block<T: Serialize + ?Sized>(
    value: &T,
    codec: Codec,
    level: i32,
) -> Result<Vec<u8>, StoreError> {
    let raw = rmp_serde::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))?;
    match codec {
        Codec::None => Ok(raw),
        Codec::Zstd => Ok(zstd::encode_all(raw.as_slice(), level)?),
    }
}

#[instrument(skip(bytes), fields(len = bytes.len()))]
/// Durably writes the segment file.
///
/// The data is written to a temporary file, synced, then renamed into place
/// and the directory is synced so the rename itself survives a crash.
pub(crate) async fn write_segment_file(
    base_path: &Path,
    id: SegmentId,
    bytes: &[u8],
) -> io::Result<()> {
    let temp_path = get_temp_file_path(base_path, id);
    let final_path = get_segment_file_path(base_path, id);

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        trace!("Temporary segment file synced");

        tokio::fs::rename(&temp_path, &final_path).await?;
        sync_dir(base_path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }

    result
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = tokio::fs::File::open(path).await?;
    dir.sync_all().await
}

#[cfg(test)]
mod tests {
    use strata_types::DataType;

    use super::*;

    fn sample() -> (Vec<u64>, Vec<Field>, Vec<ColumnData>) {
        let fields = vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::String),
        ];
        let columns = vec![
            ColumnData::Int64(vec![Some(1), Some(2), None]),
            ColumnData::String(vec![Some("a".into()), None, Some("c".into())]),
        ];
        (vec![10, 11, 12], fields, columns)
    }

    #[test]
    fn test_encode_segment_descriptor() {
        let (row_ids, fields, columns) = sample();
        let encoded = encode_segment(&row_ids, &fields, &columns, 3).unwrap();

        let descriptor = encoded.descriptor;
        assert_eq!(descriptor.row_range, 10..13);
        assert_eq!(descriptor.row_count, 3);
        assert_eq!(descriptor.codec, Codec::Zstd);
        assert_eq!(descriptor.file_len, encoded.bytes.len() as u64);
        assert_eq!(descriptor.columns.len(), 2);

        let id = descriptor.column("id").unwrap();
        assert_eq!(id.stats.null_count, 1);

        let block = id.block;
        let slice =
            &encoded.bytes[block.offset as usize..(block.offset + block.length) as usize];
        assert_eq!(crc32fast::hash(slice), block.checksum);
    }

    #[test]
    fn test_encode_rejects_mismatched_lengths() {
        let (_, fields, columns) = sample();
        let err = encode_segment(&[1, 2], &fields, &columns, 3).unwrap_err();
        assert!(matches!(err, StoreError::Encode(_)));
    }

    #[tokio::test]
    async fn test_write_segment_file_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let (row_ids, fields, columns) = sample();
        let encoded = encode_segment(&row_ids, &fields, &columns, 0).unwrap();
        let id = encoded.descriptor.id;

        write_segment_file(dir.path(), id, &encoded.bytes)
            .await
            .expect("Write segment");

        let written = std::fs::read(get_segment_file_path(dir.path(), id)).unwrap();
        assert_eq!(written, encoded.bytes);
        assert!(!get_temp_file_path(dir.path(), id).exists());
    }
}
