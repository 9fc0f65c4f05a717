//! Block-framed bundle containers
//!
//! A bundle is a sixty byte [`BundleHeader`], a table of `block_count`
//! little-endian `u32` block payload sizes, then the block payloads. Every
//! block decodes to `block_size` bytes except the last, which holds the
//! remainder of `extracted_size`.
//!
//! Blocks are normally compressed by an external codec represented here by
//! [`BlockDecompressor`]. A block whose first byte is `0xCC` is stored: a
//! two byte sentinel followed by the raw bytes. A bundle in which every block
//! is stored satisfies `compressed_size == extracted_size + 2 * block_count`
//! and can be patched in place, since every extracted offset maps to a
//! fixed position (see [`BundleHeader::stored_position`]).

mod builder;
mod error;
mod header;

pub use builder::{BundleBuilder, DEFAULT_BLOCK_SIZE};
pub use error::{BundleError, BundleResult};
pub use header::{
    BundleHeader, DEFAULT_FIRST_BLOCK_DECODER, STORED_SENTINEL, StoredSpan, block_count_for,
};

use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::BinRead;

/// First byte of a stored block
pub const STORED_MARKER: u8 = 0xCC;

/// Decoder for compressed blocks
///
/// Implementations receive the raw block payload and the size it must
/// decode to. Stored blocks never reach the decompressor.
pub trait BlockDecompressor {
    /// Decode one block
    fn decompress(&self, compressed: &[u8], expected: usize) -> BundleResult<Vec<u8>>;
}

/// Decompressor that only accepts stored blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredOnly;

impl BlockDecompressor for StoredOnly {
    fn decompress(&self, compressed: &[u8], _expected: usize) -> BundleResult<Vec<u8>> {
        Err(BundleError::UnsupportedCodec {
            marker: compressed.first().copied().unwrap_or_default(),
            block: 0,
        })
    }
}

/// Decode a single block to exactly `expected` bytes
pub fn decompress_block(
    codec: &dyn BlockDecompressor,
    block: &[u8],
    expected: usize,
    index: usize,
) -> BundleResult<Vec<u8>> {
    let decoded = if block.first() == Some(&STORED_MARKER) {
        block.get(2..).unwrap_or_default().iter().take(expected).copied().collect()
    } else {
        codec.decompress(block, expected).map_err(|e| match e {
            BundleError::UnsupportedCodec { marker, .. } => BundleError::UnsupportedCodec {
                marker,
                block: index,
            },
            other => other,
        })?
    };
    if decoded.len() != expected {
        return Err(BundleError::DecompressionFailed(format!(
            "block {index} decoded to {} bytes, expected {expected}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

/// Header and block size table of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    /// Fixed header
    pub header: BundleHeader,
    /// Payload size of every block
    pub block_sizes: Vec<u32>,
}

impl BundleLayout {
    /// Read header and block table at the reader's current position
    pub fn read<R: Read + Seek>(reader: &mut R) -> BundleResult<Self> {
        let header = BundleHeader::read(reader)?;
        header.validate()?;
        let mut table = vec![0u8; header.block_count as usize * 4];
        reader.read_exact(&mut table)?;
        let block_sizes = table
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        Ok(Self {
            header,
            block_sizes,
        })
    }

    /// Parse from the start of an in-memory bundle
    pub fn parse(data: &[u8]) -> BundleResult<Self> {
        Self::read(&mut Cursor::new(data))
    }

    /// Offset of block `index` payload, relative to the bundle start
    pub fn block_position(&self, index: usize) -> u64 {
        self.header.table_len()
            + self.block_sizes[..index]
                .iter()
                .map(|&s| u64::from(s))
                .sum::<u64>()
    }

    /// Total bundle length on disk
    pub fn total_len(&self) -> u64 {
        self.block_position(self.block_sizes.len())
    }
}

/// Decompress a whole bundle found at `offset`
pub fn extract<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    codec: &dyn BlockDecompressor,
) -> BundleResult<Vec<u8>> {
    extract_range(reader, offset, 0, u64::MAX, codec)
}

/// Decompress `len` bytes starting at extracted offset `start` from the
/// bundle at `offset`
///
/// Only the blocks covering the range are read and decoded. The range is
/// clamped to the extracted size.
pub fn extract_range<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    start: u64,
    len: u64,
    codec: &dyn BlockDecompressor,
) -> BundleResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let layout = BundleLayout::read(reader)?;
    let extracted = u64::from(layout.header.extracted_size);
    let end = start.saturating_add(len).min(extracted);
    if start >= end {
        return Ok(Vec::new());
    }

    let bs = u64::from(layout.header.block_size);
    let first = (start / bs) as usize;
    let last = ((end - 1) / bs) as usize;

    reader.seek(SeekFrom::Start(offset + layout.block_position(first)))?;
    let mut out = Vec::with_capacity((last - first + 1) * bs as usize);
    for index in first..=last {
        let mut block = vec![0u8; layout.block_sizes[index] as usize];
        reader.read_exact(&mut block)?;
        let expected = layout.header.expected_block_len(index as u32);
        out.extend_from_slice(&decompress_block(codec, &block, expected, index)?);
    }

    let base = first as u64 * bs;
    Ok(out[(start - base) as usize..(end - base) as usize].to_vec())
}

/// Decompress an in-memory bundle
pub fn extract_bytes(data: &[u8], codec: &dyn BlockDecompressor) -> BundleResult<Vec<u8>> {
    extract(&mut Cursor::new(data), 0, codec)
}
