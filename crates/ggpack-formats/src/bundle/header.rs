//! Bundle header structure and stored-form addressing

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use super::error::{BundleError, BundleResult};

/// Two bytes that open every block of a stored bundle
pub const STORED_SENTINEL: [u8; 2] = [0xCC, 0x06];

/// Decoder id written into headers this crate produces
pub const DEFAULT_FIRST_BLOCK_DECODER: u32 = 0x08;

/// Fixed bundle header: fifteen little-endian `u32` words
///
/// Only the extracted size, compressed size, block count and block size
/// drive decoding. The remaining words are written with the values the
/// archive's own tooling uses and carried otherwise.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct BundleHeader {
    /// Total decompressed size
    pub extracted_size: u32,
    /// Total size of the block payloads
    pub compressed_size: u32,
    /// `block_count * 4 + 0x30`
    pub head_size: u32,
    /// Decoder id of the first block
    pub first_block_decoder: u32,
    /// Always one in observed archives
    pub unknown_flag: u32,
    /// 64-bit copy of `extracted_size`
    pub extracted_size_64: u64,
    /// 64-bit copy of `compressed_size`
    pub compressed_size_64: u64,
    /// Number of blocks
    pub block_count: u32,
    /// Decompressed size of every block but the last
    pub block_size: u32,
    /// Zero
    pub reserved: [u32; 4],
}

impl BundleHeader {
    /// Encoded header size
    pub const LEN: usize = 60;

    /// Build a header for `extracted_size` bytes split into `block_size`
    /// blocks whose payloads total `compressed_size`
    pub fn new(extracted_size: u32, compressed_size: u32, block_size: u32) -> BundleResult<Self> {
        if block_size == 0 {
            return Err(BundleError::InvalidBlockSize(0));
        }
        let block_count = block_count_for(u64::from(extracted_size), block_size);
        Ok(Self {
            extracted_size,
            compressed_size,
            head_size: block_count * 4 + 0x30,
            first_block_decoder: DEFAULT_FIRST_BLOCK_DECODER,
            unknown_flag: 1,
            extracted_size_64: u64::from(extracted_size),
            compressed_size_64: u64::from(compressed_size),
            block_count,
            block_size,
            reserved: [0; 4],
        })
    }

    /// Header of a stored bundle holding `extracted_size` bytes
    pub fn stored(extracted_size: u32, block_size: u32) -> BundleResult<Self> {
        let mut header = Self::new(extracted_size, 0, block_size)?;
        let compressed = u64::from(extracted_size) + 2 * u64::from(header.block_count);
        header.compressed_size = u32::try_from(compressed).map_err(|_| {
            BundleError::InvalidHeader(format!("stored size {compressed} exceeds 32 bits"))
        })?;
        header.compressed_size_64 = compressed;
        Ok(header)
    }

    /// Parse the header from the start of `data`
    pub fn parse(data: &[u8]) -> BundleResult<Self> {
        let header = Self::read(&mut Cursor::new(data))?;
        header.validate()?;
        Ok(header)
    }

    /// Encode the header
    pub fn to_bytes(&self) -> BundleResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::LEN));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Check that the block geometry can describe the extracted size
    pub fn validate(&self) -> BundleResult<()> {
        if self.block_size == 0 {
            return Err(BundleError::InvalidBlockSize(0));
        }
        let covered = u64::from(self.block_count) * u64::from(self.block_size);
        if covered < u64::from(self.extracted_size) {
            return Err(BundleError::InvalidHeader(format!(
                "{} blocks of {} bytes cannot hold {} bytes",
                self.block_count, self.block_size, self.extracted_size
            )));
        }
        Ok(())
    }

    /// Whether every block is held in the sentinel-prefixed stored form
    pub const fn is_stored(&self) -> bool {
        self.extracted_size as u64 + 2 * self.block_count as u64 == self.compressed_size as u64
    }

    /// Header plus block size table
    pub const fn table_len(&self) -> u64 {
        Self::LEN as u64 + 4 * self.block_count as u64
    }

    /// Decompressed size of block `index`
    pub fn expected_block_len(&self, index: u32) -> usize {
        let consumed = u64::from(index) * u64::from(self.block_size);
        let remaining = u64::from(self.extracted_size).saturating_sub(consumed);
        remaining.min(u64::from(self.block_size)) as usize
    }

    /// Position of extracted byte `offset` inside a stored bundle, relative
    /// to the bundle start
    pub const fn stored_position(&self, offset: u64) -> u64 {
        let bs = self.block_size as u64;
        self.table_len() + offset + 2 * (offset / bs + 1)
    }

    /// Position of the sentinel of block `index` inside a stored bundle
    pub const fn sentinel_position(&self, index: u64) -> u64 {
        self.table_len() + index * (self.block_size as u64 + 2)
    }

    /// Split the extracted range `offset..offset + len` into contiguous
    /// runs of a stored bundle, one per block touched
    pub fn stored_spans(&self, offset: u64, len: usize) -> BundleResult<Vec<StoredSpan>> {
        let extracted = u64::from(self.extracted_size);
        let end = offset + len as u64;
        if end > extracted {
            return Err(BundleError::OutOfRange {
                offset,
                length: len as u64,
                extracted,
            });
        }
        let bs = u64::from(self.block_size);
        let mut spans = Vec::new();
        let mut cursor = offset;
        while cursor < end {
            let block = cursor / bs;
            let run = (bs - cursor % bs).min(end - cursor);
            let start = (cursor - offset) as usize;
            spans.push(StoredSpan {
                sentinel_position: self.sentinel_position(block),
                position: self.stored_position(cursor),
                range: start..start + run as usize,
            });
            cursor += run;
        }
        Ok(spans)
    }
}

/// Number of blocks needed for `extracted` bytes
pub fn block_count_for(extracted: u64, block_size: u32) -> u32 {
    extracted.div_ceil(u64::from(block_size.max(1))) as u32
}

/// Contiguous run of payload bytes inside a stored bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSpan {
    /// Sentinel of the block holding this run, relative to the bundle start
    pub sentinel_position: u64,
    /// Where the run starts, relative to the bundle start
    pub position: u64,
    /// Slice of the payload written at `position`
    pub range: std::ops::Range<usize>,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_sixty_bytes() {
        let header = BundleHeader::stored(10, 4).unwrap();
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), BundleHeader::LEN);

        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(0), 10);
        assert_eq!(word(1), 16);
        assert_eq!(word(2), 3 * 4 + 0x30);
        assert_eq!(word(3), 8);
        assert_eq!(word(4), 1);
        assert_eq!(word(5), 10);
        assert_eq!(word(6), 0);
        assert_eq!(word(7), 16);
        assert_eq!(word(9), 3);
        assert_eq!(word(10), 4);
        assert_eq!(&bytes[44..], &[0u8; 16]);

        assert_eq!(BundleHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_stored_detection() {
        let stored = BundleHeader::stored(9, 4).unwrap();
        assert!(stored.is_stored());
        assert_eq!(stored.block_count, 3);

        let compressed = BundleHeader::new(9, 7, 4).unwrap();
        assert!(!compressed.is_stored());
    }

    #[test]
    fn test_expected_block_len_tracks_remaining() {
        let header = BundleHeader::stored(10, 4).unwrap();
        assert_eq!(header.expected_block_len(0), 4);
        assert_eq!(header.expected_block_len(1), 4);
        assert_eq!(header.expected_block_len(2), 2);
        assert_eq!(header.expected_block_len(3), 0);

        let exact = BundleHeader::stored(8, 4).unwrap();
        assert_eq!(exact.block_count, 2);
        assert_eq!(exact.expected_block_len(1), 4);
    }

    #[test]
    fn test_stored_position_skips_sentinels() {
        let header = BundleHeader::stored(8, 4).unwrap();
        let data_start = header.table_len();
        assert_eq!(data_start, 60 + 8);
        assert_eq!(header.stored_position(0), data_start + 2);
        assert_eq!(header.stored_position(3), data_start + 5);
        assert_eq!(header.stored_position(4), data_start + 8);
        assert_eq!(header.sentinel_position(1), data_start + 6);
    }

    #[test]
    fn test_stored_spans_cross_blocks() {
        let header = BundleHeader::stored(12, 4).unwrap();
        let spans = header.stored_spans(3, 6).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].range, 0..1);
        assert_eq!(spans[1].range, 1..5);
        assert_eq!(spans[2].range, 5..6);
        assert_eq!(spans[1].position, spans[1].sentinel_position + 2);

        assert!(matches!(
            header.stored_spans(10, 4),
            Err(BundleError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(BundleHeader::new(4, 4, 0).is_err());
        let mut header = BundleHeader::stored(8, 4).unwrap();
        header.block_count = 1;
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            BundleHeader::parse(&bytes),
            Err(BundleError::InvalidHeader(_))
        ));
    }
}
