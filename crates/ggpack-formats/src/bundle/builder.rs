//! Bundle builder

use super::error::{BundleError, BundleResult};
use super::header::{BundleHeader, STORED_SENTINEL};

/// Default block size used by the archive (256 KiB)
pub const DEFAULT_BLOCK_SIZE: u32 = 0x40000;

/// Builder for bundle containers
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    block_size: u32,
    first_block_decoder: Option<u32>,
}

impl BundleBuilder {
    /// Create a builder with the default block size
    pub fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            first_block_decoder: None,
        }
    }

    /// Set the decompressed size of each block
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Override the decoder id written into the header
    pub fn with_first_block_decoder(mut self, decoder: u32) -> Self {
        self.first_block_decoder = Some(decoder);
        self
    }

    /// Build a stored bundle: every block is the sentinel plus raw bytes
    pub fn build_stored(&self, data: &[u8]) -> BundleResult<Vec<u8>> {
        self.build_with(data, |block| {
            let mut out = Vec::with_capacity(block.len() + 2);
            out.extend_from_slice(&STORED_SENTINEL);
            out.extend_from_slice(block);
            out
        })
    }

    /// Build a bundle, encoding each block with `encode`
    pub fn build_with<F>(&self, data: &[u8], encode: F) -> BundleResult<Vec<u8>>
    where
        F: Fn(&[u8]) -> Vec<u8>,
    {
        if self.block_size == 0 {
            return Err(BundleError::InvalidBlockSize(0));
        }
        let extracted = u32::try_from(data.len()).map_err(|_| {
            BundleError::InvalidHeader(format!("{} bytes exceed a bundle", data.len()))
        })?;

        let blocks: Vec<Vec<u8>> = data
            .chunks(self.block_size as usize)
            .map(|chunk| encode(chunk))
            .collect();
        let compressed: usize = blocks.iter().map(Vec::len).sum();
        let compressed = u32::try_from(compressed).map_err(|_| {
            BundleError::InvalidHeader(format!("{compressed} compressed bytes exceed a bundle"))
        })?;

        let mut header = BundleHeader::new(extracted, compressed, self.block_size)?;
        if let Some(decoder) = self.first_block_decoder {
            header.first_block_decoder = decoder;
        }

        let mut out = header.to_bytes()?;
        out.reserve(blocks.len() * 4 + compressed as usize);
        for block in &blocks {
            out.extend_from_slice(&(block.len() as u32).to_le_bytes());
        }
        for block in &blocks {
            out.extend_from_slice(block);
        }
        Ok(out)
    }
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_layout() {
        let data = BundleBuilder::new().with_block_size(2).build_stored(b"ABCD").unwrap();
        assert_eq!(data.len(), 60 + 8 + 8);
        assert_eq!(&data[68..], &[0xCC, 0x06, b'A', b'B', 0xCC, 0x06, b'C', b'D']);
        let header = BundleHeader::parse(&data).unwrap();
        assert_eq!(header.compressed_size, 8);
        assert_eq!(header.head_size, 2 * 4 + 0x30);
    }

    #[test]
    fn test_empty_payload() {
        let data = BundleBuilder::new().with_block_size(4).build_stored(&[]).unwrap();
        let header = BundleHeader::parse(&data).unwrap();
        assert_eq!(header.block_count, 0);
        assert_eq!(data.len(), BundleHeader::LEN);
        assert!(header.is_stored());
    }

    #[test]
    fn test_decoder_override() {
        let data = BundleBuilder::new()
            .with_block_size(4)
            .with_first_block_decoder(0x0d)
            .build_stored(b"xy")
            .unwrap();
        assert_eq!(BundleHeader::parse(&data).unwrap().first_block_decoder, 0x0d);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(BundleBuilder::new().with_block_size(0).build_stored(b"x").is_err());
    }
}
