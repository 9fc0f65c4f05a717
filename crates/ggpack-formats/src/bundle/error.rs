//! Bundle error types

use thiserror::Error;

/// Bundle-specific error type
#[derive(Debug, Error)]
pub enum BundleError {
    /// Header fields are inconsistent
    #[error("invalid bundle header: {0}")]
    InvalidHeader(String),

    /// Block size of zero or beyond the 32-bit range
    #[error("invalid block size: {0}")]
    InvalidBlockSize(u64),

    /// Block decoded to the wrong size or the codec failed
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Block uses a codec the configured decompressor does not handle
    #[error("unsupported block codec 0x{marker:02X} in block {block}")]
    UnsupportedCodec {
        /// First byte of the block
        marker: u8,
        /// Block index
        block: usize,
    },

    /// Write attempted against a bundle that is still compressed
    #[error("bundle is not stored decompressed")]
    NotStored,

    /// Stored block does not start with the sentinel
    #[error("missing stored-block sentinel at bundle offset {position}: found {found:02X?}")]
    MissingSentinel {
        /// Position of the sentinel, relative to the bundle start
        position: u64,
        /// Bytes found instead
        found: [u8; 2],
    },

    /// Requested range lies outside the extracted data
    #[error("range {offset}+{length} outside extracted size {extracted}")]
    OutOfRange {
        /// Range start
        offset: u64,
        /// Range length
        length: u64,
        /// Extracted size of the bundle
        extracted: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for bundle operations
pub type BundleResult<T> = Result<T, BundleError>;
