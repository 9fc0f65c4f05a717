//! Index error types

use thiserror::Error;

use crate::bundle::BundleError;
use crate::codec::CodecError;

/// Index-specific error type
#[derive(Debug, Error)]
pub enum IndexError {
    /// Table truncated or malformed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// File entry refers to a bundle that is not in the bundle table
    #[error("file entry {entry} refers to bundle {bundle}, only {count} bundles listed")]
    BundleOutOfRange {
        /// File entry index
        entry: usize,
        /// Bundle index in the entry
        bundle: u32,
        /// Number of bundles in the table
        count: usize,
    },

    /// Path program lies outside the decoded path data
    #[error("path program {offset}+{size} outside path data of {available} bytes")]
    PathProgramOutOfRange {
        /// Program start
        offset: u32,
        /// Program size
        size: u32,
        /// Decoded path data size
        available: usize,
    },

    /// Bundle name is not valid UTF-8
    #[error("bundle name at offset {0} is not valid UTF-8")]
    InvalidBundleName(usize),

    /// Value does not fit its 32-bit field
    #[error("{field} value {value} does not fit in 32 bits")]
    FieldOverflow {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Nested path bundle failed to decode
    #[error("path bundle: {0}")]
    Bundle(#[from] BundleError),
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
