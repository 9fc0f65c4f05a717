//! Record error types

use thiserror::Error;

use crate::codec::CodecError;

/// Record-specific error type
#[derive(Debug, Error)]
pub enum RecordError {
    /// Record had a different tag than the caller expected
    #[error("expected {expected} record, found {found}")]
    UnexpectedTag {
        /// Tag the caller asked for
        expected: &'static str,
        /// Tag found in the data, rendered printable
        found: String,
    },

    /// Declared length is too small for the record's fixed fields
    #[error("invalid record length {length} (minimum {minimum})")]
    InvalidLength {
        /// Declared length
        length: u32,
        /// Smallest valid length for the record kind
        minimum: u32,
    },

    /// Record content does not fit in a 32-bit length field
    #[error("record too large: {0} bytes")]
    TooLarge(usize),

    /// Truncated or malformed field
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type for record operations
pub type RecordResult<T> = Result<T, RecordError>;
