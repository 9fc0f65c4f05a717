//! In-place mutation engine for packed GGPK archives.
//!
//! A GGPK archive is a single large file holding a directory graph of
//! length-prefixed records. Most game content lives inside bundles: block
//! compressed containers whose contents are located through a hashed index
//! bundle. This crate opens such an archive, builds a flat catalog of every
//! record and bundle-resident file, and rewrites file contents in place:
//!
//! - **Top-level records** are overwritten where they fit, or relocated to a
//!   free record or the end of the archive with the parent pointer repointed
//! - **Bundle-resident files** are written into a bundle that has been
//!   rewritten in the stored (uncompressed) form, using a per-bundle
//!   free-space allocator; every index entry sharing the slot is patched
//! - **Originals** can be shadowed to a cache directory before the first
//!   overwrite, so the unmodified payload stays available
//!
//! # Storage Layout
//!
//! The session keeps three artifacts in its cache directory: a sidecar
//! catalog named after the archive path (skips the directory walk when the
//! archive fingerprint matches), `keeplist.dat` with the digests of shadowed
//! records, and a tree of shadowed payloads mirroring archive paths.
//!
//! # Concurrency
//!
//! A session owns a single read/write handle and process-local bookkeeping.
//! Opening the same archive from two sessions at once corrupts it; callers
//! must serialize access.
//!
//! # Example
//!
//! ```rust,ignore
//! use ggpack_storage::{ArchiveSession, SessionConfig};
//!
//! let config = SessionConfig::new("keep").with_track_originals(true);
//! let mut session = ArchiveSession::open("Content.ggpk", config)?;
//! let data = session.read("./Data/Mods.dat")?;
//! session.write("./Data/Mods.dat", &patched)?;
//! session.close()?;
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

use ggpack_formats::bundle::BundleError;
use ggpack_formats::index::IndexError;
use ggpack_formats::record::RecordError;

// Per-bundle slot tables and space allocation
pub mod allocator;

// Flat catalog, sidecar persistence and directory walk
pub mod catalog;

// Configuration
pub mod config;

// Compacted archive copies
pub mod defrag;

// Archive change detection
pub mod fingerprint;

// Open archive sessions
pub mod session;

// Original payload cache
pub mod shadow;

pub use allocator::{GrowthPolicy, Placement, PlacementKind, SlotTable};
pub use catalog::{BundledLocation, Catalog, CatalogEntry, LoadReport, RecordLocation};
pub use config::SessionConfig;
pub use session::ArchiveSession;
pub use shadow::ShadowCache;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive is not a GGPK file or is too small.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Path not present in the catalog.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A block decoded to the wrong size.
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// Index bundle could not be resolved.
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// Records were referenced but never reached by the walk.
    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    /// Write refused because the bundle is still compressed.
    #[error("Bundle not decompressed: {0}")]
    BundleNotDecompressed(String),

    /// Sidecar catalog or keeplist is malformed.
    #[error("Sidecar error: {0}")]
    Sidecar(String),

    /// No placement could be found for a payload.
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record codec error.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Bundle codec error.
    #[error("Bundle error: {0}")]
    Bundle(BundleError),
}

impl From<BundleError> for StorageError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::DecompressionFailed(msg) => Self::DecompressionFailed(msg),
            BundleError::NotStored => {
                Self::BundleNotDecompressed("bundle is still compressed".to_string())
            }
            BundleError::Io(io) => Self::Io(io),
            other => Self::Bundle(other),
        }
    }
}

impl From<IndexError> for StorageError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Bundle(inner) => inner.into(),
            other => Self::IndexCorrupt(other.to_string()),
        }
    }
}

/// Version information for the storage engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Catalog path of the archive root.
pub const ROOT_PATH: &str = ".";

/// Catalog prefix of every directory, file and bundle-resident path.
pub const PATH_PREFIX: &str = "./";

/// Directory holding bundle records.
pub const BUNDLE_DIR: &str = "./Bundles2/";

/// Extension of bundle record names.
pub const BUNDLE_SUFFIX: &str = ".bundle.bin";

/// Default catalog path of the index bundle.
pub const DEFAULT_INDEX_PATH: &str = "./Bundles2/_.index.bin";

/// Catalog path of the bundle record for an index bundle name.
pub fn bundle_catalog_path(name: &str) -> String {
    format!("{BUNDLE_DIR}{name}{BUNDLE_SUFFIX}")
}
