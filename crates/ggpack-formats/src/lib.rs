//! Record, bundle and index formats for packed GGPK archives
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::doc_markdown)] // Format-specific terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::derive_partial_eq_without_eq)] // Binary format structs
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! This crate provides symmetric (parser and builder) implementations for the
//! structures found inside a GGPK archive: the directory graph records, the
//! block-framed bundle containers and the hashed bundle index.
//!
//! # Supported Formats
//!
//! - **Records**: `GGPK` root, `PDIR` directory, `FILE` and `FREE` records
//! - **Bundle**: block-framed container with a per-block size table
//! - **Index**: bundle table, hashed file table and path bytecode
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: every structure the engine reads can be built
//! - **Offset Awareness**: parsers report the absolute positions of fields that
//!   are patched in place later (child pointers, index entries, size fields)
//! - **Pluggable Codec**: real block compression is an external collaborator
//!   behind the [`bundle::BlockDecompressor`] trait

#![warn(missing_docs)]

pub mod bundle;
pub mod codec;
pub mod hash;
pub mod index;
pub mod record;

pub use hash::path_hash;
