//! Bundle index
//!
//! The index is itself a bundle. Decompressed, it holds:
//!
//! ```text
//! u32 bundle_count
//!   { u32 name_len, name_len bytes UTF-8 name, u32 uncompressed_size } * bundle_count
//! u32 file_count
//!   { u64 path_hash, u32 bundle_index, u32 offset, u32 size } * file_count
//! u32 path_rep_count
//!   { u64 hash, u32 payload_offset, u32 payload_size, u32 recursive_size } * path_rep_count
//! nested bundle holding the path programs
//! ```
//!
//! The engine keeps the decompressed image in memory and patches the file
//! table and bundle sizes in place, so every parsed entry remembers where its
//! mutable fields live in the image.

mod builder;
mod error;
mod paths;

pub use builder::IndexBuilder;
pub use error::{IndexError, IndexResult};
pub use paths::{PathProgram, decode_paths};

use std::collections::HashMap;

use crate::bundle::{BlockDecompressor, extract_bytes};
use crate::codec::{ByteCursor, write_u32_le};
use crate::hash::path_hash;

/// Bundle table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    /// Bundle name without directory or extension
    pub name: String,
    /// Declared extracted size
    pub uncompressed_size: u32,
    /// Image position of `uncompressed_size`
    pub size_position: usize,
}

/// File table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    /// Path hash
    pub hash: u64,
    /// Index into the bundle table
    pub bundle_index: u32,
    /// Offset inside the extracted bundle
    pub offset: u32,
    /// Size inside the extracted bundle
    pub size: u32,
    /// Image position of the entry
    pub position: usize,
}

impl FileEntry {
    /// Encoded entry size
    pub const LEN: usize = 20;
    /// Position of the offset field within an entry
    pub const OFFSET_FIELD: usize = 12;
    /// Position of the size field within an entry
    pub const SIZE_FIELD: usize = 16;
}

/// Path group descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRep {
    /// Directory hash (not used for resolution)
    pub hash: u64,
    /// Program start inside the decoded path data
    pub payload_offset: u32,
    /// Program length
    pub payload_size: u32,
    /// Total size below this group (not used for resolution)
    pub recursive_size: u32,
}

/// Logical path bound to its file table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Logical path as emitted by the path program
    pub path: String,
    /// Matching file table entry
    pub entry: FileEntry,
}

/// Outcome of binding every emitted path to the file table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathResolution {
    /// Paths found in the file table
    pub resolved: Vec<ResolvedPath>,
    /// Emitted paths whose hash has no file table entry
    pub unresolved: Vec<String>,
}

/// Parsed index tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIndex {
    /// Bundle table
    pub bundles: Vec<BundleRecord>,
    /// File table
    pub files: Vec<FileEntry>,
    /// Path groups
    pub path_reps: Vec<PathRep>,
    /// Image position of the nested path bundle
    pub path_bundle_offset: usize,
}

impl BundleIndex {
    /// Parse the tables of a decompressed index image
    pub fn parse(image: &[u8]) -> IndexResult<Self> {
        let mut cursor = ByteCursor::new(image);

        let bundle_count = cursor.u32()? as usize;
        let mut bundles = Vec::with_capacity(bundle_count.min(cursor.remaining() / 8));
        for _ in 0..bundle_count {
            let name_len = cursor.u32()? as usize;
            let name_pos = cursor.position();
            let name = std::str::from_utf8(cursor.bytes(name_len)?)
                .map_err(|_| IndexError::InvalidBundleName(name_pos))?
                .to_string();
            let size_position = cursor.position();
            let uncompressed_size = cursor.u32()?;
            bundles.push(BundleRecord {
                name,
                uncompressed_size,
                size_position,
            });
        }

        let file_count = cursor.u32()? as usize;
        let mut files = Vec::with_capacity(file_count.min(cursor.remaining() / FileEntry::LEN));
        for entry in 0..file_count {
            let position = cursor.position();
            let hash = cursor.u64()?;
            let bundle_index = cursor.u32()?;
            let offset = cursor.u32()?;
            let size = cursor.u32()?;
            if bundle_index as usize >= bundles.len() {
                return Err(IndexError::BundleOutOfRange {
                    entry,
                    bundle: bundle_index,
                    count: bundles.len(),
                });
            }
            files.push(FileEntry {
                hash,
                bundle_index,
                offset,
                size,
                position,
            });
        }

        let rep_count = cursor.u32()? as usize;
        let mut path_reps = Vec::with_capacity(rep_count.min(cursor.remaining() / 20));
        for _ in 0..rep_count {
            path_reps.push(PathRep {
                hash: cursor.u64()?,
                payload_offset: cursor.u32()?,
                payload_size: cursor.u32()?,
                recursive_size: cursor.u32()?,
            });
        }

        Ok(Self {
            bundles,
            files,
            path_reps,
            path_bundle_offset: cursor.position(),
        })
    }

    /// Decode every path program
    pub fn decode_paths(
        &self,
        image: &[u8],
        codec: &dyn BlockDecompressor,
    ) -> IndexResult<Vec<String>> {
        let path_data = extract_bytes(&image[self.path_bundle_offset..], codec)?;
        let mut paths = Vec::new();
        for rep in &self.path_reps {
            let start = rep.payload_offset as usize;
            let end = start + rep.payload_size as usize;
            let program =
                path_data
                    .get(start..end)
                    .ok_or(IndexError::PathProgramOutOfRange {
                        offset: rep.payload_offset,
                        size: rep.payload_size,
                        available: path_data.len(),
                    })?;
            paths.extend(decode_paths(program));
        }
        Ok(paths)
    }

    /// Decode every path and bind it to its file table entry by hash
    pub fn resolve(
        &self,
        image: &[u8],
        codec: &dyn BlockDecompressor,
    ) -> IndexResult<PathResolution> {
        let by_hash: HashMap<u64, &FileEntry> =
            self.files.iter().map(|entry| (entry.hash, entry)).collect();

        let mut resolution = PathResolution::default();
        for path in self.decode_paths(image, codec)? {
            match by_hash.get(&path_hash(&path)) {
                Some(entry) => resolution.resolved.push(ResolvedPath {
                    path,
                    entry: **entry,
                }),
                None => resolution.unresolved.push(path),
            }
        }
        Ok(resolution)
    }

    /// Entries grouped by bundle index
    pub fn files_by_bundle(&self) -> HashMap<u32, Vec<FileEntry>> {
        let mut grouped: HashMap<u32, Vec<FileEntry>> = HashMap::new();
        for entry in &self.files {
            grouped.entry(entry.bundle_index).or_default().push(*entry);
        }
        grouped
    }
}

/// Rewrite the offset and size of the file entry at `position`
pub fn patch_file_entry(
    image: &mut [u8],
    position: usize,
    offset: u64,
    size: u64,
) -> IndexResult<()> {
    let offset = u32::try_from(offset).map_err(|_| IndexError::FieldOverflow {
        field: "offset",
        value: offset,
    })?;
    let size = u32::try_from(size).map_err(|_| IndexError::FieldOverflow {
        field: "size",
        value: size,
    })?;
    write_u32_le(image, position + FileEntry::OFFSET_FIELD, offset)?;
    write_u32_le(image, position + FileEntry::SIZE_FIELD, size)?;
    Ok(())
}

/// Rewrite a bundle's declared uncompressed size
pub fn patch_bundle_size(image: &mut [u8], size_position: usize, size: u64) -> IndexResult<()> {
    let size = u32::try_from(size).map_err(|_| IndexError::FieldOverflow {
        field: "uncompressed_size",
        value: size,
    })?;
    write_u32_le(image, size_position, size)?;
    Ok(())
}
