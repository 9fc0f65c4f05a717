//! Index image builder

use std::collections::BTreeMap;

use super::error::{IndexError, IndexResult};
use super::paths::PathProgram;
use crate::bundle::{BundleBuilder, DEFAULT_BLOCK_SIZE};
use crate::hash::path_hash;

/// Builder for decompressed index images
///
/// Paths are grouped by directory; each group becomes one path program that
/// pushes the directory as a base and emits the file names against it.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    bundles: Vec<(String, u32)>,
    files: Vec<(String, u32, u32, u32)>,
    path_block_size: u32,
}

impl IndexBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            bundles: Vec::new(),
            files: Vec::new(),
            path_block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Block size of the nested path bundle
    pub fn with_path_block_size(mut self, block_size: u32) -> Self {
        self.path_block_size = block_size;
        self
    }

    /// Register a bundle, returning its table index
    pub fn add_bundle(&mut self, name: &str, uncompressed_size: u32) -> u32 {
        self.bundles.push((name.to_string(), uncompressed_size));
        (self.bundles.len() - 1) as u32
    }

    /// Register a file held by bundle `bundle` at `offset..offset + size`
    pub fn add_file(&mut self, path: &str, bundle: u32, offset: u32, size: u32) -> &mut Self {
        self.files.push((path.to_string(), bundle, offset, size));
        self
    }

    /// Encode the image
    pub fn build(&self) -> IndexResult<Vec<u8>> {
        let mut out = Vec::new();
        push_u32(&mut out, self.bundles.len(), "bundle_count")?;
        for (name, size) in &self.bundles {
            push_u32(&mut out, name.len(), "name_len")?;
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }

        push_u32(&mut out, self.files.len(), "file_count")?;
        for (path, bundle, offset, size) in &self.files {
            out.extend_from_slice(&path_hash(path).to_le_bytes());
            out.extend_from_slice(&bundle.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }

        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (path, ..) in &self.files {
            let (dir, name) = path
                .rfind('/')
                .map_or(("", path.as_str()), |i| (&path[..=i], &path[i + 1..]));
            groups.entry(dir).or_default().push(name);
        }

        let mut path_data = Vec::new();
        push_u32(&mut out, groups.len(), "path_rep_count")?;
        for (dir, names) in &groups {
            let mut program = PathProgram::new();
            if !dir.is_empty() {
                program.toggle().fragment(1, dir).toggle();
            }
            for name in names {
                program.fragment(1, name);
            }
            let program = program.into_bytes();

            out.extend_from_slice(&path_hash(dir).to_le_bytes());
            push_u32(&mut out, path_data.len(), "payload_offset")?;
            push_u32(&mut out, program.len(), "payload_size")?;
            push_u32(&mut out, program.len(), "recursive_size")?;
            path_data.extend_from_slice(&program);
        }

        let nested = BundleBuilder::new()
            .with_block_size(self.path_block_size)
            .build_stored(&path_data)?;
        out.extend_from_slice(&nested);
        Ok(out)
    }
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn push_u32(out: &mut Vec<u8>, value: usize, field: &'static str) -> IndexResult<()> {
    let value = u32::try_from(value).map_err(|_| IndexError::FieldOverflow {
        field,
        value: value as u64,
    })?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bundle::StoredOnly;
    use crate::index::BundleIndex;

    #[test]
    fn test_empty_index() {
        let image = IndexBuilder::new().build().unwrap();
        let index = BundleIndex::parse(&image).unwrap();
        assert!(index.bundles.is_empty());
        assert!(index.files.is_empty());
        assert!(index.decode_paths(&image, &StoredOnly).unwrap().is_empty());
    }

    #[test]
    fn test_groups_share_directory_base() {
        let mut builder = IndexBuilder::new().with_path_block_size(8);
        let b = builder.add_bundle("B", 64);
        builder
            .add_file("a/x.txt", b, 0, 1)
            .add_file("a/y.txt", b, 1, 1)
            .add_file("top.txt", b, 2, 1);
        let image = builder.build().unwrap();
        let index = BundleIndex::parse(&image).unwrap();
        assert_eq!(index.path_reps.len(), 2);

        let paths = index.decode_paths(&image, &StoredOnly).unwrap();
        assert_eq!(paths, vec!["top.txt", "a/x.txt", "a/y.txt"]);
    }
}
