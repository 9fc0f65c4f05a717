//! Flat catalog of archive records and bundle-resident files
//!
//! Every entry is keyed by its catalog path, `parent + name`:
//!
//! - the archive root is `.` (parent empty, name `.`)
//! - a directory's name carries a trailing `/`, so the unnamed top directory
//!   is `./` and its children live under `./Bundles2/` and so on
//! - a bundle-resident file is `./` followed by its logical index path
//!
//! Top-level entries record where the record lives and the absolute position
//! of the pointer that references it (its reference position). Bundled
//! entries record their slot inside the extracted bundle and the position of
//! their file table entry inside the index image.

mod loader;
mod sidecar;

pub use loader::{attach_index, load_tree};
pub use sidecar::{read_sidecar, sidecar_path, write_sidecar};

use std::collections::BTreeMap;

use crate::{Result, StorageError};

/// Location of a top-level record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLocation {
    /// Catalog path of the parent (empty for the root)
    pub parent: String,
    /// Name, with a trailing `/` for directories
    pub name: String,
    /// Absolute position of the record
    pub position: u64,
    /// Record length
    pub length: u64,
    /// Absolute position of the pointer to this record
    pub reference_position: u64,
}

/// Location of a file held inside a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledLocation {
    /// Catalog path of the parent directory
    pub parent: String,
    /// File name
    pub name: String,
    /// Offset inside the extracted bundle
    pub offset: u64,
    /// Size inside the extracted bundle
    pub length: u64,
    /// Index image position of the file table entry
    pub reference_position: u64,
    /// Catalog path of the bundle record
    pub bundle: String,
    /// Path hash
    pub hash: u64,
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEntry {
    /// The `GGPK` root record
    Root(RecordLocation),
    /// A `PDIR` record
    Directory(RecordLocation),
    /// A `FILE` record
    File(RecordLocation),
    /// A file resolved through the bundle index
    Bundled(BundledLocation),
}

impl CatalogEntry {
    /// Catalog path of the parent
    pub fn parent(&self) -> &str {
        match self {
            Self::Root(loc) | Self::Directory(loc) | Self::File(loc) => &loc.parent,
            Self::Bundled(loc) => &loc.parent,
        }
    }

    /// Entry name
    pub fn name(&self) -> &str {
        match self {
            Self::Root(loc) | Self::Directory(loc) | Self::File(loc) => &loc.name,
            Self::Bundled(loc) => &loc.name,
        }
    }

    /// Catalog path
    pub fn path(&self) -> String {
        format!("{}{}", self.parent(), self.name())
    }

    /// Record position, or bundle offset for bundled files
    pub const fn position(&self) -> u64 {
        match self {
            Self::Root(loc) | Self::Directory(loc) | Self::File(loc) => loc.position,
            Self::Bundled(loc) => loc.offset,
        }
    }

    /// Record length, or slot length for bundled files
    pub const fn length(&self) -> u64 {
        match self {
            Self::Root(loc) | Self::Directory(loc) | Self::File(loc) => loc.length,
            Self::Bundled(loc) => loc.length,
        }
    }

    /// Position of the pointer or index entry referencing this entry
    pub const fn reference_position(&self) -> u64 {
        match self {
            Self::Root(loc) | Self::Directory(loc) | Self::File(loc) => loc.reference_position,
            Self::Bundled(loc) => loc.reference_position,
        }
    }

    /// Top-level record location, if this is not a bundled file
    pub const fn record(&self) -> Option<&RecordLocation> {
        match self {
            Self::Root(loc) | Self::Directory(loc) | Self::File(loc) => Some(loc),
            Self::Bundled(_) => None,
        }
    }

    /// Bundle location, if this is a bundled file
    pub const fn bundled(&self) -> Option<&BundledLocation> {
        match self {
            Self::Bundled(loc) => Some(loc),
            _ => None,
        }
    }

    /// Short kind label for logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::Directory(_) => "directory",
            Self::File(_) => "file",
            Self::Bundled(_) => "bundled",
        }
    }
}

/// Split a catalog path into parent and name
///
/// Directory paths keep their trailing `/` on the name.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(i) => (&path[..=i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Flat, path-keyed view of the archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    free_list_ref: Option<u64>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry under its own path, replacing any previous entry
    pub fn insert(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.entries.insert(entry.path(), entry)
    }

    /// Look up an entry
    pub fn get(&self, path: &str) -> Option<&CatalogEntry> {
        self.entries.get(path)
    }

    /// Look up an entry for update
    pub fn get_mut(&mut self, path: &str) -> Option<&mut CatalogEntry> {
        self.entries.get_mut(path)
    }

    /// Look up an entry that must exist
    pub fn require(&self, path: &str) -> Result<&CatalogEntry> {
        self.get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    /// Whether `path` is catalogued
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order; parents precede their children
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CatalogEntry)> {
        self.entries.iter()
    }

    /// Entries ordered case-insensitively, as written to the sidecar
    pub fn sorted_case_insensitive(&self) -> Vec<(&String, &CatalogEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| {
            a.0.to_lowercase()
                .cmp(&b.0.to_lowercase())
                .then_with(|| a.0.cmp(b.0))
        });
        entries
    }

    /// Bundled entries held by bundle `bundle`
    pub fn bundled_in<'a>(
        &'a self,
        bundle: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a BundledLocation)> + 'a {
        self.entries.iter().filter_map(move |(path, entry)| match entry {
            CatalogEntry::Bundled(loc) if loc.bundle == bundle => Some((path, loc)),
            _ => None,
        })
    }

    /// Update the recorded position and length of a top-level record
    pub fn relocate_record(&mut self, path: &str, position: u64, length: u64) -> Result<()> {
        match self.entries.get_mut(path) {
            Some(CatalogEntry::Root(loc) | CatalogEntry::Directory(loc) | CatalogEntry::File(loc)) => {
                loc.position = position;
                loc.length = length;
                Ok(())
            }
            Some(CatalogEntry::Bundled(_)) => Err(StorageError::InvalidFormat(format!(
                "{path} is bundle-resident, not a top-level record"
            ))),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    /// Update the recorded slot of a bundled file
    pub fn relocate_bundled(&mut self, path: &str, offset: u64, length: u64) -> Result<()> {
        match self.entries.get_mut(path) {
            Some(CatalogEntry::Bundled(loc)) => {
                loc.offset = offset;
                loc.length = length;
                Ok(())
            }
            Some(_) => Err(StorageError::InvalidFormat(format!(
                "{path} is a top-level record, not bundle-resident"
            ))),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    /// Patch site of the pointer to the first free record
    pub const fn free_list_ref(&self) -> Option<u64> {
        self.free_list_ref
    }

    /// Record the patch site of the pointer to the first free record
    pub const fn set_free_list_ref(&mut self, reference: Option<u64>) {
        self.free_list_ref = reference;
    }
}

/// Non-fatal findings of a catalog load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// `(offset, referrer)` pairs referenced but never reached
    pub dangling: Vec<(u64, u64)>,
    /// `(offset, tag)` of records with an unrecognised tag
    pub unknown_tags: Vec<(u64, String)>,
    /// `(referrer, offset)` pointers beyond the end of the archive
    pub out_of_bounds: Vec<(u64, u64)>,
    /// Index paths whose hash is missing from the file table
    pub unresolved_paths: Vec<String>,
    /// Why index resolution was abandoned, if it was
    pub index_error: Option<String>,
    /// Whether the catalog came from the sidecar
    pub from_cache: bool,
}

impl LoadReport {
    /// Whether the load found nothing to report
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
            && self.unknown_tags.is_empty()
            && self.out_of_bounds.is_empty()
            && self.unresolved_paths.is_empty()
            && self.index_error.is_none()
    }

    /// Turn unreached references into an error
    pub fn ensure_no_dangling(&self) -> Result<()> {
        if self.dangling.is_empty() {
            return Ok(());
        }
        let offsets: Vec<String> = self
            .dangling
            .iter()
            .map(|(offset, referrer)| format!("{offset} (from {referrer})"))
            .collect();
        Err(StorageError::DanglingReference(offsets.join(", ")))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(parent: &str, name: &str, position: u64) -> RecordLocation {
        RecordLocation {
            parent: parent.to_string(),
            name: name.to_string(),
            position,
            length: 10,
            reference_position: 0,
        }
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("./Bundles2/_.index.bin"), ("./Bundles2/", "_.index.bin"));
        assert_eq!(split_path("./Bundles2/"), ("./", "Bundles2/"));
        assert_eq!(split_path("./"), ("", "./"));
        assert_eq!(split_path("."), ("", "."));
    }

    #[test]
    fn test_keys_and_order() {
        let mut catalog = Catalog::new();
        catalog.insert(CatalogEntry::Root(record("", ".", 0)));
        catalog.insert(CatalogEntry::Directory(record(".", "/", 28)));
        catalog.insert(CatalogEntry::Directory(record("./", "art/", 100)));
        catalog.insert(CatalogEntry::File(record("./art/", "B.txt", 200)));
        catalog.insert(CatalogEntry::File(record("./art/", "a.txt", 300)));

        assert!(catalog.contains("."));
        assert!(catalog.contains("./"));
        assert!(catalog.contains("./art/a.txt"));

        let ordered: Vec<_> = catalog.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(ordered, vec![".", "./", "./art/", "./art/B.txt", "./art/a.txt"]);

        let folded: Vec<_> = catalog
            .sorted_case_insensitive()
            .into_iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(folded, vec![".", "./", "./art/", "./art/a.txt", "./art/B.txt"]);
    }

    #[test]
    fn test_require_missing_is_not_found() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.require("./nope"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_relocate_checks_kind() {
        let mut catalog = Catalog::new();
        catalog.insert(CatalogEntry::File(record("./", "a.txt", 50)));
        catalog.relocate_record("./a.txt", 500, 60).unwrap();
        assert_eq!(catalog.get("./a.txt").unwrap().position(), 500);
        assert!(catalog.relocate_bundled("./a.txt", 0, 0).is_err());
    }

    #[test]
    fn test_report_dangling_error() {
        let report = LoadReport {
            dangling: vec![(4096, 12)],
            ..LoadReport::default()
        };
        assert!(!report.is_clean());
        assert!(matches!(
            report.ensure_no_dangling(),
            Err(StorageError::DanglingReference(_))
        ));
    }
}
