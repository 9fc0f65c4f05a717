//! Sidecar catalog persistence
//!
//! The sidecar is UTF-8 text. Line one is the archive fingerprint, line two
//! the free-list patch site (`-1` when there is none), then one
//! tab-separated line per entry in case-insensitive path order:
//!
//! ```text
//! parent  name  position  length  reference_position
//! parent  name  offset    length  reference_position  bundle  hash
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{BundledLocation, Catalog, CatalogEntry, RecordLocation};
use crate::{Result, StorageError};

/// Sidecar file for `archive`: the archive path with separators, drive
/// colons, spaces and dots removed, plus `.txt`
pub fn sidecar_path(cache_dir: &Path, archive: &Path) -> PathBuf {
    let flat: String = archive
        .to_string_lossy()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | ' ' | '.'))
        .collect();
    cache_dir.join(format!("{flat}.txt"))
}

/// Write `catalog` with its fingerprint
pub fn write_sidecar(path: &Path, fingerprint: &str, catalog: &Catalog) -> Result<()> {
    let mut out = String::with_capacity(catalog.len() * 64);
    out.push_str(fingerprint);
    out.push('\n');
    match catalog.free_list_ref() {
        Some(reference) => out.push_str(&reference.to_string()),
        None => out.push_str("-1"),
    }
    out.push('\n');

    for (_, entry) in catalog.sorted_case_insensitive() {
        match entry {
            CatalogEntry::Root(loc) | CatalogEntry::Directory(loc) | CatalogEntry::File(loc) => {
                out.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\n",
                    loc.parent, loc.name, loc.position, loc.length, loc.reference_position
                ));
            }
            CatalogEntry::Bundled(loc) => {
                out.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                    loc.parent,
                    loc.name,
                    loc.offset,
                    loc.length,
                    loc.reference_position,
                    loc.bundle,
                    loc.hash
                ));
            }
        }
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, out)?;
    info!("Saved sidecar catalog with {} entries to {:?}", catalog.len(), path);
    Ok(())
}

/// Read the sidecar at `path` if it exists and matches `fingerprint`
///
/// Returns `Ok(None)` when the file is absent or was written for different
/// archive contents.
pub fn read_sidecar(path: &Path, fingerprint: &str) -> Result<Option<Catalog>> {
    if !path.exists() {
        debug!("No sidecar catalog at {:?}", path);
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();

    if lines.next() != Some(fingerprint) {
        info!("Archive fingerprint changed, sidecar {:?} is stale", path);
        return Ok(None);
    }

    let mut catalog = Catalog::new();
    let free = lines
        .next()
        .ok_or_else(|| StorageError::Sidecar("missing free-list line".to_string()))?;
    catalog.set_free_list_ref(parse_free_ref(free)?);

    for (number, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        catalog.insert(parse_entry(line, number + 3)?);
    }
    Ok(Some(catalog))
}

fn parse_free_ref(line: &str) -> Result<Option<u64>> {
    if line.trim() == "-1" {
        return Ok(None);
    }
    line.trim()
        .parse()
        .map(Some)
        .map_err(|e| StorageError::Sidecar(format!("free-list line {line:?}: {e}")))
}

fn parse_number(field: &str, line: usize) -> Result<u64> {
    field
        .parse()
        .map_err(|e| StorageError::Sidecar(format!("line {line}: {field:?}: {e}")))
}

fn parse_entry(line: &str, number: usize) -> Result<CatalogEntry> {
    let fields: Vec<&str> = line.split('\t').collect();
    match fields.as_slice() {
        [parent, name, position, length, reference] => {
            let loc = RecordLocation {
                parent: (*parent).to_string(),
                name: (*name).to_string(),
                position: parse_number(position, number)?,
                length: parse_number(length, number)?,
                reference_position: parse_number(reference, number)?,
            };
            Ok(if loc.name == "." && loc.parent.is_empty() {
                CatalogEntry::Root(loc)
            } else if loc.name.ends_with('/') {
                CatalogEntry::Directory(loc)
            } else {
                CatalogEntry::File(loc)
            })
        }
        [parent, name, offset, length, reference, bundle, hash] => {
            Ok(CatalogEntry::Bundled(BundledLocation {
                parent: (*parent).to_string(),
                name: (*name).to_string(),
                offset: parse_number(offset, number)?,
                length: parse_number(length, number)?,
                reference_position: parse_number(reference, number)?,
                bundle: (*bundle).to_string(),
                hash: parse_number(hash, number)?,
            }))
        }
        _ => Err(StorageError::Sidecar(format!(
            "line {number}: expected 5 or 7 fields, found {}",
            fields.len()
        ))),
    }
}
