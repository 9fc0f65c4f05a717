//! Compacted archive copies
//!
//! Defragmenting copies the root, directory and file records named by the
//! catalog back to back into a new archive. Parents precede their children
//! in catalog order, so each child's pointer can be rewritten as soon as the
//! child is copied. Space held by free records, orphaned bytes and
//! abandoned record copies is dropped; if the source had a free list the
//! copy ends with a single sixteen byte free record wired to the same
//! pointer.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use ggpack_formats::record::{FREE_RECORD_LEN, FreeRecord};
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogEntry, RecordLocation};
use crate::{ROOT_PATH, Result, StorageError};

/// Where a record was and where its copy went
#[derive(Debug, Clone, Copy)]
struct Moved {
    old: u64,
    length: u64,
    new: u64,
}

impl Moved {
    fn contains(&self, position: u64) -> bool {
        position >= self.old && position < self.old + self.length
    }

    fn translate(&self, position: u64) -> u64 {
        position - self.old + self.new
    }
}

/// Copy the records of `catalog` from `source` into a new archive at
/// `target`, returning the size of the copy
pub fn defragment<R: Read + Seek>(source: &mut R, catalog: &Catalog, target: &Path) -> Result<u64> {
    let root = match catalog.get(ROOT_PATH) {
        Some(CatalogEntry::Root(loc)) => loc.clone(),
        _ => {
            return Err(StorageError::InvalidFormat(
                "catalog has no root record".to_string(),
            ));
        }
    };
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }
    info!("Defragmenting into {:?}", target);

    let mut out = BufWriter::new(File::create(target)?);
    let mut moved: HashMap<String, Moved> = HashMap::with_capacity(catalog.len());

    let data = read_record(source, &root)?;
    out.write_all(&data)?;
    moved.insert(
        ROOT_PATH.to_string(),
        Moved {
            old: root.position,
            length: root.length,
            new: 0,
        },
    );
    let mut position = root.length;

    for (path, entry) in catalog.iter() {
        let loc = match entry {
            CatalogEntry::Directory(loc) | CatalogEntry::File(loc) => loc,
            CatalogEntry::Root(_) | CatalogEntry::Bundled(_) => continue,
        };
        let parent = moved
            .get(&loc.parent)
            .copied()
            .ok_or_else(|| {
                StorageError::InvalidFormat(format!("{path}: parent {} not copied", loc.parent))
            })?;

        let data = read_record(source, loc)?;
        out.write_all(&data)?;

        let site = parent.translate(loc.reference_position);
        out.seek(SeekFrom::Start(site))?;
        out.write_all(&position.to_le_bytes())?;
        out.seek(SeekFrom::Start(position + loc.length))?;

        debug!("Copied {} from {} to {}", path, loc.position, position);
        moved.insert(
            path.clone(),
            Moved {
                old: loc.position,
                length: loc.length,
                new: position,
            },
        );
        position += loc.length;
    }

    if let Some(site) = catalog.free_list_ref() {
        if let Some(owner) = moved.values().find(|m| m.contains(site)) {
            out.write_all(&FreeRecord::build(FREE_RECORD_LEN, 0)?)?;
            out.seek(SeekFrom::Start(owner.translate(site)))?;
            out.write_all(&position.to_le_bytes())?;
            position += u64::from(FREE_RECORD_LEN);
        }
    }

    out.flush()?;
    info!(
        "Defragmented {} records into {} bytes",
        moved.len(),
        position
    );
    Ok(position)
}

fn read_record<R: Read + Seek>(source: &mut R, loc: &RecordLocation) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(loc.position))?;
    let mut data = vec![0u8; loc.length as usize];
    source.read_exact(&mut data)?;
    Ok(data)
}
