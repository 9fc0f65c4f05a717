//! Directory graph walk and index attachment

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};

use ggpack_formats::bundle::BlockDecompressor;
use ggpack_formats::index::BundleIndex;
use ggpack_formats::record::{
    DirectoryRecord, FileRecord, RECORD_PREFIX_LEN, RecordHeader, RecordTag, RootRecord,
};
use tracing::{debug, info, warn};

use super::{BundledLocation, Catalog, CatalogEntry, LoadReport, RecordLocation, split_path};
use crate::{PATH_PREFIX, ROOT_PATH, Result, StorageError, bundle_catalog_path};

fn read_at<R: Read + Seek>(reader: &mut R, position: u64, len: usize) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(position))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Queue `offset` for the walk, returning `true` when it lies beyond the
/// archive end and was skipped
///
/// A zero pointer is a null link (an emptied free list) and is ignored.
fn refer(
    parent: &str,
    offset: u64,
    site: u64,
    archive_size: u64,
    pending: &mut HashMap<u64, u64>,
    worklist: &mut Vec<(String, u64)>,
) -> bool {
    if offset == 0 {
        return false;
    }
    if offset >= archive_size {
        warn!("Pointer at {site} targets {offset}, beyond archive end");
        return true;
    }
    pending.insert(offset, site);
    worklist.push((parent.to_string(), offset));
    false
}

/// Walk the directory graph from the root record at offset zero
///
/// Every pointer is remembered as `target -> patch site` until its target is
/// visited. Targets never reached end up in [`LoadReport::dangling`]. Only
/// the first free record is kept, as the free-list head.
pub fn load_tree<R: Read + Seek>(
    reader: &mut R,
    archive_size: u64,
    report: &mut LoadReport,
) -> Result<Catalog> {
    let prefix = read_at(reader, 0, RECORD_PREFIX_LEN)?;
    let header = RecordHeader::parse(&prefix)?;
    if header.tag != RecordTag::Root {
        return Err(StorageError::InvalidFormat(format!(
            "root record tag is {}, expected GGPK",
            header.tag.display()
        )));
    }
    if u64::from(header.length) > archive_size {
        return Err(StorageError::InvalidFormat(format!(
            "root record length {} exceeds archive size {archive_size}",
            header.length
        )));
    }
    let root = RootRecord::parse(&read_at(reader, 0, header.length as usize)?)?;
    debug!("Root record version {} with {} children", root.version, root.children.len());

    let mut catalog = Catalog::new();
    catalog.insert(CatalogEntry::Root(RecordLocation {
        parent: String::new(),
        name: ROOT_PATH.to_string(),
        position: 0,
        length: u64::from(root.length),
        reference_position: 0,
    }));

    let mut pending: HashMap<u64, u64> = HashMap::new();
    let mut visited: HashSet<u64> = HashSet::new();
    let mut worklist: Vec<(String, u64)> = Vec::new();

    for (i, &child) in root.children.iter().enumerate().rev() {
        let site = RootRecord::child_reference(i);
        if refer(ROOT_PATH, child, site, archive_size, &mut pending, &mut worklist) {
            report.out_of_bounds.push((site, child));
        }
    }

    let mut walked = 0usize;
    while let Some((parent, offset)) = worklist.pop() {
        if !visited.insert(offset) {
            debug!("Record at {offset} already visited");
            continue;
        }
        let header = RecordHeader::parse(&read_at(reader, offset, RECORD_PREFIX_LEN)?)?;
        let length = u64::from(header.length);
        if length < RECORD_PREFIX_LEN as u64 || offset + length > archive_size {
            warn!("Record at {offset} has invalid length {length}");
            if let Some(reference) = pending.remove(&offset) {
                report.out_of_bounds.push((reference, offset));
            }
            continue;
        }
        walked += 1;

        match header.tag {
            RecordTag::Directory => {
                let dir = DirectoryRecord::parse(&read_at(reader, offset, length as usize)?)?;
                let reference = pending.remove(&offset).unwrap_or_default();
                let name = format!("{}/", dir.name);
                let path = format!("{parent}{name}");
                debug!("Directory {path} at {offset} with {} children", dir.entries.len());

                for (i, entry) in dir.entries.iter().enumerate().rev() {
                    let site = offset + DirectoryRecord::child_reference(dir.name_units, i);
                    if refer(&path, entry.offset, site, archive_size, &mut pending, &mut worklist) {
                        report.out_of_bounds.push((site, entry.offset));
                    }
                }
                catalog.insert(CatalogEntry::Directory(RecordLocation {
                    parent,
                    name,
                    position: offset,
                    length,
                    reference_position: reference,
                }));
            }
            RecordTag::File => {
                let fixed = read_at(reader, offset, 12)?;
                let units = u32::from_le_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]);
                let header_len = FileRecord::header_len_for(units).min(length as usize);
                let file = FileRecord::parse_header(&read_at(reader, offset, header_len)?)?;
                let reference = pending.remove(&offset).unwrap_or_default();
                catalog.insert(CatalogEntry::File(RecordLocation {
                    parent,
                    name: file.name,
                    position: offset,
                    length,
                    reference_position: reference,
                }));
            }
            RecordTag::Free => {
                let reference = pending.remove(&offset).unwrap_or_default();
                if catalog.free_list_ref().is_none() {
                    debug!("First free record at {offset} ({length} bytes), referenced from {reference}");
                    catalog.set_free_list_ref(Some(reference));
                }
            }
            RecordTag::Root | RecordTag::Unknown(_) => {
                pending.remove(&offset);
                warn!("Unknown record tag {} at {offset}", header.tag.display());
                report.unknown_tags.push((offset, header.tag.display()));
            }
        }
    }

    let mut dangling: Vec<(u64, u64)> = pending.into_iter().collect();
    dangling.sort_unstable();
    for (offset, referrer) in &dangling {
        warn!("Dangling reference to {offset} from {referrer}");
    }
    report.dangling = dangling;

    info!("Walked {walked} records, catalog holds {} entries", catalog.len());
    Ok(catalog)
}

/// Bind every index path to its file entry and add it to the catalog
///
/// Paths whose hash has no file entry are skipped and listed in
/// [`LoadReport::unresolved_paths`]. Returns the number of entries added.
pub fn attach_index(
    catalog: &mut Catalog,
    index: &BundleIndex,
    image: &[u8],
    codec: &dyn BlockDecompressor,
    report: &mut LoadReport,
) -> Result<usize> {
    let resolution = index.resolve(image, codec)?;

    for path in &resolution.unresolved {
        warn!("Index path {path} has no file entry");
    }
    report.unresolved_paths.extend(resolution.unresolved);

    let mut added = 0usize;
    for resolved in resolution.resolved {
        let full = format!("{PATH_PREFIX}{}", resolved.path);
        let (parent, name) = split_path(&full);
        let bundle = &index.bundles[resolved.entry.bundle_index as usize];
        catalog.insert(CatalogEntry::Bundled(BundledLocation {
            parent: parent.to_string(),
            name: name.to_string(),
            offset: u64::from(resolved.entry.offset),
            length: u64::from(resolved.entry.size),
            reference_position: resolved.entry.position as u64,
            bundle: bundle_catalog_path(&bundle.name),
            hash: resolved.entry.hash,
        }));
        added += 1;
    }

    info!(
        "Resolved {added} index paths across {} bundles",
        index.bundles.len()
    );
    Ok(added)
}
