//! Bundle materialization and bundled writes

use std::collections::HashMap;
use std::fs::File;

use ggpack_formats::bundle::{
    self, BundleBuilder, BundleError, BundleHeader, BundleLayout, STORED_SENTINEL,
};
use ggpack_formats::codec::read_u32_le;
use ggpack_formats::index::{BundleIndex, FileEntry, IndexError, patch_bundle_size, patch_file_entry};
use ggpack_formats::record::FileRecord;
use tracing::{debug, info};

use super::{ArchiveSession, read_at, write_at};
use crate::allocator::{Alias, GrowthPolicy, SlotTable};
use crate::catalog::BundledLocation;
use crate::{Result, StorageError, bundle_catalog_path};

fn read_bundle_header(file: &mut File, position: u64) -> Result<BundleHeader> {
    let bytes = read_at(file, position, BundleHeader::LEN as u64)?;
    Ok(BundleHeader::parse(&bytes)?)
}

/// Bundle table index of the bundle record at `path`
fn bundle_number(tables: &BundleIndex, path: &str) -> Option<u32> {
    tables
        .bundles
        .iter()
        .position(|record| bundle_catalog_path(&record.name) == path)
        .map(|i| i as u32)
}

impl ArchiveSession {
    /// Bring the bundle at `path` into stored form, once per session
    ///
    /// Data bundles get the configured headroom appended; the index bundle
    /// never does.
    pub(super) fn ensure_stored(&mut self, path: &str) -> Result<()> {
        if self.bundles.get(path).is_some_and(|state| state.stored) {
            return Ok(());
        }
        let loc = self.record_location(path)?;
        let payload = self.payload(&loc)?;
        let header = read_bundle_header(&mut self.file, payload.position)?;

        if header.is_stored() {
            debug!("{} is already stored", path);
        } else {
            let headroom = if path == self.config.index_path {
                0
            } else {
                self.config.bundle_headroom
            };
            let extracted = u64::from(header.extracted_size) + headroom;
            info!(
                "Decompressing {} in place ({} -> {} bytes extracted)",
                path, header.extracted_size, extracted
            );
            self.rewrite_bundle(path, extracted)?;
        }
        self.bundles.entry(path.to_string()).or_default().stored = true;
        Ok(())
    }

    /// Rewrite the bundle at `path` in stored form, zero-filled up to
    /// `extracted` bytes
    fn rewrite_bundle(&mut self, path: &str, extracted: u64) -> Result<()> {
        self.capture_original(path)?;
        let loc = self.record_location(path)?;
        let payload = self.payload(&loc)?;
        let raw = read_at(&mut self.file, payload.position, payload.length)?;
        let layout = BundleLayout::parse(&raw)?;

        let mut data = bundle::extract_bytes(&raw, self.codec.as_ref())?;
        let target = usize::try_from(extracted).map_err(|_| {
            StorageError::Allocation(format!("{path}: {extracted} bytes is too large"))
        })?;
        data.resize(data.len().max(target), 0);

        let stored = BundleBuilder::new()
            .with_block_size(layout.header.block_size)
            .build_stored(&data)?;
        let record = FileRecord::build(&loc.name, &stored)?;
        self.write_record(path, &record)?;
        self.set_declared_size(path, data.len() as u64)
    }

    /// Record a new extracted size for the bundle at `path` in the index
    fn set_declared_size(&mut self, path: &str, size: u64) -> Result<()> {
        let Some(index) = self.index.as_mut() else {
            return Ok(());
        };
        let Some(number) = bundle_number(&index.tables, path) else {
            return Ok(());
        };
        let record = &mut index.tables.bundles[number as usize];
        if u64::from(record.uncompressed_size) == size {
            return Ok(());
        }
        patch_bundle_size(&mut index.bytes, record.size_position, size)?;
        debug!(
            "Declared size of {}: {} -> {}",
            path, record.uncompressed_size, size
        );
        record.uncompressed_size = size as u32;
        index.dirty = true;
        Ok(())
    }

    /// Slot table of the bundle at `path`, built from the live index image
    /// on first use
    fn slot_table(&mut self, path: &str) -> Result<SlotTable> {
        if let Some(table) = self.bundles.get(path).and_then(|state| state.slots.clone()) {
            return Ok(table);
        }

        let loc = self.record_location(path)?;
        let payload = self.payload(&loc)?;
        let header = read_bundle_header(&mut self.file, payload.position)?;
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| StorageError::IndexCorrupt("no index bundle loaded".to_string()))?;
        let number = bundle_number(&index.tables, path).ok_or_else(|| {
            StorageError::IndexCorrupt(format!("{path} is not in the bundle table"))
        })?;

        let paths: HashMap<u64, String> = self
            .catalog
            .bundled_in(path)
            .map(|(key, loc)| (loc.reference_position, key.clone()))
            .collect();

        let mut entries = Vec::new();
        for entry in index.tables.files.iter().filter(|e| e.bundle_index == number) {
            let offset = read_u32_le(&index.bytes, entry.position + FileEntry::OFFSET_FIELD)
                .map_err(IndexError::from)?;
            let size = read_u32_le(&index.bytes, entry.position + FileEntry::SIZE_FIELD)
                .map_err(IndexError::from)?;
            entries.push((
                u64::from(offset),
                u64::from(size),
                Alias {
                    entry_position: entry.position,
                    path: paths.get(&(entry.position as u64)).cloned(),
                },
            ));
        }

        let table = SlotTable::build(u64::from(header.extracted_size), entries);
        info!(
            "Slot table for {}: {} slots, {} bytes free of {}",
            path,
            table.slots().len(),
            table.free_bytes(),
            table.declared()
        );
        Ok(table)
    }

    /// Write a bundled file through its bundle's slot table
    pub(super) fn write_bundled(
        &mut self,
        path: &str,
        loc: &BundledLocation,
        payload: &[u8],
    ) -> Result<()> {
        if self.index.is_none() {
            return Err(StorageError::IndexCorrupt(
                "no index bundle loaded".to_string(),
            ));
        }
        let index_path = self.config.index_path.clone();
        self.ensure_stored(&index_path)?;
        self.capture_original(&index_path)?;
        self.ensure_stored(&loc.bundle)?;
        self.capture_original(&loc.bundle)?;

        let mut table = self.slot_table(&loc.bundle)?;
        let growth = GrowthPolicy {
            factor: self.config.growth_factor,
            minimum: self.config.min_growth,
        };
        let placement = table.allocate(
            loc.reference_position as usize,
            payload.len() as u64,
            growth,
        )?;
        if let Some(grown) = placement.grown_to {
            info!("Growing {} to {} bytes extracted", loc.bundle, grown);
            self.rewrite_bundle(&loc.bundle, grown)?;
        }
        self.insert_into_bundle(&loc.bundle, placement.offset, payload)?;

        if let Some(index) = self.index.as_mut() {
            for alias in &placement.aliases {
                patch_file_entry(
                    &mut index.bytes,
                    alias.entry_position,
                    placement.offset,
                    placement.length,
                )?;
            }
            index.dirty = true;
        }
        for alias in &placement.aliases {
            if let Some(alias_path) = &alias.path {
                self.catalog
                    .relocate_bundled(alias_path, placement.offset, placement.length)?;
            }
        }
        self.bundles.entry(loc.bundle.clone()).or_default().slots = Some(table);

        info!(
            "Wrote {} ({} bytes) into {} at {} ({:?}, {} aliases)",
            path,
            payload.len(),
            loc.bundle,
            placement.offset,
            placement.kind,
            placement.aliases.len()
        );
        Ok(())
    }

    /// Patch `data` into the extracted range starting at `offset` of the
    /// stored bundle at `path`
    ///
    /// Every block sentinel the range touches is checked before anything is
    /// written.
    pub(super) fn insert_into_bundle(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        let loc = self.record_location(path)?;
        let payload = self.payload(&loc)?;
        let header = read_bundle_header(&mut self.file, payload.position)?;
        if !header.is_stored() {
            return Err(StorageError::BundleNotDecompressed(format!(
                "{path} is still compressed"
            )));
        }

        let spans = header.stored_spans(offset, data.len())?;
        for span in &spans {
            let position = payload.position + span.sentinel_position;
            let found = read_at(&mut self.file, position, 2)?;
            if found != STORED_SENTINEL {
                return Err(BundleError::MissingSentinel {
                    position,
                    found: [found[0], found[1]],
                }
                .into());
            }
        }
        for span in spans {
            write_at(
                &mut self.file,
                payload.position + span.position,
                &data[span.range],
            )?;
        }
        debug!(
            "Patched {} bytes into {} at offset {}",
            data.len(),
            path,
            offset
        );
        Ok(())
    }
}
