//! Open archive sessions
//!
//! An [`ArchiveSession`] owns the archive handle, the catalog, the
//! materialized index image and the per-bundle bookkeeping for as long as the
//! archive is open. Nothing is shared between sessions.
//!
//! Opening an archive:
//!
//! 1. fingerprint the archive (head and tail windows plus size)
//! 2. reuse the sidecar catalog if it was saved for the same fingerprint,
//!    otherwise walk the directory graph, resolve the bundle index and save
//!    a fresh sidecar
//! 3. decompress the index bundle into memory; every bundled write patches
//!    this image and [`ArchiveSession::flush`] writes it back
//!
//! A session dropped with unflushed writes flushes itself; errors from that
//! flush can only be logged, so callers that care should use
//! [`ArchiveSession::close`].

mod bundles;
mod records;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ggpack_formats::bundle::{self, BlockDecompressor, StoredOnly};
use ggpack_formats::index::BundleIndex;
use ggpack_formats::record::{FileRecord, RECORD_PREFIX_LEN};
use tracing::{debug, info, warn};

use crate::allocator::SlotTable;
use crate::catalog::{
    Catalog, CatalogEntry, LoadReport, RecordLocation, attach_index, load_tree, read_sidecar,
    sidecar_path, write_sidecar,
};
use crate::config::SessionConfig;
use crate::fingerprint::fingerprint;
use crate::shadow::ShadowCache;
use crate::{Result, StorageError};

/// Decompressed index bundle held for the whole session
#[derive(Debug)]
struct IndexImage {
    bytes: Vec<u8>,
    tables: BundleIndex,
    dirty: bool,
}

/// Session-scoped bundle bookkeeping, populated on first write
#[derive(Debug, Default)]
struct BundleState {
    stored: bool,
    slots: Option<SlotTable>,
}

/// Payload location of a `FILE` record
#[derive(Debug, Clone, Copy)]
struct Payload {
    position: u64,
    length: u64,
}

/// An open archive
pub struct ArchiveSession {
    path: PathBuf,
    file: File,
    config: SessionConfig,
    codec: Box<dyn BlockDecompressor>,
    archive_size: u64,
    catalog: Catalog,
    report: LoadReport,
    index: Option<IndexImage>,
    bundles: HashMap<String, BundleState>,
    shadow: Option<ShadowCache>,
    sidecar: PathBuf,
    dirty: bool,
}

impl std::fmt::Debug for ArchiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSession")
            .field("path", &self.path)
            .field("archive_size", &self.archive_size)
            .field("entries", &self.catalog.len())
            .field("dirty", &self.dirty)
            .field("index_dirty", &self.index.as_ref().is_some_and(|i| i.dirty))
            .finish_non_exhaustive()
    }
}

impl ArchiveSession {
    /// Open an archive whose bundles hold only stored blocks
    pub fn open<P: AsRef<Path>>(path: P, config: SessionConfig) -> Result<Self> {
        Self::open_with_decompressor(path, config, Box::new(StoredOnly))
    }

    /// Open an archive, decoding compressed bundle blocks with `codec`
    pub fn open_with_decompressor<P: AsRef<Path>>(
        path: P,
        config: SessionConfig,
        codec: Box<dyn BlockDecompressor>,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        info!("Opening archive {:?}", path);

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let print = fingerprint(&mut file, config.fingerprint_window)?;
        let archive_size = file.seek(SeekFrom::End(0))?;
        let sidecar = sidecar_path(&config.cache_dir, &path);

        let cached = if config.force_rescan {
            info!("Rescan forced, ignoring sidecar catalog");
            None
        } else {
            match read_sidecar(&sidecar, &print) {
                Ok(catalog) => catalog,
                Err(StorageError::Sidecar(reason)) => {
                    warn!("Discarding malformed sidecar {:?}: {}", sidecar, reason);
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let mut report = LoadReport::default();
        let (catalog, index) = match cached {
            Some(catalog) => {
                info!("Reusing sidecar catalog with {} entries", catalog.len());
                report.from_cache = true;
                let index = index_or_report(
                    load_index(&mut file, &catalog, &config, codec.as_ref()),
                    &mut report,
                )?;
                (catalog, index)
            }
            None => {
                info!("Scanning archive ({} bytes)", archive_size);
                let mut catalog = load_tree(&mut file, archive_size, &mut report)?;
                let index = index_or_report(
                    load_index(&mut file, &catalog, &config, codec.as_ref()),
                    &mut report,
                )?;
                if let Some(index) = &index {
                    if let Err(e) = attach_index(
                        &mut catalog,
                        &index.tables,
                        &index.bytes,
                        codec.as_ref(),
                        &mut report,
                    ) {
                        warn!("Index resolution abandoned: {}", e);
                        report.index_error = Some(e.to_string());
                    }
                }
                write_sidecar(&sidecar, &print, &catalog)?;
                (catalog, index)
            }
        };

        let shadow = if config.track_originals {
            Some(ShadowCache::open(&config.cache_dir)?)
        } else {
            None
        };

        Ok(Self {
            path,
            file,
            config,
            codec,
            archive_size,
            catalog,
            report,
            index,
            bundles: HashMap::new(),
            shadow,
            sidecar,
            dirty: false,
        })
    }

    /// Archive path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Catalog of every record and bundled file
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Findings of the catalog load
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Current archive size, including appended records
    pub fn archive_size(&self) -> u64 {
        self.archive_size
    }

    /// Parsed index tables, if the archive has an index bundle
    pub fn index(&self) -> Option<&BundleIndex> {
        self.index.as_ref().map(|index| &index.tables)
    }

    /// In-memory index image, including unflushed patches
    pub fn index_image(&self) -> Option<&[u8]> {
        self.index.as_ref().map(|index| index.bytes.as_slice())
    }

    /// Sidecar catalog file
    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    /// Read the payload of a file
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        self.read_limited(path, None)
    }

    /// Read at most `limit` bytes of a file
    ///
    /// Bundled files only decode the blocks covering the requested bytes.
    pub fn read_limited(&mut self, path: &str, limit: Option<u64>) -> Result<Vec<u8>> {
        match self.catalog.require(path)?.clone() {
            CatalogEntry::File(loc) => {
                let payload = self.payload(&loc)?;
                let length = limit.map_or(payload.length, |l| l.min(payload.length));
                debug!("Reading {} bytes of {} at {}", length, path, payload.position);
                read_at(&mut self.file, payload.position, length)
            }
            CatalogEntry::Bundled(loc) => {
                let container = self.record_location(&loc.bundle)?;
                let payload = self.payload(&container)?;
                let length = limit.map_or(loc.length, |l| l.min(loc.length));
                debug!(
                    "Reading {} bytes of {} from {} at offset {}",
                    length, path, loc.bundle, loc.offset
                );
                Ok(bundle::extract_range(
                    &mut self.file,
                    payload.position,
                    loc.offset,
                    length,
                    self.codec.as_ref(),
                )?)
            }
            CatalogEntry::Root(_) | CatalogEntry::Directory(_) => Err(StorageError::InvalidFormat(
                format!("{path} is a directory, not a file"),
            )),
        }
    }

    /// Read the original payload of a file, as it was before this engine
    /// first overwrote it
    ///
    /// Without tracking this is [`ArchiveSession::read`].
    pub fn read_original(&mut self, path: &str) -> Result<Vec<u8>> {
        self.read_original_limited(path, None)
    }

    /// Read at most `limit` bytes of the original payload of a file
    pub fn read_original_limited(&mut self, path: &str, limit: Option<u64>) -> Result<Vec<u8>> {
        if self.shadow.is_none() {
            return self.read_limited(path, limit);
        }
        match self.catalog.require(path)?.clone() {
            CatalogEntry::File(loc) => {
                if !self.is_tracked(path) {
                    return self.read_limited(path, limit);
                }
                if self.refresh_original(path, &loc)? {
                    return self.read_limited(path, limit);
                }
                match self.shadowed(path, limit)? {
                    Some(data) => Ok(data),
                    None => self.read_limited(path, limit),
                }
            }
            CatalogEntry::Bundled(loc) => {
                if !self.is_tracked(&loc.bundle) {
                    return self.read_limited(path, limit);
                }
                let container = self.record_location(&loc.bundle)?;
                self.refresh_original(&loc.bundle, &container)?;
                self.original_bundled(path, loc.hash, &loc.bundle, limit)
            }
            CatalogEntry::Root(_) | CatalogEntry::Directory(_) => Err(StorageError::InvalidFormat(
                format!("{path} is a directory, not a file"),
            )),
        }
    }

    /// Replace the payload of a file
    ///
    /// Top-level files are rewritten in place when the new record fits and
    /// relocated otherwise. Bundled files go through the bundle's slot
    /// table; the index image is patched in memory until
    /// [`ArchiveSession::flush`].
    pub fn write(&mut self, path: &str, payload: &[u8]) -> Result<()> {
        let entry = self.catalog.require(path)?.clone();
        self.dirty = true;
        match entry {
            CatalogEntry::File(loc) => {
                self.capture_original(path)?;
                let record = FileRecord::build(&loc.name, payload)?;
                self.write_record(path, &record)?;
                Ok(())
            }
            CatalogEntry::Bundled(loc) => self.write_bundled(path, &loc, payload),
            CatalogEntry::Root(_) | CatalogEntry::Directory(_) => Err(StorageError::InvalidFormat(
                format!("{path} is a directory, not a file"),
            )),
        }
    }

    /// Write the index image back into its bundle and save the sidecar
    /// catalog and keeplist
    pub fn flush(&mut self) -> Result<()> {
        let index_path = self.config.index_path.clone();
        let dirty = self.index.as_ref().is_some_and(|index| index.dirty);
        if dirty {
            self.ensure_stored(&index_path)?;
            self.capture_original(&index_path)?;
            let image = self
                .index
                .as_ref()
                .map(|index| index.bytes.clone())
                .unwrap_or_default();
            info!("Writing back index image ({} bytes)", image.len());
            self.insert_into_bundle(&index_path, 0, &image)?;
            if let Some(index) = self.index.as_mut() {
                index.dirty = false;
            }
        }

        self.file.flush()?;
        self.file.sync_data()?;
        self.archive_size = self.file.seek(SeekFrom::End(0))?;

        let print = fingerprint(&mut self.file, self.config.fingerprint_window)?;
        write_sidecar(&self.sidecar, &print, &self.catalog)?;
        if let Some(shadow) = &self.shadow {
            shadow.save()?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Flush and close the session
    pub fn close(mut self) -> Result<()> {
        let flushed = self.flush();
        self.dirty = false;
        flushed?;
        info!("Closed archive {:?}", self.path);
        Ok(())
    }

    /// Write a compacted copy of the archive to `target`, returning its size
    ///
    /// Pending changes are flushed first.
    pub fn defragment<P: AsRef<Path>>(&mut self, target: P) -> Result<u64> {
        self.flush()?;
        crate::defrag::defragment(&mut self.file, &self.catalog, target.as_ref())
    }

    fn record_location(&self, path: &str) -> Result<RecordLocation> {
        match self.catalog.require(path)? {
            CatalogEntry::File(loc) => Ok(loc.clone()),
            other => Err(StorageError::InvalidFormat(format!(
                "{path} is a {} entry, expected a file record",
                other.kind()
            ))),
        }
    }

    /// Header of the file record at `loc`
    fn file_header(&mut self, loc: &RecordLocation) -> Result<FileRecord> {
        let fixed = read_at(&mut self.file, loc.position, RECORD_PREFIX_LEN as u64 + 4)?;
        let units = u32::from_le_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]);
        let header_len = (FileRecord::header_len_for(units) as u64).min(loc.length);
        let header = read_at(&mut self.file, loc.position, header_len)?;
        Ok(FileRecord::parse_header(&header)?)
    }

    fn payload(&mut self, loc: &RecordLocation) -> Result<Payload> {
        let header = self.file_header(loc)?;
        let header_len = header.header_len() as u64;
        Ok(Payload {
            position: loc.position + header_len,
            length: loc.length.saturating_sub(header_len),
        })
    }

    fn is_tracked(&self, path: &str) -> bool {
        self.shadow.as_ref().is_some_and(|shadow| shadow.is_tracked(path))
    }

    fn shadowed(&self, path: &str, limit: Option<u64>) -> Result<Option<Vec<u8>>> {
        match &self.shadow {
            Some(shadow) => shadow.load(path, limit),
            None => Ok(None),
        }
    }

    /// Extract a bundled file from the shadowed copies of its bundle and of
    /// the index bundle
    fn original_bundled(
        &mut self,
        path: &str,
        hash: u64,
        bundle_path: &str,
        limit: Option<u64>,
    ) -> Result<Vec<u8>> {
        let index_path = self.config.index_path.clone();
        let (Some(index_bundle), Some(bundle_bytes)) =
            (self.shadowed(&index_path, None)?, self.shadowed(bundle_path, None)?)
        else {
            return self.read_limited(path, limit);
        };

        let image = bundle::extract_bytes(&index_bundle, self.codec.as_ref())?;
        let tables = BundleIndex::parse(&image)?;
        let entry = tables
            .files
            .iter()
            .find(|entry| entry.hash == hash)
            .ok_or_else(|| StorageError::NotFound(format!("original of {path}")))?;
        let length = limit.map_or(u64::from(entry.size), |l| l.min(u64::from(entry.size)));
        debug!(
            "Reading original {} from shadowed {} at offset {}",
            path, bundle_path, entry.offset
        );
        Ok(bundle::extract_range(
            &mut Cursor::new(bundle_bytes),
            0,
            u64::from(entry.offset),
            length,
            self.codec.as_ref(),
        )?)
    }
}

impl Drop for ArchiveSession {
    fn drop(&mut self) {
        // bundle bytes are already on disk; the index must follow them
        if self.dirty {
            info!("Flushing {:?} on drop", self.path);
            if let Err(e) = self.flush() {
                warn!("Flush of {:?} on drop failed: {}", self.path, e);
            }
        }
    }
}

/// Record an unusable index bundle in the report and carry on without it
///
/// I/O errors still abort the open.
fn index_or_report(
    loaded: Result<Option<IndexImage>>,
    report: &mut LoadReport,
) -> Result<Option<IndexImage>> {
    match loaded {
        Err(StorageError::Io(e)) => Err(StorageError::Io(e)),
        Err(e) => {
            warn!("Index bundle unusable, bundled files are unavailable: {}", e);
            report.index_error = Some(e.to_string());
            Ok(None)
        }
        loaded => loaded,
    }
}

/// Decompress the index bundle named by the configuration, if present
fn load_index(
    file: &mut File,
    catalog: &Catalog,
    config: &SessionConfig,
    codec: &dyn BlockDecompressor,
) -> Result<Option<IndexImage>> {
    let loc = match catalog.get(&config.index_path) {
        Some(CatalogEntry::File(loc)) => loc.clone(),
        Some(other) => {
            return Err(StorageError::IndexCorrupt(format!(
                "{} is a {} entry",
                config.index_path,
                other.kind()
            )));
        }
        None => {
            info!("No index bundle at {}", config.index_path);
            return Ok(None);
        }
    };

    let fixed = read_at(file, loc.position, RECORD_PREFIX_LEN as u64 + 4)?;
    let units = u32::from_le_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]);
    let header = FileRecord::parse_header(&read_at(
        file,
        loc.position,
        FileRecord::header_len_for(units) as u64,
    )?)?;

    let bytes = bundle::extract(file, loc.position + header.header_len() as u64, codec)?;
    let tables = BundleIndex::parse(&bytes)?;
    info!(
        "Index image: {} bytes, {} bundles, {} files",
        bytes.len(),
        tables.bundles.len(),
        tables.files.len()
    );
    Ok(Some(IndexImage {
        bytes,
        tables,
        dirty: false,
    }))
}

fn read_at<R: Read + Seek>(reader: &mut R, position: u64, len: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(position))?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_at<W: Write + Seek>(writer: &mut W, position: u64, data: &[u8]) -> Result<()> {
    writer.seek(SeekFrom::Start(position))?;
    writer.write_all(data)?;
    Ok(())
}
