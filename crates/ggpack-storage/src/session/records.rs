//! Top-level record writes and relocation

use ggpack_formats::codec::read_u64_le;
use ggpack_formats::record::{FILE_DIGEST_RANGE, FREE_RECORD_LEN, FreeRecord, RecordError};
use tracing::{debug, info, warn};

use super::{ArchiveSession, read_at, write_at};
use crate::Result;
use crate::catalog::RecordLocation;

impl ArchiveSession {
    /// Shadow the current payload of the record at `path` the first time it
    /// is about to change in this session, if its digest is unknown
    pub(super) fn capture_original(&mut self, path: &str) -> Result<()> {
        let first = match self.shadow.as_mut() {
            Some(shadow) => shadow.mark_checked(path),
            None => return Ok(()),
        };
        if first {
            let loc = self.record_location(path)?;
            self.refresh_original(path, &loc)?;
        }
        Ok(())
    }

    /// Shadow the record at `loc` if its digest differs from the keeplist.
    /// Returns `true` when a new original was stored.
    pub(super) fn refresh_original(&mut self, path: &str, loc: &RecordLocation) -> Result<bool> {
        let header = self.file_header(loc)?;
        let changed = self
            .shadow
            .as_ref()
            .is_some_and(|shadow| shadow.differs(path, &header.digest));
        if !changed {
            return Ok(false);
        }

        let payload = self.payload(loc)?;
        let data = read_at(&mut self.file, payload.position, payload.length)?;
        if let Some(shadow) = self.shadow.as_mut() {
            info!("New original of {} ({} bytes)", path, data.len());
            shadow.store(path, &data)?;
            shadow.set_digest(path, &header.digest);
        }
        Ok(true)
    }

    /// Write a complete record over the record at `path`, returning where
    /// it landed
    ///
    /// A record that fits is written in place. A larger one moves to the
    /// free-list head record when that is reusable, or to the end of the
    /// archive, and the parent pointer is repointed.
    pub(super) fn write_record(&mut self, path: &str, record: &[u8]) -> Result<u64> {
        let loc = self.record_location(path)?;
        let length = record.len() as u64;
        if let (Some(shadow), Some(digest)) = (self.shadow.as_mut(), record.get(FILE_DIGEST_RANGE)) {
            shadow.set_digest(path, digest);
        }

        if length <= loc.length {
            write_at(&mut self.file, loc.position, record)?;
            self.catalog.relocate_record(path, loc.position, length)?;
            info!("Rewrote {} in place at {} ({} bytes)", path, loc.position, length);
            return Ok(loc.position);
        }

        let position = match self.take_free_record(length)? {
            Some(position) => position,
            None => {
                let position = self.archive_size;
                self.archive_size += length;
                position
            }
        };
        write_at(&mut self.file, position, record)?;
        self.repoint(loc.reference_position, position)?;
        self.catalog.relocate_record(path, position, length)?;
        info!(
            "Relocated {} ({} -> {} bytes) from {} to {}",
            path, loc.length, length, loc.position, position
        );
        Ok(position)
    }

    /// Claim the free-list head record for `length` bytes
    ///
    /// An exact fit unlinks the record; a larger record is split and its
    /// tail stays on the list. Anything in between is left alone.
    fn take_free_record(&mut self, length: u64) -> Result<Option<u64>> {
        if !self.config.reuse_free_record {
            return Ok(None);
        }
        let Some(site) = self.catalog.free_list_ref() else {
            return Ok(None);
        };

        let head = read_u64_at(&mut self.file, site)?;
        if head == 0 || head + u64::from(FREE_RECORD_LEN) > self.archive_size {
            return Ok(None);
        }
        let free = match FreeRecord::parse(&read_at(
            &mut self.file,
            head,
            u64::from(FREE_RECORD_LEN),
        )?) {
            Ok(free) => free,
            Err(e) => {
                warn!("Free-list head at {} is unusable: {}", head, e);
                return Ok(None);
            }
        };

        let available = u64::from(free.length);
        if available == length {
            self.repoint(site, free.next)?;
            debug!("Took free record at {} ({} bytes)", head, available);
            Ok(Some(head))
        } else if available >= length + u64::from(FREE_RECORD_LEN) {
            let rest = head + length;
            let remainder = FreeRecord::build((available - length) as u32, free.next)?;
            write_at(&mut self.file, rest, &remainder)?;
            self.repoint(site, rest)?;
            debug!(
                "Split free record at {}: {} bytes used, {} left at {}",
                head,
                length,
                available - length,
                rest
            );
            Ok(Some(head))
        } else {
            Ok(None)
        }
    }

    /// Store `offset` in the pointer at `site`
    pub(super) fn repoint(&mut self, site: u64, offset: u64) -> Result<()> {
        debug!("Repointing {} -> {}", site, offset);
        write_at(&mut self.file, site, &offset.to_le_bytes())
    }
}

fn read_u64_at(file: &mut std::fs::File, position: u64) -> Result<u64> {
    let bytes = read_at(file, position, 8)?;
    Ok(read_u64_le(&bytes, 0).map_err(RecordError::from)?)
}
