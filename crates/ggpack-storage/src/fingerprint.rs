//! Archive fingerprint
//!
//! The fingerprint covers a window at each end of the archive plus its total
//! size. A sidecar catalog is reused only while the fingerprint it was saved
//! with still matches.

use std::io::{Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

use crate::{Result, StorageError};

/// Smallest archive accepted
pub const MIN_ARCHIVE_SIZE: u64 = 100;

/// Fingerprint an archive: hex SHA-256 of the first window, hex SHA-256 of
/// the last window, then the size in decimal
///
/// Windows are clamped to the archive size.
pub fn fingerprint<R: Read + Seek>(reader: &mut R, window: u64) -> Result<String> {
    let size = reader.seek(SeekFrom::End(0))?;
    if size < MIN_ARCHIVE_SIZE {
        return Err(StorageError::InvalidFormat(format!(
            "archive is {size} bytes, minimum is {MIN_ARCHIVE_SIZE}"
        )));
    }
    let window = window.min(size);

    let head = hash_window(reader, 0, window)?;
    let tail = hash_window(reader, size - window, window)?;
    Ok(format!("{head}{tail}{size}"))
}

fn hash_window<R: Read + Seek>(reader: &mut R, start: u64, len: u64) -> Result<String> {
    reader.seek(SeekFrom::Start(start))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        remaining -= chunk as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}
