//! Top-level archive records
//!
//! The archive is a sequence of length-prefixed records. Every record starts
//! with a little-endian `u32` total length followed by a four byte tag:
//!
//! | Tag    | Body                                                            |
//! |--------|-----------------------------------------------------------------|
//! | `GGPK` | `u32` version, `u64` child offsets                              |
//! | `PDIR` | `u32` name units, `u32` child count, 32-byte digest, name, children |
//! | `FILE` | `u32` name units, 32-byte digest, name, payload                 |
//! | `FREE` | `u64` offset of the next free record                            |
//!
//! Names are UTF-16LE with a trailing NUL unit; the unit count includes the
//! terminator. Directory children are `(u32 name hash, u64 offset)` pairs.
//!
//! Parsers return positions relative to the record start for every pointer
//! field that the storage engine patches when a record moves.

mod error;

pub use error::{RecordError, RecordResult};

use sha2::{Digest, Sha256};

use crate::codec::{ByteCursor, decode_utf16_name, encode_utf16_name, printable};

/// Length prefix plus tag
pub const RECORD_PREFIX_LEN: usize = 8;

/// Size of the digest carried by directory and file records
pub const DIGEST_LEN: usize = 32;

/// Byte range of the digest inside a file record
pub const FILE_DIGEST_RANGE: std::ops::Range<usize> = 12..44;

/// Fixed part of a directory record before its name
pub const DIRECTORY_FIXED_LEN: usize = 48;

/// Fixed part of a file record before its name
pub const FILE_FIXED_LEN: usize = 44;

/// Size of one directory child entry
pub const DIRECTORY_ENTRY_LEN: usize = 12;

/// Smallest valid free record
pub const FREE_RECORD_LEN: u32 = 16;

/// Record kind as identified by its tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTag {
    /// `GGPK` archive root
    Root,
    /// `PDIR` directory
    Directory,
    /// `FILE` leaf with payload
    File,
    /// `FREE` reclaimed space
    Free,
    /// Anything else
    Unknown([u8; 4]),
}

impl RecordTag {
    /// Classify raw tag bytes
    pub const fn from_bytes(tag: [u8; 4]) -> Self {
        match &tag {
            b"GGPK" => Self::Root,
            b"PDIR" => Self::Directory,
            b"FILE" => Self::File,
            b"FREE" => Self::Free,
            _ => Self::Unknown(tag),
        }
    }

    /// Raw tag bytes
    pub const fn to_bytes(self) -> [u8; 4] {
        match self {
            Self::Root => *b"GGPK",
            Self::Directory => *b"PDIR",
            Self::File => *b"FILE",
            Self::Free => *b"FREE",
            Self::Unknown(tag) => tag,
        }
    }

    /// Tag rendered for diagnostics
    pub fn display(self) -> String {
        printable(&self.to_bytes())
    }
}

/// Length and tag shared by every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Total record length including this prefix
    pub length: u32,
    /// Record kind
    pub tag: RecordTag,
}

impl RecordHeader {
    /// Parse the eight byte prefix
    pub fn parse(data: &[u8]) -> RecordResult<Self> {
        let mut cursor = ByteCursor::new(data);
        let length = cursor.u32()?;
        let tag = RecordTag::from_bytes(cursor.array::<4>()?);
        Ok(Self { length, tag })
    }

    fn expect(data: &[u8], tag: RecordTag, name: &'static str) -> RecordResult<Self> {
        let header = Self::parse(data)?;
        if header.tag != tag {
            return Err(RecordError::UnexpectedTag {
                expected: name,
                found: header.tag.display(),
            });
        }
        Ok(header)
    }
}

fn record_length(len: usize) -> RecordResult<u32> {
    u32::try_from(len).map_err(|_| RecordError::TooLarge(len))
}

/// `GGPK` root record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRecord {
    /// Total length
    pub length: u32,
    /// Format version
    pub version: u32,
    /// Offsets of the top-level records
    pub children: Vec<u64>,
}

impl RootRecord {
    /// Fixed part before the child offsets
    pub const FIXED_LEN: usize = 12;

    /// Parse a complete root record
    pub fn parse(data: &[u8]) -> RecordResult<Self> {
        let header = RecordHeader::expect(data, RecordTag::Root, "GGPK")?;
        if (header.length as usize) < Self::FIXED_LEN {
            return Err(RecordError::InvalidLength {
                length: header.length,
                minimum: Self::FIXED_LEN as u32,
            });
        }
        let mut cursor = ByteCursor::at(data, RECORD_PREFIX_LEN);
        let version = cursor.u32()?;
        let count = (header.length as usize - Self::FIXED_LEN) / 8;
        let children = (0..count)
            .map(|_| cursor.u64())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            length: header.length,
            version,
            children,
        })
    }

    /// Position of child pointer `index`, relative to the record start
    pub const fn child_reference(index: usize) -> u64 {
        (Self::FIXED_LEN + 8 * index) as u64
    }

    /// Serialize a root record
    pub fn build(version: u32, children: &[u64]) -> RecordResult<Vec<u8>> {
        let length = record_length(Self::FIXED_LEN + 8 * children.len())?;
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(b"GGPK");
        out.extend_from_slice(&version.to_le_bytes());
        for child in children {
            out.extend_from_slice(&child.to_le_bytes());
        }
        Ok(out)
    }
}

/// One child pointer of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Name hash (carried, never verified)
    pub name_hash: u32,
    /// Absolute position of the child record
    pub offset: u64,
}

/// `PDIR` directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Total length
    pub length: u32,
    /// Name units including the terminator
    pub name_units: u32,
    /// Directory digest
    pub digest: [u8; DIGEST_LEN],
    /// Directory name
    pub name: String,
    /// Child pointers
    pub entries: Vec<DirectoryEntry>,
}

impl DirectoryRecord {
    /// Parse a complete directory record
    pub fn parse(data: &[u8]) -> RecordResult<Self> {
        let header = RecordHeader::expect(data, RecordTag::Directory, "PDIR")?;
        let mut cursor = ByteCursor::at(data, RECORD_PREFIX_LEN);
        let name_units = cursor.u32()?;
        let count = cursor.u32()?;
        let digest = cursor.array::<DIGEST_LEN>()?;
        let name_pos = cursor.position();
        let name = decode_utf16_name(cursor.bytes(name_units as usize * 2)?, name_pos)?;
        let entries = (0..count)
            .map(|_| {
                Ok(DirectoryEntry {
                    name_hash: cursor.u32()?,
                    offset: cursor.u64()?,
                })
            })
            .collect::<RecordResult<Vec<_>>>()?;
        Ok(Self {
            length: header.length,
            name_units,
            digest,
            name,
            entries,
        })
    }

    /// Position of the offset field of child `index`, relative to the
    /// record start
    pub const fn child_reference(name_units: u32, index: usize) -> u64 {
        (DIRECTORY_FIXED_LEN + 2 * name_units as usize + DIRECTORY_ENTRY_LEN * index + 4) as u64
    }

    /// Serialize a directory record
    pub fn build(
        name: &str,
        digest: [u8; DIGEST_LEN],
        entries: &[DirectoryEntry],
    ) -> RecordResult<Vec<u8>> {
        let (name_bytes, units) = encode_utf16_name(name);
        let length = record_length(
            DIRECTORY_FIXED_LEN + name_bytes.len() + DIRECTORY_ENTRY_LEN * entries.len(),
        )?;
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(b"PDIR");
        out.extend_from_slice(&units.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&digest);
        out.extend_from_slice(&name_bytes);
        for entry in entries {
            out.extend_from_slice(&entry.name_hash.to_le_bytes());
            out.extend_from_slice(&entry.offset.to_le_bytes());
        }
        Ok(out)
    }
}

/// `FILE` record header
///
/// The payload is not held here; it occupies the rest of the record after
/// [`FileRecord::header_len`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Total length
    pub length: u32,
    /// Name units including the terminator
    pub name_units: u32,
    /// SHA-256 digest of the payload
    pub digest: [u8; DIGEST_LEN],
    /// File name
    pub name: String,
}

impl FileRecord {
    /// Parse the header of a file record
    ///
    /// `data` needs at least the first twelve bytes to learn the name length,
    /// and the full header to succeed. Payload bytes are ignored.
    pub fn parse_header(data: &[u8]) -> RecordResult<Self> {
        let header = RecordHeader::expect(data, RecordTag::File, "FILE")?;
        let mut cursor = ByteCursor::at(data, RECORD_PREFIX_LEN);
        let name_units = cursor.u32()?;
        let digest = cursor.array::<DIGEST_LEN>()?;
        let name_pos = cursor.position();
        let name = decode_utf16_name(cursor.bytes(name_units as usize * 2)?, name_pos)?;
        let record = Self {
            length: header.length,
            name_units,
            digest,
            name,
        };
        if (record.length as usize) < record.header_len() {
            return Err(RecordError::InvalidLength {
                length: record.length,
                minimum: record.header_len() as u32,
            });
        }
        Ok(record)
    }

    /// Header length for a name of `name_units` units
    pub const fn header_len_for(name_units: u32) -> usize {
        FILE_FIXED_LEN + 2 * name_units as usize
    }

    /// Header length of this record
    pub const fn header_len(&self) -> usize {
        Self::header_len_for(self.name_units)
    }

    /// Payload length of this record
    pub const fn payload_len(&self) -> usize {
        self.length as usize - self.header_len()
    }

    /// Serialize a file record, digesting the payload
    pub fn build(name: &str, payload: &[u8]) -> RecordResult<Vec<u8>> {
        let (name_bytes, units) = encode_utf16_name(name);
        let length = record_length(FILE_FIXED_LEN + name_bytes.len() + payload.len())?;
        let digest = Sha256::digest(payload);
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(b"FILE");
        out.extend_from_slice(&units.to_le_bytes());
        out.extend_from_slice(&digest);
        out.extend_from_slice(&name_bytes);
        out.extend_from_slice(payload);
        Ok(out)
    }
}

/// `FREE` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
    /// Total length of the reclaimed region
    pub length: u32,
    /// Offset of the next free record, zero at the end of the chain
    pub next: u64,
}

impl FreeRecord {
    /// Position of the `next` pointer, relative to the record start
    pub const NEXT_REFERENCE: u64 = 8;

    /// Parse a free record
    pub fn parse(data: &[u8]) -> RecordResult<Self> {
        let header = RecordHeader::expect(data, RecordTag::Free, "FREE")?;
        let next = ByteCursor::at(data, RECORD_PREFIX_LEN).u64()?;
        Ok(Self {
            length: header.length,
            next,
        })
    }

    /// Serialize the sixteen byte free record header
    ///
    /// The remaining `length - 16` bytes of the region are left untouched.
    pub fn build(length: u32, next: u64) -> RecordResult<Vec<u8>> {
        if length < FREE_RECORD_LEN {
            return Err(RecordError::InvalidLength {
                length,
                minimum: FREE_RECORD_LEN,
            });
        }
        let mut out = Vec::with_capacity(FREE_RECORD_LEN as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(b"FREE");
        out.extend_from_slice(&next.to_le_bytes());
        Ok(out)
    }
}
