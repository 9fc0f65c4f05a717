//! Fixed-width little-endian cursor and small rendering helpers
//!
//! Every structure in the archive is a flat run of little-endian integers,
//! UTF-16LE names and raw bytes. [`ByteCursor`] walks such a run and reports
//! the absolute position of each field it reads, which is what the engine
//! needs to patch those fields in place later.

use thiserror::Error;

/// Errors raised while decoding raw bytes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes left for the requested field
    #[error("unexpected end of data at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        /// Position of the field that could not be read
        offset: usize,
        /// Bytes the field needed
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// Name is not valid UTF-16
    #[error("invalid UTF-16 name at offset {0}")]
    InvalidName(usize),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Forward-only reader over a byte slice
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor at the start of `data`
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a cursor starting at `pos`
    pub const fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// Current position
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current position
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Read `len` raw bytes
    pub fn bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a fixed-size array
    pub fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Read a little-endian `u32`
    pub fn u32(&mut self) -> CodecResult<u32> {
        self.array::<4>().map(u32::from_le_bytes)
    }

    /// Read a little-endian `u64`
    pub fn u64(&mut self) -> CodecResult<u64> {
        self.array::<8>().map(u64::from_le_bytes)
    }

    /// Skip `len` bytes
    pub fn skip(&mut self, len: usize) -> CodecResult<()> {
        self.bytes(len).map(|_| ())
    }

    /// Read a NUL-terminated byte string, stopping at `limit`
    ///
    /// The terminator is consumed but not returned. A missing terminator
    /// ends the string at `limit`.
    pub fn c_bytes(&mut self, limit: usize) -> &'a [u8] {
        let end = limit.min(self.data.len());
        let start = self.pos.min(end);
        let stop = self.data[start..end]
            .iter()
            .position(|&b| b == 0)
            .map_or(end, |i| start + i);
        self.pos = if stop < end { stop + 1 } else { end };
        &self.data[start..stop]
    }
}

/// Read a little-endian `u32` at `pos`
pub fn read_u32_le(data: &[u8], pos: usize) -> CodecResult<u32> {
    ByteCursor::at(data, pos).u32()
}

/// Read a little-endian `u64` at `pos`
pub fn read_u64_le(data: &[u8], pos: usize) -> CodecResult<u64> {
    ByteCursor::at(data, pos).u64()
}

/// Overwrite a little-endian `u32` at `pos`
pub fn write_u32_le(data: &mut [u8], pos: usize, value: u32) -> CodecResult<()> {
    let available = data.len().saturating_sub(pos);
    if available < 4 {
        return Err(CodecError::UnexpectedEof {
            offset: pos,
            needed: 4,
            available,
        });
    }
    data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Decode a UTF-16LE name, dropping the trailing NUL unit
pub fn decode_utf16_name(raw: &[u8], offset: usize) -> CodecResult<String> {
    let mut units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|_| CodecError::InvalidName(offset))
}

/// Encode a name as UTF-16LE with a trailing NUL unit
///
/// Returns the encoded bytes and the unit count (terminator included).
pub fn encode_utf16_name(name: &str) -> (Vec<u8>, u32) {
    let mut bytes = Vec::with_capacity((name.len() + 1) * 2);
    let mut units = 0u32;
    for unit in name.encode_utf16().chain(std::iter::once(0)) {
        bytes.extend_from_slice(&unit.to_le_bytes());
        units += 1;
    }
    (bytes, units)
}

/// Render bytes for log output: printable ASCII as characters, control
/// characters escaped, everything else as two hex digits
pub fn printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        match b {
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("{b:02x}")),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_little_endian_fields() {
        let data = [
            0x01, 0x00, 0x00, 0x00, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01,
        ];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.u32().unwrap(), 1);
        assert_eq!(cursor.u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(cursor.remaining(), 0);

        let err = cursor.u32().unwrap_err();
        assert_eq!(
            err,
            CodecError::UnexpectedEof {
                offset: 12,
                needed: 4,
                available: 0
            }
        );
    }

    #[test]
    fn test_c_bytes_stops_at_nul_or_limit() {
        let data = b"Art/\0rock.dds";
        let mut cursor = ByteCursor::new(data);
        assert_eq!(cursor.c_bytes(data.len()), b"Art/");
        assert_eq!(cursor.position(), 5);
        assert_eq!(cursor.c_bytes(data.len()), b"rock.dds");
        assert_eq!(cursor.position(), data.len());

        let mut limited = ByteCursor::new(data);
        assert_eq!(limited.c_bytes(2), b"Ar");
        assert_eq!(limited.position(), 2);
    }

    #[test]
    fn test_utf16_name_round_trip() {
        let (bytes, units) = encode_utf16_name("Bundles2");
        assert_eq!(units, 9);
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[16..], &[0, 0]);
        assert_eq!(decode_utf16_name(&bytes, 0).unwrap(), "Bundles2");
    }

    #[test]
    fn test_empty_name_is_single_terminator() {
        let (bytes, units) = encode_utf16_name("");
        assert_eq!(units, 1);
        assert_eq!(bytes, vec![0, 0]);
        assert_eq!(decode_utf16_name(&bytes, 0).unwrap(), "");
    }

    #[test]
    fn test_write_u32_le_bounds() {
        let mut buf = [0u8; 6];
        write_u32_le(&mut buf, 2, 0xAABB_CCDD).unwrap();
        assert_eq!(buf, [0, 0, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert!(write_u32_le(&mut buf, 3, 1).is_err());
        assert_eq!(read_u32_le(&buf, 2).unwrap(), 0xAABB_CCDD);
    }

    #[test]
    fn test_printable_rendering() {
        assert_eq!(printable(b"GGPK\t\x03"), "GGPK\\t03");
    }
}
