//! Platemap file header constants and read/write helpers.
//!
//! Every table file starts with the same **40-byte header**:
//!
//! ```text
//! [count: u64][capacity: u64][load_factor: f64][growth_factor: f64][flags_offset: u64]
//! ```
//!
//! `flags_offset` is the byte offset from the start of the file to the
//! occupancy-flags section, which lets each variant place its own sections
//! (key array, value array, blob, descriptors) in between without the
//! decoder having to know about them. The flags section is always aligned
//! to an 8-byte boundary; writers emit zero padding as needed.
//!
//! All fields are host-native byte order. Files are not portable across
//! architectures with differing byte order or pointer width — a documented
//! limitation of the format, inherited by every table variant.

use crate::error::TableError;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Size of the common header in bytes.
pub const HEADER_BYTES: usize = 40;

/// The common file header shared by every table variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    /// Live entry count.
    pub count: u64,
    /// Slot count.
    pub capacity: u64,
    /// Load factor the table was built with.
    pub load_factor: f64,
    /// Growth multiplier the table was built with.
    pub growth_factor: f64,
    /// Byte offset from file start to the occupancy-flags section.
    pub flags_offset: u64,
}

impl Header {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<NativeEndian>(self.count)?;
        w.write_u64::<NativeEndian>(self.capacity)?;
        w.write_f64::<NativeEndian>(self.load_factor)?;
        w.write_f64::<NativeEndian>(self.growth_factor)?;
        w.write_u64::<NativeEndian>(self.flags_offset)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Header> {
        Ok(Header {
            count: r.read_u64::<NativeEndian>()?,
            capacity: r.read_u64::<NativeEndian>()?,
            load_factor: r.read_f64::<NativeEndian>()?,
            growth_factor: r.read_f64::<NativeEndian>()?,
            flags_offset: r.read_u64::<NativeEndian>()?,
        })
    }

    /// Decodes the header from the front of a mapped region, validating the
    /// region length first.
    pub fn decode(bytes: &[u8]) -> Result<Header, TableError> {
        if bytes.len() < HEADER_BYTES {
            return Err(TableError::Format {
                reason: format!("file too small for header: {} bytes", bytes.len()),
            });
        }
        let u = |at: usize| u64::from_ne_bytes(bytes[at..at + 8].try_into().unwrap());
        Ok(Header {
            count: u(0),
            capacity: u(8),
            load_factor: f64::from_bits(u(16)),
            growth_factor: f64::from_bits(u(24)),
            flags_offset: u(32),
        })
    }
}

/// Zero padding needed to advance `len` to the next 8-byte boundary.
pub fn pad8(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// Writes `pad8(len)` zero bytes.
pub fn write_pad8<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    w.write_all(&[0u8; 8][..pad8(len)])
}

/// Returns `bytes[start..start + len]`, or a [`TableError::Format`] naming
/// `what` when the region does not fit. Every mapped decoder goes through
/// this instead of slicing the mapping directly.
pub fn checked_region<'a>(
    bytes: &'a [u8],
    start: usize,
    len: usize,
    what: &str,
) -> Result<&'a [u8], TableError> {
    let end = start.checked_add(len).ok_or_else(|| TableError::Format {
        reason: format!("{what} region overflows: start {start}, len {len}"),
    })?;
    if end > bytes.len() {
        return Err(TableError::Format {
            reason: format!(
                "{what} region out of bounds: {start}..{end} in a {}-byte file",
                bytes.len()
            ),
        });
    }
    Ok(&bytes[start..end])
}

/// `capacity * width` with overflow reported as a format error.
pub fn array_len(capacity: usize, width: usize, what: &str) -> Result<usize, TableError> {
    capacity.checked_mul(width).ok_or_else(|| TableError::Format {
        reason: format!("{what} array overflows: {capacity} entries of {width} bytes"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn sample() -> Header {
        Header {
            count: 3,
            capacity: 12,
            load_factor: 0.8,
            growth_factor: 1.2,
            flags_offset: 136,
        }
    }

    // -------------------- Round trips --------------------

    #[test]
    fn stream_round_trip() -> Result<()> {
        let mut buf = Vec::new();
        sample().write_to(&mut buf)?;
        assert_eq!(buf.len(), HEADER_BYTES);
        let h = Header::read_from(&mut buf.as_slice())?;
        assert_eq!(h, sample());
        Ok(())
    }

    #[test]
    fn decode_matches_stream_form() -> Result<()> {
        let mut buf = Vec::new();
        sample().write_to(&mut buf)?;
        let h = Header::decode(&buf)?;
        assert_eq!(h, sample());
        Ok(())
    }

    // -------------------- Validation --------------------

    #[test]
    fn decode_rejects_short_region() {
        let err = Header::decode(&[0u8; 39]).unwrap_err();
        assert!(matches!(err, TableError::Format { .. }));
    }

    #[test]
    fn checked_region_rejects_overrun() {
        let bytes = [0u8; 16];
        assert!(checked_region(&bytes, 0, 16, "keys").is_ok());
        assert!(checked_region(&bytes, 8, 9, "keys").is_err());
        assert!(checked_region(&bytes, usize::MAX, 2, "keys").is_err());
    }

    #[test]
    fn array_len_rejects_overflow() {
        assert_eq!(array_len(12, 8, "key").unwrap(), 96);
        assert!(array_len(usize::MAX, 8, "key").is_err());
    }

    // -------------------- Padding --------------------

    #[test]
    fn pad8_boundaries() {
        assert_eq!(pad8(0), 0);
        assert_eq!(pad8(1), 7);
        assert_eq!(pad8(7), 1);
        assert_eq!(pad8(8), 0);
        assert_eq!(pad8(41), 7);
    }

    #[test]
    fn write_pad8_emits_zeros() -> Result<()> {
        let mut buf = Vec::new();
        write_pad8(&mut buf, 43)?;
        assert_eq!(buf, vec![0u8; 5]);
        Ok(())
    }
}
