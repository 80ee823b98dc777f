//! Per-slot blob descriptors: `(offset: u64, length: u64)` pairs, offsets
//! absolute from the start of the file. Slots that never held an entry
//! carry `(0, 0)`.

use byteorder::{NativeEndian, WriteBytesExt};
use fixedtable::TableError;
use slotflags::FlagPairs;
use std::io::{self, Write};

/// Encoded descriptor width in bytes.
pub(crate) const DESCR_WIDTH: usize = 16;

pub(crate) fn write_descr<W: Write>(w: &mut W, offset: u64, len: u64) -> io::Result<()> {
    w.write_u64::<NativeEndian>(offset)?;
    w.write_u64::<NativeEndian>(len)?;
    Ok(())
}

/// Reads descriptor `idx` from a descriptor table starting at `base`.
/// The table region must have been validated at open time.
pub(crate) fn descr_at(bytes: &[u8], base: usize, idx: usize) -> (usize, usize) {
    let at = base + idx * DESCR_WIDTH;
    let offset = u64::from_ne_bytes(bytes[at..at + 8].try_into().unwrap());
    let len = u64::from_ne_bytes(bytes[at + 8..at + 16].try_into().unwrap());
    (offset as usize, len as usize)
}

/// Validates that every descriptor the probe walk could dereference points
/// inside `blob_start..blob_end`. Only flagged slots (live or tombstone)
/// are checked; never-used slots keep their `(0, 0)` placeholder.
pub(crate) fn validate_descrs<F: FlagPairs>(
    bytes: &[u8],
    descr_start: usize,
    flags: &F,
    live_only: bool,
    blob_start: usize,
    blob_end: usize,
) -> Result<(), TableError> {
    for i in 0..flags.len() {
        let (occupied, ever) = flags.get(i);
        if !ever || (live_only && !occupied) {
            continue;
        }
        let (offset, len) = descr_at(bytes, descr_start, i);
        let end = offset.checked_add(len).ok_or_else(|| TableError::Format {
            reason: format!("descriptor {i} overflows: offset {offset}, len {len}"),
        })?;
        if offset < blob_start || end > blob_end {
            return Err(TableError::Format {
                reason: format!(
                    "descriptor {i} points outside the blob: {offset}..{end} not in {blob_start}..{blob_end}"
                ),
            });
        }
    }
    Ok(())
}
