//! # SlotFlags
//!
//! Packed two-bit-per-slot occupancy flags for the Platemap open-addressing
//! tables.
//!
//! Every table slot carries two independent booleans:
//!
//! - **occupied** — the slot currently holds a live entry.
//! - **ever occupied** — the slot has held an entry at some point
//!   (tombstone marker). Cleared only when a table rehashes into a fresh
//!   flag array.
//!
//! The invariant `occupied ⇒ ever occupied` holds for every slot.
//!
//! Flags are packed sixteen slots per `u32` word, two bits per slot: bit 0
//! of each pair is `occupied`, bit 1 is `ever occupied`.
//!
//! ## Serialized form
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ slot count (u64)  | word count (u64)         │
//! ├──────────────────────────────────────────────┤
//! │ packed words (u32 × word count)              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! All integers are host-native byte order — the Platemap file format is
//! explicitly not portable across architectures with differing byte order.
//!
//! Two representations share one read contract ([`FlagPairs`]):
//! [`SlotFlags`] owns its words and is mutable; [`SlotFlagsView`] decodes
//! read-only over externally owned bytes (a memory-mapped file section)
//! without copying.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Slots packed into each `u32` word (two bits per slot).
pub const SLOTS_PER_WORD: usize = 16;

/// Size in bytes of the serialized section header (slot count + word count).
pub const SECTION_HEADER_BYTES: usize = 16;

const OCCUPIED_BIT: u32 = 0b01;
const EVER_BIT: u32 = 0b10;

/// Number of `u32` words needed to back `slots` flag pairs.
pub fn word_count(slots: usize) -> usize {
    slots.div_ceil(SLOTS_PER_WORD)
}

/// Total serialized size in bytes of a flags section backing `slots` pairs.
pub fn section_len(slots: usize) -> usize {
    SECTION_HEADER_BYTES + 4 * word_count(slots)
}

#[derive(Debug, Error)]
pub enum FlagsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("flags section truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("flags section inconsistent: {words} words cannot back {slots} slots")]
    WordCount { slots: usize, words: usize },
}

/// Read access shared by the owned and mapped flag representations.
///
/// The probe engine is written against this trait so the same walk runs
/// over a heap-owned table and a memory-mapped one.
pub trait FlagPairs {
    /// Number of slots tracked.
    fn len(&self) -> usize;

    /// Returns `(occupied, ever_occupied)` for the given slot.
    fn get(&self, idx: usize) -> (bool, bool);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the slot currently holds a live entry.
    fn occupied(&self, idx: usize) -> bool {
        self.get(idx).0
    }

    /// Returns `true` if the slot is flagged at all (live or tombstone).
    fn ever_occupied(&self, idx: usize) -> bool {
        self.get(idx).1
    }
}

#[inline]
fn split(idx: usize) -> (usize, u32) {
    (idx / SLOTS_PER_WORD, (2 * (idx % SLOTS_PER_WORD)) as u32)
}

/// Owned, mutable flag array sized to a table's capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotFlags {
    words: Vec<u32>,
    slots: usize,
}

impl SlotFlags {
    /// Creates an empty flag array tracking zero slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flag array for `slots` slots, all unused.
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            words: vec![0; word_count(slots)],
            slots,
        }
    }

    /// Marks the slot live: sets both `occupied` and `ever occupied`.
    pub fn set_both(&mut self, idx: usize) {
        let (w, shift) = split(idx);
        self.words[w] |= (OCCUPIED_BIT | EVER_BIT) << shift;
    }

    /// Tombstones the slot: clears `occupied`, leaves `ever occupied` set.
    pub fn clear_occupied(&mut self, idx: usize) {
        let (w, shift) = split(idx);
        self.words[w] &= !(OCCUPIED_BIT << shift);
    }

    /// Writes an explicit pair state. Used when materializing an owned copy
    /// of a mapped table; the algorithm paths use [`set_both`](Self::set_both)
    /// and [`clear_occupied`](Self::clear_occupied).
    pub fn set_pair(&mut self, idx: usize, occupied: bool, ever: bool) {
        let (w, shift) = split(idx);
        let mut pair = 0u32;
        if occupied {
            pair |= OCCUPIED_BIT;
        }
        if ever {
            pair |= EVER_BIT;
        }
        self.words[w] = (self.words[w] & !(0b11 << shift)) | (pair << shift);
    }

    /// Resets every slot to unused, discarding tombstone history.
    ///
    /// Only rehash (into a fresh array) and `clear` on an owned table reset
    /// the `ever occupied` bits.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Serializes the section: slot count, word count, packed words.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<NativeEndian>(self.slots as u64)?;
        w.write_u64::<NativeEndian>(self.words.len() as u64)?;
        for word in &self.words {
            w.write_u32::<NativeEndian>(*word)?;
        }
        Ok(())
    }

    /// Deserializes a section previously produced by [`write_to`](Self::write_to).
    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self, FlagsError> {
        let slots = r.read_u64::<NativeEndian>()? as usize;
        let words = r.read_u64::<NativeEndian>()? as usize;
        if words < word_count(slots) {
            return Err(FlagsError::WordCount { slots, words });
        }
        let mut packed = vec![0u32; words];
        for word in packed.iter_mut() {
            *word = r.read_u32::<NativeEndian>()?;
        }
        Ok(Self {
            words: packed,
            slots,
        })
    }

    /// Serialized size in bytes, header included.
    pub fn section_len(&self) -> usize {
        SECTION_HEADER_BYTES + 4 * self.words.len()
    }
}

impl FlagPairs for SlotFlags {
    fn len(&self) -> usize {
        self.slots
    }

    fn get(&self, idx: usize) -> (bool, bool) {
        let (w, shift) = split(idx);
        let pair = self.words[w] >> shift;
        (pair & OCCUPIED_BIT != 0, pair & EVER_BIT != 0)
    }
}

/// Read-only flag view decoded over externally owned bytes.
///
/// Words are read through a bounds-checked byte reader rather than by
/// reinterpreting the region as `&[u32]`, so the view carries no alignment
/// requirement beyond what the file format already guarantees.
#[derive(Debug, Clone, Copy)]
pub struct SlotFlagsView<'a> {
    words: &'a [u8],
    slots: usize,
}

impl<'a> SlotFlagsView<'a> {
    /// Decodes a serialized section in place. `bytes` must start at the
    /// section header; trailing bytes beyond the declared word array are
    /// ignored.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, FlagsError> {
        if bytes.len() < SECTION_HEADER_BYTES {
            return Err(FlagsError::Truncated {
                need: SECTION_HEADER_BYTES,
                have: bytes.len(),
            });
        }
        let slots = u64::from_ne_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let words = u64::from_ne_bytes(bytes[8..16].try_into().unwrap()) as usize;
        if words < word_count(slots) {
            return Err(FlagsError::WordCount { slots, words });
        }
        let need = SECTION_HEADER_BYTES + 4 * words;
        if bytes.len() < need {
            return Err(FlagsError::Truncated {
                need,
                have: bytes.len(),
            });
        }
        Ok(Self::over(
            &bytes[SECTION_HEADER_BYTES..SECTION_HEADER_BYTES + 4 * words],
            slots,
        ))
    }

    /// Builds a view directly over a word region. The region must hold at
    /// least [`word_count`]`(slots) * 4` bytes; [`decode`](Self::decode)
    /// performs that validation for serialized sections.
    pub fn over(words: &'a [u8], slots: usize) -> Self {
        Self { words, slots }
    }

    /// Size in bytes of the word region backing this view.
    pub fn word_bytes(&self) -> usize {
        self.words.len()
    }

    fn word(&self, w: usize) -> u32 {
        u32::from_ne_bytes(self.words[4 * w..4 * w + 4].try_into().unwrap())
    }
}

impl FlagPairs for SlotFlagsView<'_> {
    fn len(&self) -> usize {
        self.slots
    }

    fn get(&self, idx: usize) -> (bool, bool) {
        let (w, shift) = split(idx);
        let pair = self.word(w) >> shift;
        (pair & OCCUPIED_BIT != 0, pair & EVER_BIT != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    // -------------------- Basic set / clear --------------------

    #[test]
    fn new_flags_all_unused() {
        let f = SlotFlags::with_capacity(40);
        assert_eq!(f.len(), 40);
        for i in 0..40 {
            assert_eq!(f.get(i), (false, false));
        }
    }

    #[test]
    fn set_both_marks_live() {
        let mut f = SlotFlags::with_capacity(10);
        f.set_both(3);
        assert_eq!(f.get(3), (true, true));
        assert!(f.occupied(3));
        assert!(f.ever_occupied(3));
        // neighbors untouched
        assert_eq!(f.get(2), (false, false));
        assert_eq!(f.get(4), (false, false));
    }

    #[test]
    fn clear_occupied_leaves_tombstone() {
        let mut f = SlotFlags::with_capacity(10);
        f.set_both(7);
        f.clear_occupied(7);
        assert_eq!(f.get(7), (false, true));
    }

    #[test]
    fn clear_all_resets_tombstones() {
        let mut f = SlotFlags::with_capacity(33);
        f.set_both(0);
        f.set_both(32);
        f.clear_occupied(0);
        f.clear_all();
        for i in 0..33 {
            assert_eq!(f.get(i), (false, false));
        }
    }

    #[test]
    fn set_pair_restores_exact_state() {
        let mut f = SlotFlags::with_capacity(8);
        f.set_pair(1, true, true);
        f.set_pair(2, false, true);
        f.set_pair(1, false, true);
        assert_eq!(f.get(1), (false, true));
        assert_eq!(f.get(2), (false, true));
        assert_eq!(f.get(3), (false, false));
    }

    // -------------------- Word boundaries --------------------

    #[test]
    fn slots_straddling_word_boundary() {
        let mut f = SlotFlags::with_capacity(48);
        for i in [15, 16, 17, 31, 32, 47] {
            f.set_both(i);
        }
        for i in 0..48 {
            let expect = matches!(i, 15 | 16 | 17 | 31 | 32 | 47);
            assert_eq!(f.occupied(i), expect, "slot {}", i);
        }
    }

    #[test]
    fn word_count_rounds_up() {
        assert_eq!(word_count(0), 0);
        assert_eq!(word_count(1), 1);
        assert_eq!(word_count(16), 1);
        assert_eq!(word_count(17), 2);
        assert_eq!(word_count(32), 2);
    }

    // -------------------- Serialization round trips --------------------

    #[test]
    fn stream_round_trip() -> Result<()> {
        let mut f = SlotFlags::with_capacity(21);
        f.set_both(0);
        f.set_both(20);
        f.set_both(5);
        f.clear_occupied(5);

        let mut buf = Vec::new();
        f.write_to(&mut buf)?;
        assert_eq!(buf.len(), f.section_len());

        let g = SlotFlags::from_reader(&mut buf.as_slice())?;
        assert_eq!(f, g);
        Ok(())
    }

    #[test]
    fn view_decodes_serialized_section() -> Result<()> {
        let mut f = SlotFlags::with_capacity(21);
        f.set_both(1);
        f.set_both(16);
        f.clear_occupied(16);

        let mut buf = Vec::new();
        f.write_to(&mut buf)?;

        let v = SlotFlagsView::decode(&buf)?;
        assert_eq!(v.len(), 21);
        for i in 0..21 {
            assert_eq!(v.get(i), f.get(i), "slot {}", i);
        }
        Ok(())
    }

    #[test]
    fn view_ignores_trailing_bytes() -> Result<()> {
        let mut f = SlotFlags::with_capacity(3);
        f.set_both(2);
        let mut buf = Vec::new();
        f.write_to(&mut buf)?;
        buf.extend_from_slice(&[0xAB; 9]);

        let v = SlotFlagsView::decode(&buf)?;
        assert_eq!(v.get(2), (true, true));
        Ok(())
    }

    // -------------------- Validation errors --------------------

    #[test]
    fn decode_too_small_for_header() {
        let err = SlotFlagsView::decode(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, FlagsError::Truncated { .. }));
    }

    #[test]
    fn decode_truncated_word_array() -> Result<()> {
        let mut f = SlotFlags::with_capacity(64);
        let mut buf = Vec::new();
        f.set_both(63);
        f.write_to(&mut buf)?;
        buf.truncate(buf.len() - 1);

        let err = SlotFlagsView::decode(&buf).unwrap_err();
        assert!(matches!(err, FlagsError::Truncated { .. }));
        Ok(())
    }

    #[test]
    fn decode_word_count_too_small_for_slots() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u64.to_ne_bytes()); // 100 slots
        buf.extend_from_slice(&1u64.to_ne_bytes()); // 1 word cannot back them
        buf.extend_from_slice(&[0u8; 4]);
        let err = SlotFlagsView::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            FlagsError::WordCount {
                slots: 100,
                words: 1
            }
        ));
    }

    #[test]
    fn from_reader_rejects_bad_word_count() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&17u64.to_ne_bytes());
        buf.extend_from_slice(&1u64.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        let err = SlotFlags::from_reader(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, FlagsError::WordCount { .. }));
    }

    // -------------------- Empty --------------------

    #[test]
    fn empty_flags_round_trip() -> Result<()> {
        let f = SlotFlags::new();
        let mut buf = Vec::new();
        f.write_to(&mut buf)?;
        assert_eq!(buf.len(), SECTION_HEADER_BYTES);

        let v = SlotFlagsView::decode(&buf)?;
        assert_eq!(v.len(), 0);
        assert!(v.is_empty());
        Ok(())
    }
}
