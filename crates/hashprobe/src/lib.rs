//! # Hashprobe
//!
//! The one probe/tombstone walk shared by every Platemap table variant,
//! plus the growth-policy arithmetic and the hash capabilities the tables
//! are parameterized by.
//!
//! Open addressing stores every entry directly in the slot array. A lookup
//! starts at `hash(key) % capacity` and walks forward (wrapping) while the
//! current slot is flagged — live or tombstone. The walk terminates early
//! in three ways:
//!
//! - a **live slot with a matching key** is the entry (`Found`);
//! - a **tombstone whose retained key matches** proves no live entry with
//!   that key exists further along the chain, because an insert of the same
//!   key would have reused this slot — the walk stops without scanning the
//!   rest of the table (`Absent`);
//! - a **truly unused slot** ends every chain through it (`Absent`).
//!
//! A full wrap back to the start index also terminates (table of
//! tombstones). Tombstones retain the last live key value; they are never
//! overwritten with a blank key, which is what makes the second rule sound.
//!
//! Hashes must be deterministic across processes: slot placement is baked
//! into written files, and a mapped reader recomputes the same start index
//! from the same key bytes.

use slotflags::FlagPairs;

/// Default load factor: a table grows when `count >= capacity * 0.8`.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.8;

/// Default growth multiplier applied to the slot count on overflow.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.2;

/// Hash capability supplied to a table at construction.
///
/// Implementations must be pure functions of the key bytes — no per-process
/// randomization — so the slot layout a writer computes is reproducible by
/// every reader of the file.
pub trait KeyHash<K: ?Sized> {
    fn hash(&self, key: &K) -> u64;
}

/// Avalanche mixer for integer keys.
///
/// Raw integer keys are frequently sequential; taking them modulo the
/// capacity directly would cluster entire ranges into adjacent slots. The
/// mixer spreads consecutive inputs across the full 64-bit range.
#[derive(Debug, Default, Clone, Copy)]
pub struct AltIntHash;

#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

macro_rules! alt_int_hash {
    ($($t:ty),*) => {
        $(
            impl KeyHash<$t> for AltIntHash {
                fn hash(&self, key: &$t) -> u64 {
                    mix64(*key as u64)
                }
            }
        )*
    };
}

alt_int_hash!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// FNV-1a over byte strings.
///
/// Used by the byte-string-keyed tables; chosen over the standard library's
/// hasher because `std` hashing is allowed to vary between processes, which
/// would desynchronize a mapped reader from the writer's slot layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fnv1a;

impl KeyHash<[u8]> for Fnv1a {
    fn hash(&self, key: &[u8]) -> u64 {
        let mut h = 0xcbf2_9ce4_8422_2325u64;
        for &b in key {
            h ^= b as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }
}

/// Identity hash for integer keys.
///
/// Makes slot placement fully predictable, which tests use to force every
/// key into one probe chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHash;

macro_rules! identity_hash {
    ($($t:ty),*) => {
        $(
            impl KeyHash<$t> for IdentityHash {
                fn hash(&self, key: &$t) -> u64 {
                    *key as u64
                }
            }
        )*
    };
}

identity_hash!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// Outcome of a probe walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A live slot holds the key.
    Found(usize),
    /// The key is not live. `insert_at` is the first-fit target for an
    /// insert of this key: the first tombstone or unused slot seen on the
    /// walk, or the walk's stop point when the chain wrapped the table.
    Absent { insert_at: usize },
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// The shared probe walk. `start` must be `hash(key) % capacity`;
/// `key_matches(i)` compares slot `i`'s retained key against the query.
///
/// `capacity` must equal `flags.len()`. A zero-capacity table reports
/// `Absent { insert_at: 0 }` without consulting the flags.
pub fn find_slot<F, M>(flags: &F, capacity: usize, start: usize, mut key_matches: M) -> Lookup
where
    F: FlagPairs,
    M: FnMut(usize) -> bool,
{
    if capacity == 0 {
        return Lookup::Absent { insert_at: 0 };
    }
    let mut idx = start;
    let mut first_free: Option<usize> = None;
    loop {
        let (occupied, ever) = flags.get(idx);
        if !occupied && !ever {
            break;
        }
        if !occupied && first_free.is_none() {
            first_free = Some(idx);
        }
        if occupied && key_matches(idx) {
            return Lookup::Found(idx);
        }
        if !occupied && key_matches(idx) {
            // Matching tombstone: the key cannot be live further along.
            break;
        }
        idx += 1;
        if idx == capacity {
            idx = 0;
        }
        if idx == start {
            break;
        }
    }
    Lookup::Absent {
        insert_at: first_free.unwrap_or(idx),
    }
}

/// First-fit walk over a tombstone-free table: the first non-occupied slot
/// at or after `start`, wrapping. Used when reinserting into the fresh flag
/// array built by a rehash, where the caller guarantees spare capacity.
pub fn find_fresh<F: FlagPairs>(flags: &F, capacity: usize, start: usize) -> usize {
    let mut idx = start;
    while flags.occupied(idx) {
        idx += 1;
        if idx == capacity {
            idx = 0;
        }
        if idx == start {
            break;
        }
    }
    idx
}

/// Slot count after an automatic growth step:
/// `max(capacity + 1, max(1, capacity) * growth_factor)`.
pub fn grown_capacity(capacity: usize, growth_factor: f64) -> usize {
    let scaled = (capacity.max(1) as f64 * growth_factor) as usize;
    (capacity + 1).max(scaled)
}

/// Slot count backing `target` live entries at the given load factor.
pub fn reserve_slots(target: usize, load_factor: f64) -> usize {
    (target as f64 / load_factor) as usize
}

/// Growth trigger, checked before placing a new key.
pub fn needs_grow(count: usize, capacity: usize, load_factor: f64) -> bool {
    count as f64 >= capacity as f64 * load_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotflags::SlotFlags;

    // -------------------- Probe walk --------------------

    #[test]
    fn empty_table_is_absent() {
        let flags = SlotFlags::new();
        let r = find_slot(&flags, 0, 0, |_| unreachable!());
        assert_eq!(r, Lookup::Absent { insert_at: 0 });
    }

    #[test]
    fn unused_start_slot_is_absent() {
        let flags = SlotFlags::with_capacity(8);
        let r = find_slot(&flags, 8, 3, |_| false);
        assert_eq!(r, Lookup::Absent { insert_at: 3 });
    }

    #[test]
    fn finds_key_at_start() {
        let mut flags = SlotFlags::with_capacity(8);
        flags.set_both(2);
        let r = find_slot(&flags, 8, 2, |i| i == 2);
        assert_eq!(r, Lookup::Found(2));
    }

    #[test]
    fn walks_collision_chain_with_wrap() {
        let mut flags = SlotFlags::with_capacity(4);
        flags.set_both(2);
        flags.set_both(3);
        flags.set_both(0);
        // key lives at 0; chain starts at 2 and wraps
        let r = find_slot(&flags, 4, 2, |i| i == 0);
        assert_eq!(r, Lookup::Found(0));
    }

    #[test]
    fn matching_tombstone_short_circuits() {
        let mut flags = SlotFlags::with_capacity(8);
        for i in 0..8 {
            flags.set_both(i);
        }
        flags.clear_occupied(2);
        // slot 2's retained key matches: stop there, do not scan 3..8
        let mut probed = Vec::new();
        let r = find_slot(&flags, 8, 0, |i| {
            probed.push(i);
            i == 2
        });
        assert_eq!(r, Lookup::Absent { insert_at: 2 });
        assert_eq!(probed, vec![0, 1, 2]);
    }

    #[test]
    fn nonmatching_tombstone_is_walked_through() {
        let mut flags = SlotFlags::with_capacity(8);
        flags.set_both(0);
        flags.set_both(1);
        flags.set_both(2);
        flags.clear_occupied(1);
        let r = find_slot(&flags, 8, 0, |i| i == 2);
        assert_eq!(r, Lookup::Found(2));
    }

    #[test]
    fn absent_reports_first_tombstone_as_insert_target() {
        let mut flags = SlotFlags::with_capacity(8);
        flags.set_both(0);
        flags.set_both(1);
        flags.set_both(2);
        flags.clear_occupied(1);
        // chain 0,1,2 then unused 3; first fit is the tombstone at 1
        let r = find_slot(&flags, 8, 0, |_| false);
        assert_eq!(r, Lookup::Absent { insert_at: 1 });
    }

    #[test]
    fn absent_falls_back_to_terminating_unused_slot() {
        let mut flags = SlotFlags::with_capacity(8);
        flags.set_both(0);
        flags.set_both(1);
        let r = find_slot(&flags, 8, 0, |_| false);
        assert_eq!(r, Lookup::Absent { insert_at: 2 });
    }

    #[test]
    fn all_tombstones_wraps_and_terminates() {
        let mut flags = SlotFlags::with_capacity(4);
        for i in 0..4 {
            flags.set_both(i);
            flags.clear_occupied(i);
        }
        let mut steps = 0;
        let r = find_slot(&flags, 4, 1, |_| {
            steps += 1;
            false
        });
        // wraps exactly once; first free is the start slot itself
        assert_eq!(r, Lookup::Absent { insert_at: 1 });
        assert_eq!(steps, 4);
    }

    #[test]
    fn full_table_of_other_keys_wraps_and_terminates() {
        let mut flags = SlotFlags::with_capacity(4);
        for i in 0..4 {
            flags.set_both(i);
        }
        let r = find_slot(&flags, 4, 3, |_| false);
        assert_eq!(r, Lookup::Absent { insert_at: 3 });
    }

    // -------------------- find_fresh --------------------

    #[test]
    fn fresh_walk_skips_occupied() {
        let mut flags = SlotFlags::with_capacity(5);
        flags.set_both(1);
        flags.set_both(2);
        assert_eq!(find_fresh(&flags, 5, 1), 3);
        assert_eq!(find_fresh(&flags, 5, 0), 0);
    }

    #[test]
    fn fresh_walk_wraps() {
        let mut flags = SlotFlags::with_capacity(3);
        flags.set_both(2);
        assert_eq!(find_fresh(&flags, 3, 2), 0);
    }

    // -------------------- Growth policy --------------------

    #[test]
    fn grown_capacity_from_zero_and_one() {
        assert_eq!(grown_capacity(0, DEFAULT_GROWTH_FACTOR), 1);
        assert_eq!(grown_capacity(1, DEFAULT_GROWTH_FACTOR), 2);
    }

    #[test]
    fn grown_capacity_takes_max_of_increment_and_scale() {
        // 1.2x of small capacities truncates below capacity + 1
        assert_eq!(grown_capacity(4, DEFAULT_GROWTH_FACTOR), 5);
        // large capacities follow the multiplier
        assert_eq!(grown_capacity(100, DEFAULT_GROWTH_FACTOR), 120);
    }

    #[test]
    fn reserve_slots_divides_by_load_factor() {
        assert_eq!(reserve_slots(10, DEFAULT_LOAD_FACTOR), 12);
        assert_eq!(reserve_slots(0, DEFAULT_LOAD_FACTOR), 0);
        assert_eq!(reserve_slots(8, DEFAULT_LOAD_FACTOR), 10);
    }

    #[test]
    fn needs_grow_at_threshold() {
        assert!(needs_grow(0, 0, DEFAULT_LOAD_FACTOR));
        assert!(needs_grow(8, 10, DEFAULT_LOAD_FACTOR));
        assert!(!needs_grow(7, 10, DEFAULT_LOAD_FACTOR));
    }

    // -------------------- Hashes --------------------

    #[test]
    fn alt_int_hash_spreads_sequential_keys() {
        let h = AltIntHash;
        let a = h.hash(&1u64);
        let b = h.hash(&2u64);
        assert_ne!(a, b);
        assert_ne!(a.wrapping_add(1), b); // not a unit stride
    }

    #[test]
    fn alt_int_hash_is_deterministic() {
        assert_eq!(AltIntHash.hash(&42u64), AltIntHash.hash(&42u64));
        assert_eq!(AltIntHash.hash(&-3i32), AltIntHash.hash(&-3i32));
    }

    #[test]
    fn fnv_matches_known_vectors() {
        // standard FNV-1a 64-bit test vectors
        assert_eq!(Fnv1a.hash(b"".as_slice()), 0xcbf2_9ce4_8422_2325);
        assert_eq!(Fnv1a.hash(b"a".as_slice()), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn identity_hash_is_the_key() {
        assert_eq!(IdentityHash.hash(&7u64), 7);
        assert_eq!(IdentityHash.hash(&0u32), 0);
    }
}
