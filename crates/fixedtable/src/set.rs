//! Open-addressing set of fixed-width keys with owned or mapped backing.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (40 bytes, format.rs)                  │
//! ├───────────────────────────────────────────────┤
//! │ KEY ARRAY (capacity × K::WIDTH bytes,         │
//! │ host-native byte images, tombstone keys kept) │
//! ├───────────────────────────────────────────────┤
//! │ 0..7 zero bytes padding to an 8-byte boundary │
//! ├───────────────────────────────────────────────┤
//! │ OCCUPANCY FLAGS (slotflags serialized form)   │
//! └───────────────────────────────────────────────┘
//! ```

use crate::error::TableError;
use crate::format::{array_len, checked_region, pad8, write_pad8, Header, HEADER_BYTES};
use crate::key::FixedWidth;
use crate::mapping::{MapFile, Mapping, SystemMapper};
use hashprobe::{
    find_fresh, find_slot, grown_capacity, needs_grow, reserve_slots, AltIntHash, KeyHash, Lookup,
    DEFAULT_GROWTH_FACTOR, DEFAULT_LOAD_FACTOR,
};
use slotflags::{FlagPairs, SlotFlags, SlotFlagsView, SECTION_HEADER_BYTES};
use std::fs::{rename, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// A set of trivially-copyable keys that can be written to disk and
/// reopened as a read-only memory mapping.
///
/// The backing is a tagged union: an *Owned* set holds a heap key array and
/// mutates freely; a *Mapped* set is a read-only view over a file produced
/// by [`write`](FixedSet::write). Mutating calls on a mapped set fail with
/// [`TableError::ReadOnly`]; the two modes never mix within one instance,
/// and a set only goes from owned to mapped by writing a file and
/// reopening it.
///
/// Erasing a key tombstones its slot but retains the key bytes, so a later
/// lookup of the same key can stop at the tombstone instead of scanning the
/// rest of the probe chain. Tombstones are discarded on rehash.
#[derive(Debug)]
pub struct FixedSet<K, H = AltIntHash> {
    count: usize,
    load_factor: f64,
    growth_factor: f64,
    hasher: H,
    backing: Backing<K>,
}

#[derive(Debug)]
enum Backing<K> {
    Owned { keys: Vec<K>, flags: SlotFlags },
    Mapped(MappedSet),
}

/// Region geometry of a mapped set, validated once at open time.
#[derive(Debug)]
struct MappedSet {
    map: Mapping,
    capacity: usize,
    keys_start: usize,
    flags_offset: usize,
    flags_len: usize,
}

impl MappedSet {
    fn flags(&self) -> SlotFlagsView<'_> {
        let words = self.flags_offset + SECTION_HEADER_BYTES;
        SlotFlagsView::over(
            &self.map.bytes()[words..self.flags_offset + self.flags_len],
            self.capacity,
        )
    }

    fn key_at<K: FixedWidth>(&self, idx: usize) -> K {
        let off = self.keys_start + idx * K::WIDTH;
        K::load(&self.map.bytes()[off..off + K::WIDTH])
    }

    fn open<K: FixedWidth>(map: Mapping) -> Result<(Header, MappedSet), TableError> {
        let bytes = map.bytes();
        let header = Header::decode(bytes)?;
        let capacity = header.capacity as usize;
        if header.count > header.capacity {
            return Err(TableError::Format {
                reason: format!("count {} exceeds capacity {}", header.count, header.capacity),
            });
        }
        let keys_len = array_len(capacity, K::WIDTH, "key")?;
        checked_region(bytes, HEADER_BYTES, keys_len, "key")?;
        let flags_offset = header.flags_offset as usize;
        if flags_offset < HEADER_BYTES + keys_len {
            return Err(TableError::Format {
                reason: format!("flags offset {flags_offset} overlaps the key array"),
            });
        }
        if flags_offset > bytes.len() {
            return Err(TableError::Format {
                reason: format!(
                    "flags offset {flags_offset} beyond end of a {}-byte file",
                    bytes.len()
                ),
            });
        }
        let view = SlotFlagsView::decode(&bytes[flags_offset..])?;
        if view.len() != capacity {
            return Err(TableError::Format {
                reason: format!(
                    "flags track {} slots, table declares {}",
                    view.len(),
                    capacity
                ),
            });
        }
        let flags_len = SECTION_HEADER_BYTES + view.word_bytes();
        Ok((
            header,
            MappedSet {
                map,
                capacity,
                keys_start: HEADER_BYTES,
                flags_offset,
                flags_len,
            },
        ))
    }
}

impl<K: FixedWidth, H: KeyHash<K> + Default + Clone> Default for FixedSet<K, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FixedWidth, H: KeyHash<K> + Default + Clone> FixedSet<K, H> {
    /// Creates an empty owned set with zero capacity.
    pub fn new() -> Self {
        Self::with_hasher(H::default())
    }

    /// Creates an empty owned set using the supplied hash capability.
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            count: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            hasher,
            backing: Backing::Owned {
                keys: Vec::new(),
                flags: SlotFlags::new(),
            },
        }
    }

    /// Opens a written set file as a read-only mapped set.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        Self::open_with(path, &SystemMapper)
    }

    /// Opens a written set file through the given mapping provider.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be opened, `Mapping` if the mapping call
    /// fails, `Format` if the declared sizes do not fit the file.
    pub fn open_with<P: AsRef<Path>>(path: P, mapper: &dyn MapFile) -> Result<Self, TableError> {
        let map = Mapping::open_with(path, mapper)?;
        let (header, mapped) = MappedSet::open::<K>(map)?;
        Ok(Self {
            count: header.count as usize,
            load_factor: header.load_factor,
            growth_factor: header.growth_factor,
            hasher: H::default(),
            backing: Backing::Mapped(mapped),
        })
    }

    /// Deserializes a written set from a stream into an owned set.
    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self, TableError> {
        let header = Header::read_from(r)?;
        let capacity = header.capacity as usize;
        if header.count > header.capacity {
            return Err(TableError::Format {
                reason: format!("count {} exceeds capacity {}", header.count, header.capacity),
            });
        }
        let keys_len = array_len(capacity, K::WIDTH, "key")?;
        let mut keys = vec![K::default(); capacity];
        let mut buf = vec![0u8; K::WIDTH];
        for key in keys.iter_mut() {
            r.read_exact(&mut buf)?;
            *key = K::load(&buf);
        }
        let data_end = HEADER_BYTES + keys_len;
        let pad = (header.flags_offset as usize)
            .checked_sub(data_end)
            .filter(|p| *p < 8)
            .ok_or_else(|| TableError::Format {
                reason: format!(
                    "flags offset {} inconsistent with key array end {}",
                    header.flags_offset, data_end
                ),
            })?;
        let mut padbuf = [0u8; 8];
        r.read_exact(&mut padbuf[..pad])?;
        let flags = SlotFlags::from_reader(r)?;
        if flags.len() != capacity {
            return Err(TableError::Format {
                reason: format!(
                    "flags track {} slots, table declares {}",
                    flags.len(),
                    capacity
                ),
            });
        }
        Ok(Self {
            count: header.count as usize,
            load_factor: header.load_factor,
            growth_factor: header.growth_factor,
            hasher: H::default(),
            backing: Backing::Owned { keys, flags },
        })
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Slot count currently backing the set.
    pub fn capacity(&self) -> usize {
        match &self.backing {
            Backing::Owned { keys, .. } => keys.len(),
            Backing::Mapped(m) => m.capacity,
        }
    }

    /// Returns `true` if this instance is a read-only mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Returns `true` if the key is live in the set. Never fails: absent,
    /// erased, and empty-table lookups all report `false`.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_found()
    }

    /// Inserts a key. Returns `true` if the key was newly inserted,
    /// `false` if it was already live (idempotent no-op).
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped set.
    pub fn insert(&mut self, key: K) -> Result<bool, TableError> {
        let count = self.count;
        let (lf, gf) = (self.load_factor, self.growth_factor);
        let hash = self.hasher.hash(&key);
        match &mut self.backing {
            Backing::Owned { keys, flags } => {
                let cap = keys.len();
                let mut target = 0usize;
                if cap > 0 {
                    let start = (hash % cap as u64) as usize;
                    match find_slot(&*flags, cap, start, |i| keys[i] == key) {
                        Lookup::Found(_) => return Ok(false),
                        Lookup::Absent { insert_at } => target = insert_at,
                    }
                }
                if needs_grow(count, cap, lf) {
                    rehash_owned(keys, flags, &self.hasher, grown_capacity(cap, gf));
                    let cap = keys.len();
                    target = find_fresh(&*flags, cap, (hash % cap as u64) as usize);
                }
                flags.set_both(target);
                keys[target] = key;
                self.count += 1;
                Ok(true)
            }
            Backing::Mapped(_) => Err(TableError::ReadOnly { op: "insert into" }),
        }
    }

    /// Erases a key. Returns `true` if a live key was removed; erasing an
    /// absent (or already erased) key is a no-op.
    ///
    /// The slot is tombstoned: the key bytes stay in place so lookups of
    /// the erased key terminate at this slot.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped set.
    pub fn erase(&mut self, key: &K) -> Result<bool, TableError> {
        let hash = self.hasher.hash(key);
        match &mut self.backing {
            Backing::Owned { keys, flags } => {
                let cap = keys.len();
                if cap == 0 {
                    return Ok(false);
                }
                let start = (hash % cap as u64) as usize;
                match find_slot(&*flags, cap, start, |i| keys[i] == *key) {
                    Lookup::Found(idx) => {
                        flags.clear_occupied(idx);
                        self.count -= 1;
                        Ok(true)
                    }
                    Lookup::Absent { .. } => Ok(false),
                }
            }
            Backing::Mapped(_) => Err(TableError::ReadOnly { op: "erase from" }),
        }
    }

    /// Rehashes so the set can hold `target` live keys without growing.
    /// A no-op when `target` is smaller than the current live count;
    /// `reserve(0)` forces a growth step.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped set.
    pub fn reserve(&mut self, target: usize) -> Result<(), TableError> {
        let count = self.count;
        let (lf, gf) = (self.load_factor, self.growth_factor);
        match &mut self.backing {
            Backing::Owned { keys, flags } => {
                let new_capacity = if target > 0 {
                    if target < count {
                        return Ok(());
                    }
                    reserve_slots(target, lf)
                } else {
                    grown_capacity(keys.len(), gf)
                };
                rehash_owned(keys, flags, &self.hasher, new_capacity);
                Ok(())
            }
            Backing::Mapped(_) => Err(TableError::ReadOnly { op: "reserve" }),
        }
    }

    /// Removes every key, keeping the current capacity. Tombstone history
    /// is discarded along with the entries.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped set.
    pub fn clear(&mut self) -> Result<(), TableError> {
        match &mut self.backing {
            Backing::Owned { flags, .. } => {
                flags.clear_all();
                self.count = 0;
                Ok(())
            }
            Backing::Mapped(_) => Err(TableError::ReadOnly { op: "clear" }),
        }
    }

    /// Iterates the live keys in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.capacity()).filter_map(move |i| {
            if self.slot_occupied(i) {
                Some(self.key_at(i))
            } else {
                None
            }
        })
    }

    /// Serializes the set to `path` in the mapped layout.
    ///
    /// Data is written to a temporary file, fsynced, then atomically
    /// renamed into place.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TableError> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;

        let capacity = self.capacity();
        let keys_len = array_len(capacity, K::WIDTH, "key")?;
        let data_end = HEADER_BYTES + keys_len;
        let header = Header {
            count: self.count as u64,
            capacity: capacity as u64,
            load_factor: self.load_factor,
            growth_factor: self.growth_factor,
            flags_offset: (data_end + pad8(data_end)) as u64,
        };
        header.write_to(&mut file)?;

        match &self.backing {
            Backing::Owned { keys, flags } => {
                let mut buf = vec![0u8; K::WIDTH];
                for key in keys {
                    key.store(&mut buf);
                    file.write_all(&buf)?;
                }
                write_pad8(&mut file, data_end)?;
                flags.write_to(&mut file)?;
            }
            Backing::Mapped(m) => {
                let bytes = m.map.bytes();
                file.write_all(&bytes[m.keys_start..m.keys_start + keys_len])?;
                write_pad8(&mut file, data_end)?;
                file.write_all(&bytes[m.flags_offset..m.flags_offset + m.flags_len])?;
            }
        }

        file.flush()?;
        file.sync_all()?;
        rename(&tmp, path)?;
        Ok(())
    }

    /// Duplicates an owned set. Fails fast with [`TableError::InvalidCopy`]
    /// on a mapped set — duplicating the mapping would alias it; use
    /// [`to_owned_table`](Self::to_owned_table) to materialize a copy.
    pub fn try_clone(&self) -> Result<Self, TableError> {
        match &self.backing {
            Backing::Owned { keys, flags } => Ok(Self {
                count: self.count,
                load_factor: self.load_factor,
                growth_factor: self.growth_factor,
                hasher: self.hasher.clone(),
                backing: Backing::Owned {
                    keys: keys.clone(),
                    flags: flags.clone(),
                },
            }),
            Backing::Mapped(_) => Err(TableError::InvalidCopy),
        }
    }

    /// Materializes a new owned set with the same contents, from either
    /// backing. This is the permitted copy path out of a mapping.
    pub fn to_owned_table(&self) -> Self {
        match &self.backing {
            Backing::Owned { keys, flags } => Self {
                count: self.count,
                load_factor: self.load_factor,
                growth_factor: self.growth_factor,
                hasher: self.hasher.clone(),
                backing: Backing::Owned {
                    keys: keys.clone(),
                    flags: flags.clone(),
                },
            },
            Backing::Mapped(m) => {
                let capacity = m.capacity;
                let mut keys = vec![K::default(); capacity];
                let mut flags = SlotFlags::with_capacity(capacity);
                let view = m.flags();
                for i in 0..capacity {
                    let (occupied, ever) = view.get(i);
                    if ever {
                        keys[i] = m.key_at(i);
                    }
                    flags.set_pair(i, occupied, ever);
                }
                Self {
                    count: self.count,
                    load_factor: self.load_factor,
                    growth_factor: self.growth_factor,
                    hasher: self.hasher.clone(),
                    backing: Backing::Owned { keys, flags },
                }
            }
        }
    }

    fn lookup(&self, key: &K) -> Lookup {
        let capacity = self.capacity();
        if capacity == 0 {
            return Lookup::Absent { insert_at: 0 };
        }
        let start = (self.hasher.hash(key) % capacity as u64) as usize;
        match &self.backing {
            Backing::Owned { keys, flags } => {
                find_slot(flags, capacity, start, |i| keys[i] == *key)
            }
            Backing::Mapped(m) => {
                find_slot(&m.flags(), capacity, start, |i| m.key_at::<K>(i) == *key)
            }
        }
    }

    fn slot_occupied(&self, idx: usize) -> bool {
        match &self.backing {
            Backing::Owned { flags, .. } => flags.occupied(idx),
            Backing::Mapped(m) => m.flags().occupied(idx),
        }
    }

    fn key_at(&self, idx: usize) -> K {
        match &self.backing {
            Backing::Owned { keys, .. } => keys[idx],
            Backing::Mapped(m) => m.key_at(idx),
        }
    }
}

/// Rebuilds the key array and flags at `new_capacity`, reinserting every
/// live key first-fit. Tombstones are discarded — this is the only point
/// where `ever occupied` history resets.
fn rehash_owned<K: FixedWidth, H: KeyHash<K>>(
    keys: &mut Vec<K>,
    flags: &mut SlotFlags,
    hasher: &H,
    new_capacity: usize,
) {
    let old_keys = std::mem::replace(keys, vec![K::default(); new_capacity]);
    let old_flags = std::mem::replace(flags, SlotFlags::with_capacity(new_capacity));
    for (i, key) in old_keys.iter().enumerate() {
        if !old_flags.occupied(i) {
            continue;
        }
        let start = (hasher.hash(key) % new_capacity as u64) as usize;
        let idx = find_fresh(&*flags, new_capacity, start);
        flags.set_both(idx);
        keys[idx] = *key;
    }
}
