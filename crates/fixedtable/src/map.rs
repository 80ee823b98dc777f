//! Open-addressing map from fixed-width keys to fixed-width values.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (40 bytes, format.rs)                  │
//! ├───────────────────────────────────────────────┤
//! │ KEY ARRAY (capacity × K::WIDTH bytes)         │
//! ├───────────────────────────────────────────────┤
//! │ VALUE ARRAY (capacity × V::WIDTH bytes,       │
//! │ indexed identically to the key array)         │
//! ├───────────────────────────────────────────────┤
//! │ 0..7 zero bytes padding to an 8-byte boundary │
//! ├───────────────────────────────────────────────┤
//! │ OCCUPANCY FLAGS (slotflags serialized form)   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The probe walk is the same as [`FixedSet`](crate::FixedSet)'s; the value
//! array rides along, indexed by the same slot.

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

/// A map from trivially-copyable keys to trivially-copyable values, with
/// the same owned/mapped tagged backing as [`FixedSet`](crate::FixedSet).
///
/// Inserting an already-live key re-assigns its value. Erasure tombstones
/// the slot and retains both the key and value bytes; the value of an
/// erased key is unreachable through the API.
#[derive(Debug)]
pub struct FixedMap<K, V, H = AltIntHash> {
    count: usize,
    load_factor: f64,
    growth_factor: f64,
    hasher: H,
    backing: Backing<K, V>,
}

#[derive(Debug)]
enum Backing<K, V> {
    Owned {
        keys: Vec<K>,
        values: Vec<V>,
        flags: SlotFlags,
    },
    Mapped(MappedMap),
}

/// Region geometry of a mapped map, validated once at open time.
#[derive(Debug)]
struct MappedMap {
    map: Mapping,
    capacity: usize,
    keys_start: usize,
    values_start: usize,
    flags_offset: usize,
    flags_len: usize,
}

impl MappedMap {
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

    fn value_at<V: FixedWidth>(&self, idx: usize) -> V {
        let off = self.values_start + idx * V::WIDTH;
        V::load(&self.map.bytes()[off..off + V::WIDTH])
    }

    fn open<K: FixedWidth, V: FixedWidth>(map: Mapping) -> Result<(Header, MappedMap), TableError> {
        let bytes = map.bytes();
        let header = Header::decode(bytes)?;
        let capacity = header.capacity as usize;
        if header.count > header.capacity {
            return Err(TableError::Format {
                reason: format!("count {} exceeds capacity {}", header.count, header.capacity),
            });
        }
        let keys_len = array_len(capacity, K::WIDTH, "key")?;
        let values_len = array_len(capacity, V::WIDTH, "value")?;
        checked_region(bytes, HEADER_BYTES, keys_len, "key")?;
        let values_start = HEADER_BYTES + keys_len;
        checked_region(bytes, values_start, values_len, "value")?;
        let flags_offset = header.flags_offset as usize;
        if flags_offset < values_start + values_len {
            return Err(TableError::Format {
                reason: format!("flags offset {flags_offset} overlaps the value array"),
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
            MappedMap {
                map,
                capacity,
                keys_start: HEADER_BYTES,
                values_start,
                flags_offset,
                flags_len,
            },
        ))
    }
}

impl<K: FixedWidth, V: FixedWidth, H: KeyHash<K> + Default + Clone> Default for FixedMap<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FixedWidth, V: FixedWidth, H: KeyHash<K> + Default + Clone> FixedMap<K, V, H> {
    /// Creates an empty owned map with zero capacity.
    pub fn new() -> Self {
        Self::with_hasher(H::default())
    }

    /// Creates an empty owned map using the supplied hash capability.
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            count: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            hasher,
            backing: Backing::Owned {
                keys: Vec::new(),
                values: Vec::new(),
                flags: SlotFlags::new(),
            },
        }
    }

    /// Opens a written map file as a read-only mapped map.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        Self::open_with(path, &SystemMapper)
    }

    /// Opens a written map file through the given mapping provider.
    pub fn open_with<P: AsRef<Path>>(path: P, mapper: &dyn MapFile) -> Result<Self, TableError> {
        let map = Mapping::open_with(path, mapper)?;
        let (header, mapped) = MappedMap::open::<K, V>(map)?;
        Ok(Self {
            count: header.count as usize,
            load_factor: header.load_factor,
            growth_factor: header.growth_factor,
            hasher: H::default(),
            backing: Backing::Mapped(mapped),
        })
    }

    /// Deserializes a written map from a stream into an owned map.
    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self, TableError> {
        let header = Header::read_from(r)?;
        let capacity = header.capacity as usize;
        if header.count > header.capacity {
            return Err(TableError::Format {
                reason: format!("count {} exceeds capacity {}", header.count, header.capacity),
            });
        }
        let keys_len = array_len(capacity, K::WIDTH, "key")?;
        let values_len = array_len(capacity, V::WIDTH, "value")?;
        let mut keys = vec![K::default(); capacity];
        let mut buf = vec![0u8; K::WIDTH.max(V::WIDTH)];
        for key in keys.iter_mut() {
            r.read_exact(&mut buf[..K::WIDTH])?;
            *key = K::load(&buf);
        }
        let mut values = vec![V::default(); capacity];
        for value in values.iter_mut() {
            r.read_exact(&mut buf[..V::WIDTH])?;
            *value = V::load(&buf);
        }
        let data_end = HEADER_BYTES + keys_len + values_len;
        let pad = (header.flags_offset as usize)
            .checked_sub(data_end)
            .filter(|p| *p < 8)
            .ok_or_else(|| TableError::Format {
                reason: format!(
                    "flags offset {} inconsistent with value array end {}",
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
            backing: Backing::Owned {
                keys,
                values,
                flags,
            },
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Slot count currently backing the map.
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

    /// Returns `true` if the key is live. Never fails.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_found()
    }

    /// Returns the value for a live key.
    ///
    /// # Errors
    ///
    /// [`TableError::KeyNotFound`] when the key is absent, was erased, or
    /// the map is empty.
    pub fn get(&self, key: &K) -> Result<V, TableError> {
        match self.lookup(key) {
            Lookup::Found(idx) => Ok(self.value_at(idx)),
            Lookup::Absent { .. } => Err(TableError::KeyNotFound),
        }
    }

    /// Inserts or re-assigns. Returns `true` if the key was newly
    /// inserted, `false` if an existing entry's value was replaced.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped map.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, TableError> {
        let count = self.count;
        let (lf, gf) = (self.load_factor, self.growth_factor);
        let hash = self.hasher.hash(&key);
        match &mut self.backing {
            Backing::Owned {
                keys,
                values,
                flags,
            } => {
                let cap = keys.len();
                let mut target = 0usize;
                if cap > 0 {
                    let start = (hash % cap as u64) as usize;
                    match find_slot(&*flags, cap, start, |i| keys[i] == key) {
                        Lookup::Found(idx) => {
                            values[idx] = value;
                            return Ok(false);
                        }
                        Lookup::Absent { insert_at } => target = insert_at,
                    }
                }
                if needs_grow(count, cap, lf) {
                    rehash_owned(keys, values, flags, &self.hasher, grown_capacity(cap, gf));
                    let cap = keys.len();
                    target = find_fresh(&*flags, cap, (hash % cap as u64) as usize);
                }
                flags.set_both(target);
                keys[target] = key;
                values[target] = value;
                self.count += 1;
                Ok(true)
            }
            Backing::Mapped(_) => Err(TableError::ReadOnly { op: "insert into" }),
        }
    }

    /// Erases a key (tombstoning its slot). Returns `true` if a live entry
    /// was removed.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped map.
    pub fn erase(&mut self, key: &K) -> Result<bool, TableError> {
        let hash = self.hasher.hash(key);
        match &mut self.backing {
            Backing::Owned { keys, flags, .. } => {
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

    /// Rehashes so the map can hold `target` live entries without growing.
    /// No-op when `target` is smaller than the live count; `reserve(0)`
    /// forces a growth step.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped map.
    pub fn reserve(&mut self, target: usize) -> Result<(), TableError> {
        let count = self.count;
        let (lf, gf) = (self.load_factor, self.growth_factor);
        match &mut self.backing {
            Backing::Owned {
                keys,
                values,
                flags,
            } => {
                let new_capacity = if target > 0 {
                    if target < count {
                        return Ok(());
                    }
                    reserve_slots(target, lf)
                } else {
                    grown_capacity(keys.len(), gf)
                };
                rehash_owned(keys, values, flags, &self.hasher, new_capacity);
                Ok(())
            }
            Backing::Mapped(_) => Err(TableError::ReadOnly { op: "reserve" }),
        }
    }

    /// Removes every entry, keeping capacity.
    ///
    /// # Errors
    ///
    /// [`TableError::ReadOnly`] on a mapped map.
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

    /// Iterates live `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        (0..self.capacity()).filter_map(move |i| {
            if self.slot_occupied(i) {
                Some((self.key_at(i), self.value_at(i)))
            } else {
                None
            }
        })
    }

    /// Serializes the map to `path` in the mapped layout (temporary file,
    /// fsync, atomic rename).
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
        let values_len = array_len(capacity, V::WIDTH, "value")?;
        let data_end = HEADER_BYTES + keys_len + values_len;
        let header = Header {
            count: self.count as u64,
            capacity: capacity as u64,
            load_factor: self.load_factor,
            growth_factor: self.growth_factor,
            flags_offset: (data_end + pad8(data_end)) as u64,
        };
        header.write_to(&mut file)?;

        match &self.backing {
            Backing::Owned {
                keys,
                values,
                flags,
            } => {
                let mut buf = vec![0u8; K::WIDTH.max(V::WIDTH)];
                for key in keys {
                    key.store(&mut buf);
                    file.write_all(&buf[..K::WIDTH])?;
                }
                for value in values {
                    value.store(&mut buf);
                    file.write_all(&buf[..V::WIDTH])?;
                }
                write_pad8(&mut file, data_end)?;
                flags.write_to(&mut file)?;
            }
            Backing::Mapped(m) => {
                let bytes = m.map.bytes();
                file.write_all(&bytes[m.keys_start..m.keys_start + keys_len])?;
                file.write_all(&bytes[m.values_start..m.values_start + values_len])?;
                write_pad8(&mut file, data_end)?;
                file.write_all(&bytes[m.flags_offset..m.flags_offset + m.flags_len])?;
            }
        }

        file.flush()?;
        file.sync_all()?;
        rename(&tmp, path)?;
        Ok(())
    }

    /// Duplicates an owned map; fails with [`TableError::InvalidCopy`] on a
    /// mapped map.
    pub fn try_clone(&self) -> Result<Self, TableError> {
        match &self.backing {
            Backing::Owned {
                keys,
                values,
                flags,
            } => Ok(Self {
                count: self.count,
                load_factor: self.load_factor,
                growth_factor: self.growth_factor,
                hasher: self.hasher.clone(),
                backing: Backing::Owned {
                    keys: keys.clone(),
                    values: values.clone(),
                    flags: flags.clone(),
                },
            }),
            Backing::Mapped(_) => Err(TableError::InvalidCopy),
        }
    }

    /// Materializes a new owned map with the same contents, from either
    /// backing.
    pub fn to_owned_table(&self) -> Self {
        match &self.backing {
            Backing::Owned {
                keys,
                values,
                flags,
            } => Self {
                count: self.count,
                load_factor: self.load_factor,
                growth_factor: self.growth_factor,
                hasher: self.hasher.clone(),
                backing: Backing::Owned {
                    keys: keys.clone(),
                    values: values.clone(),
                    flags: flags.clone(),
                },
            },
            Backing::Mapped(m) => {
                let capacity = m.capacity;
                let mut keys = vec![K::default(); capacity];
                let mut values = vec![V::default(); capacity];
                let mut flags = SlotFlags::with_capacity(capacity);
                let view = m.flags();
                for i in 0..capacity {
                    let (occupied, ever) = view.get(i);
                    if ever {
                        keys[i] = m.key_at(i);
                        values[i] = m.value_at(i);
                    }
                    flags.set_pair(i, occupied, ever);
                }
                Self {
                    count: self.count,
                    load_factor: self.load_factor,
                    growth_factor: self.growth_factor,
                    hasher: self.hasher.clone(),
                    backing: Backing::Owned {
                        keys,
                        values,
                        flags,
                    },
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
            Backing::Owned { keys, flags, .. } => {
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

    fn value_at(&self, idx: usize) -> V {
        match &self.backing {
            Backing::Owned { values, .. } => values[idx],
            Backing::Mapped(m) => m.value_at(idx),
        }
    }
}

/// Rebuilds keys, values, and flags at `new_capacity`, reinserting live
/// slots first-fit and discarding tombstones.
fn rehash_owned<K: FixedWidth, V: FixedWidth, H: KeyHash<K>>(
    keys: &mut Vec<K>,
    values: &mut Vec<V>,
    flags: &mut SlotFlags,
    hasher: &H,
    new_capacity: usize,
) {
    let old_keys = std::mem::replace(keys, vec![K::default(); new_capacity]);
    let old_values = std::mem::replace(values, vec![V::default(); new_capacity]);
    let old_flags = std::mem::replace(flags, SlotFlags::with_capacity(new_capacity));
    for (i, key) in old_keys.iter().enumerate() {
        if !old_flags.occupied(i) {
            continue;
        }
        let start = (hasher.hash(key) % new_capacity as u64) as usize;
        let idx = find_fresh(&*flags, new_capacity, start);
        flags.set_both(idx);
        keys[idx] = *key;
        values[idx] = old_values[i];
    }
}
