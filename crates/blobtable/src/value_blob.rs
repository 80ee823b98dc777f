//! Fixed-width keys to byte-string values.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (40 bytes, fixedtable::format)         │
//! ├───────────────────────────────────────────────┤
//! │ KEY ARRAY (capacity × K::WIDTH bytes,         │
//! │ tombstone keys kept)                          │
//! ├───────────────────────────────────────────────┤
//! │ 0..7 zero bytes padding to an 8-byte boundary │
//! ├───────────────────────────────────────────────┤
//! │ VALUE DESCRIPTORS (capacity × 16 bytes:       │
//! │ absolute blob offset u64, byte length u64)    │
//! ├───────────────────────────────────────────────┤
//! │ VALUE BLOB (concatenated bytes of live        │
//! │ values; erased slots carry (0, 0))            │
//! ├───────────────────────────────────────────────┤
//! │ 0..7 zero bytes padding to an 8-byte boundary │
//! ├───────────────────────────────────────────────┤
//! │ OCCUPANCY FLAGS (slotflags serialized form)   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Keys are fixed-width, so tombstones retain their key in the key array
//! and the probe short-circuit needs nothing from the blob; erased slots'
//! values are therefore not written.
//!
//! A mapped lookup returns its value as a `&[u8]` view directly into the
//! mapping — no copy, valid for the life of the mapped table.

use crate::descr::{descr_at, validate_descrs, write_descr, DESCR_WIDTH};
use fixedtable::format::{array_len, checked_region, pad8, write_pad8, Header, HEADER_BYTES};
use fixedtable::mapping::{MapFile, Mapping, SystemMapper};
use fixedtable::{FixedWidth, TableError};
use hashprobe::{
    find_fresh, find_slot, grown_capacity, needs_grow, reserve_slots, AltIntHash, KeyHash, Lookup,
    DEFAULT_GROWTH_FACTOR, DEFAULT_LOAD_FACTOR,
};
use slotflags::{FlagPairs, SlotFlags, SlotFlagsView, SECTION_HEADER_BYTES};
use std::fs::{rename, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Owned builder: fixed-width keys to byte-string values.
pub struct BlobValMap<K, H = AltIntHash> {
    keys: Vec<K>,
    values: Vec<Vec<u8>>,
    flags: SlotFlags,
    count: usize,
    load_factor: f64,
    growth_factor: f64,
    hasher: H,
}

impl<K: FixedWidth, H: KeyHash<K> + Default + Clone> Default for BlobValMap<K, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FixedWidth, H: KeyHash<K> + Default + Clone> BlobValMap<K, H> {
    pub fn new() -> Self {
        Self::with_hasher(H::default())
    }

    pub fn with_hasher(hasher: H) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            flags: SlotFlags::new(),
            count: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            hasher,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the key is live. Never fails.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_found()
    }

    /// Returns the value bytes for a live key.
    pub fn get(&self, key: &K) -> Option<&[u8]> {
        match self.lookup(key) {
            Lookup::Found(idx) => Some(&self.values[idx]),
            Lookup::Absent { .. } => None,
        }
    }

    /// Inserts or re-assigns. Returns `true` if the key was newly inserted.
    pub fn insert(&mut self, key: K, value: &[u8]) -> bool {
        let hash = self.hasher.hash(&key);
        let cap = self.keys.len();
        let mut target = 0usize;
        if cap > 0 {
            let start = (hash % cap as u64) as usize;
            let keys = &self.keys;
            match find_slot(&self.flags, cap, start, |i| keys[i] == key) {
                Lookup::Found(idx) => {
                    self.values[idx].clear();
                    self.values[idx].extend_from_slice(value);
                    return false;
                }
                Lookup::Absent { insert_at } => target = insert_at,
            }
        }
        if needs_grow(self.count, cap, self.load_factor) {
            self.rehash(grown_capacity(cap, self.growth_factor));
            let cap = self.keys.len();
            target = find_fresh(&self.flags, cap, (hash % cap as u64) as usize);
        }
        self.flags.set_both(target);
        self.keys[target] = key;
        self.values[target].clear();
        self.values[target].extend_from_slice(value);
        self.count += 1;
        true
    }

    /// Erases a key, tombstoning its slot (the key bytes stay in the key
    /// array for the probe short-circuit).
    pub fn erase(&mut self, key: &K) -> bool {
        let cap = self.keys.len();
        if cap == 0 {
            return false;
        }
        let start = (self.hasher.hash(key) % cap as u64) as usize;
        let keys = &self.keys;
        match find_slot(&self.flags, cap, start, |i| keys[i] == *key) {
            Lookup::Found(idx) => {
                self.flags.clear_occupied(idx);
                self.count -= 1;
                true
            }
            Lookup::Absent { .. } => false,
        }
    }

    /// Rehashes for `target` live entries; no-op when `target` is below the
    /// live count, growth step when `target` is zero.
    pub fn reserve(&mut self, target: usize) {
        let new_capacity = if target > 0 {
            if target < self.count {
                return;
            }
            reserve_slots(target, self.load_factor)
        } else {
            grown_capacity(self.keys.len(), self.growth_factor)
        };
        self.rehash(new_capacity);
    }

    /// Removes every entry, keeping capacity and discarding tombstones.
    pub fn clear(&mut self) {
        self.flags.clear_all();
        self.count = 0;
    }

    /// Iterates live `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &[u8])> + '_ {
        (0..self.keys.len()).filter_map(move |i| {
            if self.flags.occupied(i) {
                Some((self.keys[i], self.values[i].as_slice()))
            } else {
                None
            }
        })
    }

    /// Serializes to `path` in the mapped layout (temporary file, fsync,
    /// atomic rename).
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TableError> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;

        let capacity = self.keys.len();
        let keys_len = array_len(capacity, K::WIDTH, "key")?;
        let keys_end = HEADER_BYTES + keys_len;
        let descr_start = keys_end + pad8(keys_end);
        let blob_base = descr_start + array_len(capacity, DESCR_WIDTH, "descriptor")?;

        // only live slots keep value bytes; erased values are unreachable
        let mut descrs = Vec::with_capacity(capacity);
        let mut blob_len = 0usize;
        for i in 0..capacity {
            if self.flags.occupied(i) {
                descrs.push(((blob_base + blob_len) as u64, self.values[i].len() as u64));
                blob_len += self.values[i].len();
            } else {
                descrs.push((0, 0));
            }
        }
        let data_end = blob_base + blob_len;

        let header = Header {
            count: self.count as u64,
            capacity: capacity as u64,
            load_factor: self.load_factor,
            growth_factor: self.growth_factor,
            flags_offset: (data_end + pad8(data_end)) as u64,
        };
        header.write_to(&mut file)?;
        let mut buf = vec![0u8; K::WIDTH];
        for key in &self.keys {
            key.store(&mut buf);
            file.write_all(&buf)?;
        }
        write_pad8(&mut file, keys_end)?;
        for (offset, len) in &descrs {
            write_descr(&mut file, *offset, *len)?;
        }
        for i in 0..capacity {
            if self.flags.occupied(i) {
                file.write_all(&self.values[i])?;
            }
        }
        write_pad8(&mut file, data_end)?;
        self.flags.write_to(&mut file)?;

        file.flush()?;
        file.sync_all()?;
        rename(&tmp, path)?;
        Ok(())
    }

    fn lookup(&self, key: &K) -> Lookup {
        let cap = self.keys.len();
        if cap == 0 {
            return Lookup::Absent { insert_at: 0 };
        }
        let start = (self.hasher.hash(key) % cap as u64) as usize;
        let keys = &self.keys;
        find_slot(&self.flags, cap, start, |i| keys[i] == *key)
    }

    fn rehash(&mut self, new_capacity: usize) {
        let old_keys = std::mem::replace(&mut self.keys, vec![K::default(); new_capacity]);
        let old_values = std::mem::replace(&mut self.values, vec![Vec::new(); new_capacity]);
        let old_flags = std::mem::replace(&mut self.flags, SlotFlags::with_capacity(new_capacity));
        for (i, value) in old_values.into_iter().enumerate() {
            if !old_flags.occupied(i) {
                continue;
            }
            let key = old_keys[i];
            let start = (self.hasher.hash(&key) % new_capacity as u64) as usize;
            let idx = find_fresh(&self.flags, new_capacity, start);
            self.flags.set_both(idx);
            self.keys[idx] = key;
            self.values[idx] = value;
        }
    }
}

/// Read-only mapped view of a written [`BlobValMap`].
///
/// Values come back as `&[u8]` views into the mapping: no allocation, no
/// copy, valid as long as the mapped table lives.
#[derive(Debug)]
pub struct MappedBlobValMap<K, H = AltIntHash> {
    map: Mapping,
    count: usize,
    capacity: usize,
    keys_start: usize,
    descr_start: usize,
    flags_offset: usize,
    flags_len: usize,
    hasher: H,
    _keys: std::marker::PhantomData<K>,
}

impl<K: FixedWidth, H: KeyHash<K> + Default + Clone> MappedBlobValMap<K, H> {
    /// Opens a written map file read-only through the system mapper.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        Self::open_with(path, &SystemMapper)
    }

    /// Opens through the given mapping provider.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be opened, `Mapping` if the mapping call
    /// fails, `Format` if any declared region does not fit the file.
    pub fn open_with<P: AsRef<Path>>(path: P, mapper: &dyn MapFile) -> Result<Self, TableError> {
        let map = Mapping::open_with(path, mapper)?;
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
        let keys_end = HEADER_BYTES + keys_len;
        let descr_start = keys_end + pad8(keys_end);
        let descr_len = array_len(capacity, DESCR_WIDTH, "descriptor")?;
        checked_region(bytes, descr_start, descr_len, "descriptor")?;
        let blob_start = descr_start + descr_len;
        let flags_offset = header.flags_offset as usize;
        if flags_offset < blob_start || flags_offset > bytes.len() {
            return Err(TableError::Format {
                reason: format!("flags offset {flags_offset} out of range"),
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
        // only live slots' values are ever dereferenced
        validate_descrs(bytes, descr_start, &view, true, blob_start, flags_offset)?;
        let flags_len = SECTION_HEADER_BYTES + view.word_bytes();
        Ok(Self {
            map,
            count: header.count as usize,
            capacity,
            keys_start: HEADER_BYTES,
            descr_start,
            flags_offset,
            flags_len,
            hasher: H::default(),
            _keys: std::marker::PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the key is live. Never fails: absent keys, erased
    /// keys, and the empty table all report `false`.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_found()
    }

    /// Returns the value bytes for a live key, as a zero-copy view into
    /// the mapping.
    ///
    /// # Errors
    ///
    /// [`TableError::KeyNotFound`] when the key is absent, was erased
    /// before the file was written, or the table is empty.
    pub fn get(&self, key: &K) -> Result<&[u8], TableError> {
        match self.lookup(key) {
            Lookup::Found(idx) => Ok(self.value_at(idx)),
            Lookup::Absent { .. } => Err(TableError::KeyNotFound),
        }
    }

    /// Iterates live `(key, value)` pairs; values are zero-copy views.
    pub fn iter(&self) -> impl Iterator<Item = (K, &[u8])> + '_ {
        (0..self.capacity).filter_map(move |i| {
            if self.flags().occupied(i) {
                Some((self.key_at(i), self.value_at(i)))
            } else {
                None
            }
        })
    }

    /// Materializes an owned [`BlobValMap`] with the same contents.
    pub fn to_owned_table(&self) -> BlobValMap<K, H> {
        let flags_view = self.flags();
        let mut keys = vec![K::default(); self.capacity];
        let mut values = vec![Vec::new(); self.capacity];
        let mut flags = SlotFlags::with_capacity(self.capacity);
        for i in 0..self.capacity {
            let (occupied, ever) = flags_view.get(i);
            if ever {
                keys[i] = self.key_at(i);
            }
            if occupied {
                values[i] = self.value_at(i).to_vec();
            }
            flags.set_pair(i, occupied, ever);
        }
        BlobValMap {
            keys,
            values,
            flags,
            count: self.count,
            load_factor: DEFAULT_LOAD_FACTOR,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            hasher: self.hasher.clone(),
        }
    }

    fn flags(&self) -> SlotFlagsView<'_> {
        let words = self.flags_offset + SECTION_HEADER_BYTES;
        SlotFlagsView::over(
            &self.map.bytes()[words..self.flags_offset + self.flags_len],
            self.capacity,
        )
    }

    fn key_at(&self, idx: usize) -> K {
        let off = self.keys_start + idx * K::WIDTH;
        K::load(&self.map.bytes()[off..off + K::WIDTH])
    }

    fn value_at(&self, idx: usize) -> &[u8] {
        let (offset, len) = descr_at(self.map.bytes(), self.descr_start, idx);
        &self.map.bytes()[offset..offset + len]
    }

    fn lookup(&self, key: &K) -> Lookup {
        if self.capacity == 0 {
            return Lookup::Absent { insert_at: 0 };
        }
        let start = (self.hasher.hash(key) % self.capacity as u64) as usize;
        find_slot(&self.flags(), self.capacity, start, |i| {
            self.key_at(i) == *key
        })
    }
}
