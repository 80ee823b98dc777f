//! Byte-string keys to fixed-width values.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (40 bytes, fixedtable::format)         │
//! ├───────────────────────────────────────────────┤
//! │ KEY DESCRIPTORS (capacity × 16 bytes:         │
//! │ absolute blob offset u64, byte length u64)    │
//! ├───────────────────────────────────────────────┤
//! │ VALUE ARRAY (capacity × V::WIDTH bytes)       │
//! ├───────────────────────────────────────────────┤
//! │ KEY BLOB (concatenated key bytes — live and   │
//! │ tombstoned slots both keep their text)        │
//! ├───────────────────────────────────────────────┤
//! │ 0..7 zero bytes padding to an 8-byte boundary │
//! ├───────────────────────────────────────────────┤
//! │ OCCUPANCY FLAGS (slotflags serialized form)   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Tombstoned slots keep their key text in the blob: a mapped lookup of an
//! erased key has to reach the retained key bytes to stop its probe walk
//! early, exactly as the owned lookup does.

use crate::descr::{descr_at, validate_descrs, write_descr, DESCR_WIDTH};
use fixedtable::format::{array_len, checked_region, pad8, write_pad8, Header, HEADER_BYTES};
use fixedtable::mapping::{MapFile, Mapping, SystemMapper};
use fixedtable::{FixedWidth, TableError};
use hashprobe::{
    find_fresh, find_slot, grown_capacity, needs_grow, reserve_slots, Fnv1a, KeyHash, Lookup,
    DEFAULT_GROWTH_FACTOR, DEFAULT_LOAD_FACTOR,
};
use slotflags::{FlagPairs, SlotFlags, SlotFlagsView, SECTION_HEADER_BYTES};
use std::fs::{rename, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;

/// Owned builder: byte-string keys to fixed-width values.
///
/// Built incrementally by a writer process, then flushed with
/// [`write`](BlobKeyMap::write) and reopened by consumers as a
/// [`MappedBlobKeyMap`]. Being owned-only, mutation is infallible; the
/// read-only discipline lives in the mapped type.
pub struct BlobKeyMap<V, H = Fnv1a> {
    keys: Vec<Vec<u8>>,
    values: Vec<V>,
    flags: SlotFlags,
    count: usize,
    load_factor: f64,
    growth_factor: f64,
    hasher: H,
}

impl<V: FixedWidth, H: KeyHash<[u8]> + Default + Clone> Default for BlobKeyMap<V, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: FixedWidth, H: KeyHash<[u8]> + Default + Clone> BlobKeyMap<V, H> {
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
    pub fn contains(&self, key: &[u8]) -> bool {
        self.lookup(key).is_found()
    }

    /// Returns the value for a live key.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        match self.lookup(key) {
            Lookup::Found(idx) => Some(self.values[idx]),
            Lookup::Absent { .. } => None,
        }
    }

    /// Inserts or re-assigns. Returns `true` if the key was newly inserted.
    pub fn insert(&mut self, key: &[u8], value: V) -> bool {
        let hash = self.hasher.hash(key);
        let cap = self.keys.len();
        let mut target = 0usize;
        if cap > 0 {
            let start = (hash % cap as u64) as usize;
            let keys = &self.keys;
            match find_slot(&self.flags, cap, start, |i| keys[i] == key) {
                Lookup::Found(idx) => {
                    self.values[idx] = value;
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
        self.keys[target].clear();
        self.keys[target].extend_from_slice(key);
        self.values[target] = value;
        self.count += 1;
        true
    }

    /// Erases a key, tombstoning its slot. The key bytes are retained for
    /// the probe short-circuit. Returns `true` if a live entry was removed.
    pub fn erase(&mut self, key: &[u8]) -> bool {
        let cap = self.keys.len();
        if cap == 0 {
            return false;
        }
        let start = (self.hasher.hash(key) % cap as u64) as usize;
        let keys = &self.keys;
        match find_slot(&self.flags, cap, start, |i| keys[i] == key) {
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
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], V)> + '_ {
        (0..self.keys.len()).filter_map(move |i| {
            if self.flags.occupied(i) {
                Some((self.keys[i].as_slice(), self.values[i]))
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
        let descr_len = array_len(capacity, DESCR_WIDTH, "descriptor")?;
        let values_len = array_len(capacity, V::WIDTH, "value")?;
        let blob_base = HEADER_BYTES + descr_len + values_len;

        // lay out the blob: every flagged slot keeps its key text
        let mut descrs = Vec::with_capacity(capacity);
        let mut blob_len = 0usize;
        for i in 0..capacity {
            if self.flags.ever_occupied(i) {
                descrs.push(((blob_base + blob_len) as u64, self.keys[i].len() as u64));
                blob_len += self.keys[i].len();
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
        for (offset, len) in &descrs {
            write_descr(&mut file, *offset, *len)?;
        }
        let mut buf = vec![0u8; V::WIDTH];
        for value in &self.values {
            value.store(&mut buf);
            file.write_all(&buf)?;
        }
        for i in 0..capacity {
            if self.flags.ever_occupied(i) {
                file.write_all(&self.keys[i])?;
            }
        }
        write_pad8(&mut file, data_end)?;
        self.flags.write_to(&mut file)?;

        file.flush()?;
        file.sync_all()?;
        rename(&tmp, path)?;
        Ok(())
    }

    fn lookup(&self, key: &[u8]) -> Lookup {
        let cap = self.keys.len();
        if cap == 0 {
            return Lookup::Absent { insert_at: 0 };
        }
        let start = (self.hasher.hash(key) % cap as u64) as usize;
        let keys = &self.keys;
        find_slot(&self.flags, cap, start, |i| keys[i] == key)
    }

    fn rehash(&mut self, new_capacity: usize) {
        let old_keys = std::mem::replace(&mut self.keys, vec![Vec::new(); new_capacity]);
        let old_values = std::mem::replace(&mut self.values, vec![V::default(); new_capacity]);
        let old_flags = std::mem::replace(&mut self.flags, SlotFlags::with_capacity(new_capacity));
        for (i, key) in old_keys.into_iter().enumerate() {
            if !old_flags.occupied(i) {
                continue;
            }
            let start = (self.hasher.hash(&key) % new_capacity as u64) as usize;
            let idx = find_fresh(&self.flags, new_capacity, start);
            self.flags.set_both(idx);
            self.keys[idx] = key;
            self.values[idx] = old_values[i];
        }
    }
}

/// Read-only mapped view of a written [`BlobKeyMap`].
///
/// Keys are compared byte-for-byte against the blob through each slot's
/// descriptor; no part of the file is deserialized. Safe to share across
/// threads and processes — the mapping is never written.
#[derive(Debug)]
pub struct MappedBlobKeyMap<V, H = Fnv1a> {
    map: Mapping,
    count: usize,
    capacity: usize,
    descr_start: usize,
    values_start: usize,
    flags_offset: usize,
    flags_len: usize,
    hasher: H,
    _values: PhantomData<V>,
}

impl<V: FixedWidth, H: KeyHash<[u8]> + Default + Clone> MappedBlobKeyMap<V, H> {
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
        let descr_len = array_len(capacity, DESCR_WIDTH, "descriptor")?;
        checked_region(bytes, HEADER_BYTES, descr_len, "descriptor")?;
        let values_start = HEADER_BYTES + descr_len;
        let values_len = array_len(capacity, V::WIDTH, "value")?;
        checked_region(bytes, values_start, values_len, "value")?;
        let blob_start = values_start + values_len;
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
        // every key the probe walk may touch must land inside the blob
        validate_descrs(bytes, HEADER_BYTES, &view, false, blob_start, flags_offset)?;
        let flags_len = SECTION_HEADER_BYTES + view.word_bytes();
        Ok(Self {
            map,
            count: header.count as usize,
            capacity,
            descr_start: HEADER_BYTES,
            values_start,
            flags_offset,
            flags_len,
            hasher: H::default(),
            _values: PhantomData,
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
    pub fn contains(&self, key: &[u8]) -> bool {
        self.lookup(key).is_found()
    }

    /// Returns the value for a live key.
    ///
    /// # Errors
    ///
    /// [`TableError::KeyNotFound`] when the key is absent, was erased
    /// before the file was written, or the table is empty.
    pub fn get(&self, key: &[u8]) -> Result<V, TableError> {
        match self.lookup(key) {
            Lookup::Found(idx) => Ok(self.value_at(idx)),
            Lookup::Absent { .. } => Err(TableError::KeyNotFound),
        }
    }

    /// Iterates live `(key, value)` pairs; keys are zero-copy views into
    /// the mapping.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], V)> + '_ {
        (0..self.capacity).filter_map(move |i| {
            if self.flags().occupied(i) {
                Some((self.key_at(i), self.value_at(i)))
            } else {
                None
            }
        })
    }

    /// Materializes an owned [`BlobKeyMap`] with the same contents — the
    /// permitted copy path out of the mapping.
    pub fn to_owned_table(&self) -> BlobKeyMap<V, H> {
        let flags_view = self.flags();
        let mut keys = vec![Vec::new(); self.capacity];
        let mut values = vec![V::default(); self.capacity];
        let mut flags = SlotFlags::with_capacity(self.capacity);
        for i in 0..self.capacity {
            let (occupied, ever) = flags_view.get(i);
            if ever {
                keys[i] = self.key_at(i).to_vec();
                values[i] = self.value_at(i);
            }
            flags.set_pair(i, occupied, ever);
        }
        BlobKeyMap {
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

    fn key_at(&self, idx: usize) -> &[u8] {
        let (offset, len) = descr_at(self.map.bytes(), self.descr_start, idx);
        &self.map.bytes()[offset..offset + len]
    }

    fn value_at(&self, idx: usize) -> V {
        let off = self.values_start + idx * V::WIDTH;
        V::load(&self.map.bytes()[off..off + V::WIDTH])
    }

    fn lookup(&self, key: &[u8]) -> Lookup {
        if self.capacity == 0 {
            return Lookup::Absent { insert_at: 0 };
        }
        let start = (self.hasher.hash(key) % self.capacity as u64) as usize;
        find_slot(&self.flags(), self.capacity, start, |i| {
            self.key_at(i) == key
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use fixedtable::FailingMapper;
    use tempfile::tempdir;

    // -------------------- Owned builder --------------------

    #[test]
    fn insert_get_erase() {
        let mut m: BlobKeyMap<i64> = BlobKeyMap::new();
        assert!(m.insert(b"abc", 0));
        assert!(m.insert(b"def", 3));
        assert!(m.insert(b"ghi", 4));
        assert_eq!(m.get(b"abc"), Some(0));
        assert_eq!(m.get(b"def"), Some(3));
        assert_eq!(m.get(b"nope"), None);
        assert!(m.contains(b"ghi"));

        assert!(m.erase(b"def"));
        assert_eq!(m.get(b"def"), None);
        assert!(!m.erase(b"def"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn insert_reassigns_existing_key() {
        let mut m: BlobKeyMap<i64> = BlobKeyMap::new();
        assert!(m.insert(b"k", 1));
        assert!(!m.insert(b"k", 2));
        assert_eq!(m.get(b"k"), Some(2));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn many_keys_grow_and_survive() {
        let mut m: BlobKeyMap<u64> = BlobKeyMap::new();
        for i in 0..500u64 {
            m.insert(format!("key-{i}").as_bytes(), i);
        }
        assert_eq!(m.len(), 500);
        for i in 0..500u64 {
            assert_eq!(m.get(format!("key-{i}").as_bytes()), Some(i));
        }
    }

    #[test]
    fn empty_key_is_a_valid_key() {
        let mut m: BlobKeyMap<u32> = BlobKeyMap::new();
        m.insert(b"", 9);
        assert_eq!(m.get(b""), Some(9));
        assert!(m.erase(b""));
        assert_eq!(m.get(b""), None);
    }

    #[test]
    fn reserve_and_clear() {
        let mut m: BlobKeyMap<u32> = BlobKeyMap::new();
        m.reserve(10);
        assert_eq!(m.capacity(), 12);
        m.insert(b"a", 1);
        m.insert(b"b", 2);
        m.reserve(1); // below live count: no-op
        assert_eq!(m.capacity(), 12);
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.get(b"a"), None);
    }

    // -------------------- Write / open round trip --------------------

    #[test]
    fn round_trip_preserves_every_entry() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("s2i.bin");

        let mut m: BlobKeyMap<u64> = BlobKeyMap::new();
        for i in 0..300u64 {
            m.insert(format!("name/{i}").as_bytes(), i * 11);
        }
        m.write(&path)?;

        let r: MappedBlobKeyMap<u64> = MappedBlobKeyMap::open(&path)?;
        assert_eq!(r.len(), 300);
        for i in 0..300u64 {
            let key = format!("name/{i}");
            assert!(r.contains(key.as_bytes()));
            assert_eq!(r.get(key.as_bytes())?, i * 11);
        }
        assert!(!r.contains(b"name/300"));
        assert!(matches!(
            r.get(b"name/300"),
            Err(TableError::KeyNotFound)
        ));
        Ok(())
    }

    #[test]
    fn erased_key_is_not_found_in_mapping() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("s2i.bin");

        let mut m: BlobKeyMap<i64> = BlobKeyMap::new();
        m.insert(b"abc", 0);
        m.insert(b"def", 3);
        m.insert(b"ghi", 4);
        m.erase(b"def");
        m.write(&path)?;

        let r: MappedBlobKeyMap<i64> = MappedBlobKeyMap::open(&path)?;
        assert_eq!(r.len(), 2);
        assert!(!r.contains(b"def"));
        assert!(matches!(r.get(b"def"), Err(TableError::KeyNotFound)));
        assert_eq!(r.get(b"abc")?, 0);
        assert_eq!(r.get(b"ghi")?, 4);
        Ok(())
    }

    #[test]
    fn empty_reserved_map_round_trips() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.bin");

        let mut m: BlobKeyMap<i64> = BlobKeyMap::new();
        m.reserve(10);
        m.write(&path)?;

        let r: MappedBlobKeyMap<i64> = MappedBlobKeyMap::open(&path)?;
        assert_eq!(r.len(), 0);
        assert!(!r.contains(b"ghi"));
        assert!(matches!(r.get(b"ghi"), Err(TableError::KeyNotFound)));
        Ok(())
    }

    #[test]
    fn mapped_iter_matches_builder() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("s2i.bin");

        let mut m: BlobKeyMap<u32> = BlobKeyMap::new();
        m.insert(b"alpha", 1);
        m.insert(b"beta", 2);
        m.insert(b"gamma", 3);
        m.erase(b"beta");
        m.write(&path)?;

        let r: MappedBlobKeyMap<u32> = MappedBlobKeyMap::open(&path)?;
        let mut pairs: Vec<(Vec<u8>, u32)> =
            r.iter().map(|(k, v)| (k.to_vec(), v)).collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![(b"alpha".to_vec(), 1u32), (b"gamma".to_vec(), 3u32)]
        );
        Ok(())
    }

    #[test]
    fn to_owned_table_is_mutable_again() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("s2i.bin");

        let mut m: BlobKeyMap<u32> = BlobKeyMap::new();
        m.insert(b"abc", 0);
        m.insert(b"def", 3);
        m.write(&path)?;

        let r: MappedBlobKeyMap<u32> = MappedBlobKeyMap::open(&path)?;
        let mut owned = r.to_owned_table();
        assert_eq!(owned.get(b"abc"), Some(0));
        owned.insert(b"ghi", 4);
        assert_eq!(owned.len(), 3);
        assert!(!r.contains(b"ghi"));
        Ok(())
    }

    // -------------------- Failure paths --------------------

    #[test]
    fn open_nonexistent_is_io_error() {
        let err = MappedBlobKeyMap::<u32>::open("/no/such/s2i.bin").unwrap_err();
        assert!(matches!(err, TableError::Io(_)));
    }

    #[test]
    fn mapping_failure_is_mapping_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("s2i.bin");
        let mut m: BlobKeyMap<u32> = BlobKeyMap::new();
        m.insert(b"a", 1);
        m.write(&path)?;

        let err = MappedBlobKeyMap::<u32>::open_with(&path, &FailingMapper).unwrap_err();
        assert!(matches!(err, TableError::Mapping { .. }));
        Ok(())
    }

    #[test]
    fn truncated_blob_is_format_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("s2i.bin");
        let mut m: BlobKeyMap<u32> = BlobKeyMap::new();
        for i in 0..20u32 {
            m.insert(format!("some-longer-key-{i}").as_bytes(), i);
        }
        m.write(&path)?;

        let full = std::fs::read(&path)?;
        std::fs::write(&path, &full[..full.len() - 8])?;
        let err = MappedBlobKeyMap::<u32>::open(&path).unwrap_err();
        assert!(matches!(err, TableError::Format { .. }));
        Ok(())
    }
}
