//! # Viewable — mappable tables of arbitrary serializable values
//!
//! The generic tier of the Platemap engine: a builder accumulates
//! `key → value` pairs for **any value type** that can serialize itself and
//! later be reconstructed as a zero-copy view over its own serialized
//! bytes. Writing and reopening uses the same layout as the byte-string
//! tables — header, fixed-width key array, per-slot descriptors, value
//! blob, occupancy flags — with the blob holding each value's
//! self-describing byte sequence.
//!
//! The value capability is two-part ([`Viewable`]):
//!
//! - `serialize(sink)` writes a byte sequence that encodes the value's own
//!   length and shape;
//! - `make_view(bytes)` reconstructs a lightweight, allocation-free view
//!   (for example a typed span over an embedded array) directly from the
//!   mapped bytes.
//!
//! ```no_run
//! use viewable::{MappedViewableMap, ViewableMapBuilder};
//!
//! # fn demo() -> Result<(), viewable::TableError> {
//! let mut b: ViewableMapBuilder<u64, Vec<i32>> = ViewableMapBuilder::new();
//! b.insert(4, vec![1, 2, 3]);
//! b.write("table.bin")?;
//!
//! let m: MappedViewableMap<u64, Vec<i32>> = MappedViewableMap::open("table.bin")?;
//! let view = m.at(&4)?; // typed span over the mapped bytes, no allocation
//! assert_eq!(view.get(2), 3);
//! # Ok(())
//! # }
//! ```

use byteorder::{NativeEndian, WriteBytesExt};
use fixedtable::format::{array_len, checked_region, pad8, write_pad8, Header, HEADER_BYTES};
use fixedtable::mapping::{MapFile, Mapping, SystemMapper};
use fixedtable::FixedWidth;
use hashprobe::{
    find_fresh, find_slot, grown_capacity, needs_grow, reserve_slots, AltIntHash, KeyHash, Lookup,
    DEFAULT_GROWTH_FACTOR, DEFAULT_LOAD_FACTOR,
};
use slotflags::{FlagPairs, SlotFlags, SlotFlagsView, SECTION_HEADER_BYTES};
use std::fs::{rename, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::Path;

pub use fixedtable::TableError;

const DESCR_WIDTH: usize = 16;

/// Value capability: self-describing serialization plus zero-copy
/// reconstruction.
///
/// `make_view` receives exactly the bytes `serialize` produced for one
/// value (the table tracks each value's extent in its slot descriptor) and
/// must not allocate — the point of the contract is that reopening a file
/// deserializes nothing.
pub trait Viewable {
    /// The borrowed view type, alive as long as the mapped bytes.
    type View<'a>;

    /// Writes a byte sequence that encodes the value's own length/shape.
    fn serialize<W: Write>(&self, sink: &mut W) -> io::Result<()>;

    /// Reconstructs a view over bytes previously written by `serialize`.
    fn make_view(bytes: &[u8]) -> Self::View<'_>;
}

impl Viewable for Vec<u8> {
    type View<'a> = &'a [u8];

    fn serialize<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_u64::<NativeEndian>(self.len() as u64)?;
        sink.write_all(self)
    }

    fn make_view(bytes: &[u8]) -> &[u8] {
        length_prefixed(bytes, 1)
    }
}

impl Viewable for Vec<i32> {
    type View<'a> = IntView<'a>;

    fn serialize<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_u64::<NativeEndian>(self.len() as u64)?;
        for v in self {
            sink.write_i32::<NativeEndian>(*v)?;
        }
        Ok(())
    }

    fn make_view(bytes: &[u8]) -> IntView<'_> {
        let data = length_prefixed(bytes, 4);
        IntView {
            bytes: data,
            len: data.len() / 4,
        }
    }
}

/// Slices out a length-prefixed array body, clamping the declared element
/// count to the bytes actually present. The writer always produces a
/// matching prefix; the clamp keeps view construction panic-free on bytes
/// it never wrote.
fn length_prefixed(bytes: &[u8], width: usize) -> &[u8] {
    if bytes.len() < 8 {
        return &[];
    }
    let declared = u64::from_ne_bytes(bytes[0..8].try_into().unwrap()) as usize;
    let n = declared.min((bytes.len() - 8) / width);
    &bytes[8..8 + width * n]
}

/// Allocation-free typed span over a length-prefixed `i32` array embedded
/// in a mapping.
#[derive(Debug, Clone, Copy)]
pub struct IntView<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl<'a> IntView<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element `idx`. Panics if `idx >= len()`, like slice indexing.
    pub fn get(&self, idx: usize) -> i32 {
        i32::from_ne_bytes(self.bytes[4 * idx..4 * idx + 4].try_into().unwrap())
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + 'a {
        let bytes = self.bytes;
        (0..self.len).map(move |i| i32::from_ne_bytes(bytes[4 * i..4 * i + 4].try_into().unwrap()))
    }

    pub fn to_vec(&self) -> Vec<i32> {
        self.iter().collect()
    }
}

/// Owned builder accumulating `key → value` pairs for later mapping.
pub struct ViewableMapBuilder<K, V, H = AltIntHash> {
    keys: Vec<K>,
    values: Vec<Option<V>>,
    flags: SlotFlags,
    count: usize,
    load_factor: f64,
    growth_factor: f64,
    hasher: H,
}

impl<K, V, H> Default for ViewableMapBuilder<K, V, H>
where
    K: FixedWidth,
    V: Viewable,
    H: KeyHash<K> + Default + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H> ViewableMapBuilder<K, V, H>
where
    K: FixedWidth,
    V: Viewable,
    H: KeyHash<K> + Default + Clone,
{
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

    /// Borrows the accumulated value for a live key.
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.lookup(key) {
            Lookup::Found(idx) => self.values[idx].as_ref(),
            Lookup::Absent { .. } => None,
        }
    }

    /// Inserts or re-assigns. Returns `true` if the key was newly inserted.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let hash = self.hasher.hash(&key);
        let cap = self.keys.len();
        let mut target = 0usize;
        if cap > 0 {
            let start = (hash % cap as u64) as usize;
            let keys = &self.keys;
            match find_slot(&self.flags, cap, start, |i| keys[i] == key) {
                Lookup::Found(idx) => {
                    self.values[idx] = Some(value);
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
        self.values[target] = Some(value);
        self.count += 1;
        true
    }

    /// Erases a key, tombstoning its slot; the key bytes stay for the
    /// probe short-circuit, the value is dropped.
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
                self.values[idx] = None;
                self.count -= 1;
                true
            }
            Lookup::Absent { .. } => false,
        }
    }

    /// Rehashes for `target` live entries; no-op when `target` is below
    /// the live count, growth step when `target` is zero.
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
        for value in &mut self.values {
            *value = None;
        }
        self.count = 0;
    }

    /// Serializes the builder to `path`: header, key array, per-slot
    /// descriptors, value blob (each live value's `serialize` output),
    /// occupancy flags. Temporary file, fsync, atomic rename.
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

        // serialize live values up front to learn each extent
        let mut descrs = Vec::with_capacity(capacity);
        let mut blob = Vec::new();
        for i in 0..capacity {
            match &self.values[i] {
                Some(value) if self.flags.occupied(i) => {
                    let at = blob.len();
                    value.serialize(&mut blob)?;
                    descrs.push(((blob_base + at) as u64, (blob.len() - at) as u64));
                }
                _ => descrs.push((0, 0)),
            }
        }
        let data_end = blob_base + blob.len();

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
            file.write_u64::<NativeEndian>(*offset)?;
            file.write_u64::<NativeEndian>(*len)?;
        }
        file.write_all(&blob)?;
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
        let mut old_values = std::mem::replace(&mut self.values, Vec::new());
        self.values.resize_with(new_capacity, || None);
        let old_flags = std::mem::replace(&mut self.flags, SlotFlags::with_capacity(new_capacity));
        for i in 0..old_keys.len() {
            if !old_flags.occupied(i) {
                continue;
            }
            let key = old_keys[i];
            let start = (self.hasher.hash(&key) % new_capacity as u64) as usize;
            let idx = find_fresh(&self.flags, new_capacity, start);
            self.flags.set_both(idx);
            self.keys[idx] = key;
            self.values[idx] = old_values[i].take();
        }
    }
}

/// Read-only mapped table serving zero-copy views of its values.
#[derive(Debug)]
pub struct MappedViewableMap<K, V, H = AltIntHash> {
    map: Mapping,
    count: usize,
    capacity: usize,
    keys_start: usize,
    descr_start: usize,
    flags_offset: usize,
    flags_len: usize,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> MappedViewableMap<K, V, H>
where
    K: FixedWidth,
    V: Viewable,
    H: KeyHash<K> + Default + Clone,
{
    /// Opens a written table read-only through the system mapper.
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
        for i in 0..capacity {
            if !view.occupied(i) {
                continue;
            }
            let (offset, len) = descr_at(bytes, descr_start, i);
            let end = offset.checked_add(len).ok_or_else(|| TableError::Format {
                reason: format!("descriptor {i} overflows"),
            })?;
            if offset < blob_start || end > flags_offset {
                return Err(TableError::Format {
                    reason: format!("descriptor {i} points outside the value blob"),
                });
            }
        }
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
            _marker: PhantomData,
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

    /// Returns `true` if the key is live. Never fails.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_found()
    }

    /// Locates the key's slot and reconstructs a zero-copy view over its
    /// serialized value bytes.
    ///
    /// # Errors
    ///
    /// [`TableError::KeyNotFound`] when the key is absent, was erased
    /// before the file was written, or the table is empty.
    pub fn at(&self, key: &K) -> Result<V::View<'_>, TableError> {
        match self.lookup(key) {
            Lookup::Found(idx) => Ok(V::make_view(self.value_bytes(idx))),
            Lookup::Absent { .. } => Err(TableError::KeyNotFound),
        }
    }

    /// Iterates live `(key, view)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (K, V::View<'_>)> + '_ {
        (0..self.capacity).filter_map(move |i| {
            if self.flags().occupied(i) {
                Some((self.key_at(i), V::make_view(self.value_bytes(i))))
            } else {
                None
            }
        })
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

    fn value_bytes(&self, idx: usize) -> &[u8] {
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

fn descr_at(bytes: &[u8], base: usize, idx: usize) -> (usize, usize) {
    let at = base + idx * DESCR_WIDTH;
    let offset = u64::from_ne_bytes(bytes[at..at + 8].try_into().unwrap());
    let len = u64::from_ne_bytes(bytes[at + 8..at + 16].try_into().unwrap());
    (offset as usize, len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use fixedtable::FailingMapper;
    use tempfile::tempdir;

    // A client value type with an embedded array, exercising the custom
    // capability path the same way library users would.
    #[derive(Debug, Clone, PartialEq)]
    struct Series {
        samples: Vec<i32>,
        scale: i32,
    }

    impl Viewable for Series {
        type View<'a> = SeriesView<'a>;

        fn serialize<W: Write>(&self, sink: &mut W) -> io::Result<()> {
            sink.write_i32::<NativeEndian>(self.scale)?;
            sink.write_u64::<NativeEndian>(self.samples.len() as u64)?;
            for s in &self.samples {
                sink.write_i32::<NativeEndian>(*s)?;
            }
            Ok(())
        }

        fn make_view(bytes: &[u8]) -> SeriesView<'_> {
            let scale = i32::from_ne_bytes(bytes[0..4].try_into().unwrap());
            let n = u64::from_ne_bytes(bytes[4..12].try_into().unwrap()) as usize;
            SeriesView {
                scale,
                samples: &bytes[12..12 + 4 * n],
                len: n,
            }
        }
    }

    struct SeriesView<'a> {
        scale: i32,
        samples: &'a [u8],
        len: usize,
    }

    impl SeriesView<'_> {
        fn sample(&self, i: usize) -> i32 {
            i32::from_ne_bytes(self.samples[4 * i..4 * i + 4].try_into().unwrap())
        }
    }

    // -------------------- Builder behavior --------------------

    #[test]
    fn builder_insert_get_erase() {
        let mut b: ViewableMapBuilder<u64, Vec<u8>> = ViewableMapBuilder::new();
        assert!(b.insert(1, b"one".to_vec()));
        assert!(b.insert(2, b"two".to_vec()));
        assert!(!b.insert(1, b"uno".to_vec()));
        assert_eq!(b.get(&1), Some(&b"uno".to_vec()));
        assert_eq!(b.len(), 2);

        assert!(b.erase(&1));
        assert!(b.get(&1).is_none());
        assert!(!b.contains(&1));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn builder_grows_through_many_inserts() {
        let mut b: ViewableMapBuilder<u64, Vec<i32>> = ViewableMapBuilder::new();
        for i in 0..200u64 {
            b.insert(i, vec![i as i32, (i * 2) as i32]);
        }
        b.reserve(1_000);
        assert_eq!(b.len(), 200);
        for i in 0..200u64 {
            assert_eq!(b.get(&i), Some(&vec![i as i32, (i * 2) as i32]));
        }
    }

    // -------------------- Round trips --------------------

    #[test]
    fn bytes_values_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bytes.bin");

        let mut b: ViewableMapBuilder<u64, Vec<u8>> = ViewableMapBuilder::new();
        b.insert(10, b"alpha".to_vec());
        b.insert(20, b"".to_vec());
        b.insert(30, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        b.write(&path)?;

        let m: MappedViewableMap<u64, Vec<u8>> = MappedViewableMap::open(&path)?;
        assert_eq!(m.len(), 3);
        assert_eq!(m.at(&10)?, b"alpha");
        assert_eq!(m.at(&20)?, b"");
        assert_eq!(m.at(&30)?, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(m.at(&40), Err(TableError::KeyNotFound)));
        Ok(())
    }

    #[test]
    fn int_array_values_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ints.bin");

        let mut b: ViewableMapBuilder<u64, Vec<i32>> = ViewableMapBuilder::new();
        b.insert(4, vec![1, 2, 3]);
        b.insert(5, vec![-1, 0, 1, 2]);
        b.insert(6, Vec::new());
        b.write(&path)?;

        let m: MappedViewableMap<u64, Vec<i32>> = MappedViewableMap::open(&path)?;
        let v = m.at(&4)?;
        assert_eq!(v.len(), 3);
        assert_eq!(v.get(0), 1);
        assert_eq!(v.get(2), 3);
        assert_eq!(v.to_vec(), vec![1, 2, 3]);

        assert_eq!(m.at(&5)?.to_vec(), vec![-1, 0, 1, 2]);
        assert!(m.at(&6)?.is_empty());
        Ok(())
    }

    #[test]
    fn custom_value_type_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("series.bin");

        let mut b: ViewableMapBuilder<u32, Series> = ViewableMapBuilder::new();
        b.insert(
            7,
            Series {
                samples: vec![10, 20, 30],
                scale: 2,
            },
        );
        b.write(&path)?;

        let m: MappedViewableMap<u32, Series> = MappedViewableMap::open(&path)?;
        let view = m.at(&7)?;
        assert_eq!(view.scale, 2);
        assert_eq!(view.len, 3);
        assert_eq!(view.sample(0), 10);
        assert_eq!(view.sample(2), 30);
        Ok(())
    }

    #[test]
    fn erased_keys_fail_after_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("erased.bin");

        let mut b: ViewableMapBuilder<u64, Vec<u8>> = ViewableMapBuilder::new();
        b.insert(1, b"keep".to_vec());
        b.insert(2, b"drop".to_vec());
        b.erase(&2);
        b.write(&path)?;

        let m: MappedViewableMap<u64, Vec<u8>> = MappedViewableMap::open(&path)?;
        assert_eq!(m.len(), 1);
        assert!(!m.contains(&2));
        assert!(matches!(m.at(&2), Err(TableError::KeyNotFound)));
        assert_eq!(m.at(&1)?, b"keep");
        Ok(())
    }

    #[test]
    fn empty_builder_round_trips() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.bin");

        let b: ViewableMapBuilder<u64, Vec<i32>> = ViewableMapBuilder::new();
        b.write(&path)?;

        let m: MappedViewableMap<u64, Vec<i32>> = MappedViewableMap::open(&path)?;
        assert_eq!(m.len(), 0);
        assert!(!m.contains(&0));
        assert!(matches!(m.at(&0), Err(TableError::KeyNotFound)));
        Ok(())
    }

    #[test]
    fn iter_yields_views_of_live_entries() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("iter.bin");

        let mut b: ViewableMapBuilder<u64, Vec<i32>> = ViewableMapBuilder::new();
        b.insert(1, vec![1]);
        b.insert(2, vec![2, 2]);
        b.insert(3, vec![3, 3, 3]);
        b.erase(&2);
        b.write(&path)?;

        let m: MappedViewableMap<u64, Vec<i32>> = MappedViewableMap::open(&path)?;
        let mut got: Vec<(u64, Vec<i32>)> = m.iter().map(|(k, v)| (k, v.to_vec())).collect();
        got.sort();
        assert_eq!(got, vec![(1, vec![1]), (3, vec![3, 3, 3])]);
        Ok(())
    }

    // -------------------- Failure paths --------------------

    #[test]
    fn mapping_failure_is_mapping_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.bin");
        let mut b: ViewableMapBuilder<u64, Vec<u8>> = ViewableMapBuilder::new();
        b.insert(1, b"x".to_vec());
        b.write(&path)?;

        let err = MappedViewableMap::<u64, Vec<u8>>::open_with(&path, &FailingMapper).unwrap_err();
        assert!(matches!(err, TableError::Mapping { .. }));
        Ok(())
    }

    #[test]
    fn open_nonexistent_is_io_error() {
        let err = MappedViewableMap::<u64, Vec<u8>>::open("/no/such/viewable.bin").unwrap_err();
        assert!(matches!(err, TableError::Io(_)));
    }
}
