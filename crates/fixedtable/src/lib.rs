//! # Fixedtable — mappable open-addressing tables of fixed-width entries
//!
//! The core tables of the Platemap engine: an open-addressing hash set and
//! hash map whose on-disk layout is designed so a written file can be
//! mapped into memory and queried with **zero deserialization** — the
//! mapped bytes are the table.
//!
//! A table is built in memory (*Owned* backing), written to disk with
//! [`FixedSet::write`] / [`FixedMap::write`], and reopened read-only by any
//! number of consumer processes (*Mapped* backing). The two backings share
//! one probe/tombstone algorithm (the `hashprobe` crate), so a mapped
//! lookup walks exactly the slots the writer's lookup would have walked.
//!
//! ```no_run
//! use fixedtable::{FixedMap, TableError};
//!
//! fn demo() -> Result<(), TableError> {
//!     let mut ids: FixedMap<u64, u32> = FixedMap::new();
//!     ids.insert(42, 7)?;
//!     ids.write("ids.bin")?;
//!
//!     let mapped: FixedMap<u64, u32> = FixedMap::open("ids.bin")?;
//!     assert_eq!(mapped.get(&42)?, 7);
//!     Ok(())
//! }
//! ```
//!
//! Mapped tables are immutable: every mutating call fails with
//! [`TableError::ReadOnly`], duplication fails with
//! [`TableError::InvalidCopy`] (materialize with `to_owned_table` instead),
//! and because the mapping is never written to, the same bytes are safe to
//! read from any number of threads or processes.
//!
//! File headers, key arrays and value arrays are stored in **host-native
//! byte order**; files do not port across architectures with differing
//! byte order. This is a deliberate property of the format, not an
//! oversight — normalizing would cost the zero-copy read path.

mod error;
pub mod format;
mod key;
pub mod mapping;
mod map;
mod set;

pub use error::TableError;
pub use key::FixedWidth;
pub use map::FixedMap;
pub use mapping::{FailingMapper, MapFile, Mapping, SystemMapper};
pub use set::FixedSet;
