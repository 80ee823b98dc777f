//! # Blobtable — mappable tables with variable-length byte strings
//!
//! Two read-only mapped specializations layer a contiguous byte blob and a
//! per-slot `(offset, length)` descriptor table on top of the Platemap
//! codec, so variable-length data is located in O(1) once a key's slot is
//! known — no scanning, no copying:
//!
//! - [`BlobKeyMap`] / [`MappedBlobKeyMap`] — **byte-string keys** to
//!   fixed-width values. The key text lives in the blob; each slot's
//!   descriptor points at it.
//! - [`BlobValMap`] / [`MappedBlobValMap`] — fixed-width keys to
//!   **byte-string values**. The value text lives in the blob; mapped
//!   lookups return `&[u8]` views directly into the mapping.
//!
//! Keys and values are byte strings (`&[u8]`): the engine is agnostic to
//! text encoding, exactly like the fixed tables are agnostic to what their
//! integers mean.
//!
//! The owned types are builders with the full probe/tombstone/rehash
//! semantics of the fixed tables; the `Mapped*` types are read-only views
//! produced by `write` + `open`. Erased keys keep their text in the blob
//! so a mapped lookup of an erased key stops at its tombstone exactly as
//! the owned lookup does.

mod descr;
mod key_blob;
mod value_blob;

pub use fixedtable::TableError;
pub use key_blob::{BlobKeyMap, MappedBlobKeyMap};
pub use value_blob::{BlobValMap, MappedBlobValMap};
