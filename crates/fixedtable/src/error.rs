use slotflags::FlagsError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the Platemap tables.
///
/// Every failure is reported to the caller immediately with a precise kind;
/// nothing is retried or downgraded to a default value. The one exception
/// by contract is `contains`, which always returns a boolean and never
/// fails.
#[derive(Debug, Error)]
pub enum TableError {
    /// File open/create/metadata failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The mapping call itself failed. Kept distinct from [`Io`] so mapping
    /// failure can be simulated independently of filesystem failure (see
    /// [`FailingMapper`](crate::mapping::FailingMapper)).
    #[error("memory map failed for {path}: {source}")]
    Mapping { path: PathBuf, source: io::Error },

    /// A mutating call reached a memory-mapped (read-only) table.
    #[error("cannot {op} a memory-mapped table")]
    ReadOnly { op: &'static str },

    /// Indexed read for a key that is absent or erased.
    #[error("key not found")]
    KeyNotFound,

    /// An attempt to duplicate a memory-mapped table through the aliasing
    /// copy path. Materialize an owned table instead.
    #[error("cannot duplicate a memory-mapped table")]
    InvalidCopy,

    /// The file's declared sizes do not fit the region being decoded.
    #[error("malformed table file: {reason}")]
    Format { reason: String },
}

impl From<FlagsError> for TableError {
    fn from(e: FlagsError) -> Self {
        match e {
            FlagsError::Io(e) => TableError::Io(e),
            other => TableError::Format {
                reason: other.to_string(),
            },
        }
    }
}
