//! Read-only file mapping with an injectable mapping provider.
//!
//! Opening a table file maps it read-only and keeps the mapping alive for
//! the table's lifetime; dropping the [`Mapping`] unmaps and closes the
//! descriptor on every exit path, including mid-construction errors.
//!
//! The mapping call is behind the [`MapFile`] capability so tests can force
//! it to fail deterministically ([`FailingMapper`]) without exhausting real
//! system resources, and without any process-wide mutable state: the
//! provider is an argument to `open_with`, so nothing leaks between tests.

use crate::error::TableError;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Mapping provider capability.
pub trait MapFile {
    fn map(&self, file: &File) -> io::Result<Mmap>;
}

/// The production provider: maps through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMapper;

impl MapFile for SystemMapper {
    fn map(&self, file: &File) -> io::Result<Mmap> {
        // SAFETY: the engine only maps files it has finished writing and
        // published via atomic rename, and never writes to a published
        // file. Callers who mutate a mapped file externally are outside
        // the format's contract.
        unsafe { Mmap::map(file) }
    }
}

/// A provider whose mapping call always fails. Lets tests exercise the
/// distinct mapping-failure path on any valid file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingMapper;

impl MapFile for FailingMapper {
    fn map(&self, _file: &File) -> io::Result<Mmap> {
        Err(io::Error::other("mapping rejected by FailingMapper"))
    }
}

/// A read-only mapped file region.
#[derive(Debug)]
pub struct Mapping {
    mmap: Mmap,
    path: PathBuf,
}

impl Mapping {
    /// Opens and maps `path` read-only with the system provider.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        Self::open_with(path, &SystemMapper)
    }

    /// Opens and maps `path` read-only through the given provider.
    ///
    /// # Errors
    ///
    /// [`TableError::Io`] if the file cannot be opened,
    /// [`TableError::Mapping`] if the mapping call fails.
    pub fn open_with<P: AsRef<Path>>(path: P, mapper: &dyn MapFile) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = mapper
            .map(&file)
            .map_err(|source| TableError::Mapping {
                path: path.clone(),
                source,
            })?;
        Ok(Self { mmap, path })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn open_maps_file_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"platemap")?;

        let m = Mapping::open(&path)?;
        assert_eq!(m.bytes(), b"platemap");
        assert_eq!(m.len(), 8);
        assert_eq!(m.path(), path);
        Ok(())
    }

    #[test]
    fn open_nonexistent_is_io_error() {
        let err = Mapping::open("/no/such/platemap/file.bin").unwrap_err();
        assert!(matches!(err, TableError::Io(_)));
    }

    #[test]
    fn failing_mapper_is_mapping_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"bytes")?;

        let err = Mapping::open_with(&path, &FailingMapper).unwrap_err();
        match err {
            TableError::Mapping { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected Mapping error, got {other:?}"),
        }
        Ok(())
    }
}
