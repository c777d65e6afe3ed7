// rust/mixjoin-core/src/storage/traits.rs

use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::Result;

/// A handle for reading a stored object.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads `length` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the object.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;

    /// Reads the whole object.
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let size = self.size() as usize;
        self.read_range(0, size)
    }
}

/// A handle for writing a stored object.
pub trait StorageWriter: Write + Send {
    /// Flushes and syncs the object. Must be called to complete the write.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Operations shard readers and writers need from a storage system.
///
/// Paths are relative to the backend root unless absolute.
pub trait StorageBackend: Send + Sync {
    /// Root every relative path is resolved against.
    fn root(&self) -> &Path;

    fn exists(&self, path: &Path) -> Result<bool>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens an object for writing, truncating any existing object and
    /// creating parent directories.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Renames an object, replacing the destination if it exists.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
}
