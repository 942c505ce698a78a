use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::vm::{Error, Result};

/// Read-only contents of the analysed file.
///
/// Files opened from disk are mapped privately; the mapping and the file
/// handle are released when the value is dropped.
pub enum FileBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl FileBytes {
    pub fn map(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(Error::NotRegularFile(path.to_path_buf()));
        }
        if metadata.len() == 0 {
            return Err(Error::EmptyFile(path.to_path_buf()));
        }

        // SAFETY: the mapping is read-only and private. Concurrent truncation
        // of the file by another process is outside of what we defend against.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(FileBytes::Mapped(mmap))
    }
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(mmap) => mmap,
            FileBytes::Owned(bytes) => bytes,
        }
    }
}

impl From<Vec<u8>> for FileBytes {
    fn from(bytes: Vec<u8>) -> Self {
        FileBytes::Owned(bytes)
    }
}
