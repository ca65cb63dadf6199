//! Paged File
//!
//! Whole-page reads and writes against the main store file.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// The main file viewed as an array of fixed-size pages
pub struct PagedFile {
    file: File,
    path: PathBuf,
    page_size: usize,
    readonly: bool,
}

impl PagedFile {
    /// Open (or create, unless read-only) the file at `path`
    pub fn open(path: &Path, page_size: usize, readonly: bool) -> Result<Self> {
        let file = if readonly {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            readonly,
        })
    }

    /// Number of complete pages currently in the file
    pub fn page_count(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len() / self.page_size as u64)
    }

    /// Read page `page_no` into `buf` (which must be one page long)
    pub fn read_page(&mut self, page_no: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        self.file
            .seek(SeekFrom::Start(page_no * self.page_size as u64))?;
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                StoreError::corruption(format!("short read of page {}", page_no))
            } else {
                StoreError::Io(e)
            }
        })
    }

    /// Write one page image at its slot in the file, extending it if needed
    pub fn write_page(&mut self, page_no: u64, buf: &[u8]) -> Result<()> {
        if self.readonly {
            return Err(StoreError::precondition("write on a read-only store"));
        }
        debug_assert_eq!(buf.len(), self.page_size);
        self.file
            .seek(SeekFrom::Start(page_no * self.page_size as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Flush OS buffers to stable storage
    pub fn sync(&mut self) -> Result<()> {
        if !self.readonly {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
