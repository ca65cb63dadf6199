//! Log Writer
//!
//! Writes one transaction's page images to the log file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::COMMIT_MAGIC;

/// Writes transactions to the log file
pub struct LogWriter {
    file: File,
    path: PathBuf,
}

impl LogWriter {
    /// Open or create the log file. Existing content is left alone;
    /// recovery decides what to do with it before the writer is opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Write every frame followed by the COMMIT marker, then fsync.
    ///
    /// Returns the number of bytes in the log.
    pub fn write_transaction(&mut self, frames: &[(u64, &[u8])]) -> Result<u64> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut hasher = crc32fast::Hasher::new();
        let mut written = 0u64;
        {
            let mut writer = BufWriter::new(&mut self.file);
            for (page_no, image) in frames {
                let header = page_no.to_be_bytes();
                writer.write_all(&header)?;
                writer.write_all(image)?;
                hasher.update(&header);
                hasher.update(image);
                written += (header.len() + image.len()) as u64;
            }

            let crc = hasher.finalize();
            writer.write_all(COMMIT_MAGIC)?;
            writer.write_all(&crc.to_be_bytes())?;
            written += super::COMMIT_SIZE as u64;
            writer.flush()?;
        }

        self.file.sync_data()?;
        Ok(written)
    }

    /// Empty the log once the main file holds the transaction
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Current log length in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
