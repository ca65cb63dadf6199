//! Configuration for pagekv
//!
//! Store options with sensible defaults.

use crate::error::{Result, StoreError};

/// Smallest page size accepted by `Options::validate`
pub const MIN_PAGE_SIZE: u32 = 1024;

/// Largest page size accepted by `Options::validate`
///
/// The HEADER page stores the page size in a u16 and in-page record sizes
/// are limited to 15 bits.
pub const MAX_PAGE_SIZE: u32 = 32 * 1024;

/// Options used when opening a store
#[derive(Debug, Clone)]
pub struct Options {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Size of one page in bytes (power of two). Ignored for existing files,
    /// which keep the size they were created with.
    pub page_size: u32,

    /// Soft bound on the number of page buffers kept in memory
    pub cache_pages: u32,

    /// Codec applied to record payloads of newly created stores
    pub compression: Compression,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// Skip the transaction log. Faster, but not crash-safe, and rollback
    /// becomes unavailable.
    pub transaction_disable: bool,

    /// Open the files read-only; every mutation fails
    pub readonly: bool,
}

/// Record payload compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Deflate,
}

impl Compression {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Deflate => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Deflate),
            other => Err(StoreError::corruption(format!(
                "unknown compression codec {}",
                other
            ))),
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: 8192,
            cache_pages: 1024,
            compression: Compression::None,
            transaction_disable: false,
            readonly: false,
        }
    }
}

impl Options {
    /// Create a new options builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Check that the options describe a usable store
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(StoreError::Config(format!(
                "page size must be a power of two between {} and {}, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.cache_pages < 8 {
            return Err(StoreError::Config(format!(
                "cache must hold at least 8 pages, got {}",
                self.cache_pages
            )));
        }
        Ok(())
    }
}

/// Builder for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: u32) -> Self {
        self.options.page_size = size;
        self
    }

    /// Set the page cache bound (in pages)
    pub fn cache_pages(mut self, pages: u32) -> Self {
        self.options.cache_pages = pages;
        self
    }

    /// Set the record compression codec
    pub fn compression(mut self, compression: Compression) -> Self {
        self.options.compression = compression;
        self
    }

    /// Disable the transaction log
    pub fn transaction_disable(mut self, disable: bool) -> Self {
        self.options.transaction_disable = disable;
        self
    }

    /// Open read-only
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.options.readonly = readonly;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}
