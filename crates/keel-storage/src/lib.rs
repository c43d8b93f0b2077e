//! Sector-addressed block device contract and the backend registry.
//!
//! Storage consumers work in whole sectors at absolute sector offsets through
//! [`BlockDevice`]. Drivers additionally implement the [`StorageBackend`] identity
//! surface and register with a [`BackendRegistry`], which keeps backends in priority
//! order and routes storage paths by prefix (for example `"usb:"`).

mod error;
mod registry;

pub use error::StorageError;
pub use registry::BackendRegistry;

/// A sector-addressed block store.
///
/// All operations move whole sectors; there are no partial-sector reads or writes.
/// The sector size is fixed for the device's lifetime.
pub trait BlockDevice {
    /// Size of one sector in bytes.
    fn sector_size(&self) -> u32;

    /// Reads `sector_count` sectors starting at `first_sector` into `buf`.
    ///
    /// `buf.len()` must equal `sector_count * sector_size()`.
    fn read(
        &mut self,
        first_sector: u32,
        sector_count: u32,
        buf: &mut [u8],
    ) -> Result<(), StorageError>;

    /// Writes `sector_count` sectors starting at `first_sector` from `buf`.
    ///
    /// `buf.len()` must equal `sector_count * sector_size()`.
    fn write(
        &mut self,
        first_sector: u32,
        sector_count: u32,
        buf: &[u8],
    ) -> Result<(), StorageError>;

    /// Discards the contents of `sector_count` sectors starting at `first_sector`.
    ///
    /// Backends without a discard primitive report success without touching the
    /// device; callers may not assume the sectors read back as zero afterwards.
    fn erase(&mut self, first_sector: u32, sector_count: u32) -> Result<(), StorageError>;

    /// Flushes the device-side write cache.
    fn sync(&mut self) -> Result<(), StorageError>;
}

/// Identity a block device presents to the [`BackendRegistry`].
pub trait StorageBackend: BlockDevice {
    /// Preference order when several backends could serve a request; lower wins.
    fn priority(&self) -> u32;

    /// Path prefix that routes requests to this backend (for example `"usb:"`).
    fn prefix(&self) -> &'static str;
}
