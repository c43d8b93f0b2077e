//! USB mass-storage block device driver.
//!
//! Turns an attached USB device into a sector store: SCSI commands carried over USB
//! Bulk-Only Transport. The host-controller layer supplies the device handle, the
//! interface number and the two bulk endpoint numbers; this crate runs the wire
//! protocol on top of them. [`UsbStorage::open`] probes the device's logical units
//! once, picks the first ready direct-access unit and fixes its sector size, after
//! which the device serves the [`BlockDevice`] contract and registers as the
//! `"usb:"` backend.
//!
//! Transport, protocol and discovery failures stay typed inside the crate (see
//! [`CommandError`], [`DiscoveryError`]); the block-device surface reports them as a
//! single failure outcome per operation. Reads and writes retry under a linear
//! backoff policy; sync is one-shot; erase has no Bulk-Only equivalent and always
//! succeeds.

pub mod bot;
mod discover;
mod error;
mod retry;
pub mod scsi;
mod session;

pub use error::{CommandError, DiscoveryError, OpenError, Phase, ProtocolViolation};
pub use retry::{Clock, FakeClock, RetryPolicy, StdClock};
pub use session::{BulkOnlySession, DataPhase};

use keel_storage::{BlockDevice, StorageBackend, StorageError};
use keel_usb::{CoherentDma, DmaPolicy, UsbDevice};

use crate::scsi::InquiryData;

/// Attachment parameters for one mass-storage device.
///
/// Endpoint and interface numbers come from the configuration the host-controller
/// layer selected. The defaults suit a coherent host; platforms whose bulk DMA
/// engine only reaches a memory window install their own policy.
pub struct UsbStorageOptions {
    pub interface: u8,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub dma: Box<dyn DmaPolicy>,
    pub retry: RetryPolicy,
    /// Staging buffer capacity in bytes; values below 64 are raised to 64.
    pub staging_capacity: usize,
}

impl UsbStorageOptions {
    pub fn new(interface: u8, bulk_in: u8, bulk_out: u8) -> Self {
        Self {
            interface,
            bulk_in,
            bulk_out,
            dma: Box::new(CoherentDma),
            retry: RetryPolicy::default(),
            staging_capacity: 2048,
        }
    }
}

/// A USB mass-storage device opened as a block device.
pub struct UsbStorage<D> {
    session: BulkOnlySession<D>,
    lun: u8,
    block_size: u32,
    capacity_sectors: u64,
    inquiry: InquiryData,
    retry: RetryPolicy,
    clock: Box<dyn Clock>,
}

impl<D> std::fmt::Debug for UsbStorage<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbStorage")
            .field("lun", &self.lun)
            .field("block_size", &self.block_size)
            .field("capacity_sectors", &self.capacity_sectors)
            .field("inquiry", &self.inquiry)
            .finish_non_exhaustive()
    }
}

impl<D: UsbDevice> UsbStorage<D> {
    /// Probes the device and opens its first usable logical unit.
    ///
    /// Retry backoff sleeps on the calling thread; tests that must not sleep use
    /// [`UsbStorage::open_with_clock`] with a [`FakeClock`].
    pub fn open(device: D, options: UsbStorageOptions) -> Result<Self, OpenError> {
        Self::open_with_clock(device, options, Box::new(StdClock))
    }

    pub fn open_with_clock(
        device: D,
        options: UsbStorageOptions,
        mut clock: Box<dyn Clock>,
    ) -> Result<Self, OpenError> {
        let mut session = BulkOnlySession::new(
            device,
            options.interface,
            options.bulk_in,
            options.bulk_out,
            options.dma,
            options.staging_capacity,
        );
        let unit = discover::discover(&mut session, options.retry, clock.as_mut())?;
        Ok(Self {
            session,
            lun: unit.lun,
            block_size: unit.capacity.block_size,
            capacity_sectors: unit.capacity.sectors(),
            inquiry: unit.inquiry,
            retry: options.retry,
            clock,
        })
    }

    /// The logical unit discovery selected.
    pub fn lun(&self) -> u8 {
        self.lun
    }

    /// Total sectors the unit reported at open time.
    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    /// Vendor, product and revision strings from the unit's inquiry data.
    pub fn identity(&self) -> &InquiryData {
        &self.inquiry
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.session.device_mut()
    }

    /// Bulk-Only Mass Storage Reset, recovering both bulk pipes.
    ///
    /// For devices wedged badly enough that commands keep failing after the retry
    /// policy gives up.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        self.session.bulk_only_reset().map_err(|err| {
            tracing::warn!(error = %err, "bulk-only reset failed");
            StorageError::Device(err.to_string())
        })
    }

    fn check_io(&self, sector_count: u32, buf_len: usize) -> Result<(), StorageError> {
        if sector_count > u32::from(u16::MAX) {
            return Err(StorageError::SectorCountTooLarge {
                sector_count,
                max: u32::from(u16::MAX),
            });
        }
        let expected = u64::from(sector_count) * u64::from(self.block_size);
        if buf_len as u64 != expected {
            return Err(StorageError::BufferSizeMismatch {
                len: buf_len,
                sector_count,
                sector_size: self.block_size,
            });
        }
        Ok(())
    }
}

fn device_error(op: &'static str, err: CommandError) -> StorageError {
    tracing::warn!(op, error = %err, "usb storage command failed");
    StorageError::Device(err.to_string())
}

impl<D: UsbDevice> BlockDevice for UsbStorage<D> {
    fn sector_size(&self) -> u32 {
        self.block_size
    }

    fn read(
        &mut self,
        first_sector: u32,
        sector_count: u32,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        self.check_io(sector_count, buf.len())?;
        let cdb = scsi::read_10(first_sector, sector_count as u16);
        let Self {
            session,
            clock,
            retry,
            lun,
            ..
        } = self;
        retry::run_with_retry(*retry, clock.as_mut(), || {
            session.execute(*lun, &cdb, DataPhase::In(&mut *buf))
        })
        .map_err(|err| device_error("read", err))
    }

    fn write(
        &mut self,
        first_sector: u32,
        sector_count: u32,
        buf: &[u8],
    ) -> Result<(), StorageError> {
        self.check_io(sector_count, buf.len())?;
        let cdb = scsi::write_10(first_sector, sector_count as u16);
        let Self {
            session,
            clock,
            retry,
            lun,
            ..
        } = self;
        retry::run_with_retry(*retry, clock.as_mut(), || {
            session.execute(*lun, &cdb, DataPhase::Out(buf))
        })
        .map_err(|err| device_error("write", err))
    }

    fn erase(&mut self, _first_sector: u32, _sector_count: u32) -> Result<(), StorageError> {
        // Not supported under Bulk-Only Transport.
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.session
            .execute(self.lun, &scsi::synchronize_cache_10(), DataPhase::None)
            .map_err(|err| device_error("sync", err))
    }
}

impl<D: UsbDevice> StorageBackend for UsbStorage<D> {
    fn priority(&self) -> u32 {
        2
    }

    fn prefix(&self) -> &'static str {
        "usb:"
    }
}
