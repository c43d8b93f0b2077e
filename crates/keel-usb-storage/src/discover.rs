//! Logical unit discovery, run once when a device is attached.
//!
//! The device reports how many logical units it carries (1..=16); each is probed in
//! ascending order with Test Unit Ready plus Inquiry until one answers as a ready
//! direct-access unit. Probes are retried under the caller's policy, with a sense
//! fetch between attempts so a pending unit-attention condition (media change,
//! power-on) cannot wedge an otherwise healthy unit. The winning unit's capacity
//! fixes the sector size for the session's lifetime.

use thiserror::Error;

use keel_usb::UsbDevice;

use crate::error::{CommandError, DiscoveryError, OpenError};
use crate::retry::{run_with_retry, Clock, RetryPolicy};
use crate::scsi::{self, Capacity, InquiryData};
use crate::session::BulkOnlySession;

// Bounds sector_count * sector_size to the wrapper's 32-bit transfer length.
const MAX_SECTOR_SIZE: u32 = 64 * 1024;

pub(crate) struct DiscoveredUnit {
    pub lun: u8,
    pub capacity: Capacity,
    pub inquiry: InquiryData,
}

#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unit answered as device type {device_type:#04x}, not direct-access")]
    NotDirectAccess { device_type: u8 },
}

pub(crate) fn discover<D: UsbDevice>(
    session: &mut BulkOnlySession<D>,
    retry: RetryPolicy,
    clock: &mut dyn Clock,
) -> Result<DiscoveredUnit, OpenError> {
    let count = session.max_lun_count()?;
    let (lun, inquiry) = find_lun(session, count, retry, clock)?;

    let capacity = session.read_capacity(lun).map_err(OpenError::Capacity)?;
    if capacity.block_size == 0 || capacity.block_size > MAX_SECTOR_SIZE {
        return Err(OpenError::SectorSize(capacity.block_size));
    }

    tracing::debug!(
        lun,
        sector_size = capacity.block_size,
        sectors = capacity.sectors(),
        vendor = %inquiry.vendor(),
        product = %inquiry.product(),
        "usb mass-storage unit ready"
    );
    Ok(DiscoveredUnit {
        lun,
        capacity,
        inquiry,
    })
}

fn find_lun<D: UsbDevice>(
    session: &mut BulkOnlySession<D>,
    count: u8,
    retry: RetryPolicy,
    clock: &mut dyn Clock,
) -> Result<(u8, InquiryData), DiscoveryError> {
    for lun in 0..count {
        let attempt = run_with_retry(retry, clock, || {
            init_lun(session, lun).map_err(|err| {
                // The sense fetch acknowledges a unit-attention condition so a
                // later attempt can succeed.
                if let Err(sense_err) = session.request_sense(lun) {
                    tracing::debug!(lun, error = %sense_err, "request sense failed");
                }
                err
            })
        });
        match attempt {
            Ok(inquiry) => return Ok((lun, inquiry)),
            Err(err) => tracing::debug!(lun, error = %err, "logical unit not usable"),
        }
    }
    Err(DiscoveryError::NoUsableLun)
}

fn init_lun<D: UsbDevice>(
    session: &mut BulkOnlySession<D>,
    lun: u8,
) -> Result<InquiryData, ProbeError> {
    session.test_unit_ready(lun)?;
    let inquiry = session.inquiry(lun)?;
    if inquiry.device_type != scsi::DEVICE_TYPE_DIRECT_ACCESS {
        return Err(ProbeError::NotDirectAccess {
            device_type: inquiry.device_type,
        });
    }
    Ok(inquiry)
}
