//! Host-side view of an attached USB device.
//!
//! Class drivers in this workspace do not enumerate the bus or manage topology; the
//! host-controller layer hands them an already-configured device plus the endpoint
//! numbers it selected, and they talk to it through [`UsbDevice`]: blocking control
//! transfers on the default pipe, blocking bulk transfers on class endpoints.
//!
//! The crate also models where the controller's bulk DMA engine can reach
//! ([`DmaPolicy`]): on some hosts bulk pipes only target a window of physical memory
//! at a fixed alignment, and drivers bounce everything else through staging buffers.

mod dma;

pub use dma::{AlignedBuf, CoherentDma, DmaPolicy, DmaWindow};

use thiserror::Error;

/// Standard request code for CLEAR_FEATURE.
pub const REQUEST_CLEAR_FEATURE: u8 = 0x01;
/// Feature selector for an endpoint's halt condition.
pub const FEATURE_ENDPOINT_HALT: u16 = 0x0000;

/// Transfer direction, from the host's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointDirection {
    HostToDevice,
    DeviceToHost,
}

/// `bmRequestType` type bits (D6..D5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
}

/// `bmRequestType` recipient bits (D4..D0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// The SETUP stage of a control transfer.
///
/// `request_type` is the raw `bmRequestType` byte; [`SetupPacket::new`] packs it from
/// its direction, type and recipient parts so callers never hand-assemble bit fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn new(
        direction: EndpointDirection,
        ty: RequestType,
        recipient: RequestRecipient,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        let mut request_type = match recipient {
            RequestRecipient::Device => 0x00,
            RequestRecipient::Interface => 0x01,
            RequestRecipient::Endpoint => 0x02,
            RequestRecipient::Other => 0x03,
        };
        request_type |= match ty {
            RequestType::Standard => 0x00,
            RequestType::Class => 0x20,
            RequestType::Vendor => 0x40,
        };
        if direction == EndpointDirection::DeviceToHost {
            request_type |= 0x80;
        }
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    pub fn direction(&self) -> EndpointDirection {
        if self.request_type & 0x80 != 0 {
            EndpointDirection::DeviceToHost
        } else {
            EndpointDirection::HostToDevice
        }
    }
}

/// Why a blocking transfer did not complete.
///
/// These are transport-level outcomes reported by the host controller. A transfer
/// that completes but carries malformed class data is not a `TransferError`; judging
/// payload contents is the class driver's job.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The endpoint answered with STALL.
    #[error("endpoint stalled")]
    Stall,
    /// The transfer did not complete within the controller's deadline.
    #[error("transfer timed out")]
    Timeout,
    /// The device is no longer attached.
    #[error("device disconnected")]
    Disconnected,
    /// The host controller aborted the transfer.
    #[error("host controller error")]
    Controller,
}

/// An attached, configured USB device.
///
/// All methods block the calling thread until the transfer completes or fails; a
/// single handle never has two transfers in flight (hence `&mut self`). On success
/// they return the number of bytes actually moved, which for IN transfers may be
/// short when the device sends less than the host asked for.
pub trait UsbDevice {
    /// Issues a control transfer on the default pipe.
    ///
    /// `data` is the data-stage buffer: sent to the device for host-to-device
    /// requests, filled by the device for device-to-host requests. Callers size it
    /// to `setup.length`; requests without a data stage pass an empty slice.
    fn control_transfer(
        &mut self,
        setup: SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, TransferError>;

    /// Sends `data` to the device over the bulk OUT pipe `endpoint`.
    fn bulk_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, TransferError>;

    /// Receives up to `buf.len()` bytes over the bulk IN pipe `endpoint`.
    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, TransferError>;
}

impl<T: UsbDevice + ?Sized> UsbDevice for &mut T {
    fn control_transfer(
        &mut self,
        setup: SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, TransferError> {
        (**self).control_transfer(setup, data)
    }

    fn bulk_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, TransferError> {
        (**self).bulk_out(endpoint, data)
    }

    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        (**self).bulk_in(endpoint, buf)
    }
}
