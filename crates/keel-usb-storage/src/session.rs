//! One Bulk-Only Transport session per attached device.
//!
//! [`BulkOnlySession::execute`] drives a whole transaction: Command Block Wrapper on
//! the bulk OUT pipe, the optional data phase, then the Command Status Wrapper on
//! the bulk IN pipe, validated field by field. Caller buffers the DMA policy rules
//! ineligible never reach the pipes; the session bounces them through its own
//! 64-byte-aligned staging buffer in fixed-size chunks, writing back the destination
//! cache region after each staged read chunk.
//!
//! The session owns the transaction tag. It starts at zero and advances (wrapping)
//! only once a transaction fully succeeds, so a retried command reuses the tag of
//! the attempt that failed.

use keel_usb::{
    AlignedBuf, DmaPolicy, EndpointDirection, RequestRecipient, RequestType, SetupPacket,
    TransferError, UsbDevice, FEATURE_ENDPOINT_HALT, REQUEST_CLEAR_FEATURE,
};

use crate::bot;
use crate::error::{CommandError, DiscoveryError, Phase};
use crate::scsi::{self, Capacity, InquiryData, SenseData};

/// Data phase of a single transaction, from the host's point of view.
pub enum DataPhase<'a> {
    None,
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

/// Bulk-Only Transport state for one device: endpoints, tag and staging buffer.
pub struct BulkOnlySession<D> {
    device: D,
    interface: u8,
    bulk_in: u8,
    bulk_out: u8,
    dma: Box<dyn DmaPolicy>,
    staging: AlignedBuf,
    tag: u32,
}

impl<D: UsbDevice> BulkOnlySession<D> {
    pub fn new(
        device: D,
        interface: u8,
        bulk_in: u8,
        bulk_out: u8,
        dma: Box<dyn DmaPolicy>,
        staging_capacity: usize,
    ) -> Self {
        Self {
            device,
            interface,
            bulk_in,
            bulk_out,
            dma,
            // A zero-capacity staging buffer would wedge the chunk loop.
            staging: AlignedBuf::new(staging_capacity.max(64)),
            tag: 0,
        }
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Tag the next transaction will carry.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Runs one command through all three transport phases.
    ///
    /// A failed command phase aborts the transaction before any data moves. The
    /// status wrapper must echo the signature, the current tag, zero residue and a
    /// passing status; anything else is a protocol violation and the tag is not
    /// advanced, so the device must answer a retry under the same tag.
    pub fn execute(
        &mut self,
        lun: u8,
        cdb: &[u8],
        data: DataPhase<'_>,
    ) -> Result<(), CommandError> {
        debug_assert!(lun < 16);

        let (direction, len) = match &data {
            // No-data commands carry the device-to-host flag; devices ignore it
            // when the transfer length is zero.
            DataPhase::None => (EndpointDirection::DeviceToHost, 0),
            DataPhase::In(buf) => (EndpointDirection::DeviceToHost, buf.len()),
            DataPhase::Out(buf) => (EndpointDirection::HostToDevice, buf.len()),
        };
        debug_assert!(len <= u32::MAX as usize);

        let mut cbw = [0u8; bot::CBW_LEN];
        bot::encode_cbw(&mut cbw, self.tag, len as u32, direction, lun, cdb);
        self.send_all(Phase::Command, &cbw)?;

        match data {
            DataPhase::None => {}
            DataPhase::In(buf) => self.receive_data(buf)?,
            DataPhase::Out(buf) => self.send_data(buf)?,
        }

        let mut csw = [0u8; bot::CSW_LEN];
        let got = self
            .device
            .bulk_in(self.bulk_in, &mut csw)
            .map_err(|source| CommandError::Transport {
                phase: Phase::Status,
                source,
            })?;
        if got != bot::CSW_LEN {
            return Err(CommandError::ShortTransfer {
                phase: Phase::Status,
                got,
                want: bot::CSW_LEN,
            });
        }
        bot::CommandStatusWrapper::decode(&csw).validate(self.tag)?;

        self.tag = self.tag.wrapping_add(1);
        Ok(())
    }

    fn send_all(&mut self, phase: Phase, data: &[u8]) -> Result<(), CommandError> {
        let sent = self
            .device
            .bulk_out(self.bulk_out, data)
            .map_err(|source| CommandError::Transport { phase, source })?;
        if sent != data.len() {
            return Err(CommandError::ShortTransfer {
                phase,
                got: sent,
                want: data.len(),
            });
        }
        Ok(())
    }

    fn send_data(&mut self, buf: &[u8]) -> Result<(), CommandError> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.dma.eligible(buf.as_ptr() as usize, buf.len()) {
            return self.send_all(Phase::DataOut, buf);
        }

        let capacity = self.staging.len();
        let mut offset = 0;
        while offset < buf.len() {
            let chunk = capacity.min(buf.len() - offset);
            self.staging.as_mut_slice()[..chunk].copy_from_slice(&buf[offset..offset + chunk]);
            let sent = self
                .device
                .bulk_out(self.bulk_out, &self.staging.as_slice()[..chunk])
                .map_err(|source| CommandError::Transport {
                    phase: Phase::DataOut,
                    source,
                })?;
            if sent != chunk {
                return Err(CommandError::ShortTransfer {
                    phase: Phase::DataOut,
                    got: sent,
                    want: chunk,
                });
            }
            offset += chunk;
        }
        Ok(())
    }

    fn receive_data(&mut self, buf: &mut [u8]) -> Result<(), CommandError> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.dma.eligible(buf.as_ptr() as usize, buf.len()) {
            let got = self
                .device
                .bulk_in(self.bulk_in, buf)
                .map_err(|source| CommandError::Transport {
                    phase: Phase::DataIn,
                    source,
                })?;
            if got != buf.len() {
                return Err(CommandError::ShortTransfer {
                    phase: Phase::DataIn,
                    got,
                    want: buf.len(),
                });
            }
            return Ok(());
        }

        let capacity = self.staging.len();
        let mut offset = 0;
        while offset < buf.len() {
            let chunk = capacity.min(buf.len() - offset);
            let staging = &mut self.staging.as_mut_slice()[..chunk];
            let got = self
                .device
                .bulk_in(self.bulk_in, staging)
                .map_err(|source| CommandError::Transport {
                    phase: Phase::DataIn,
                    source,
                })?;
            if got != chunk {
                return Err(CommandError::ShortTransfer {
                    phase: Phase::DataIn,
                    got,
                    want: chunk,
                });
            }
            buf[offset..offset + chunk].copy_from_slice(staging);
            // The DMA engine deposited these bytes beneath the cache; push the
            // CPU's copy back down so cache-bypassing readers agree.
            self.dma.writeback(&buf[offset..offset + chunk]);
            offset += chunk;
        }
        Ok(())
    }

    pub fn test_unit_ready(&mut self, lun: u8) -> Result<(), CommandError> {
        self.execute(lun, &scsi::test_unit_ready(), DataPhase::None)
    }

    /// Fetches sense data, which also clears a pending unit-attention condition.
    pub fn request_sense(&mut self, lun: u8) -> Result<SenseData, CommandError> {
        let mut resp = [0u8; scsi::SENSE_DATA_LEN];
        self.execute(lun, &scsi::request_sense(), DataPhase::In(&mut resp))?;
        let sense = SenseData::parse(&resp);
        tracing::debug!(
            lun,
            key = sense.key,
            asc = sense.asc,
            ascq = sense.ascq,
            "request sense"
        );
        Ok(sense)
    }

    pub fn inquiry(&mut self, lun: u8) -> Result<InquiryData, CommandError> {
        let mut resp = [0u8; scsi::INQUIRY_DATA_LEN];
        self.execute(lun, &scsi::inquiry(lun), DataPhase::In(&mut resp))?;
        Ok(InquiryData::parse(&resp))
    }

    pub fn read_capacity(&mut self, lun: u8) -> Result<Capacity, CommandError> {
        let mut resp = [0u8; scsi::READ_CAPACITY_DATA_LEN];
        self.execute(lun, &scsi::read_capacity_10(), DataPhase::In(&mut resp))?;
        Ok(Capacity::parse(&resp))
    }

    /// GET MAX LUN, mapped to a LUN count and checked against the valid 1..=16.
    ///
    /// A device answering 0xff would wrap the count to zero, which the range check
    /// rejects like any other bad reply.
    pub fn max_lun_count(&mut self) -> Result<u8, DiscoveryError> {
        let setup = SetupPacket::new(
            EndpointDirection::DeviceToHost,
            RequestType::Class,
            RequestRecipient::Interface,
            bot::class_request::GET_MAX_LUN,
            0,
            u16::from(self.interface),
            1,
        );
        let mut reply = [0u8; 1];
        let got = self
            .device
            .control_transfer(setup, &mut reply)
            .map_err(DiscoveryError::MaxLunRequest)?;
        if got == 0 {
            return Err(DiscoveryError::EmptyMaxLunReply);
        }
        let count = reply[0].wrapping_add(1);
        if !(1..=16).contains(&count) {
            return Err(DiscoveryError::LunCountOutOfRange { count });
        }
        Ok(count)
    }

    /// Bulk-Only Mass Storage Reset, then clears the halt state of both bulk pipes.
    pub fn bulk_only_reset(&mut self) -> Result<(), TransferError> {
        let reset = SetupPacket::new(
            EndpointDirection::HostToDevice,
            RequestType::Class,
            RequestRecipient::Interface,
            bot::class_request::BULK_ONLY_RESET,
            0,
            u16::from(self.interface),
            0,
        );
        self.device.control_transfer(reset, &mut [])?;
        self.clear_halt(u16::from(self.bulk_in) | 0x80)?;
        self.clear_halt(u16::from(self.bulk_out))?;
        Ok(())
    }

    fn clear_halt(&mut self, endpoint_address: u16) -> Result<(), TransferError> {
        let setup = SetupPacket::new(
            EndpointDirection::HostToDevice,
            RequestType::Standard,
            RequestRecipient::Endpoint,
            REQUEST_CLEAR_FEATURE,
            FEATURE_ENDPOINT_HALT,
            endpoint_address,
            0,
        );
        self.device.control_transfer(setup, &mut []).map(|_| ())
    }
}
