//! Bulk-Only Transport wire format.
//!
//! Every command travels as a 31-byte Command Block Wrapper on the bulk OUT pipe and
//! is answered by a 13-byte Command Status Wrapper on the bulk IN pipe. Both carry a
//! little-endian signature and tag; the embedded SCSI command block keeps its own
//! big-endian field order (see [`crate::scsi`]).

use keel_usb::EndpointDirection;

use crate::error::ProtocolViolation;

pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CSW_SIGNATURE: u32 = 0x5342_5355;

/// Longest command block a CBW can carry.
pub const MAX_CDB_LEN: usize = 16;

pub const CSW_STATUS_PASSED: u8 = 0x00;
pub const CSW_STATUS_FAILED: u8 = 0x01;
pub const CSW_STATUS_PHASE_ERROR: u8 = 0x02;

/// Mass-storage class-specific control requests.
pub mod class_request {
    pub const BULK_ONLY_RESET: u8 = 0xff;
    pub const GET_MAX_LUN: u8 = 0xfe;
}

/// Encodes a Command Block Wrapper into `out`.
///
/// `cdb` must be 1..=16 bytes; the command region is zero-padded past it.
pub fn encode_cbw(
    out: &mut [u8; CBW_LEN],
    tag: u32,
    data_len: u32,
    direction: EndpointDirection,
    lun: u8,
    cdb: &[u8],
) {
    debug_assert!(!cdb.is_empty() && cdb.len() <= MAX_CDB_LEN);
    debug_assert!(lun < 16);

    out.fill(0);
    out[0x0..0x4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
    out[0x4..0x8].copy_from_slice(&tag.to_le_bytes());
    out[0x8..0xc].copy_from_slice(&data_len.to_le_bytes());
    out[0xc] = match direction {
        EndpointDirection::DeviceToHost => 0x80,
        EndpointDirection::HostToDevice => 0x00,
    };
    out[0xd] = lun;
    out[0xe] = cdb.len() as u8;
    out[0xf..0xf + cdb.len()].copy_from_slice(cdb);
}

/// A decoded Command Status Wrapper, fields taken verbatim off the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandStatusWrapper {
    pub signature: u32,
    pub tag: u32,
    pub residue: u32,
    pub status: u8,
}

impl CommandStatusWrapper {
    pub fn decode(buf: &[u8; CSW_LEN]) -> Self {
        Self {
            signature: u32::from_le_bytes([buf[0x0], buf[0x1], buf[0x2], buf[0x3]]),
            tag: u32::from_le_bytes([buf[0x4], buf[0x5], buf[0x6], buf[0x7]]),
            residue: u32::from_le_bytes([buf[0x8], buf[0x9], buf[0xa], buf[0xb]]),
            status: buf[0xc],
        }
    }

    /// Checks every field a well-behaved device must get right.
    ///
    /// The checks run in wire order and each failure is reported on its own; a bad
    /// signature means the 13 bytes are not a status wrapper at all, so nothing
    /// after it is interpreted.
    pub fn validate(&self, expected_tag: u32) -> Result<(), ProtocolViolation> {
        if self.signature != CSW_SIGNATURE {
            return Err(ProtocolViolation::Signature {
                found: self.signature,
            });
        }
        if self.tag != expected_tag {
            return Err(ProtocolViolation::TagMismatch {
                expected: expected_tag,
                found: self.tag,
            });
        }
        if self.residue != 0 {
            return Err(ProtocolViolation::Residue {
                residue: self.residue,
            });
        }
        if self.status != CSW_STATUS_PASSED {
            return Err(ProtocolViolation::CommandFailed {
                status: self.status,
            });
        }
        Ok(())
    }
}
