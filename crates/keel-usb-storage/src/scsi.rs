//! SCSI command blocks and response layouts used by the driver.
//!
//! Builders produce fixed-size command blocks with big-endian multi-byte fields, as
//! the SCSI standard lays them out; parsers take the device's response verbatim.
//! Only the handful of commands a Bulk-Only direct-access device needs are here.

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2a;
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
}

pub mod sense_key {
    pub const NONE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const UNIT_ATTENTION: u8 = 0x06;
}

/// Peripheral device type reported by INQUIRY for plain block devices.
pub const DEVICE_TYPE_DIRECT_ACCESS: u8 = 0x00;

pub const INQUIRY_DATA_LEN: usize = 36;
pub const SENSE_DATA_LEN: usize = 18;
pub const READ_CAPACITY_DATA_LEN: usize = 8;

pub fn test_unit_ready() -> [u8; 6] {
    [opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0]
}

pub fn request_sense() -> [u8; 6] {
    [opcode::REQUEST_SENSE, 0, 0, 0, SENSE_DATA_LEN as u8, 0]
}

/// INQUIRY with the legacy LUN field in byte 1, kept for devices that predate
/// LUN addressing in the transport wrapper.
pub fn inquiry(lun: u8) -> [u8; 6] {
    [opcode::INQUIRY, lun << 5, 0, 0, INQUIRY_DATA_LEN as u8, 0]
}

pub fn read_capacity_10() -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = opcode::READ_CAPACITY_10;
    cdb
}

pub fn read_10(lba: u32, count: u16) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = opcode::READ_10;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&count.to_be_bytes());
    cdb
}

pub fn write_10(lba: u32, count: u16) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = opcode::WRITE_10;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&count.to_be_bytes());
    cdb
}

pub fn synchronize_cache_10() -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = opcode::SYNCHRONIZE_CACHE_10;
    cdb
}

/// READ CAPACITY(10) response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    /// Address of the last readable sector.
    pub last_lba: u32,
    /// Sector size in bytes.
    pub block_size: u32,
}

impl Capacity {
    pub fn parse(resp: &[u8; READ_CAPACITY_DATA_LEN]) -> Self {
        Self {
            last_lba: u32::from_be_bytes([resp[0], resp[1], resp[2], resp[3]]),
            block_size: u32::from_be_bytes([resp[4], resp[5], resp[6], resp[7]]),
        }
    }

    /// Total sectors, one past the last addressable one.
    pub fn sectors(&self) -> u64 {
        u64::from(self.last_lba) + 1
    }
}

/// Standard INQUIRY response, 36-byte header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InquiryData {
    pub device_type: u8,
    pub removable: bool,
    vendor: [u8; 8],
    product: [u8; 16],
    revision: [u8; 4],
}

impl InquiryData {
    pub fn parse(resp: &[u8; INQUIRY_DATA_LEN]) -> Self {
        let mut vendor = [0u8; 8];
        let mut product = [0u8; 16];
        let mut revision = [0u8; 4];
        vendor.copy_from_slice(&resp[8..16]);
        product.copy_from_slice(&resp[16..32]);
        revision.copy_from_slice(&resp[32..36]);
        Self {
            device_type: resp[0] & 0x1f,
            removable: resp[1] & 0x80 != 0,
            vendor,
            product,
            revision,
        }
    }

    pub fn vendor(&self) -> String {
        ascii_label(&self.vendor)
    }

    pub fn product(&self) -> String {
        ascii_label(&self.product)
    }

    pub fn revision(&self) -> String {
        ascii_label(&self.revision)
    }
}

// INQUIRY strings are space-padded ASCII.
fn ascii_label(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}

/// Fixed-format REQUEST SENSE response, reduced to the fields we report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenseData {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub fn parse(resp: &[u8; SENSE_DATA_LEN]) -> Self {
        Self {
            key: resp[2] & 0x0f,
            asc: resp[12],
            ascq: resp[13],
        }
    }
}
