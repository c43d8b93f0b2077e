//! RAM-backed Bulk-Only Transport target for integration tests.
//!
//! Implements the device side of the protocol: parses command wrappers, serves or
//! absorbs a data phase, answers with a status wrapper. Per-LUN profiles, a pending
//! unit-attention flag and fault-injection knobs let tests stand up the device
//! shapes discovery and retry have to cope with. Counters record what the driver
//! actually sent.

#![allow(dead_code)]

use keel_usb::{SetupPacket, TransferError, UsbDevice};
use keel_usb_storage::scsi::sense_key;

pub const INTERFACE: u8 = 0;
pub const EP_IN: u8 = 1;
pub const EP_OUT: u8 = 2;

const CBW_SIGNATURE: u32 = 0x4342_5355;
const CSW_SIGNATURE: u32 = 0x5342_5355;

/// How one logical unit answers probes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LunProfile {
    /// Test Unit Ready passes, inquiry reports direct-access.
    Ready,
    /// Test Unit Ready always fails with NOT READY sense.
    NotReady,
    /// Test Unit Ready passes but inquiry reports this device type.
    WrongType(u8),
}

/// One way to corrupt every status wrapper the device produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CswCorruption {
    Signature,
    Tag,
    Residue,
    Status,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub test_unit_ready: Vec<u32>,
    pub request_sense: Vec<u32>,
    pub inquiry: Vec<u32>,
    pub reads: u32,
    pub writes: u32,
    pub syncs: u32,
    pub cbws: u32,
    /// Tag of every accepted command wrapper, in arrival order.
    pub tags: Vec<u32>,
    pub resets: u32,
}

#[derive(Debug)]
enum BotState {
    Idle,
    DataIn {
        data: Vec<u8>,
        offset: usize,
        tag: u32,
        status: u8,
    },
    DataOut {
        buf: Vec<u8>,
        expected: usize,
        tag: u32,
        lba: u32,
        commit: bool,
    },
    Status {
        tag: u32,
        status: u8,
    },
}

pub struct SimBulkDevice {
    block_size: u32,
    store: Vec<u8>,
    luns: Vec<LunProfile>,
    unit_attention: Vec<bool>,
    max_lun_reply: Option<u8>,
    capacity_block_size: Option<u32>,
    state: BotState,
    cbw_failures_left: u32,
    csw_corruption: Option<CswCorruption>,
    pub counters: Counters,
}

impl SimBulkDevice {
    /// Device with a single ready LUN.
    pub fn new(block_size: u32, sectors: u32) -> Self {
        Self::with_luns(block_size, sectors, vec![LunProfile::Ready])
    }

    pub fn with_luns(block_size: u32, sectors: u32, luns: Vec<LunProfile>) -> Self {
        assert!(!luns.is_empty() && luns.len() <= 16);
        let lun_count = luns.len();
        Self {
            block_size,
            store: vec![0u8; block_size as usize * sectors as usize],
            luns,
            unit_attention: vec![false; lun_count],
            max_lun_reply: Some(lun_count as u8 - 1),
            capacity_block_size: None,
            state: BotState::Idle,
            cbw_failures_left: 0,
            csw_corruption: None,
            counters: Counters {
                test_unit_ready: vec![0; lun_count],
                request_sense: vec![0; lun_count],
                inquiry: vec![0; lun_count],
                ..Counters::default()
            },
        }
    }

    /// Raw byte the next GET MAX LUN replies with, range check left to the driver.
    pub fn set_max_lun_reply(&mut self, raw: u8) {
        self.max_lun_reply = Some(raw);
    }

    pub fn stall_max_lun(&mut self) {
        self.max_lun_reply = None;
    }

    /// Raw block size Read Capacity reports, range check left to the driver.
    pub fn report_block_size(&mut self, raw: u32) {
        self.capacity_block_size = Some(raw);
    }

    /// Raises the unit-attention condition on `lun`, cleared by Request Sense.
    pub fn set_unit_attention(&mut self, lun: u8) {
        self.unit_attention[lun as usize] = true;
    }

    /// Makes the device refuse the next `n` command wrappers with a timeout.
    pub fn inject_cbw_failures(&mut self, n: u32) {
        self.cbw_failures_left = n;
    }

    pub fn corrupt_csw(&mut self, how: CswCorruption) {
        self.csw_corruption = Some(how);
    }

    pub fn clear_csw_corruption(&mut self) {
        self.csw_corruption = None;
    }

    pub fn sector(&self, lba: u32) -> &[u8] {
        let start = lba as usize * self.block_size as usize;
        &self.store[start..start + self.block_size as usize]
    }

    pub fn fill_sector(&mut self, lba: u32, byte: u8) {
        let start = lba as usize * self.block_size as usize;
        self.store[start..start + self.block_size as usize].fill(byte);
    }

    fn ua(&self, lun: usize) -> bool {
        self.unit_attention.get(lun).copied().unwrap_or(false)
    }

    fn sector_range(&self, lba: u32, count: u32) -> Option<std::ops::Range<usize>> {
        let start = lba as usize * self.block_size as usize;
        let len = count as usize * self.block_size as usize;
        let end = start.checked_add(len)?;
        (end <= self.store.len()).then_some(start..end)
    }

    fn dispatch(&mut self, tag: u32, lun: u8, cdb: &[u8], expected_len: usize) -> BotState {
        let lun = lun as usize;
        let profile = self.luns.get(lun).copied();
        match cdb[0] {
            // TEST UNIT READY
            0x00 => {
                if let Some(count) = self.counters.test_unit_ready.get_mut(lun) {
                    *count += 1;
                }
                let ready = matches!(
                    profile,
                    Some(LunProfile::Ready) | Some(LunProfile::WrongType(_))
                ) && !self.ua(lun);
                BotState::Status {
                    tag,
                    status: u8::from(!ready),
                }
            }
            // REQUEST SENSE
            0x03 => {
                if let Some(count) = self.counters.request_sense.get_mut(lun) {
                    *count += 1;
                }
                let key = if self.ua(lun) {
                    self.unit_attention[lun] = false;
                    sense_key::UNIT_ATTENTION
                } else if profile == Some(LunProfile::NotReady) {
                    sense_key::NOT_READY
                } else {
                    sense_key::NONE
                };
                let mut sense = vec![0u8; 18];
                sense[0] = 0x70;
                sense[2] = key;
                sense.truncate(expected_len);
                BotState::DataIn {
                    data: sense,
                    offset: 0,
                    tag,
                    status: 0,
                }
            }
            // INQUIRY
            0x12 => {
                if let Some(count) = self.counters.inquiry.get_mut(lun) {
                    *count += 1;
                }
                let device_type = match profile {
                    Some(LunProfile::WrongType(ty)) => ty,
                    _ => 0x00,
                };
                let mut data = vec![0u8; 36];
                data[0] = device_type;
                data[1] = 0x80;
                data[8..16].copy_from_slice(b"KEELSIM ");
                data[16..32].copy_from_slice(b"BOT TARGET      ");
                data[32..36].copy_from_slice(b"0.9 ");
                data.truncate(expected_len);
                BotState::DataIn {
                    data,
                    offset: 0,
                    tag,
                    status: 0,
                }
            }
            // READ CAPACITY(10)
            0x25 => {
                let sectors = (self.store.len() / self.block_size as usize) as u32;
                let block_size = self.capacity_block_size.unwrap_or(self.block_size);
                let mut data = vec![0u8; 8];
                data[0..4].copy_from_slice(&(sectors - 1).to_be_bytes());
                data[4..8].copy_from_slice(&block_size.to_be_bytes());
                BotState::DataIn {
                    data,
                    offset: 0,
                    tag,
                    status: 0,
                }
            }
            // READ(10)
            0x28 => {
                self.counters.reads += 1;
                let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
                let count = u32::from(u16::from_be_bytes([cdb[7], cdb[8]]));
                assert_eq!(
                    expected_len,
                    count as usize * self.block_size as usize,
                    "read transfer length must match the command"
                );
                if expected_len == 0 {
                    return BotState::Status { tag, status: 0 };
                }
                match self.sector_range(lba, count) {
                    Some(range) => BotState::DataIn {
                        data: self.store[range].to_vec(),
                        offset: 0,
                        tag,
                        status: 0,
                    },
                    None => BotState::DataIn {
                        data: vec![0u8; expected_len],
                        offset: 0,
                        tag,
                        status: 1,
                    },
                }
            }
            // WRITE(10)
            0x2a => {
                self.counters.writes += 1;
                let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
                let count = u32::from(u16::from_be_bytes([cdb[7], cdb[8]]));
                assert_eq!(
                    expected_len,
                    count as usize * self.block_size as usize,
                    "write transfer length must match the command"
                );
                if expected_len == 0 {
                    return BotState::Status { tag, status: 0 };
                }
                let commit = self.sector_range(lba, count).is_some();
                BotState::DataOut {
                    buf: Vec::with_capacity(expected_len),
                    expected: expected_len,
                    tag,
                    lba,
                    commit,
                }
            }
            // SYNCHRONIZE CACHE(10)
            0x35 => {
                self.counters.syncs += 1;
                BotState::Status { tag, status: 0 }
            }
            _ => BotState::Status { tag, status: 1 },
        }
    }

    fn encode_csw(&self, tag: u32, status: u8) -> [u8; 13] {
        let mut signature = CSW_SIGNATURE;
        let mut tag = tag;
        let mut residue = 0u32;
        let mut status = status;
        match self.csw_corruption {
            Some(CswCorruption::Signature) => signature = 0x0042_5355,
            Some(CswCorruption::Tag) => tag = tag.wrapping_add(0x1000),
            Some(CswCorruption::Residue) => residue = 0x200,
            Some(CswCorruption::Status) => status = 1,
            None => {}
        }
        let mut out = [0u8; 13];
        out[0x0..0x4].copy_from_slice(&signature.to_le_bytes());
        out[0x4..0x8].copy_from_slice(&tag.to_le_bytes());
        out[0x8..0xc].copy_from_slice(&residue.to_le_bytes());
        out[0xc] = status;
        out
    }
}

impl UsbDevice for SimBulkDevice {
    fn control_transfer(
        &mut self,
        setup: SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, TransferError> {
        match (setup.request_type, setup.request) {
            // GET MAX LUN
            (0xa1, 0xfe) => {
                assert_eq!(setup.index, u16::from(INTERFACE));
                let Some(reply) = self.max_lun_reply else {
                    return Err(TransferError::Stall);
                };
                data[0] = reply;
                Ok(1)
            }
            // Bulk-Only Mass Storage Reset
            (0x21, 0xff) => {
                assert_eq!(setup.index, u16::from(INTERFACE));
                self.counters.resets += 1;
                self.state = BotState::Idle;
                Ok(0)
            }
            // CLEAR_FEATURE(ENDPOINT_HALT)
            (0x02, 0x01) => Ok(0),
            _ => Err(TransferError::Stall),
        }
    }

    fn bulk_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, TransferError> {
        assert_eq!(endpoint, EP_OUT);
        match std::mem::replace(&mut self.state, BotState::Idle) {
            BotState::Idle => {
                if self.cbw_failures_left > 0 {
                    self.cbw_failures_left -= 1;
                    return Err(TransferError::Timeout);
                }
                assert_eq!(data.len(), 31, "command wrapper must be 31 bytes");
                assert_eq!(
                    u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                    CBW_SIGNATURE
                );
                self.counters.cbws += 1;
                let tag = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                self.counters.tags.push(tag);
                let expected_len =
                    u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
                let lun = data[13];
                let cdb_len = data[14] as usize;
                let cdb = data[15..15 + cdb_len].to_vec();
                self.state = self.dispatch(tag, lun, &cdb, expected_len);
                Ok(31)
            }
            BotState::DataOut {
                mut buf,
                expected,
                tag,
                lba,
                commit,
            } => {
                buf.extend_from_slice(data);
                self.state = if buf.len() >= expected {
                    if commit {
                        let start = lba as usize * self.block_size as usize;
                        self.store[start..start + expected].copy_from_slice(&buf[..expected]);
                    }
                    BotState::Status {
                        tag,
                        status: u8::from(!commit),
                    }
                } else {
                    BotState::DataOut {
                        buf,
                        expected,
                        tag,
                        lba,
                        commit,
                    }
                };
                Ok(data.len())
            }
            other => panic!("bulk-out while device expected {other:?}"),
        }
    }

    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        assert_eq!(endpoint, EP_IN);
        match std::mem::replace(&mut self.state, BotState::Idle) {
            BotState::DataIn {
                data,
                mut offset,
                tag,
                status,
            } => {
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                offset += n;
                self.state = if offset >= data.len() {
                    BotState::Status { tag, status }
                } else {
                    BotState::DataIn {
                        data,
                        offset,
                        tag,
                        status,
                    }
                };
                Ok(n)
            }
            BotState::Status { tag, status } => {
                let csw = self.encode_csw(tag, status);
                let n = buf.len().min(csw.len());
                buf[..n].copy_from_slice(&csw[..n]);
                self.state = BotState::Idle;
                Ok(n)
            }
            other => panic!("bulk-in while device expected {other:?}"),
        }
    }
}
