//! Driver-internal error taxonomy.
//!
//! Three families: transport failures (the USB transfer itself did not complete),
//! protocol violations (the transfer completed but the status wrapper is wrong) and
//! discovery failures (the device never produced a usable logical unit). The public
//! block-device surface collapses all of them into a single failure outcome; the
//! distinction is kept here for logging and for callers of the session layer.

use std::fmt;

use keel_usb::TransferError;
use thiserror::Error;

/// Which leg of a Bulk-Only transaction an error was raised on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Command,
    DataIn,
    DataOut,
    Status,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Command => "command",
            Phase::DataIn => "data-in",
            Phase::DataOut => "data-out",
            Phase::Status => "status",
        })
    }
}

/// A status wrapper that failed validation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("bad status signature {found:#010x}")]
    Signature { found: u32 },

    #[error("status tag {found:#010x} does not answer command tag {expected:#010x}")]
    TagMismatch { expected: u32, found: u32 },

    #[error("device left {residue} bytes of the transfer unprocessed")]
    Residue { residue: u32 },

    #[error("command failed with status {status:#04x}")]
    CommandFailed { status: u8 },
}

/// Failure of one Bulk-Only transaction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{phase} transfer failed: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransferError,
    },

    #[error("short {phase} transfer: {got} of {want} bytes")]
    ShortTransfer { phase: Phase, got: usize, want: usize },

    #[error("device broke protocol: {0}")]
    Protocol(#[from] ProtocolViolation),
}

/// Failure to locate a usable logical unit on an attached device.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("get-max-lun request failed: {0}")]
    MaxLunRequest(TransferError),

    #[error("get-max-lun reply carried no data")]
    EmptyMaxLunReply,

    #[error("device reported {count} logical units, valid range is 1..=16")]
    LunCountOutOfRange { count: u8 },

    #[error("no logical unit answered as a ready direct-access device")]
    NoUsableLun,
}

/// Why a device could not be opened as a block device.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("logical unit discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("read capacity failed: {0}")]
    Capacity(CommandError),

    #[error("device reported unusable sector size {0}")]
    SectorSize(u32),
}
