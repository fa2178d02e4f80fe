// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use thiserror::Error;

/// SCSI status byte of a completed command (SAM-5 § 5.3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiStatus {
    Good = 0x00,
    CheckCondition = 0x02,
    ConditionMet = 0x04,
    Busy = 0x08,
    ReservationConflict = 0x18,
    TaskSetFull = 0x28,
    AcaActive = 0x30,
    TaskAborted = 0x40,
    /// Any other status codes defined in SAM-x or reserved
    Other(u8),
}

#[derive(Debug, Error)]
#[error("invalid SCSI status: 0x{0:02x}")]
pub struct UnknownScsiStatus(pub u8);

impl From<ScsiStatus> for u8 {
    fn from(value: ScsiStatus) -> Self {
        match value {
            ScsiStatus::Good => 0x00,
            ScsiStatus::CheckCondition => 0x02,
            ScsiStatus::ConditionMet => 0x04,
            ScsiStatus::Busy => 0x08,
            ScsiStatus::ReservationConflict => 0x18,
            ScsiStatus::TaskSetFull => 0x28,
            ScsiStatus::AcaActive => 0x30,
            ScsiStatus::TaskAborted => 0x40,
            ScsiStatus::Other(v) => v,
        }
    }
}

impl TryFrom<u8> for ScsiStatus {
    type Error = UnknownScsiStatus;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        // status codes are even; odd bytes are transport garbage
        if b & 0x01 != 0 {
            return Err(UnknownScsiStatus(b));
        }
        let s = match b {
            0x00 => ScsiStatus::Good,
            0x02 => ScsiStatus::CheckCondition,
            0x04 => ScsiStatus::ConditionMet,
            0x08 => ScsiStatus::Busy,
            0x18 => ScsiStatus::ReservationConflict,
            0x28 => ScsiStatus::TaskSetFull,
            0x30 => ScsiStatus::AcaActive,
            0x40 => ScsiStatus::TaskAborted,
            other => ScsiStatus::Other(other),
        };
        Ok(s)
    }
}

/// Outcome reported by the transport layer itself, independent of the
/// device's SCSI status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostStatus {
    #[default]
    Ok,
    /// The transport refused the request (queue or buffer limits).
    OutOfResources,
    /// The command did not complete within its timeout.
    TimedOut,
    /// OS-level failure while moving the data.
    Error(String),
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Ok => f.write_str("ok"),
            HostStatus::OutOfResources => f.write_str("out of resources"),
            HostStatus::TimedOut => f.write_str("timed out"),
            HostStatus::Error(e) => write!(f, "error: {e}"),
        }
    }
}
