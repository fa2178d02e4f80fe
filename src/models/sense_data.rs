// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fmt};

use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::Lazy;

/// Sense data must be ≥ 18 bytes for fixed format.
pub const FIXED_MIN_LEN: usize = 18;
/// Descriptor format header length.
pub const DESC_HEADER_LEN: usize = 8;

/// Sense keys the classifier cares about (SPC-4 Table 49).
pub mod key {
    pub const NO_SENSE: u8 = 0x0;
    pub const RECOVERED_ERROR: u8 = 0x1;
    pub const NOT_READY: u8 = 0x2;
    pub const MEDIUM_ERROR: u8 = 0x3;
    pub const HARDWARE_ERROR: u8 = 0x4;
    pub const ILLEGAL_REQUEST: u8 = 0x5;
    pub const UNIT_ATTENTION: u8 = 0x6;
    pub const ABORTED_COMMAND: u8 = 0xB;
    pub const MISCOMPARE: u8 = 0xE;
}

/// ASC for "not ready to ready change, medium may have changed".
pub const ASC_MEDIUM_MAY_HAVE_CHANGED: u8 = 0x28;

/// Sense data decoded from either the fixed (0x70/0x71) or the descriptor
/// (0x72/0x73) format.
#[derive(Default, PartialEq, Clone)]
pub struct SenseData {
    /// VALID bit (fixed) or presence of an Information descriptor.
    pub valid: bool,
    pub response_code: u8,
    pub sense_key: u8,
    pub ili: bool,
    pub eom: bool,
    pub filemark: bool,
    /// Information field, for read/write commands the first failing LBA.
    pub information: u64,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    /// Parse sense data, dispatching on the response code.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let first = buf.first().context("empty sense buffer")?;
        match first & 0x7F {
            0x70 | 0x71 => Self::parse_fixed(buf),
            0x72 | 0x73 => Self::parse_descriptor(buf),
            rc => bail!("unknown sense response code {rc:#04x}"),
        }
    }

    /// Parse *fixed-format* sense-data (SPC-4 § 4.5.3).
    ///
    /// The buffer must be at least 18 bytes long.
    pub fn parse_fixed(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_MIN_LEN {
            return Err(anyhow!(
                "sense buffer too small: {} < {FIXED_MIN_LEN}",
                buf.len()
            ));
        }

        let information = u32::from_be_bytes(
            buf[3..7]
                .try_into()
                .context("failed to read Information field (bytes 3‥6)")?,
        );

        Ok(Self {
            valid: buf[0] & 0x80 != 0,
            response_code: buf[0] & 0x7F,
            filemark: buf[2] & 0x80 != 0,
            eom: buf[2] & 0x40 != 0,
            ili: buf[2] & 0x20 != 0,
            sense_key: buf[2] & 0x0F,
            information: information as u64,
            asc: buf[12],
            ascq: buf[13],
        })
    }

    /// Parse *descriptor-format* sense-data (SPC-4 § 4.5.2), picking up the
    /// Information descriptor (type 0x00) and the stream commands
    /// descriptor (type 0x04) when present.
    pub fn parse_descriptor(buf: &[u8]) -> Result<Self> {
        if buf.len() < DESC_HEADER_LEN {
            bail!(
                "descriptor sense too small: {} < {DESC_HEADER_LEN}",
                buf.len()
            );
        }
        let mut sd = Self {
            response_code: buf[0] & 0x7F,
            sense_key: buf[1] & 0x0F,
            asc: buf[2],
            ascq: buf[3],
            ..Default::default()
        };

        let end = (DESC_HEADER_LEN + buf[7] as usize).min(buf.len());
        let mut at = DESC_HEADER_LEN;
        while at + 2 <= end {
            let kind = buf[at];
            let len = buf[at + 1] as usize;
            let body = buf
                .get(at + 2..at + 2 + len)
                .context("truncated sense descriptor")?;
            match kind {
                0x00 if len >= 10 => {
                    sd.valid = body[0] & 0x80 != 0;
                    sd.information = u64::from_be_bytes(
                        body[2..10]
                            .try_into()
                            .context("failed to read Information descriptor")?,
                    );
                },
                0x04 if len >= 2 => {
                    sd.filemark = body[1] & 0x80 != 0;
                    sd.eom = body[1] & 0x40 != 0;
                    sd.ili = body[1] & 0x20 != 0;
                },
                _ => {},
            }
            at += 2 + len;
        }
        Ok(sd)
    }

    /// Build fixed-format sense bytes, `information` sets the VALID bit.
    pub fn fixed(sense_key: u8, asc: u8, ascq: u8, information: Option<u32>) -> [u8; 18] {
        let mut out = [0u8; FIXED_MIN_LEN];
        out[0] = 0x70;
        if let Some(info) = information {
            out[0] |= 0x80;
            out[3..7].copy_from_slice(&info.to_be_bytes());
        }
        out[2] = sense_key & 0x0F;
        out[7] = (FIXED_MIN_LEN - 8) as u8;
        out[12] = asc;
        out[13] = ascq;
        out
    }

    /// Build descriptor-format sense bytes with an optional 64-bit
    /// Information descriptor.
    pub fn descriptor(sense_key: u8, asc: u8, ascq: u8, information: Option<u64>) -> Vec<u8> {
        let mut out = vec![0x72, sense_key & 0x0F, asc, ascq, 0, 0, 0, 0];
        if let Some(info) = information {
            out.extend_from_slice(&[0x00, 0x0A, 0x80, 0x00]);
            out.extend_from_slice(&info.to_be_bytes());
        }
        out[7] = (out.len() - DESC_HEADER_LEN) as u8;
        out
    }
}

impl fmt::Debug for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenseData")
            .field("valid", &self.valid)
            .field(
                "response_code",
                &format_args!("{:#04x}", self.response_code),
            )
            .field("sense_key", &format_args!("{:#x}", self.sense_key))
            .field("filemark", &self.filemark)
            .field("eom", &self.eom)
            .field("ili", &self.ili)
            .field("information", &self.information)
            .field("asc", &format_args!("{:#04x}", self.asc))
            .field("ascq", &format_args!("{:#04x}", self.ascq))
            .field("description", &asc_ascq_to_str(self.asc, self.ascq))
            .finish()
    }
}

/// Return the SPC-4 description for a given ASC/ASCQ pair.
///
/// * If the pair is not present in the table, returns `"UNSPECIFIED /
///   vendor specific"`.
#[inline]
pub fn asc_ascq_to_str(asc: u8, ascq: u8) -> &'static str {
    hot_table(asc, ascq).unwrap_or("UNSPECIFIED / vendor specific")
}

fn hot_table(asc: u8, ascq: u8) -> Option<&'static str> {
    let k = ((asc as u16) << 8) | (ascq as u16);
    ASC_ASCQ_MAP.get(&k).copied()
}

const ASC_ASCQ: &[(u16, &str)] = &[
    (0x0000, "No additional sense information"),
    (0x0400, "Logical unit not ready, cause not reportable"),
    (0x0401, "Logical unit is in process of becoming ready"),
    (0x0404, "Logical unit not ready, format in progress"),
    (0x0C00, "Write error"),
    (0x0C02, "Write error, auto reallocation failed"),
    (0x1100, "Unrecovered read error"),
    (0x1101, "Read retries exhausted"),
    (0x1104, "Unrecovered read error, auto reallocate failed"),
    (0x1401, "Record not found"),
    (0x1701, "Recovered data with retries"),
    (0x1800, "Recovered data with error correction applied"),
    (0x1D00, "Miscompare during verify operation"),
    (0x2000, "Invalid command operation code"),
    (0x2100, "Logical block address out of range"),
    (0x2400, "Invalid field in CDB"),
    (0x2800, "Not ready to ready change, medium may have changed"),
    (0x2900, "Power on, reset, or bus device reset occurred"),
    (0x2A01, "Mode parameters changed"),
    (0x2A09, "Capacity data has changed"),
    (0x3A00, "Medium not present"),
    (0x4400, "Internal target failure"),
    (0x4700, "SCSI parity error"),
    (0x4B00, "Data phase error"),
    (0x5500, "System resource failure"),
];

static ASC_ASCQ_MAP: Lazy<HashMap<u16, &'static str>> =
    Lazy::new(|| ASC_ASCQ.iter().copied().collect());
