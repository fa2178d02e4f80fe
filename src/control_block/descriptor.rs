// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use thiserror::Error;

use crate::control_block::{
    read::{
        build_read_long10, build_read_long16, build_read6, build_read10, build_read12,
        build_read16,
    },
    verify::{BYTCHK_COMPARE, build_verify10, build_verify12, build_verify16},
    write::{build_write6, build_write10, build_write12, build_write16},
};

bitflags::bitflags! {
    /// Per-command caching hints, placed in byte 1 of 10/12/16-byte CDBs.
    #[derive(Default, Clone, Copy, PartialEq, Eq)]
    pub struct CdbFlags: u8 {
        /// Disable Page Out
        const DPO = 0b0001_0000;
        /// Force Unit Access
        const FUA = 0b0000_1000;
    }
}

impl fmt::Debug for CdbFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CdbFlags(")?;
        let mut sep = "";
        if self.contains(CdbFlags::DPO) {
            write!(f, "DPO")?;
            sep = "|";
        }
        if self.contains(CdbFlags::FUA) {
            write!(f, "{sep}FUA")?;
        }
        write!(f, ")")
    }
}

/// Direction-carrying operation of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
    /// VERIFY with BYTCHK=01b: the data-out buffer is compared to the medium.
    Verify,
    /// Single-block READ LONG used for degraded recovery; `correct` requests
    /// on-device ECC (CORRCT bit).
    ReadLong { correct: bool },
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Read => "read",
            Opcode::Write => "write",
            Opcode::Verify => "verify",
            Opcode::ReadLong { .. } => "read long",
        }
    }
}

/// CDB length, which fixes how wide the LBA and transfer length fields are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressingWidth {
    W6,
    W10,
    W12,
    W16,
}

/// Highest LBA (exclusive) that a 6-byte CDB can address.
pub const W6_LBA_LIMIT: u64 = 1 << 21;
/// Largest transfer length of a 6-byte CDB (encoded as 0).
pub const W6_MAX_BLOCKS: u32 = 256;
/// Largest transfer length of a 10-byte CDB.
pub const W10_MAX_BLOCKS: u32 = u16::MAX as u32;

impl AddressingWidth {
    pub fn cdb_len(&self) -> usize {
        match self {
            AddressingWidth::W6 => 6,
            AddressingWidth::W10 => 10,
            AddressingWidth::W12 => 12,
            AddressingWidth::W16 => 16,
        }
    }

    pub fn from_len(len: u8) -> Option<Self> {
        Some(match len {
            6 => AddressingWidth::W6,
            10 => AddressingWidth::W10,
            12 => AddressingWidth::W12,
            16 => AddressingWidth::W16,
            _ => return None,
        })
    }

    /// Widen the CDB when `last_lba` or `blocks` does not fit.
    pub fn escalate(self, last_lba: u64, blocks: u32) -> Self {
        let mut w = self;
        if w == AddressingWidth::W6 && (blocks > W6_MAX_BLOCKS || last_lba >= W6_LBA_LIMIT)
        {
            w = AddressingWidth::W10;
        }
        if w < AddressingWidth::W16
            && (last_lba > u32::MAX as u64
                || (w == AddressingWidth::W10 && blocks > W10_MAX_BLOCKS))
        {
            w = AddressingWidth::W16;
        }
        w
    }
}

impl fmt::Display for AddressingWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cdb_len())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CdbError {
    #[error("unsupported CDB field for {width}-byte {op}: {reason}")]
    UnsupportedCdbField {
        op: &'static str,
        width: AddressingWidth,
        reason: String,
    },
    #[error("cannot decode CDB: {0}")]
    Malformed(String),
}

fn unsupported(op: Opcode, width: AddressingWidth, reason: impl Into<String>) -> CdbError {
    CdbError::UnsupportedCdbField {
        op: op.name(),
        width,
        reason: reason.into(),
    }
}

/// An encoded READ/WRITE/VERIFY command, immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    opcode: Opcode,
    width: AddressingWidth,
    start_block: u64,
    block_count: u32,
    flags: CdbFlags,
    duration_limit: u8,
    token: u64,
    cdb: [u8; 16],
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("opcode", &self.opcode)
            .field("width", &self.width.cdb_len())
            .field("start_block", &self.start_block)
            .field("block_count", &self.block_count)
            .field("flags", &self.flags)
            .field("token", &self.token)
            .field("cdb", &hex::encode(self.bytes()))
            .finish()
    }
}

impl CommandDescriptor {
    /// Validate the triple against the width limits and encode it.
    ///
    /// Out-of-limit inputs fail with [`CdbError::UnsupportedCdbField`]; no
    /// field is ever truncated.
    pub fn build(
        opcode: Opcode,
        width: AddressingWidth,
        start_block: u64,
        block_count: u32,
        flags: CdbFlags,
        token: u64,
    ) -> Result<Self, CdbError> {
        Self::build_with_limit(opcode, width, start_block, block_count, flags, 0, token)
    }

    /// Same as [`CommandDescriptor::build`] plus a command duration limit
    /// descriptor index (1..=7, 0 = none), encodable only in 16-byte
    /// READ/WRITE.
    pub fn build_with_limit(
        opcode: Opcode,
        width: AddressingWidth,
        start_block: u64,
        block_count: u32,
        flags: CdbFlags,
        duration_limit: u8,
        token: u64,
    ) -> Result<Self, CdbError> {
        let last = if block_count == 0 {
            start_block
        } else {
            start_block
                .checked_add(block_count as u64 - 1)
                .ok_or_else(|| unsupported(opcode, width, "LBA range overflows 64 bits"))?
        };

        if duration_limit > 7 {
            return Err(unsupported(opcode, width, "duration limit index above 7"));
        }
        if duration_limit != 0
            && !(width == AddressingWidth::W16
                && matches!(opcode, Opcode::Read | Opcode::Write))
        {
            return Err(unsupported(
                opcode,
                width,
                "duration limit needs 16-byte READ/WRITE",
            ));
        }

        match opcode {
            Opcode::Verify if flags.contains(CdbFlags::FUA) => {
                return Err(unsupported(opcode, width, "VERIFY carries no FUA bit"));
            },
            Opcode::ReadLong { .. } => {
                if block_count != 1 {
                    return Err(unsupported(opcode, width, "READ LONG spans one block"));
                }
                if !flags.is_empty() {
                    return Err(unsupported(opcode, width, "READ LONG carries no DPO/FUA"));
                }
            },
            _ => {},
        }

        match width {
            AddressingWidth::W6 => {
                if !flags.is_empty() {
                    return Err(unsupported(opcode, width, "no room for DPO/FUA"));
                }
                if matches!(opcode, Opcode::Verify | Opcode::ReadLong { .. }) {
                    return Err(unsupported(opcode, width, "no 6-byte form"));
                }
                if block_count == 0 || block_count > W6_MAX_BLOCKS {
                    return Err(unsupported(
                        opcode,
                        width,
                        format!("block count {block_count} outside 1..=256"),
                    ));
                }
                if last >= W6_LBA_LIMIT {
                    return Err(unsupported(
                        opcode,
                        width,
                        format!("last LBA {last} exceeds 21 bits"),
                    ));
                }
            },
            AddressingWidth::W10 => {
                if block_count > W10_MAX_BLOCKS {
                    return Err(unsupported(
                        opcode,
                        width,
                        format!("block count {block_count} exceeds 65535"),
                    ));
                }
                if last > u32::MAX as u64 {
                    return Err(unsupported(
                        opcode,
                        width,
                        format!("last LBA {last} exceeds 32 bits"),
                    ));
                }
            },
            AddressingWidth::W12 => {
                if matches!(opcode, Opcode::ReadLong { .. }) {
                    return Err(unsupported(opcode, width, "no 12-byte form"));
                }
                if last > u32::MAX as u64 {
                    return Err(unsupported(
                        opcode,
                        width,
                        format!("last LBA {last} exceeds 32 bits"),
                    ));
                }
            },
            AddressingWidth::W16 => {},
        }

        let mut cdb = [0u8; 16];
        // limits are checked above so the narrowing casts below are exact
        let bits = flags.bits();
        match (opcode, width) {
            (Opcode::Read, AddressingWidth::W6) => {
                build_read6(&mut cdb, start_block as u32, (block_count & 0xFF) as u8, 0)
            },
            (Opcode::Read, AddressingWidth::W10) => {
                build_read10(&mut cdb, start_block as u32, block_count as u16, bits, 0)
            },
            (Opcode::Read, AddressingWidth::W12) => {
                build_read12(&mut cdb, start_block as u32, block_count, bits, 0)
            },
            (Opcode::Read, AddressingWidth::W16) => {
                let (b1, b14) = split_duration_limit(duration_limit);
                build_read16(&mut cdb, start_block, block_count, bits | b1, b14, 0)
            },
            (Opcode::Write, AddressingWidth::W6) => {
                build_write6(&mut cdb, start_block as u32, (block_count & 0xFF) as u8, 0)
            },
            (Opcode::Write, AddressingWidth::W10) => {
                build_write10(&mut cdb, start_block as u32, block_count as u16, bits, 0)
            },
            (Opcode::Write, AddressingWidth::W12) => {
                build_write12(&mut cdb, start_block as u32, block_count, bits, 0)
            },
            (Opcode::Write, AddressingWidth::W16) => {
                let (b1, b14) = split_duration_limit(duration_limit);
                build_write16(&mut cdb, start_block, block_count, bits | b1, b14, 0)
            },
            (Opcode::Verify, AddressingWidth::W10) => build_verify10(
                &mut cdb,
                start_block as u32,
                block_count as u16,
                bits | BYTCHK_COMPARE,
                0,
            ),
            (Opcode::Verify, AddressingWidth::W12) => build_verify12(
                &mut cdb,
                start_block as u32,
                block_count,
                bits | BYTCHK_COMPARE,
                0,
            ),
            (Opcode::Verify, AddressingWidth::W16) => {
                build_verify16(&mut cdb, start_block, block_count, bits | BYTCHK_COMPARE, 0)
            },
            (Opcode::ReadLong { correct }, AddressingWidth::W10) => {
                build_read_long10(&mut cdb, start_block as u32, 0, correct, 0)
            },
            (Opcode::ReadLong { correct }, AddressingWidth::W16) => {
                build_read_long16(&mut cdb, start_block, 0, correct, 0)
            },
            (op, w) => return Err(unsupported(op, w, "no such CDB form")),
        }

        Ok(Self {
            opcode,
            width,
            start_block,
            block_count,
            flags,
            duration_limit,
            token,
            cdb,
        })
    }

    /// Decode the leading bytes of a READ/WRITE/VERIFY/READ LONG CDB.
    ///
    /// The correlation token never travels inside a CDB, so the decoded
    /// descriptor carries `token` as given.
    pub fn decode(bytes: &[u8], token: u64) -> Result<Self, CdbError> {
        let op = *bytes
            .first()
            .ok_or_else(|| CdbError::Malformed("empty CDB".to_string()))?;
        let need = match op {
            0x08 | 0x0A => 6,
            0x28 | 0x2A | 0x2F | 0x3E => 10,
            0xA8 | 0xAA | 0xAF => 12,
            0x88 | 0x8A | 0x8F | 0x9E => 16,
            other => return Err(CdbError::Malformed(format!("opcode {other:#04x}"))),
        };
        if bytes.len() < need {
            return Err(CdbError::Malformed(format!(
                "opcode {op:#04x} needs {need} bytes, got {}",
                bytes.len()
            )));
        }

        let be32 = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let be16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        let be64 = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            u64::from_be_bytes(b)
        };
        let flags = CdbFlags::from_bits_truncate(bytes[1]);

        let (opcode, width, start, count, flags, dl) = match op {
            0x08 | 0x0A => {
                let lba = ((bytes[1] as u64 & 0x1F) << 16) | be16(2) as u64;
                let count = if bytes[4] == 0 { 256 } else { bytes[4] as u32 };
                let opcode = if op == 0x08 { Opcode::Read } else { Opcode::Write };
                (opcode, AddressingWidth::W6, lba, count, CdbFlags::empty(), 0)
            },
            0x28 | 0x2A | 0x2F => {
                let opcode = match op {
                    0x28 => Opcode::Read,
                    0x2A => Opcode::Write,
                    _ => Opcode::Verify,
                };
                (opcode, AddressingWidth::W10, be32(2) as u64, be16(7) as u32, flags, 0)
            },
            0x3E => {
                let d = Self::read_long(
                    AddressingWidth::W10,
                    be32(2) as u64,
                    be16(7),
                    bytes[1] & 0x02 != 0,
                    token,
                )?;
                return Ok(d);
            },
            0xA8 | 0xAA | 0xAF => {
                let opcode = match op {
                    0xA8 => Opcode::Read,
                    0xAA => Opcode::Write,
                    _ => Opcode::Verify,
                };
                (opcode, AddressingWidth::W12, be32(2) as u64, be32(6), flags, 0)
            },
            0x9E => {
                if bytes[1] & 0x1F != 0x11 {
                    return Err(CdbError::Malformed(format!(
                        "SERVICE ACTION IN(16) service action {:#04x}",
                        bytes[1] & 0x1F
                    )));
                }
                return Self::read_long(
                    AddressingWidth::W16,
                    be64(2),
                    be16(12),
                    bytes[14] & 0x01 != 0,
                    token,
                );
            },
            _ => {
                let opcode = match op {
                    0x88 => Opcode::Read,
                    0x8A => Opcode::Write,
                    _ => Opcode::Verify,
                };
                let dl = if opcode == Opcode::Verify {
                    0
                } else {
                    ((bytes[1] & 0x01) << 2) | (bytes[14] >> 6)
                };
                (opcode, AddressingWidth::W16, be64(2), be32(10), flags, dl)
            },
        };

        Self::build_with_limit(opcode, width, start, count, flags, dl, token)
    }

    /// Single-block READ LONG asking for `byte_len` bytes of block plus
    /// ECC data.
    pub fn read_long(
        width: AddressingWidth,
        lba: u64,
        byte_len: u16,
        correct: bool,
        token: u64,
    ) -> Result<Self, CdbError> {
        let mut d = Self::build(
            Opcode::ReadLong { correct },
            width,
            lba,
            1,
            CdbFlags::empty(),
            token,
        )?;
        let at = if width == AddressingWidth::W16 { 12 } else { 7 };
        d.cdb[at..at + 2].copy_from_slice(&byte_len.to_be_bytes());
        Ok(d)
    }

    /// Byte transfer length of a READ LONG, 0 for other opcodes.
    pub fn long_len(&self) -> u16 {
        match (self.opcode, self.width) {
            (Opcode::ReadLong { .. }, AddressingWidth::W16) => {
                u16::from_be_bytes([self.cdb[12], self.cdb[13]])
            },
            (Opcode::ReadLong { .. }, _) => u16::from_be_bytes([self.cdb[7], self.cdb[8]]),
            _ => 0,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn width(&self) -> AddressingWidth {
        self.width
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// One past the last block covered.
    pub fn end_block(&self) -> u64 {
        self.start_block + self.block_count as u64
    }

    pub fn flags(&self) -> CdbFlags {
        self.flags
    }

    pub fn duration_limit(&self) -> u8 {
        self.duration_limit
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// The encoded CDB (6, 10, 12 or 16 bytes).
    pub fn bytes(&self) -> &[u8] {
        &self.cdb[..self.width.cdb_len()]
    }
}

/// DLD2 goes to byte 1 bit 0, DLD1/DLD0 to byte 14 bits 7:6.
fn split_duration_limit(dl: u8) -> (u8, u8) {
    ((dl >> 2) & 0x01, (dl & 0x03) << 6)
}
