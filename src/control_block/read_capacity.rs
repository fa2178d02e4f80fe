// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout,
    byteorder::{BigEndian, U32, U64},
};

/// Parameter data length requested from READ CAPACITY(16).
pub const RC16_ALLOC_LEN: u32 = 32;
/// Parameter data length returned by READ CAPACITY(10).
pub const RC10_LEN: usize = 8;

/// Build a **SCSI READ CAPACITY(10)** CDB (opcode 0x25).
///
/// Only the full-medium form is built (PMI = 0, LBA = 0): the target
/// returns the last LBA and the logical block length. A last LBA of
/// `0xFFFF_FFFF` means the medium is too large and READ CAPACITY(16) must
/// be used instead.
#[inline]
pub fn build_read_capacity10(cdb: &mut [u8; 16], control: u8) {
    cdb.fill(0);
    cdb[0] = 0x25; // READ CAPACITY(10)
    cdb[9] = control;
}

/// Build a **SCSI READ CAPACITY(16)** CDB via SERVICE ACTION IN(16)
/// (opcode 0x9E, SA=0x10).
///
/// - `alloc_len` : allocation length for the parameter data, use
///   [`RC16_ALLOC_LEN`] to get the full page.
#[inline]
pub fn build_read_capacity16(cdb: &mut [u8; 16], alloc_len: u32, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x9E; // SERVICE ACTION IN(16)
    cdb[1] = 0x10; // READ CAPACITY(16)
    cdb[10..14].copy_from_slice(&alloc_len.to_be_bytes());
    cdb[15] = control;
}

/// Raw 8-byte parameter data of READ CAPACITY(10).
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug)]
pub struct Rc10Raw {
    /// Last logical block address (bytes 0-3)
    pub max_lba: U32<BigEndian>,
    /// Logical block length in bytes (bytes 4-7)
    pub block_len: U32<BigEndian>,
}

/// First 12 bytes of READ CAPACITY(16) parameter data.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug)]
pub struct Rc16Raw {
    /// Last logical block address (bytes 0-7)
    pub max_lba: U64<BigEndian>,
    /// Logical block length in bytes (bytes 8-11)
    pub block_len: U32<BigEndian>,
}

impl Rc10Raw {
    /// If true, the medium needs READ CAPACITY(16).
    #[inline]
    pub fn indicates_overflow(&self) -> bool {
        self.max_lba == u32::MAX
    }
}

/// Number of addressable blocks and their size, as reported by the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Last LBA + 1.
    pub blocks: u64,
    pub block_size: u32,
}

impl Capacity {
    pub fn bytes(&self) -> u128 {
        self.blocks as u128 * self.block_size as u128
    }
}

impl From<&Rc10Raw> for Capacity {
    fn from(raw: &Rc10Raw) -> Self {
        Self {
            blocks: raw.max_lba.get() as u64 + 1,
            block_size: raw.block_len.get(),
        }
    }
}

impl From<&Rc16Raw> for Capacity {
    fn from(raw: &Rc16Raw) -> Self {
        Self {
            blocks: raw.max_lba.get().saturating_add(1),
            block_size: raw.block_len.get(),
        }
    }
}

/// Parse READ CAPACITY(10) parameter data (needs ≥ 8 bytes).
#[inline]
pub fn parse_read_capacity10_zerocopy(buf: &[u8]) -> Result<&Rc10Raw> {
    let (raw, _rest) = Rc10Raw::ref_from_prefix(buf)
        .map_err(|_| anyhow!("READ CAPACITY(10): need ≥ 8 bytes, got {}", buf.len()))?;
    Ok(raw)
}

/// Parse READ CAPACITY(16) parameter data head (needs ≥ 12 bytes).
#[inline]
pub fn parse_read_capacity16_zerocopy(buf: &[u8]) -> Result<&Rc16Raw> {
    let (raw, _rest) = Rc16Raw::ref_from_prefix(buf)
        .map_err(|_| anyhow!("READ CAPACITY(16): need ≥ 12 bytes, got {}", buf.len()))?;
    Ok(raw)
}

/// Fill `out` with READ CAPACITY(10) parameter data for `blocks` blocks.
///
/// Media with more than `u32::MAX` blocks report the all-ones sentinel.
pub fn encode_read_capacity10(out: &mut [u8], blocks: u64, block_size: u32) -> usize {
    let max_lba = blocks
        .checked_sub(1)
        .and_then(|l| u32::try_from(l).ok())
        .unwrap_or(u32::MAX);
    let raw = Rc10Raw {
        max_lba: U32::new(max_lba),
        block_len: U32::new(block_size),
    };
    let n = out.len().min(RC10_LEN);
    out[..n].copy_from_slice(&raw.as_bytes()[..n]);
    n
}

/// Fill `out` with READ CAPACITY(16) parameter data; returns the bytes
/// written (at most the 32-byte page).
pub fn encode_read_capacity16(out: &mut [u8], blocks: u64, block_size: u32) -> usize {
    let raw = Rc16Raw {
        max_lba: U64::new(blocks.saturating_sub(1)),
        block_len: U32::new(block_size),
    };
    let mut page = [0u8; RC16_ALLOC_LEN as usize];
    page[..12].copy_from_slice(raw.as_bytes());
    let n = out.len().min(page.len());
    out[..n].copy_from_slice(&page[..n]);
    n
}
