// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// BYTCHK=01b: the data-out buffer is compared against the medium.
pub const BYTCHK_COMPARE: u8 = 0b0000_0010;

/// Build a **SCSI VERIFY(10)** CDB (opcode 0x2F).
///
/// - `flags` : VRPROTECT[7:5] | DPO[4] | BYTCHK[2:1]
///
/// Bytes 7..8 carry the VERIFICATION LENGTH in blocks.
#[inline]
pub fn build_verify10(cdb: &mut [u8; 16], lba: u32, blocks: u16, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x2F; // VERIFY(10)
    cdb[1] = flags & 0b1111_0110;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb[9] = control;
}

/// Build a **SCSI VERIFY(12)** CDB (opcode 0xAF).
#[inline]
pub fn build_verify12(cdb: &mut [u8; 16], lba: u32, blocks: u32, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0xAF; // VERIFY(12)
    cdb[1] = flags & 0b1111_0110;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[6..10].copy_from_slice(&blocks.to_be_bytes());
    cdb[11] = control;
}

/// Build a **SCSI VERIFY(16)** CDB (opcode 0x8F).
#[inline]
pub fn build_verify16(cdb: &mut [u8; 16], lba: u64, blocks: u32, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x8F; // VERIFY(16)
    cdb[1] = flags & 0b1111_0110;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&blocks.to_be_bytes());
    cdb[15] = control;
}
