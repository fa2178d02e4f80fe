// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Build a **SCSI WRITE(6)** CDB.
///
/// - `lba`    : 21-bit Logical Block Address
/// - `blocks` : transfer length, **0 => 256 blocks**
///
/// WRITE(6) has no room for DPO/FUA.
#[inline]
pub fn build_write6(cdb: &mut [u8; 16], lba: u32, blocks: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x0A; // WRITE(6)
    cdb[1] = ((lba >> 16) & 0x1F) as u8;
    cdb[2..4].copy_from_slice(&((lba & 0xFFFF) as u16).to_be_bytes());
    cdb[4] = blocks;
    cdb[5] = control;
}

/// Build a **SCSI WRITE(10)** CDB.
///
/// Parameters:
/// - `lba`     : 32-bit Logical Block Address
/// - `blocks`  : number of logical blocks to transfer
/// - `flags`   : WRPROTECT[7:5] | DPO[4] | FUA[3] (others must be 0)
/// - `control` : CONTROL byte
///
/// Layout (SBC):
/// - byte 0  : OPERATION CODE = 0x2A
/// - byte 1  : flags (reserved bits must be 0)
/// - bytes 2..5  : LBA (big-endian, 32-bit)
/// - byte 6  : GROUP NUMBER
/// - bytes 7..8  : TRANSFER LENGTH (big-endian, 16-bit)
/// - byte 9  : CONTROL
#[inline]
pub fn build_write10(cdb: &mut [u8; 16], lba: u32, blocks: u16, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x2A; // WRITE(10)
    cdb[1] = flags & 0b1111_1000;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb[9] = control;
}

/// Build a **SCSI WRITE(12)** CDB (opcode 0xAA), same field placement as
/// READ(12).
#[inline]
pub fn build_write12(cdb: &mut [u8; 16], lba: u32, blocks: u32, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0xAA; // WRITE(12)
    cdb[1] = flags & 0b1111_1000;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[6..10].copy_from_slice(&blocks.to_be_bytes());
    cdb[11] = control;
}

/// Build a 16-byte **SCSI WRITE(16)** CDB.
///
/// Layout (SBC):
/// - byte  0  : OPERATION CODE = 0x8A
/// - byte  1  : WRPROTECT[7:5] | DPO[4] | FUA[3] | DLD2[0]
/// - bytes 2..9   : LBA (big-endian, 64-bit)
/// - bytes 10..13 : TRANSFER LENGTH (big-endian, 32-bit)
/// - byte  14 : DLD1 | DLD0 | GROUP NUMBER
/// - byte  15 : CONTROL
#[inline]
pub fn build_write16(
    cdb: &mut [u8; 16],
    lba: u64,
    blocks: u32,
    flags: u8,
    dld: u8,
    control: u8,
) {
    cdb.fill(0);
    cdb[0] = 0x8A; // WRITE(16)
    cdb[1] = flags & 0b1111_1001;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&blocks.to_be_bytes());
    cdb[14] = dld & 0b1100_0000;
    cdb[15] = control;
}
