// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Build a **SCSI READ(6)** CDB.
///
/// Parameters:
/// - `cdb`     : output buffer (zeroed; first 6 bytes used)
/// - `lba`     : 21-bit Logical Block Address (upper bits are dropped)
/// - `blocks`  : transfer length, **0 => 256 blocks**
/// - `control` : CONTROL byte
///
/// Layout (SBC):
/// - byte 0      : OPERATION CODE = 0x08
/// - bytes 1..3  : LBA (byte 1 low 5 bits, then big-endian 16-bit)
/// - byte 4      : TRANSFER LENGTH
/// - byte 5      : CONTROL
#[inline]
pub fn build_read6(cdb: &mut [u8; 16], lba: u32, blocks: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x08; // READ(6)
    cdb[1] = ((lba >> 16) & 0x1F) as u8;
    cdb[2..4].copy_from_slice(&((lba & 0xFFFF) as u16).to_be_bytes());
    cdb[4] = blocks;
    cdb[5] = control;
}

/// Build a **SCSI READ(10)** CDB.
///
/// Parameters:
/// - `lba`     : 32-bit Logical Block Address to start reading from
/// - `blocks`  : number of logical blocks to transfer (0 => no transfer)
/// - `flags`   : RDPROTECT[7:5] | DPO[4] | FUA[3] (other bits must be zero)
/// - `control` : CONTROL byte
///
/// Layout (SBC):
/// - byte 0      : OPERATION CODE = 0x28
/// - byte 1      : flags (masked to RDPROTECT/DPO/FUA)
/// - bytes 2..5  : LBA (big-endian, 32-bit)
/// - byte 6      : GROUP NUMBER
/// - bytes 7..8  : TRANSFER LENGTH (big-endian, 16-bit)
/// - byte 9      : CONTROL
#[inline]
pub fn build_read10(cdb: &mut [u8; 16], lba: u32, blocks: u16, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0x28; // READ(10)
    cdb[1] = flags & 0b1111_1000; // allow RDPROTECT[7:5], DPO[4], FUA[3]
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb[9] = control;
}

/// Build a **SCSI READ(12)** CDB.
///
/// Layout (SBC):
/// - byte 0      : OPERATION CODE = 0xA8
/// - byte 1      : flags (RDPROTECT/DPO/FUA)
/// - bytes 2..5  : LBA (big-endian, 32-bit)
/// - bytes 6..9  : TRANSFER LENGTH (big-endian, 32-bit)
/// - byte 10     : GROUP NUMBER
/// - byte 11     : CONTROL
#[inline]
pub fn build_read12(cdb: &mut [u8; 16], lba: u32, blocks: u32, flags: u8, control: u8) {
    cdb.fill(0);
    cdb[0] = 0xA8; // READ(12)
    cdb[1] = flags & 0b1111_1000;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[6..10].copy_from_slice(&blocks.to_be_bytes());
    cdb[11] = control;
}

/// Build a 16-byte **SCSI READ(16)** CDB.
///
/// Parameters:
/// - `lba`     : 64-bit Logical Block Address
/// - `blocks`  : number of logical blocks to transfer (big-endian, 32-bit)
/// - `flags`   : RDPROTECT[7:5] | DPO[4] | FUA[3] | DLD2[0]
/// - `dld`     : DLD1/DLD0 in bits 7:6 of byte 14
/// - `control` : CONTROL byte
///
/// Layout (SBC):
/// - byte  0      : OPERATION CODE = 0x88
/// - byte  1      : flags
/// - bytes 2..9   : LBA (big-endian, 64-bit)
/// - bytes 10..13 : TRANSFER LENGTH (big-endian, 32-bit)
/// - byte  14     : DLD1 | DLD0 | GROUP NUMBER
/// - byte  15     : CONTROL
#[inline]
pub fn build_read16(
    cdb: &mut [u8; 16],
    lba: u64,
    blocks: u32,
    flags: u8,
    dld: u8,
    control: u8,
) {
    cdb.fill(0);
    cdb[0] = 0x88; // READ(16)
    cdb[1] = flags & 0b1111_1001;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&blocks.to_be_bytes());
    cdb[14] = dld & 0b1100_0000;
    cdb[15] = control;
}

/// Build a **SCSI READ LONG(10)** CDB (opcode 0x3E).
///
/// `byte_len` is the transfer length in bytes (not blocks). `correct` sets
/// the CORRCT bit so the device applies its ECC before returning data.
#[inline]
pub fn build_read_long10(
    cdb: &mut [u8; 16],
    lba: u32,
    byte_len: u16,
    correct: bool,
    control: u8,
) {
    cdb.fill(0);
    cdb[0] = 0x3E; // READ LONG(10)
    cdb[1] = if correct { 0x02 } else { 0x00 };
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&byte_len.to_be_bytes());
    cdb[9] = control;
}

/// Build a **SCSI READ LONG(16)** CDB via SERVICE ACTION IN(16)
/// (opcode 0x9E, SA=0x11).
///
/// Layout (SBC):
/// - byte  0      : OPERATION CODE = 0x9E
/// - byte  1      : SERVICE ACTION = 0x11
/// - bytes 2..9   : LBA (big-endian, 64-bit)
/// - bytes 12..13 : BYTE TRANSFER LENGTH
/// - byte  14     : CORRCT in bit 0
/// - byte  15     : CONTROL
#[inline]
pub fn build_read_long16(
    cdb: &mut [u8; 16],
    lba: u64,
    byte_len: u16,
    correct: bool,
    control: u8,
) {
    cdb.fill(0);
    cdb[0] = 0x9E;
    cdb[1] = 0x11;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[12..14].copy_from_slice(&byte_len.to_be_bytes());
    cdb[14] = if correct { 0x01 } else { 0x00 };
    cdb[15] = control;
}
