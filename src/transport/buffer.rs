// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    ops::{Deref, DerefMut, Range},
};

/// Alignment that satisfies O_DIRECT on every common filesystem and device.
pub const DIRECT_ALIGN: usize = 4096;

/// Zero-initialised byte buffer whose first byte sits on an `align`
/// boundary.
///
/// The backing `Vec` is over-allocated by `align` bytes and the visible
/// window starts at the first aligned address, so moving the buffer between
/// owners never changes its alignment.
pub struct AlignedBuf {
    raw: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBuf {
    pub fn zeroed(len: usize, align: usize) -> Self {
        let align = align.max(1);
        let raw = vec![0u8; len + align];
        let offset = match raw.as_ptr().align_offset(align) {
            o if o < align => o,
            _ => 0,
        };
        Self { raw, offset, len }
    }

    /// Buffer with [`DIRECT_ALIGN`] alignment.
    pub fn direct(len: usize) -> Self {
        Self::zeroed(len, DIRECT_ALIGN)
    }

    pub fn is_aligned_to(&self, align: usize) -> bool {
        (self.as_ptr() as usize) % align.max(1) == 0
    }

    /// Shrink the visible window; capacity is kept for reuse.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn zero_range(&mut self, range: Range<usize>) {
        let end = range.end.min(self.len);
        if range.start < end {
            self[range.start..end].fill(0);
        }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.raw[self.offset..self.offset + self.len]
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.raw[self.offset..self.offset + self.len]
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("addr", &format_args!("{:p}", self.as_ptr()))
            .finish()
    }
}
