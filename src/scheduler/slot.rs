// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{recovery::classify::Category, transport::buffer::AlignedBuf};

/// Life cycle of one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Free,
    /// A command for this slot is with a transport.
    Submitted,
    /// Data is in the buffer: read finished, or partly written.
    Completed,
    /// Terminal failure, waiting to be folded and freed.
    Failed,
    /// Needs the same command submitted again.
    WaitingRetry,
}

/// Which half of the copy the slot is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Read,
    Write,
}

/// One outstanding request: a block range of the transfer plus the buffer
/// that carries it from the source to the destination.
#[derive(Debug, Default)]
pub struct Slot {
    pub state: SlotState,
    pub phase: Phase,
    /// First block, counted from the start of the transfer.
    pub start: u64,
    pub blocks: u32,
    /// Leading blocks already handed to the destination.
    pub written: u32,
    /// Bytes of real data, less than `blocks * block_size` after a short
    /// read.
    pub valid_bytes: usize,
    pub buf: Option<AlignedBuf>,
    pub category: Option<Category>,
    pub residual: u32,
    pub media_retry_used: bool,
    pub medium_retries: u32,
}

impl Slot {
    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn is_in_flight(&self, phase: Phase) -> bool {
        self.state == SlotState::Submitted && self.phase == phase
    }

    /// Holds data that still has to go to the destination.
    pub fn is_ready(&self) -> bool {
        self.state == SlotState::Completed && self.written < self.blocks
    }

    /// Block index of the next block to write.
    pub fn write_cursor(&self) -> u64 {
        self.start + self.written as u64
    }

    pub fn end(&self) -> u64 {
        self.start + self.blocks as u64
    }

    /// Take a fresh range for reading, keeping the buffer.
    pub fn assign(&mut self, start: u64, blocks: u32) {
        let buf = self.buf.take();
        *self = Slot {
            phase: Phase::Read,
            start,
            blocks,
            buf,
            ..Slot::default()
        };
    }

    /// Back to the pool; the buffer stays for the next range.
    pub fn release(&mut self) {
        let buf = self.buf.take();
        *self = Slot {
            buf,
            ..Slot::default()
        };
    }
}
