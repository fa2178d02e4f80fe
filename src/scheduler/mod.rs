//! Bounded window of outstanding requests and the rule that picks the next
//! thing to do.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use tracing::trace;

use crate::scheduler::slot::{Phase, Slot, SlotState};

/// Ring slots and their states.
pub mod slot;

/// The next step the session should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit the slot's command again.
    Retry(usize),
    /// Read `blocks` blocks starting at transfer block `start` into `slot`.
    IssueRead { slot: usize, start: u64, blocks: u32 },
    /// Write the next chunk of the slot's data.
    IssueWrite(usize),
    /// Nothing can be issued; wait for a completion.
    Wait,
    Done,
}

/// Ring of `queue_depth` slots plus the read and write cursors.
///
/// Pure bookkeeping: the session performs every I/O and reports back.
#[derive(Debug)]
pub struct Scheduler {
    slots: Vec<Slot>,
    cursor: usize,
    /// Next block never handed to a read.
    next_read: u64,
    /// Exclusive end of the transfer; `None` reads a stream until EOF.
    end: Option<u64>,
    /// Ranges given back after a split or shrink, read before fresh ones.
    pending: BTreeMap<u64, u32>,
    read_chunk: u32,
    write_chunk: u32,
    /// Destination needs strictly increasing, contiguous writes.
    ordered: bool,
    /// Ordered destinations only: next block to write.
    next_write: u64,
    reads_stopped: bool,
    writes_stopped: bool,
}

impl Scheduler {
    pub fn new(queue_depth: usize, blocks_per_transfer: u32, end: Option<u64>, ordered: bool) -> Self {
        let q = queue_depth.max(1);
        Self {
            slots: (0..q).map(|_| Slot::default()).collect(),
            cursor: 0,
            next_read: 0,
            end,
            pending: BTreeMap::new(),
            read_chunk: blocks_per_transfer.max(1),
            write_chunk: blocks_per_transfer.max(1),
            ordered,
            next_write: 0,
            reads_stopped: false,
            writes_stopped: false,
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.slots.len()
    }

    /// Writes allowed in flight at once.
    pub fn write_budget(&self) -> usize {
        let q = self.slots.len();
        q - q / 2
    }

    pub fn slot(&self, i: usize) -> &Slot {
        &self.slots[i]
    }

    pub fn slot_mut(&mut self, i: usize) -> &mut Slot {
        &mut self.slots[i]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    pub fn read_chunk(&self) -> u32 {
        self.read_chunk
    }

    pub fn write_chunk(&self) -> u32 {
        self.write_chunk
    }

    pub fn in_flight(&self, phase: Phase) -> usize {
        self.slots.iter().filter(|s| s.is_in_flight(phase)).count()
    }

    pub fn total_in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Submitted)
            .count()
    }

    /// Slots with read data not yet handed to the destination.
    pub fn undrained(&self) -> usize {
        self.slots.iter().filter(|s| s.is_ready()).count()
    }

    pub fn is_stopping(&self) -> bool {
        self.reads_stopped
    }

    fn phase_stopped(&self, phase: Phase) -> bool {
        match phase {
            Phase::Read => self.reads_stopped,
            Phase::Write => self.writes_stopped,
        }
    }

    fn source_remaining(&self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        self.end.is_none_or(|end| self.next_read < end)
    }

    fn next_range(&self) -> Option<(u64, u32)> {
        if let Some((&start, &blocks)) = self.pending.first_key_value() {
            return Some((start, blocks.min(self.read_chunk)));
        }
        let blocks = match self.end {
            Some(end) if self.next_read >= end => return None,
            Some(end) => (end - self.next_read).min(self.read_chunk as u64) as u32,
            None => self.read_chunk,
        };
        Some((self.next_read, blocks))
    }

    fn free_slot(&self) -> Option<usize> {
        let q = self.slots.len();
        (0..q)
            .map(|k| (self.cursor + k) % q)
            .find(|&i| self.slots[i].is_free())
    }

    fn ready_write(&self) -> Option<usize> {
        if self.ordered {
            if self.in_flight(Phase::Write) > 0 {
                return None;
            }
            return self
                .slots
                .iter()
                .position(|s| s.is_ready() && s.write_cursor() == self.next_write);
        }
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_ready())
            .min_by_key(|(_, s)| s.write_cursor())
            .map(|(i, _)| i)
    }

    /// Pick the next step: retries first, then a read while fewer than half
    /// the slots are reading and the write window is not full, then a write
    /// within the write budget, else wait or finish.
    ///
    /// `Done` with [`Scheduler::undrained`] data left means the data can no
    /// longer be written, which only happens after a stop.
    pub fn next_action(&self) -> Action {
        if let Some(i) = self
            .slots
            .iter()
            .position(|s| s.state == SlotState::WaitingRetry && !self.phase_stopped(s.phase))
        {
            return Action::Retry(i);
        }

        let q = self.slots.len();
        // prefer draining only while a write can actually make progress
        let drain_first = self.undrained() >= self.write_budget()
            && (self.ready_write().is_some() || self.in_flight(Phase::Write) > 0);
        if !self.reads_stopped
            && !drain_first
            && self.in_flight(Phase::Read) * 2 < q
            && self.source_remaining()
            && let (Some(slot), Some((start, blocks))) = (self.free_slot(), self.next_range())
        {
            return Action::IssueRead {
                slot,
                start,
                blocks,
            };
        }

        if !self.writes_stopped
            && self.in_flight(Phase::Write) < self.write_budget()
            && let Some(i) = self.ready_write()
        {
            return Action::IssueWrite(i);
        }

        if self.total_in_flight() > 0 {
            return Action::Wait;
        }
        Action::Done
    }

    /// Claim `slot` for the range returned by [`Action::IssueRead`].
    pub fn begin_read(&mut self, slot: usize, start: u64, blocks: u32) {
        if let Some(len) = self.pending.remove(&start) {
            if len > blocks {
                self.pending.insert(start + blocks as u64, len - blocks);
            }
        } else {
            self.next_read = self.next_read.max(start + blocks as u64);
        }
        self.slots[slot].assign(start, blocks);
        self.cursor = (slot + 1) % self.slots.len();
        trace!(slot, start, blocks, "read claimed");
    }

    pub fn mark_submitted(&mut self, slot: usize, phase: Phase) {
        let s = &mut self.slots[slot];
        s.state = SlotState::Submitted;
        s.phase = phase;
    }

    /// Hand `blocks` blocks from `start` back for a later read.
    pub fn requeue_read(&mut self, start: u64, blocks: u32) {
        if blocks == 0 || self.end.is_some_and(|end| start >= end) {
            return;
        }
        self.pending.insert(start, blocks);
    }

    pub fn set_read_chunk(&mut self, blocks: u32) {
        self.read_chunk = blocks.max(1);
    }

    pub fn set_write_chunk(&mut self, blocks: u32) {
        self.write_chunk = blocks.max(1);
    }

    /// Cut the slot's range down to `blocks`, queueing the rest for reading.
    pub fn shrink_read(&mut self, slot: usize, blocks: u32) {
        let s = &mut self.slots[slot];
        let blocks = blocks.max(1);
        if s.blocks > blocks {
            let (rest_start, rest) = (s.start + blocks as u64, s.blocks - blocks);
            s.blocks = blocks;
            self.requeue_read(rest_start, rest);
        }
    }

    /// The data of `blocks` blocks of the slot reached the destination (or
    /// was deliberately left out). Frees the slot once all of it is gone.
    pub fn advance_write(&mut self, slot: usize, blocks: u32) {
        let s = &mut self.slots[slot];
        s.written = (s.written + blocks).min(s.blocks);
        if self.ordered {
            self.next_write = self.next_write.max(s.write_cursor());
        }
        if s.written >= s.blocks {
            s.release();
        } else {
            s.state = SlotState::Completed;
        }
    }

    /// Nothing at or beyond `block` will be transferred.
    pub fn truncate_end(&mut self, block: u64) {
        let end = self.end.map_or(block, |e| e.min(block));
        self.end = Some(end);
        self.next_read = self.next_read.min(end);
        self.pending.retain(|&start, _| start < end);
        if let Some((&start, len)) = self.pending.iter_mut().next_back()
            && start + *len as u64 > end
        {
            *len = (end - start) as u32;
        }
        for s in &mut self.slots {
            if s.state == SlotState::Submitted || s.is_free() || s.end() <= end {
                continue;
            }
            s.blocks = end.saturating_sub(s.start) as u32;
            if s.written >= s.blocks {
                s.release();
            }
        }
    }

    /// Blocks of a slot range that still lie inside the transfer.
    pub fn clamp(&self, start: u64, blocks: u32) -> u32 {
        match self.end {
            Some(end) if start >= end => 0,
            Some(end) => (end - start).min(blocks as u64) as u32,
            None => blocks,
        }
    }

    /// Stop handing out reads; queued retries of reads are dropped.
    pub fn stop_reads(&mut self) {
        self.reads_stopped = true;
        self.pending.clear();
        for s in &mut self.slots {
            if s.phase == Phase::Read && s.state == SlotState::WaitingRetry {
                s.release();
            }
        }
    }

    /// Stop all new work; data not yet written is dropped.
    pub fn stop_all(&mut self) {
        self.stop_reads();
        self.writes_stopped = true;
        for s in &mut self.slots {
            if matches!(
                s.state,
                SlotState::Completed | SlotState::WaitingRetry | SlotState::Failed
            ) {
                s.release();
            }
        }
    }

    /// The slot's command failed for good; it holds nothing to write and
    /// stays out of the window until released.
    pub fn mark_failed(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        trace!(slot, start = s.start, "slot failed");
        s.state = SlotState::Failed;
    }

    /// Free a slot whose outcome has been folded into the counters.
    pub fn release(&mut self, slot: usize) {
        self.slots[slot].release();
    }
}
