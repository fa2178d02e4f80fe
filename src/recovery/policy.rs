// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tracing::{debug, warn};

use crate::{control_block::descriptor::Opcode, recovery::classify::Category};

pub const DEFAULT_UNIT_ATTENTION_BUDGET: u32 = 10;
pub const DEFAULT_ABORTED_BUDGET: u32 = 256;
pub const DEFAULT_MAX_CONSECUTIVE_BAD: u32 = 100;

/// Which kind of transfer a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Read,
    Write,
    Verify,
}

impl Side {
    pub fn of(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Read | Opcode::ReadLong { .. } => Side::Read,
            Opcode::Write => Side::Write,
            Opcode::Verify => Side::Verify,
        }
    }
}

/// What to do with the failing block of a split request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadBlockAction {
    /// Accept the prefix, then end the session.
    Stop,
    /// Fill the block with zeros and carry on.
    Substitute,
    /// Re-read the block on its own before falling back to zeros; `correct`
    /// asks the device for ECC correction (READ LONG with CORRCT).
    DegradedRead { correct: bool },
    /// Leave the block unwritten and carry on.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The data is good; `recovered` when the device had to work for it.
    Accept { recovered: bool },
    /// Submit the same command again.
    Reissue,
    /// Submit again with at most `blocks` blocks per command.
    Shrink { blocks: u32 },
    /// `good` leading blocks transferred; `bad_lba` failed.
    Split {
        good: u32,
        bad_lba: u64,
        action: BadBlockAction,
    },
    /// No position known: zero-fill (read) or drop (write) the whole request.
    Substitute,
    /// Verify mismatch tolerated; `good` leading blocks compared equal.
    BypassMismatch { good: u32 },
    Fatal { category: Category },
}

/// Facts about the attempt that produced a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub side: Side,
    /// Device LBA of the first block of the request.
    pub start: u64,
    pub blocks: u32,
    pub media_retry_used: bool,
    pub medium_retries: u32,
    pub command_device: bool,
    /// What the transport says it can take per command.
    pub max_transfer: Option<u32>,
}

/// Budgets shared by every request of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyState {
    unit_attention_left: u32,
    aborted_left: u32,
    /// Current run of bad blocks, reads and writes/verifies apart.
    bad_run: [u32; 2],
}

impl PolicyState {
    pub fn unit_attention_left(&self) -> u32 {
        self.unit_attention_left
    }

    pub fn aborted_left(&self) -> u32 {
        self.aborted_left
    }

    /// Bad blocks in a row on `side`, up to the last good one.
    pub fn consecutive_bad(&self, side: Side) -> u32 {
        self.bad_run[run_index(side)]
    }
}

/// Retry and continue-on-error rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Continue-on-error level applied to reads (0..=3).
    pub coe_read: u8,
    /// Continue-on-error level applied to writes and verifies.
    pub coe_write: u8,
    pub unit_attention_budget: u32,
    pub aborted_budget: u32,
    /// Plain re-issues of a request that hit a medium error.
    pub retries: u32,
    /// Bad blocks in a row tolerated with continue-on-error; 0 = no limit.
    pub max_consecutive_bad: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            coe_read: 0,
            coe_write: 0,
            unit_attention_budget: DEFAULT_UNIT_ATTENTION_BUDGET,
            aborted_budget: DEFAULT_ABORTED_BUDGET,
            retries: 0,
            max_consecutive_bad: DEFAULT_MAX_CONSECUTIVE_BAD,
        }
    }
}

impl RetryPolicy {
    /// Same `level` on every side enabled by the read/write mask.
    pub fn with_coe(mut self, level: u8, on_read: bool, on_write: bool) -> Self {
        let level = level.min(3);
        self.coe_read = if on_read { level } else { 0 };
        self.coe_write = if on_write { level } else { 0 };
        self
    }

    pub fn coe(&self, side: Side) -> u8 {
        match side {
            Side::Read => self.coe_read,
            Side::Write | Side::Verify => self.coe_write,
        }
    }

    pub fn initial_state(&self) -> PolicyState {
        PolicyState {
            unit_attention_left: self.unit_attention_budget,
            aborted_left: self.aborted_budget,
            bad_run: [0; 2],
        }
    }

    /// Decide how to continue after `category` for `attempt`.
    ///
    /// Only budgets in `state` change; the caller owns every other effect.
    pub fn decide(
        &self,
        state: &mut PolicyState,
        category: Category,
        attempt: &Attempt,
    ) -> Decision {
        let coe = self.coe(attempt.side);
        let fatal = Decision::Fatal { category };
        match category {
            Category::Clean => Decision::Accept { recovered: false },
            Category::Recovered => Decision::Accept { recovered: true },
            Category::MediaChanged if !attempt.media_retry_used => Decision::Reissue,
            Category::UnitAttention => {
                if state.unit_attention_left == 0 {
                    warn!("unit attention budget exhausted");
                    return fatal;
                }
                state.unit_attention_left -= 1;
                Decision::Reissue
            },
            Category::AbortedCommand => {
                if state.aborted_left == 0 {
                    warn!("aborted command budget exhausted");
                    return fatal;
                }
                state.aborted_left -= 1;
                Decision::Reissue
            },
            Category::SubmissionOutOfResources => {
                let blocks = match attempt.max_transfer {
                    Some(max) if max >= 1 && max < attempt.blocks => max,
                    _ => attempt.blocks / 2,
                };
                if blocks == 0 {
                    return fatal;
                }
                debug!(from = attempt.blocks, to = blocks, "shrinking transfer size");
                Decision::Shrink { blocks }
            },
            Category::MediumErrorWithPosition { .. } | Category::MediumErrorNoPosition
                if attempt.medium_retries < self.retries =>
            {
                Decision::Reissue
            },
            Category::MediumErrorWithPosition { lba } => {
                let good = lba.saturating_sub(attempt.start).min(attempt.blocks as u64) as u32;
                let action = match (attempt.side, coe) {
                    (_, 0) => BadBlockAction::Stop,
                    (Side::Read, 1) => BadBlockAction::Substitute,
                    (Side::Read, level) if attempt.command_device => BadBlockAction::DegradedRead {
                        correct: level >= 3,
                    },
                    (Side::Read, _) => BadBlockAction::Substitute,
                    (Side::Write | Side::Verify, _) => BadBlockAction::Skip,
                };
                Decision::Split {
                    good,
                    bad_lba: lba,
                    action,
                }
            },
            Category::MediumErrorNoPosition if coe >= 1 => Decision::Substitute,
            Category::Miscompare { lba } if coe >= 1 && attempt.side == Side::Verify => {
                let good = lba.map_or(0, |l| {
                    l.saturating_sub(attempt.start).min(attempt.blocks as u64) as u32
                });
                Decision::BypassMismatch { good }
            },
            _ => fatal,
        }
    }

    /// Record a block given up on by `side`. Returns `false` once that
    /// side's run of bad blocks exceeds the limit.
    pub fn note_bad_block(&self, state: &mut PolicyState, side: Side) -> bool {
        let run = &mut state.bad_run[run_index(side)];
        *run += 1;
        self.max_consecutive_bad == 0 || *run <= self.max_consecutive_bad
    }

    /// A block of `side` went through; its bad run is over.
    pub fn note_good_block(&self, state: &mut PolicyState, side: Side) {
        state.bad_run[run_index(side)] = 0;
    }
}

fn run_index(side: Side) -> usize {
    match side {
        Side::Read => 0,
        Side::Write | Side::Verify => 1,
    }
}
