// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, time::Duration};

use crate::session::exit::{ExitStatus, FatalError};

/// Cumulative transfer statistics of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub in_full: u64,
    pub in_partial: u64,
    pub out_full: u64,
    pub out_partial: u64,
    /// Zero blocks bypassed instead of written.
    pub sparse_skipped: u64,
    pub recovered_errors: u64,
    pub unrecovered_errors: u64,
    pub retries: u64,
    pub residual_sum: u64,
    pub degraded_reads: u64,
    pub miscompares: u64,
    /// Blocks the destination failed on and continue-on-error let go.
    pub out_skipped: u64,
}

impl Counters {
    /// Fold `bytes` read from the source.
    pub fn add_in(&mut self, bytes: usize, block_size: u32) {
        let bs = block_size.max(1) as usize;
        self.in_full += (bytes / bs) as u64;
        self.in_partial += u64::from(bytes % bs != 0);
    }

    /// Fold `bytes` that reached (or were verified against) the destination.
    pub fn add_out(&mut self, bytes: usize, block_size: u32) {
        let bs = block_size.max(1) as usize;
        self.out_full += (bytes / bs) as u64;
        self.out_partial += u64::from(bytes % bs != 0);
    }
}

/// Final (or interim) outcome of a session.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub counters: Counters,
    /// Resolved block count, `None` when the source was read to its end.
    pub requested: Option<u64>,
    pub block_size: u32,
    pub verify: bool,
    pub elapsed: Option<Duration>,
    pub fatal: Option<FatalError>,
    pub interrupted: bool,
    /// Nothing was meant to move.
    pub dry_run: bool,
}

impl TransferReport {
    /// The whole requested range made it through.
    pub fn is_complete(&self) -> bool {
        let c = &self.counters;
        let read = c.in_full + c.in_partial;
        let handed =
            c.out_full + c.out_partial + c.sparse_skipped + c.miscompares + c.out_skipped;
        self.requested.is_none_or(|n| read >= n) && handed >= read
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.interrupted {
            return ExitStatus::Interrupted;
        }
        if let Some(fatal) = &self.fatal {
            return ExitStatus::from(fatal.category);
        }
        if !self.dry_run && !self.is_complete() {
            return ExitStatus::Other;
        }
        ExitStatus::Ok
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "{}+{} records in", c.in_full, c.in_partial)?;
        let out = if self.verify { "verified" } else { "out" };
        writeln!(f, "{}+{} records {out}", c.out_full, c.out_partial)?;
        if c.sparse_skipped > 0 {
            writeln!(f, "{} bypassed records out", c.sparse_skipped)?;
        }
        if c.out_skipped > 0 {
            writeln!(f, "{} skipped records out", c.out_skipped)?;
        }
        if c.recovered_errors > 0 {
            writeln!(f, "{} recovered errors", c.recovered_errors)?;
        }
        if c.unrecovered_errors > 0 {
            writeln!(f, "{} unrecovered errors", c.unrecovered_errors)?;
        }
        if c.retries > 0 {
            writeln!(f, "{} retries", c.retries)?;
        }
        if c.degraded_reads > 0 {
            writeln!(f, "{} degraded reads", c.degraded_reads)?;
        }
        if c.miscompares > 0 {
            writeln!(f, "{} miscompares", c.miscompares)?;
        }
        if let Some(elapsed) = self.elapsed {
            let secs = elapsed.as_secs_f64();
            let bytes = (c.in_full * self.block_size as u64) as f64;
            write!(f, "time to transfer data: {secs:.6} secs")?;
            if secs > 0.0 {
                write!(f, " at {:.2} MB/sec", bytes / secs / 1_000_000.0)?;
            }
            writeln!(f)?;
        }
        if let Some(fatal) = &self.fatal {
            writeln!(f, "stopped: {fatal}")?;
        }
        if self.interrupted {
            writeln!(f, "interrupted")?;
        }
        Ok(())
    }
}
