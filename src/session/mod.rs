//! One copy (or verify) from a source endpoint to a destination endpoint.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    cfg::config::Config,
    control_block::descriptor::{AddressingWidth, CdbError, CdbFlags, CommandDescriptor, Opcode},
    endpoint::{self, Endpoint, EndpointKind, OpenFlags, Role},
    models::{
        sense_data::{SenseData, asc_ascq_to_str},
        status::HostStatus,
    },
    recovery::{
        classify::{Category, classify},
        policy::{Attempt, BadBlockAction, Decision, PolicyState, RetryPolicy, Side},
    },
    scheduler::{
        Action, Scheduler,
        slot::{Phase, SlotState},
    },
    session::{
        counters::{Counters, TransferReport},
        exit::{FatalError, SessionError},
        resolve::resolve_count,
    },
    state_machine::transfer_states::SessionStates,
    transport::{
        Command, Completed, CompletionRecord, Discipline, Request, SubmitOutcome, Transport, any::AnyTransport,
        buffer::AlignedBuf, token::TokenSource,
    },
    utils::{leading_data_blocks, leading_zero_blocks},
};

/// Statistics, report and exit status.
pub mod counters;
/// Exit codes and session-level errors.
pub mod exit;
/// Transfer length resolution.
pub mod resolve;

/// Per-side command options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideOptions {
    /// Preferred CDB size for command devices; widened when a command does
    /// not fit.
    pub width: AddressingWidth,
    pub flags: CdbFlags,
}

impl Default for SideOptions {
    fn default() -> Self {
        Self {
            width: AddressingWidth::W10,
            flags: CdbFlags::empty(),
        }
    }
}

/// Everything a session needs to know besides its endpoints.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub block_size: u32,
    pub blocks_per_transfer: u32,
    pub queue_depth: usize,
    /// Source block where the transfer starts.
    pub skip: u64,
    /// Destination block where the transfer starts.
    pub seek: u64,
    /// `None` resolves the length from the endpoints.
    pub count: Option<u64>,
    /// Send VERIFY with the source data instead of WRITE.
    pub verify: bool,
    pub sparse: bool,
    pub dry_run: bool,
    pub show_time: bool,
    pub input: SideOptions,
    pub output: SideOptions,
    pub policy: RetryPolicy,
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            blocks_per_transfer: 128,
            queue_depth: 4,
            skip: 0,
            seek: 0,
            count: None,
            verify: false,
            sparse: false,
            dry_run: false,
            show_time: false,
            input: SideOptions::default(),
            output: SideOptions::default(),
            policy: RetryPolicy::default(),
            timeout: endpoint::DEFAULT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let t = &cfg.transfer;
        let r = &cfg.recovery;
        let side = |s: &crate::cfg::config::EndpointConfig| {
            let mut flags = CdbFlags::empty();
            flags.set(CdbFlags::FUA, s.fua.as_bool());
            flags.set(CdbFlags::DPO, s.dpo.as_bool());
            SideOptions {
                width: AddressingWidth::from_len(s.cdb_size).unwrap_or(AddressingWidth::W10),
                flags,
            }
        };
        Self {
            block_size: t.block_size,
            blocks_per_transfer: t.blocks_per_transfer,
            queue_depth: t.queue_depth as usize,
            skip: t.skip,
            seek: t.seek,
            count: u64::try_from(t.count).ok(),
            verify: t.verify.as_bool(),
            sparse: t.sparse.as_bool(),
            dry_run: t.dry_run.as_bool(),
            show_time: t.show_time.as_bool(),
            input: side(&cfg.input),
            output: side(&cfg.output),
            policy: RetryPolicy {
                unit_attention_budget: r.unit_attention_budget,
                aborted_budget: r.aborted_budget,
                retries: r.retries,
                max_consecutive_bad: r.max_consecutive_bad,
                ..RetryPolicy::default()
            }
            .with_coe(
                r.continue_on_error,
                r.coe_on_read.as_bool(),
                r.coe_on_write.as_bool(),
            ),
            timeout: cfg.runtime.command_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let bad = |m: &str| Err(SessionError::Config(m.to_string()));
        if self.block_size == 0 {
            return bad("block size must be positive");
        }
        if self.blocks_per_transfer == 0 {
            return bad("blocks per transfer must be positive");
        }
        if self.queue_depth == 0 {
            return bad("queue depth must be positive");
        }
        for side in [&self.input, &self.output] {
            if side.width == AddressingWidth::W6 && !side.flags.is_empty() {
                return bad("6-byte CDBs carry no FUA/DPO bits");
            }
        }
        Ok(())
    }
}

/// Bounded pipeline that moves blocks from `src` to `dst`.
#[derive(Debug)]
pub struct TransferSession<S, D> {
    pub(crate) cfg: SessionConfig,
    pub(crate) src: Endpoint<S>,
    pub(crate) dst: Endpoint<D>,
    tokens: TokenSource,
    pub(crate) sched: Scheduler,
    inflight: HashMap<u64, (usize, Phase)>,
    policy: RetryPolicy,
    policy_state: PolicyState,
    counters: Counters,
    requested: Option<u64>,
    fatal: Option<FatalError>,
    interrupted: bool,
    /// Highest destination block bypassed by sparse mode.
    last_bypass: Option<u64>,
    /// One past the highest destination block written.
    written_end: u64,
    started: Option<Instant>,
    elapsed: Option<Duration>,
    pub(crate) cancel: CancellationToken,
    progress: Arc<Notify>,
    pub(crate) state: Option<SessionStates>,
}

/// Submit `req` the way the endpoint's transport wants it. Returns the
/// completion right away for synchronous transports and refusals.
async fn dispatch<T: Transport>(ep: &mut Endpoint<T>, req: Request) -> Option<Completed> {
    let t = ep.transport_mut();
    match t.discipline() {
        Discipline::Sync => Some(t.execute(req).await),
        Discipline::Async => match t.submit(req) {
            SubmitOutcome::Queued => None,
            SubmitOutcome::Rejected(done) => Some(*done),
        },
    }
}

/// Host failure or decoded sense of a failed command, for the report.
fn failure_detail(record: &CompletionRecord) -> Option<String> {
    if record.host != HostStatus::Ok {
        return Some(record.host.to_string());
    }
    let sense = SenseData::parse(&record.sense).ok()?;
    Some(format!(
        "sense key {:#x}: {}",
        sense.sense_key,
        asc_ascq_to_str(sense.asc, sense.ascq)
    ))
}

enum Woke {
    Done(Completed),
    Cancelled,
    Progress,
    Idle,
}

impl<S: Transport, D: Transport> TransferSession<S, D> {
    pub fn new(cfg: SessionConfig, src: Endpoint<S>, dst: Endpoint<D>) -> Self {
        let ordered = !dst.is_seekable();
        let sched = Scheduler::new(cfg.queue_depth, cfg.blocks_per_transfer, None, ordered);
        let policy = cfg.policy.clone();
        let policy_state = policy.initial_state();
        Self {
            cfg,
            src,
            dst,
            tokens: TokenSource::new(),
            sched,
            inflight: HashMap::new(),
            policy,
            policy_state,
            counters: Counters::default(),
            requested: None,
            fatal: None,
            interrupted: false,
            last_bypass: None,
            written_end: 0,
            started: None,
            elapsed: None,
            cancel: CancellationToken::new(),
            progress: Arc::new(Notify::new()),
            state: Some(SessionStates::default()),
        }
    }

    /// Notify this to get interim statistics on stderr.
    pub fn progress_handle(&self) -> Arc<Notify> {
        self.progress.clone()
    }

    pub fn tokens(&self) -> &TokenSource {
        &self.tokens
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn source(&self) -> &Endpoint<S> {
        &self.src
    }

    pub fn destination(&self) -> &Endpoint<D> {
        &self.dst
    }

    pub fn into_endpoints(self) -> (Endpoint<S>, Endpoint<D>) {
        (self.src, self.dst)
    }

    pub fn report(&self) -> TransferReport {
        let elapsed = self
            .elapsed
            .or_else(|| self.started.map(|t| t.elapsed()))
            .filter(|_| self.cfg.show_time);
        TransferReport {
            counters: self.counters.clone(),
            requested: self.requested,
            block_size: self.cfg.block_size,
            verify: self.cfg.verify,
            elapsed,
            fatal: self.fatal.clone(),
            interrupted: self.interrupted,
            dry_run: self.cfg.dry_run,
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.interrupted || self.fatal.is_some()
    }

    /// Resolve the length and position both endpoints.
    pub(crate) async fn prepare(&mut self) -> Result<(), SessionError> {
        self.cfg.validate()?;
        let count = resolve_count(
            &mut self.src,
            &mut self.dst,
            self.cfg.skip,
            self.cfg.seek,
            self.cfg.count,
            &self.tokens,
        )
        .await?;
        self.requested = count;
        if let Some(n) = count {
            self.sched.truncate_end(n);
        }
        info!(
            count = ?count,
            skip = self.cfg.skip,
            seek = self.cfg.seek,
            bs = self.cfg.block_size,
            bpt = self.cfg.blocks_per_transfer,
            q = self.cfg.queue_depth,
            input = self.src.kind().name(),
            output = self.dst.kind().name(),
            "transfer resolved"
        );
        self.src.seek(self.cfg.skip).await?;
        self.dst.seek(self.cfg.seek).await?;
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Carry out one scheduler action. Returns `false` when nothing is
    /// left to do.
    pub(crate) async fn step(&mut self) -> bool {
        if !self.interrupted && self.cancel.is_cancelled() {
            self.interrupt();
        }
        match self.sched.next_action() {
            Action::Retry(i) => match self.sched.slot(i).phase {
                Phase::Read => self.issue_read(i).await,
                Phase::Write => self.issue_write(i).await,
            },
            Action::IssueRead {
                slot,
                start,
                blocks,
            } => {
                self.sched.begin_read(slot, start, blocks);
                self.issue_read(slot).await;
            },
            Action::IssueWrite(i) => self.issue_write(i).await,
            Action::Wait => self.wait_one().await,
            Action::Done => {
                if self.sched.undrained() > 0 && !self.is_stopping() {
                    error!(slots = self.sched.undrained(), "data left that cannot be written");
                    self.fail("write", self.cfg.seek, Category::Other, None);
                }
                return false;
            },
        }
        true
    }

    /// Stop new work after a cancellation; in-flight commands still drain.
    pub(crate) fn interrupt(&mut self) {
        if self.interrupted {
            return;
        }
        warn!(
            in_flight = self.sched.total_in_flight(),
            "interrupted, draining in-flight commands"
        );
        self.interrupted = true;
        self.sched.stop_all();
    }

    fn fail(&mut self, op: &'static str, block: u64, category: Category, detail: Option<String>) {
        error!(op, block, category = category.name(), detail = ?detail, "fatal error");
        if self.fatal.is_none() {
            self.fatal = Some(FatalError {
                op,
                block,
                category,
                detail,
            });
        }
    }

    fn descriptor(
        &self,
        side: Side,
        opcode: Opcode,
        lba: u64,
        blocks: u32,
        token: u64,
    ) -> Result<CommandDescriptor, CdbError> {
        let (command_device, opts) = match side {
            Side::Read => (self.src.is_command_device(), self.cfg.input),
            Side::Write | Side::Verify => (self.dst.is_command_device(), self.cfg.output),
        };
        if !command_device {
            return CommandDescriptor::build(
                opcode,
                AddressingWidth::W16,
                lba,
                blocks,
                CdbFlags::empty(),
                token,
            );
        }
        let mut width = opts.width;
        let mut flags = opts.flags;
        if opcode == Opcode::Verify {
            flags.remove(CdbFlags::FUA);
            width = width.max(AddressingWidth::W10);
        }
        let width = width.escalate(lba + blocks.max(1) as u64 - 1, blocks);
        CommandDescriptor::build(opcode, width, lba, blocks, flags, token)
    }

    fn take_buf(&mut self, i: usize) -> AlignedBuf {
        let len = self.cfg.blocks_per_transfer as usize * self.cfg.block_size as usize;
        self.sched
            .slot_mut(i)
            .buf
            .take()
            .filter(|b| b.len() >= len)
            .unwrap_or_else(|| AlignedBuf::direct(len))
    }

    async fn issue_read(&mut self, i: usize) {
        let (start, blocks) = {
            let s = self.sched.slot(i);
            (s.start, s.blocks)
        };
        let lba = self.cfg.skip + start;
        let token = self.tokens.next_token();
        let desc = match self.descriptor(Side::Read, Opcode::Read, lba, blocks, token) {
            Ok(d) => d,
            Err(e) => {
                self.fail("read", lba, Category::Other, Some(e.to_string()));
                self.sched.truncate_end(start);
                self.sched.stop_reads();
                self.sched.release(i);
                return;
            },
        };
        let buf = self.take_buf(i);
        let len = blocks as usize * self.cfg.block_size as usize;
        let req = Request::new(token, Command::Transfer(desc), buf, self.cfg.timeout)
            .with_data(0..len);
        self.inflight.insert(token, (i, Phase::Read));
        self.sched.mark_submitted(i, Phase::Read);
        trace!(token, slot = i, lba, blocks, "read submitted");
        if let Some(done) = dispatch(&mut self.src, req).await {
            self.complete(done).await;
        }
    }

    /// Hand the next chunk of slot `i` to the destination. In sparse mode
    /// leading zero blocks are bypassed without any I/O.
    async fn issue_write(&mut self, i: usize) {
        let bs = self.cfg.block_size as usize;
        let sparse = self.cfg.sparse && !self.cfg.verify && self.dst.is_seekable();
        loop {
            let s = self.sched.slot(i);
            if s.is_free() {
                return;
            }
            let (start, written, blocks) = (s.start, s.written, s.blocks);
            let from = written as usize * bs;
            let to = (blocks as usize * bs).min(s.valid_bytes);
            let Some(buf) = s.buf.as_ref().filter(|_| from < to) else {
                self.sched.advance_write(i, blocks.saturating_sub(written));
                return;
            };
            let first = self.cfg.seek + start + written as u64;

            if sparse {
                let zeros = leading_zero_blocks(&buf[from..to], bs) as u32;
                if zeros > 0 {
                    trace!(lba = first, blocks = zeros, "sparse bypass");
                    self.counters.sparse_skipped += zeros as u64;
                    self.last_bypass = self.last_bypass.max(Some(first + zeros as u64 - 1));
                    self.sched.advance_write(i, zeros);
                    continue;
                }
            }

            let limit = self.sched.write_chunk() as usize;
            let n = if sparse {
                leading_data_blocks(&buf[from..to], bs, limit)
            } else {
                (to - from).div_ceil(bs).min(limit)
            } as u32;
            // command devices always move whole blocks
            let end = if self.dst.is_command_device() {
                from + n as usize * bs
            } else {
                (from + n as usize * bs).min(to)
            };

            let token = self.tokens.next_token();
            let (side, opcode) = if self.cfg.verify {
                (Side::Verify, Opcode::Verify)
            } else {
                (Side::Write, Opcode::Write)
            };
            let desc = match self.descriptor(side, opcode, first, n, token) {
                Ok(d) => d,
                Err(e) => {
                    self.fail(opcode.name(), first, Category::Other, Some(e.to_string()));
                    self.sched.stop_all();
                    self.sched.release(i);
                    return;
                },
            };
            let buf = self.take_buf(i);
            let req = Request::new(token, Command::Transfer(desc), buf, self.cfg.timeout)
                .with_data(from..end);
            self.written_end = self.written_end.max(first + n as u64);
            self.inflight.insert(token, (i, Phase::Write));
            self.sched.mark_submitted(i, Phase::Write);
            trace!(token, slot = i, lba = first, blocks = n, "{} submitted", opcode.name());
            if let Some(done) = dispatch(&mut self.dst, req).await {
                self.complete(done).await;
            }
            return;
        }
    }

    /// Wait for whichever comes first: a completion from either side, the
    /// cancellation or a progress request.
    async fn wait_one(&mut self) {
        let src_busy = self.src.transport().outstanding() > 0;
        let dst_busy = self.dst.transport().outstanding() > 0;
        if !src_busy && !dst_busy {
            error!(lost = self.inflight.len(), "in-flight commands vanished");
            self.fail("wait", 0, Category::Other, Some("completions lost".to_string()));
            for (_, (i, _)) in self.inflight.drain() {
                self.sched.release(i);
            }
            self.sched.stop_all();
            return;
        }

        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        let watching = !self.interrupted;
        let src = self.src.transport_mut();
        let dst = self.dst.transport_mut();
        let woke = tokio::select! {
            Some(done) = src.poll(), if src_busy => Woke::Done(done),
            Some(done) = dst.poll(), if dst_busy => Woke::Done(done),
            _ = cancel.cancelled(), if watching => Woke::Cancelled,
            _ = progress.notified() => Woke::Progress,
            else => Woke::Idle,
        };

        match woke {
            Woke::Done(done) => self.complete(done).await,
            Woke::Cancelled => self.interrupt(),
            Woke::Progress => eprint!("{}", self.report()),
            Woke::Idle => {},
        }
    }

    async fn complete(&mut self, done: Completed) {
        let token = done.record.token;
        let Some((i, phase)) = self.inflight.remove(&token) else {
            warn!(token, "completion for an unknown token dropped");
            return;
        };
        match phase {
            Phase::Read => self.read_done(i, done).await,
            Phase::Write => self.write_done(i, done),
        }
    }

    fn attempt(&self, i: usize, side: Side, desc: &CommandDescriptor) -> Attempt {
        let s = self.sched.slot(i);
        let (command_device, max_transfer) = match side {
            Side::Read => (
                self.src.is_command_device(),
                self.src.transport().max_transfer_blocks(),
            ),
            Side::Write | Side::Verify => (
                self.dst.is_command_device(),
                self.dst.transport().max_transfer_blocks(),
            ),
        };
        Attempt {
            side,
            start: desc.start_block(),
            blocks: desc.block_count(),
            media_retry_used: s.media_retry_used,
            medium_retries: s.medium_retries,
            command_device,
            max_transfer,
        }
    }

    fn mark_retry(&mut self, i: usize, category: Category) {
        self.counters.retries += 1;
        let s = self.sched.slot_mut(i);
        match category {
            Category::MediaChanged => s.media_retry_used = true,
            Category::MediumErrorWithPosition { .. } | Category::MediumErrorNoPosition => {
                s.medium_retries += 1
            },
            _ => {},
        }
        s.state = SlotState::WaitingRetry;
        debug!(slot = i, category = category.name(), "re-issuing");
    }

    /// Count a block given up on; past the limit the session stops after
    /// transfer block `stop_at`.
    fn bad_block(
        &mut self,
        side: Side,
        op: &'static str,
        lba: u64,
        category: Category,
        stop_at: u64,
    ) {
        self.counters.unrecovered_errors += 1;
        if !self.policy.note_bad_block(&mut self.policy_state, side) {
            self.fail(
                op,
                lba,
                category,
                Some(format!(
                    "more than {} consecutive bad blocks",
                    self.policy.max_consecutive_bad
                )),
            );
            self.sched.truncate_end(stop_at);
            self.sched.stop_reads();
        }
    }

    fn set_ready(&mut self, i: usize, blocks: u32, valid_bytes: usize) {
        let s = self.sched.slot_mut(i);
        s.blocks = blocks;
        s.valid_bytes = valid_bytes;
        s.state = if blocks == 0 {
            SlotState::Free
        } else {
            SlotState::Completed
        };
        if blocks == 0 {
            s.release();
        }
    }

    async fn read_done(&mut self, i: usize, done: Completed) {
        let Completed { record, request } = done;
        let bs = self.cfg.block_size;
        let bsz = bs as usize;
        let (start, blocks) = {
            let s = self.sched.slot_mut(i);
            s.buf = Some(request.buf);
            s.residual = record.residual;
            (s.start, s.blocks)
        };
        let Some(desc) = request.command.descriptor() else {
            self.sched.release(i);
            return;
        };

        let keep = self.sched.clamp(start, blocks);
        if keep == 0 || self.interrupted {
            trace!(start, "read outside the transfer dropped");
            self.sched.release(i);
            return;
        }

        let category = classify(&record, &request.command);
        self.sched.slot_mut(i).category = Some(category);
        let attempt = self.attempt(i, Side::Read, desc);
        let decision = self
            .policy
            .decide(&mut self.policy_state, category, &attempt);

        match decision {
            Decision::Accept { recovered } => {
                if recovered {
                    self.counters.recovered_errors += 1;
                    info!(lba = desc.start_block(), "recovered read error");
                }
                self.counters.residual_sum += record.residual as u64;
                self.policy.note_good_block(&mut self.policy_state, Side::Read);
                let want = keep as usize * bsz;
                let got = (blocks as usize * bsz)
                    .saturating_sub(record.residual as usize)
                    .min(want);
                self.counters.add_in(got, bs);
                let mut have = keep;
                if got < want {
                    have = got.div_ceil(bsz) as u32;
                    info!(block = start + have as u64, "input ended");
                    self.sched.truncate_end(start + have as u64);
                    if self.dst.is_command_device()
                        && let Some(buf) = self.sched.slot_mut(i).buf.as_mut()
                    {
                        buf.zero_range(got..have as usize * bsz);
                    }
                }
                self.set_ready(i, have, got);
            },
            Decision::Reissue if !self.sched.is_stopping() => self.mark_retry(i, category),
            Decision::Shrink { blocks: n } if !self.sched.is_stopping() => {
                info!(from = blocks, to = n, "input transfer size reduced");
                self.sched.set_read_chunk(n);
                self.sched.shrink_read(i, n);
                self.sched.slot_mut(i).state = SlotState::WaitingRetry;
            },
            Decision::Reissue | Decision::Shrink { .. } => self.sched.release(i),
            Decision::Split {
                good,
                bad_lba,
                action,
            } => {
                let good = good.min(keep);
                self.counters.add_in(good as usize * bsz, bs);
                if good > 0 {
                    self.policy.note_good_block(&mut self.policy_state, Side::Read);
                }
                if good >= keep {
                    self.set_ready(i, keep, keep as usize * bsz);
                    return;
                }
                match action {
                    BadBlockAction::Substitute | BadBlockAction::DegradedRead { .. } => {
                        let recovered = match action {
                            BadBlockAction::DegradedRead { correct } => {
                                self.degraded_read(bad_lba, correct).await
                            },
                            _ => None,
                        };
                        let off = good as usize * bsz;
                        if let Some(buf) = self.sched.slot_mut(i).buf.as_mut() {
                            match &recovered {
                                Some(data) => buf[off..off + bsz].copy_from_slice(&data[..bsz]),
                                None => buf.zero_range(off..off + bsz),
                            }
                        }
                        if recovered.is_some() {
                            info!(lba = bad_lba, "block recovered by a degraded re-read");
                            self.counters.degraded_reads += 1;
                            self.counters.recovered_errors += 1;
                            self.policy.note_good_block(&mut self.policy_state, Side::Read);
                        } else {
                            warn!(lba = bad_lba, "unreadable block replaced with zeros");
                            let stop_at = start + good as u64 + 1;
                            self.bad_block(Side::Read, "read", bad_lba, category, stop_at);
                        }
                        self.counters.in_full += 1;
                        let next = start + good as u64 + 1;
                        self.sched.requeue_read(next, keep - good - 1);
                        self.set_ready(i, good + 1, (good as usize + 1) * bsz);
                    },
                    BadBlockAction::Stop | BadBlockAction::Skip => {
                        self.fail("read", bad_lba, category, failure_detail(&record));
                        self.sched.truncate_end(start + good as u64);
                        self.sched.stop_reads();
                        self.set_ready(i, good, good as usize * bsz);
                    },
                }
            },
            Decision::Substitute => {
                warn!(
                    lba = desc.start_block(),
                    blocks = keep,
                    "unreadable range replaced with zeros"
                );
                if let Some(buf) = self.sched.slot_mut(i).buf.as_mut() {
                    buf.zero_range(0..keep as usize * bsz);
                }
                self.counters.add_in(keep as usize * bsz, bs);
                self.bad_block(
                    Side::Read,
                    "read",
                    desc.start_block(),
                    category,
                    start + keep as u64,
                );
                self.set_ready(i, keep, keep as usize * bsz);
            },
            Decision::Fatal { category } => {
                self.sched.mark_failed(i);
                self.fail(
                    "read",
                    desc.start_block(),
                    category,
                    failure_detail(&record),
                );
                self.sched.truncate_end(start);
                self.sched.stop_reads();
                self.sched.release(i);
            },
            Decision::BypassMismatch { .. } => {
                self.sched.mark_failed(i);
                self.fail("read", desc.start_block(), category, failure_detail(&record));
                self.sched.truncate_end(start);
                self.sched.stop_reads();
                self.sched.release(i);
            },
        }
    }

    /// Single-block READ LONG of `lba`, asking for on-device correction when
    /// `correct`. Falls back to a plain READ when the block size does not fit
    /// the byte length field.
    async fn degraded_read(&mut self, lba: u64, correct: bool) -> Option<Vec<u8>> {
        let bs = self.cfg.block_size as usize;
        let token = self.tokens.next_token();
        let width = if lba > u32::MAX as u64 {
            AddressingWidth::W16
        } else {
            AddressingWidth::W10
        };
        let desc = match u16::try_from(bs) {
            Ok(len) => CommandDescriptor::read_long(width, lba, len, correct, token),
            _ => self.descriptor(Side::Read, Opcode::Read, lba, 1, token),
        }
        .ok()?;
        let req = Request::new(
            token,
            Command::Transfer(desc),
            AlignedBuf::direct(bs),
            self.cfg.timeout,
        );
        let done = self.src.transport_mut().execute(req).await;
        let category = classify(&done.record, &done.request.command);
        if !category.is_success() || done.record.residual != 0 {
            debug!(lba, category = category.name(), "degraded re-read failed");
            return None;
        }
        Some(done.request.buf[..bs].to_vec())
    }

    fn write_done(&mut self, i: usize, done: Completed) {
        let Completed { record, request } = done;
        let bs = self.cfg.block_size;
        let bsz = bs as usize;
        let bytes = request.data_len();
        self.sched.slot_mut(i).buf = Some(request.buf);
        let Some(desc) = request.command.descriptor() else {
            self.sched.release(i);
            return;
        };
        let n = desc.block_count();
        let side = Side::of(desc.opcode());
        let op = desc.opcode().name();

        let category = classify(&record, &request.command);
        self.sched.slot_mut(i).category = Some(category);
        let attempt = self.attempt(i, side, desc);
        let decision = self
            .policy
            .decide(&mut self.policy_state, category, &attempt);

        match decision {
            Decision::Accept { recovered } => {
                if recovered {
                    self.counters.recovered_errors += 1;
                    info!(lba = desc.start_block(), "recovered {op} error");
                }
                self.counters.residual_sum += record.residual as u64;
                let moved = bytes.saturating_sub(record.residual as usize);
                self.counters.add_out(moved, bs);
                if n > 0 {
                    self.policy.note_good_block(&mut self.policy_state, side);
                }
                self.sched.advance_write(i, n);
            },
            Decision::Reissue if !self.interrupted => self.mark_retry(i, category),
            Decision::Shrink { blocks } if !self.interrupted => {
                info!(from = n, to = blocks, "output transfer size reduced");
                self.sched.set_write_chunk(blocks);
                self.sched.slot_mut(i).state = SlotState::WaitingRetry;
            },
            Decision::Reissue | Decision::Shrink { .. } => self.sched.release(i),
            Decision::Split {
                good,
                bad_lba,
                action,
            } => {
                self.counters.add_out(good as usize * bsz, bs);
                if good > 0 {
                    self.policy.note_good_block(&mut self.policy_state, side);
                }
                match action {
                    BadBlockAction::Stop => {
                        self.sched.mark_failed(i);
                        self.fail(op, bad_lba, category, failure_detail(&record));
                        self.sched.stop_all();
                        self.sched.release(i);
                    },
                    _ => {
                        warn!(lba = bad_lba, "{op} failed, block skipped");
                        self.counters.out_skipped += 1;
                        let stop_at = self.sched.slot(i).write_cursor() + good as u64 + 1;
                        self.bad_block(side, op, bad_lba, category, stop_at);
                        self.sched.advance_write(i, good + 1);
                    },
                }
            },
            Decision::Substitute => {
                warn!(lba = desc.start_block(), blocks = n, "{op} failed, range skipped");
                self.counters.out_skipped += n as u64;
                let stop_at = self.sched.slot(i).write_cursor() + n as u64;
                self.bad_block(side, op, desc.start_block(), category, stop_at);
                self.sched.advance_write(i, n);
            },
            Decision::BypassMismatch { good } => {
                let good = good.min(n);
                self.counters.add_out(good as usize * bsz, bs);
                if good > 0 {
                    self.policy.note_good_block(&mut self.policy_state, side);
                }
                self.counters.miscompares += 1;
                warn!(lba = desc.start_block() + good as u64, "miscompare bypassed");
                self.sched.advance_write(i, (good + 1).min(n));
            },
            Decision::Fatal { category } => {
                self.sched.mark_failed(i);
                self.fail(op, desc.start_block(), category, failure_detail(&record));
                self.sched.stop_all();
                self.sched.release(i);
            },
        }
    }

    /// When the last output blocks were bypassed, write one zero block at
    /// the end so a regular file gets its full length.
    pub(crate) async fn extend_after_sparse(&mut self) {
        let Some(lba) = self.last_bypass else {
            return;
        };
        if self.dst.kind() != EndpointKind::RegularFile || self.written_end > lba {
            return;
        }
        let bs = self.cfg.block_size as usize;
        let token = self.tokens.next_token();
        let desc = match self.descriptor(Side::Write, Opcode::Write, lba, 1, token) {
            Ok(d) => d,
            Err(e) => {
                warn!("cannot extend output: {e}");
                return;
            },
        };
        let req = Request::new(
            token,
            Command::Transfer(desc),
            AlignedBuf::direct(bs),
            self.cfg.timeout,
        );
        let done = self.dst.transport_mut().execute(req).await;
        match classify(&done.record, &done.request.command) {
            c if c.is_success() => debug!(lba, "output extended past bypassed blocks"),
            c => warn!(lba, category = c.name(), "failed to extend output"),
        }
    }

    pub(crate) fn finish(&mut self) -> TransferReport {
        self.elapsed = self.started.map(|t| t.elapsed());
        let report = self.report();
        info!(
            records_in = report.counters.in_full,
            records_out = report.counters.out_full,
            exit = report.exit_status().code(),
            "transfer finished"
        );
        report
    }
}

/// Open both endpoints named in `cfg` and build a session over them.
pub fn open_from_config(
    cfg: &Config,
) -> Result<TransferSession<AnyTransport, AnyTransport>, SessionError> {
    let session_cfg = SessionConfig::from_config(cfg);
    session_cfg.validate()?;
    let bs = session_cfg.block_size;
    let src = endpoint::open(&cfg.input.path, Role::Source, open_flags(&cfg.input), bs)?
        .with_timeout(session_cfg.timeout);
    let dst = endpoint::open(
        &cfg.output.path,
        Role::Destination,
        open_flags(&cfg.output),
        bs,
    )?
    .with_timeout(session_cfg.timeout);
    Ok(TransferSession::new(session_cfg, src, dst))
}

fn open_flags(side: &crate::cfg::config::EndpointConfig) -> OpenFlags {
    let mut flags = OpenFlags::empty();
    flags.set(OpenFlags::DIRECT, side.direct.as_bool());
    flags.set(OpenFlags::EXCLUSIVE, side.exclusive.as_bool());
    flags.set(OpenFlags::SYNC, side.sync.as_bool());
    flags.set(OpenFlags::APPEND, side.append.as_bool());
    flags.set(OpenFlags::NO_CREATE, side.no_create.as_bool());
    flags.set(OpenFlags::FORCE_RAW, side.force_raw.as_bool());
    flags
}
