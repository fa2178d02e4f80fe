// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use tracing::{debug, trace};

use crate::{
    control_block::{
        descriptor::{CommandDescriptor, Opcode},
        read_capacity::{encode_read_capacity10, encode_read_capacity16},
    },
    models::{
        sense_data::{ASC_MEDIUM_MAY_HAVE_CHANGED, SenseData, key},
        status::HostStatus,
    },
    transport::{
        Completed, CompletionRecord, Discipline, Request, SubmitOutcome, Transport,
        backing::{Backing, MemoryBacking},
    },
};

/// How an injected bad block misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumFault {
    /// Fails every access.
    Hard,
    /// Fails the next `n` accesses, then reads back normally.
    Transient(u32),
    /// Fails plain READ; READ LONG with CORRCT returns corrected data.
    NeedsCorrection,
}

/// Device conditions a [`CdbTarget`] reports instead of executing commands.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    medium: BTreeMap<u64, MediumFault>,
    hide_position: bool,
    unit_attentions: u32,
    aborts: u32,
    media_changes: u32,
    timeouts: u32,
    not_ready: bool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn medium_error(mut self, lba: u64, fault: MediumFault) -> Self {
        self.medium.insert(lba, fault);
        self
    }

    /// Medium errors come back without a valid information field.
    pub fn without_position(mut self) -> Self {
        self.hide_position = true;
        self
    }

    /// The next `n` commands fail with UNIT ATTENTION (power on/reset).
    pub fn unit_attentions(mut self, n: u32) -> Self {
        self.unit_attentions = n;
        self
    }

    pub fn aborts(mut self, n: u32) -> Self {
        self.aborts = n;
        self
    }

    /// The next `n` commands fail with "medium may have changed".
    pub fn media_changes(mut self, n: u32) -> Self {
        self.media_changes = n;
        self
    }

    pub fn timeouts(mut self, n: u32) -> Self {
        self.timeouts = n;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.not_ready = true;
        self
    }

    /// First failing LBA within `[start, start+count)`; consumes one
    /// transient failure.
    fn first_bad(&mut self, start: u64, count: u32, writing: bool) -> Option<u64> {
        let end = start.saturating_add(count as u64);
        for (lba, fault) in self.medium.range_mut(start..end) {
            match fault {
                MediumFault::Hard => return Some(*lba),
                MediumFault::Transient(n) if *n > 0 => {
                    *n -= 1;
                    return Some(*lba);
                },
                MediumFault::NeedsCorrection if !writing => return Some(*lba),
                _ => {},
            }
        }
        None
    }
}

/// One command as the target saw it, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedCommand {
    pub opcode: Opcode,
    pub start_block: u64,
    pub block_count: u32,
}

/// Counters shared between a target and whoever inspects it.
#[derive(Debug, Default)]
pub struct TargetStats {
    commands: AtomicU64,
    rejected: AtomicU64,
    max_outstanding: AtomicUsize,
    log: Mutex<Vec<LoggedCommand>>,
}

impl TargetStats {
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Highest number of submitted-but-unpolled commands ever observed.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    /// WRITE and VERIFY commands in the order they reached the target.
    pub fn data_out_log(&self) -> Vec<LoggedCommand> {
        self.log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn note_outstanding(&self, n: usize) {
        self.max_outstanding.fetch_max(n, Ordering::SeqCst);
    }

    fn record(&self, d: &CommandDescriptor) {
        if let Ok(mut g) = self.log.lock() {
            g.push(LoggedCommand {
                opcode: d.opcode(),
                start_block: d.start_block(),
                block_count: d.block_count(),
            });
        }
    }
}

/// Which queued completion [`Transport::poll`] hands back first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionOrder {
    #[default]
    Fifo,
    /// Newest first, so concurrent commands complete out of order.
    Lifo,
}

/// What READ CAPACITY reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityReport {
    /// READ CAPACITY is rejected as an invalid opcode.
    Unsupported,
    /// Fixed size; transfers beyond it fail with LBA out of range.
    Fixed(u64),
    /// Whatever the backing currently stores.
    FromBacking,
}

/// A command device that decodes each CDB and serves it from a
/// [`Backing`], with optional injected faults.
#[derive(Debug)]
pub struct CdbTarget<B> {
    backing: B,
    block_size: u32,
    capacity: CapacityReport,
    discipline: Discipline,
    order: CompletionOrder,
    max_transfer: Option<u32>,
    descriptor_sense: bool,
    faults: FaultPlan,
    queue: VecDeque<Completed>,
    stats: Arc<TargetStats>,
}

impl CdbTarget<MemoryBacking> {
    /// In-memory device of `blocks` blocks filled by `pattern(lba)`.
    pub fn memory(blocks: u64, block_size: u32, pattern: impl Fn(u64) -> u8) -> Self {
        CdbTarget::new(MemoryBacking::from_fn(blocks, block_size, pattern), block_size)
            .with_capacity(CapacityReport::Fixed(blocks))
    }
}

impl<B: Backing> CdbTarget<B> {
    pub fn new(backing: B, block_size: u32) -> Self {
        Self {
            backing,
            block_size,
            capacity: CapacityReport::Unsupported,
            discipline: Discipline::Async,
            order: CompletionOrder::Fifo,
            max_transfer: None,
            descriptor_sense: false,
            faults: FaultPlan::default(),
            queue: VecDeque::new(),
            stats: Arc::new(TargetStats::default()),
        }
    }

    pub fn with_capacity(mut self, capacity: CapacityReport) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_order(mut self, order: CompletionOrder) -> Self {
        self.order = order;
        self
    }

    /// Requests for more than `blocks` blocks are refused at submission.
    pub fn with_max_transfer(mut self, blocks: u32) -> Self {
        self.max_transfer = Some(blocks);
        self
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Report errors in descriptor format.
    pub fn with_descriptor_sense(mut self) -> Self {
        self.descriptor_sense = true;
        self
    }

    pub fn stats(&self) -> Arc<TargetStats> {
        self.stats.clone()
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    fn too_large(&self, req: &Request) -> bool {
        match (self.max_transfer, req.command.descriptor()) {
            (Some(max), Some(d)) => d.block_count() > max,
            _ => false,
        }
    }

    fn reject(&self, req: Request) -> Completed {
        self.stats.rejected.fetch_add(1, Ordering::SeqCst);
        debug!(token = req.token, "target refused oversized request");
        let residual = req.data_len() as u32;
        Completed::new(
            CompletionRecord::host_failure(req.token, HostStatus::OutOfResources, residual),
            req,
        )
    }

    fn sense(&self, sense_key: u8, asc: u8, ascq: u8, info: Option<u64>) -> Vec<u8> {
        match info {
            Some(lba) if self.descriptor_sense || lba > u32::MAX as u64 => {
                SenseData::descriptor(sense_key, asc, ascq, Some(lba))
            },
            Some(lba) => SenseData::fixed(sense_key, asc, ascq, Some(lba as u32)).to_vec(),
            None if self.descriptor_sense => SenseData::descriptor(sense_key, asc, ascq, None),
            None => SenseData::fixed(sense_key, asc, ascq, None).to_vec(),
        }
    }

    fn check(
        &self,
        req: &Request,
        sense_key: u8,
        asc: u8,
        ascq: u8,
        residual: usize,
    ) -> CompletionRecord {
        CompletionRecord::check_condition(
            req.token,
            self.sense(sense_key, asc, ascq, None),
            residual as u32,
        )
    }

    fn medium(&self, req: &Request, asc: u8, lba: u64, residual: usize) -> CompletionRecord {
        let info = (!self.faults.hide_position).then_some(lba);
        CompletionRecord::check_condition(
            req.token,
            self.sense(key::MEDIUM_ERROR, asc, 0x00, info),
            residual as u32,
        )
    }

    fn process(&mut self, mut req: Request) -> Completed {
        self.stats.commands.fetch_add(1, Ordering::SeqCst);
        let all = req.data_len();

        if self.faults.timeouts > 0 {
            self.faults.timeouts -= 1;
            let rec = CompletionRecord::host_failure(req.token, HostStatus::TimedOut, all as u32);
            return Completed::new(rec, req);
        }
        if self.faults.not_ready {
            let rec = self.check(&req, key::NOT_READY, 0x04, 0x00, all);
            return Completed::new(rec, req);
        }
        if self.faults.media_changes > 0 {
            self.faults.media_changes -= 1;
            let rec = self.check(&req, key::UNIT_ATTENTION, ASC_MEDIUM_MAY_HAVE_CHANGED, 0, all);
            return Completed::new(rec, req);
        }
        if self.faults.unit_attentions > 0 {
            self.faults.unit_attentions -= 1;
            let rec = self.check(&req, key::UNIT_ATTENTION, 0x29, 0x00, all);
            return Completed::new(rec, req);
        }
        if self.faults.aborts > 0 {
            self.faults.aborts -= 1;
            let rec = self.check(&req, key::ABORTED_COMMAND, 0x47, 0x00, all);
            return Completed::new(rec, req);
        }

        let cdb = req.command.cdb();
        let rec = match (cdb.first(), cdb.get(1)) {
            (Some(0x25), _) => self.read_capacity(&mut req, false),
            (Some(0x9E), Some(sa)) if sa & 0x1F == 0x10 => self.read_capacity(&mut req, true),
            _ => match CommandDescriptor::decode(&cdb, req.token) {
                Ok(d) => self.transfer(&d, &mut req),
                Err(e) => {
                    debug!("target rejects CDB {}: {e}", hex::encode(&cdb));
                    self.check(&req, key::ILLEGAL_REQUEST, 0x20, 0x00, all)
                },
            },
        };
        trace!(
            token = req.token,
            cmd = req.command.name(),
            status = ?rec.status,
            "target completed"
        );
        Completed::new(rec, req)
    }

    fn read_capacity(&mut self, req: &mut Request, sixteen: bool) -> CompletionRecord {
        let all = req.data_len();
        let blocks = match self.capacity {
            CapacityReport::Unsupported => {
                return self.check(req, key::ILLEGAL_REQUEST, 0x20, 0x00, all);
            },
            CapacityReport::Fixed(n) => n,
            CapacityReport::FromBacking => match self.backing.stored_blocks(self.block_size) {
                Ok(n) => n.unwrap_or(0),
                Err(e) => {
                    return CompletionRecord::host_failure(
                        req.token,
                        HostStatus::Error(e.to_string()),
                        all as u32,
                    );
                },
            },
        };
        let window = req.data.clone();
        let out = &mut req.buf[window];
        let n = if sixteen {
            encode_read_capacity16(out, blocks, self.block_size)
        } else {
            encode_read_capacity10(out, blocks, self.block_size)
        };
        CompletionRecord::good(req.token).with_residual((all - n) as u32)
    }

    fn transfer(&mut self, d: &CommandDescriptor, req: &mut Request) -> CompletionRecord {
        let bs = self.block_size as usize;
        let all = req.data_len();
        if matches!(self.capacity, CapacityReport::Fixed(cap) if d.end_block() > cap) {
            return self.check(req, key::ILLEGAL_REQUEST, 0x21, 0x00, all);
        }

        let start = d.start_block();
        let window = req.data.clone();
        let span = (d.block_count() as usize * bs).min(all);

        match d.opcode() {
            Opcode::Read => {
                let bad = self.faults.first_bad(start, d.block_count(), false);
                let good = bad.map_or(span, |lba| ((lba - start) as usize * bs).min(span));
                let out = &mut req.buf[window.start..window.start + good];
                if let Err(e) = self.backing.read_blocks(start, out, self.block_size) {
                    return io_failure(req, e);
                }
                match bad {
                    Some(lba) => self.medium(req, 0x11, lba, all - good),
                    None => CompletionRecord::good(req.token).with_residual((all - span) as u32),
                }
            },
            Opcode::ReadLong { correct } => {
                let want = (d.long_len() as usize).min(all).min(bs);
                let fault = self.faults.medium.get_mut(&start);
                let outcome = match fault {
                    Some(MediumFault::NeedsCorrection) if correct => Some(true),
                    Some(MediumFault::Hard) | Some(MediumFault::NeedsCorrection) => None,
                    Some(MediumFault::Transient(n)) if *n > 0 => {
                        *n -= 1;
                        None
                    },
                    _ => Some(false),
                };
                let Some(corrected) = outcome else {
                    return self.medium(req, 0x11, start, all);
                };
                let mut block = vec![0u8; bs];
                if let Err(e) = self.backing.read_blocks(start, &mut block, self.block_size) {
                    return io_failure(req, e);
                }
                req.buf[window.start..window.start + want].copy_from_slice(&block[..want]);
                if corrected {
                    let sense = self.sense(key::RECOVERED_ERROR, 0x18, 0x00, Some(start));
                    CompletionRecord::check_condition(req.token, sense, (all - want) as u32)
                } else {
                    CompletionRecord::good(req.token).with_residual((all - want) as u32)
                }
            },
            Opcode::Write => {
                self.stats.record(d);
                let bad = self.faults.first_bad(start, d.block_count(), true);
                let good = bad.map_or(span, |lba| ((lba - start) as usize * bs).min(span));
                let data = &req.buf[window.start..window.start + good];
                if let Err(e) = self.backing.write_blocks(start, data, self.block_size) {
                    return io_failure(req, e);
                }
                match bad {
                    Some(lba) => self.medium(req, 0x0C, lba, all - good),
                    None => CompletionRecord::good(req.token).with_residual((all - span) as u32),
                }
            },
            Opcode::Verify => {
                self.stats.record(d);
                let bad = self.faults.first_bad(start, d.block_count(), false);
                let checked = bad.map_or(span, |lba| ((lba - start) as usize * bs).min(span));
                let mut stored = vec![0u8; checked];
                if let Err(e) = self.backing.read_blocks(start, &mut stored, self.block_size) {
                    return io_failure(req, e);
                }
                let offered = &req.buf[window.start..window.start + checked];
                let mismatch = stored
                    .chunks(bs)
                    .zip(offered.chunks(bs))
                    .position(|(a, b)| a != b);
                if let Some(i) = mismatch {
                    let lba = start + i as u64;
                    let sense = self.sense(key::MISCOMPARE, 0x1D, 0x00, Some(lba));
                    return CompletionRecord::check_condition(req.token, sense, (all - i * bs) as u32);
                }
                match bad {
                    Some(lba) => self.medium(req, 0x11, lba, all - checked),
                    None => CompletionRecord::good(req.token).with_residual((all - span) as u32),
                }
            },
        }
    }
}

fn io_failure(req: &Request, e: std::io::Error) -> CompletionRecord {
    CompletionRecord::host_failure(
        req.token,
        HostStatus::Error(e.to_string()),
        req.data_len() as u32,
    )
}

impl<B: Backing> Transport for CdbTarget<B> {
    fn discipline(&self) -> Discipline {
        self.discipline
    }

    fn max_transfer_blocks(&self) -> Option<u32> {
        self.max_transfer
    }

    async fn execute(&mut self, req: Request) -> Completed {
        if self.too_large(&req) {
            return self.reject(req);
        }
        self.process(req)
    }

    fn submit(&mut self, req: Request) -> SubmitOutcome {
        if self.too_large(&req) {
            return SubmitOutcome::Rejected(Box::new(self.reject(req)));
        }
        let done = self.process(req);
        self.queue.push_back(done);
        self.stats.note_outstanding(self.queue.len());
        SubmitOutcome::Queued
    }

    async fn poll(&mut self) -> Option<Completed> {
        match self.order {
            CompletionOrder::Fifo => self.queue.pop_front(),
            CompletionOrder::Lifo => self.queue.pop_back(),
        }
    }

    fn outstanding(&self) -> usize {
        self.queue.len()
    }

    fn byte_len(&mut self) -> anyhow::Result<Option<u64>> {
        let blocks = match self.capacity {
            CapacityReport::Unsupported => return Ok(None),
            CapacityReport::Fixed(n) => Some(n),
            CapacityReport::FromBacking => self.backing.stored_blocks(self.block_size)?,
        };
        Ok(blocks.map(|b| b * self.block_size as u64))
    }
}
