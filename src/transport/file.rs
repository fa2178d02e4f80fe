// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::{HashMap, VecDeque},
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    os::unix::fs::FileExt,
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::{
    task::{Id, JoinSet},
    time,
};
use tracing::{debug, warn};

use crate::{
    control_block::descriptor::Opcode,
    models::{
        sense_data::{SenseData, key},
        status::HostStatus,
    },
    transport::{
        Command, Completed, CompletionRecord, Discipline, Request, SubmitOutcome, Transport,
        buffer::AlignedBuf,
    },
};

/// The OS object behind a [`FileTransport`].
#[derive(Debug, Clone)]
pub enum Handle {
    File(Arc<File>),
    Stdin,
    Stdout,
    /// Reads hit end-of-file at once, writes are discarded.
    Null,
}

/// Moves blocks with plain read/write system calls.
///
/// Seekable handles use positioned I/O at `lba * block_size`, so commands
/// can run concurrently on the blocking pool. Streams (fifos, std streams,
/// append-mode files) keep a cursor and run one command at a time.
#[derive(Debug)]
pub struct FileTransport {
    handle: Handle,
    block_size: u32,
    positioned: bool,
    running: JoinSet<Completed>,
    launched: HashMap<Id, Request>,
    pending: VecDeque<Request>,
    ready: VecDeque<Completed>,
}

impl FileTransport {
    pub fn new(handle: Handle, block_size: u32, positioned: bool) -> Self {
        Self {
            handle,
            block_size,
            positioned,
            running: JoinSet::new(),
            launched: HashMap::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    fn launch(&mut self, req: Request) {
        let handle = self.handle.clone();
        let bs = self.block_size;
        let positioned = self.positioned;
        // keep a buffer-less twin so a panicked task still yields a completion
        let twin = Request {
            token: req.token,
            command: req.command.clone(),
            buf: AlignedBuf::direct(0),
            data: req.data.clone(),
            timeout: req.timeout,
        };
        let abort = self
            .running
            .spawn_blocking(move || run_io(&handle, positioned, bs, req));
        self.launched.insert(abort.id(), twin);
    }

    fn lost(&mut self, id: Id, err: &tokio::task::JoinError) -> Option<Completed> {
        let mut twin = self.launched.remove(&id)?;
        warn!(token = twin.token, "I/O task failed: {err}");
        twin.buf = AlignedBuf::direct(twin.data.end);
        let residual = twin.data_len() as u32;
        Some(Completed::new(
            CompletionRecord::host_failure(
                twin.token,
                HostStatus::Error(format!("I/O task failed: {err}")),
                residual,
            ),
            twin,
        ))
    }
}

impl Transport for FileTransport {
    fn discipline(&self) -> Discipline {
        if self.positioned {
            Discipline::Async
        } else {
            Discipline::Sync
        }
    }

    async fn execute(&mut self, req: Request) -> Completed {
        let handle = self.handle.clone();
        let bs = self.block_size;
        let positioned = self.positioned;
        let token = req.token;
        let command = req.command.clone();
        let data = req.data.clone();
        let limit = req.timeout;
        let task = tokio::task::spawn_blocking(move || run_io(&handle, positioned, bs, req));
        let host = match time::timeout(limit, task).await {
            Ok(Ok(done)) => return done,
            Ok(Err(e)) => HostStatus::Error(format!("I/O task failed: {e}")),
            // the blocking call keeps running; its result is dropped
            Err(_) => HostStatus::TimedOut,
        };
        let residual = data.len() as u32;
        let req = Request {
            token,
            command,
            buf: AlignedBuf::direct(data.end),
            data,
            timeout: limit,
        };
        Completed::new(CompletionRecord::host_failure(token, host, residual), req)
    }

    fn submit(&mut self, req: Request) -> SubmitOutcome {
        if self.positioned || self.running.is_empty() {
            self.launch(req);
        } else {
            self.pending.push_back(req);
        }
        SubmitOutcome::Queued
    }

    async fn poll(&mut self) -> Option<Completed> {
        if let Some(done) = self.ready.pop_front() {
            return Some(done);
        }
        let joined = self.running.join_next_with_id().await?;
        let done = match joined {
            Ok((id, done)) => {
                self.launched.remove(&id);
                Some(done)
            },
            Err(e) => self.lost(e.id(), &e),
        };
        if let Some(next) = self.pending.pop_front() {
            self.launch(next);
        }
        done
    }

    fn outstanding(&self) -> usize {
        self.running.len() + self.pending.len() + self.ready.len()
    }

    fn byte_len(&mut self) -> Result<Option<u64>> {
        let Handle::File(file) = &self.handle else {
            return Ok(None);
        };
        let meta = file.metadata().context("stat failed")?;
        if meta.is_file() {
            return Ok(Some(meta.len()));
        }
        if !self.positioned {
            return Ok(None);
        }
        // block devices report a zero length in their metadata
        let mut f: &File = file;
        let here = f.stream_position()?;
        let end = f.seek(SeekFrom::End(0))?;
        f.seek(SeekFrom::Start(here))?;
        Ok(Some(end))
    }

    async fn seek(&mut self, byte_offset: u64) -> Result<()> {
        let handle = self.handle.clone();
        let positioned = self.positioned;
        tokio::task::spawn_blocking(move || -> Result<()> {
            match handle {
                Handle::File(f) if positioned => {
                    let mut f: &File = &f;
                    f.seek(SeekFrom::Start(byte_offset))?;
                },
                Handle::File(f) => discard(&mut &*f, byte_offset)?,
                Handle::Stdin => discard(&mut io::stdin().lock(), byte_offset)?,
                Handle::Stdout => {
                    anyhow::ensure!(byte_offset == 0, "cannot seek on standard output");
                },
                Handle::Null => {},
            }
            Ok(())
        })
        .await
        .context("seek task failed")?
    }
}

/// Read and drop `n` bytes from a stream.
fn discard(r: &mut impl Read, n: u64) -> io::Result<()> {
    let copied = io::copy(&mut r.take(n), &mut io::sink())?;
    if copied < n {
        debug!("stream ended after skipping {copied} of {n} bytes");
    }
    Ok(())
}

/// Fill `out` from a stream until it is full or the stream ends.
fn read_full(r: &mut impl Read, out: &mut [u8]) -> io::Result<usize> {
    let mut at = 0;
    while at < out.len() {
        match r.read(&mut out[at..]) {
            Ok(0) => break,
            Ok(n) => at += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(at)
}

fn read_full_at(f: &File, out: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut at = 0;
    while at < out.len() {
        match f.read_at(&mut out[at..], offset + at as u64) {
            Ok(0) => break,
            Ok(n) => at += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(at)
}

fn illegal(token: u64, residual: usize) -> CompletionRecord {
    CompletionRecord::check_condition(
        token,
        SenseData::fixed(key::ILLEGAL_REQUEST, 0x20, 0x00, None).to_vec(),
        residual as u32,
    )
}

/// Execute one request on the blocking pool.
fn run_io(handle: &Handle, positioned: bool, bs: u32, mut req: Request) -> Completed {
    let token = req.token;
    let window = req.data.clone();
    let all = window.len();
    let Command::Transfer(d) = &req.command else {
        return Completed::new(illegal(token, all), req);
    };
    let offset = d.start_block() * bs as u64;
    let opcode = d.opcode();

    let res: io::Result<CompletionRecord> = match opcode {
        Opcode::Read => {
            let out = &mut req.buf[window];
            let n = match handle {
                Handle::File(f) if positioned => read_full_at(f, out, offset),
                Handle::File(f) => read_full(&mut &**f, out),
                Handle::Stdin => read_full(&mut io::stdin().lock(), out),
                Handle::Null => Ok(0),
                Handle::Stdout => Err(io::Error::other("standard output is not readable")),
            };
            n.map(|n| CompletionRecord::good(token).with_residual((all - n) as u32))
        },
        Opcode::Write => {
            let data = &req.buf[window];
            let w = match handle {
                Handle::File(f) if positioned => f.write_all_at(data, offset),
                Handle::File(f) => (&**f).write_all(data),
                Handle::Stdout => {
                    let mut out = io::stdout().lock();
                    out.write_all(data).and_then(|_| out.flush())
                },
                Handle::Null => Ok(()),
                Handle::Stdin => Err(io::Error::other("standard input is not writable")),
            };
            w.map(|_| CompletionRecord::good(token))
        },
        Opcode::Verify => match handle {
            Handle::File(f) if positioned => {
                let data = &req.buf[window];
                let mut stored = vec![0u8; all];
                read_full_at(f, &mut stored, offset).map(|n| {
                    let first_diff = stored[..n]
                        .chunks(bs as usize)
                        .zip(data.chunks(bs as usize))
                        .position(|(a, b)| a != b)
                        .or((n < all).then_some(n / bs as usize));
                    match first_diff {
                        Some(i) => {
                            let lba = d.start_block() + i as u64;
                            let sense = match u32::try_from(lba) {
                                Ok(l) => SenseData::fixed(key::MISCOMPARE, 0x1D, 0, Some(l))
                                    .to_vec(),
                                Err(_) => SenseData::descriptor(key::MISCOMPARE, 0x1D, 0, Some(lba)),
                            };
                            let residual = all - i * bs as usize;
                            CompletionRecord::check_condition(token, sense, residual as u32)
                        },
                        None => CompletionRecord::good(token),
                    }
                })
            },
            _ => Ok(illegal(token, all)),
        },
        Opcode::ReadLong { .. } => Ok(illegal(token, all)),
    };

    let rec = res.unwrap_or_else(|e| {
        debug!(token, "{} failed: {e}", opcode.name());
        CompletionRecord::host_failure(token, HostStatus::Error(e.to_string()), all as u32)
    });
    Completed::new(rec, req)
}
