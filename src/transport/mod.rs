//! Submission of commands to endpoints and retrieval of their completions.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{ops::Range, time::Duration};

use anyhow::Result;
use bytes::Bytes;

use crate::{
    control_block::{
        descriptor::CommandDescriptor,
        read_capacity::{RC16_ALLOC_LEN, build_read_capacity10, build_read_capacity16},
    },
    models::status::{HostStatus, ScsiStatus},
    transport::buffer::AlignedBuf,
};

/// Dispatch over the transports an opened endpoint can carry.
pub mod any;
/// Block stores behind the CDB-interpreting target.
pub mod backing;
/// Aligned data buffers.
pub mod buffer;
/// Byte-stream transport for files, block devices, fifos and std streams.
pub mod file;
/// CDB-interpreting command device with fault injection.
pub mod target;
/// Correlation tokens.
pub mod token;

/// How a transport accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Submit-and-block: [`Transport::execute`] only.
    Sync,
    /// Non-blocking [`Transport::submit`] plus [`Transport::poll`].
    Async,
}

/// What a request asks the device to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Transfer(CommandDescriptor),
    ReadCapacity10,
    ReadCapacity16,
}

impl Command {
    /// Encoded CDB bytes.
    pub fn cdb(&self) -> Vec<u8> {
        let mut cdb = [0u8; 16];
        match self {
            Command::Transfer(d) => d.bytes().to_vec(),
            Command::ReadCapacity10 => {
                build_read_capacity10(&mut cdb, 0);
                cdb[..10].to_vec()
            },
            Command::ReadCapacity16 => {
                build_read_capacity16(&mut cdb, RC16_ALLOC_LEN, 0);
                cdb.to_vec()
            },
        }
    }

    pub fn descriptor(&self) -> Option<&CommandDescriptor> {
        match self {
            Command::Transfer(d) => Some(d),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Transfer(d) => d.opcode().name(),
            Command::ReadCapacity10 => "read capacity(10)",
            Command::ReadCapacity16 => "read capacity(16)",
        }
    }
}

/// One command in flight, owning its data buffer until it completes.
#[derive(Debug)]
pub struct Request {
    pub token: u64,
    pub command: Command,
    pub buf: AlignedBuf,
    /// Window of `buf` that carries the command's data.
    pub data: Range<usize>,
    pub timeout: Duration,
}

impl Request {
    pub fn new(token: u64, command: Command, buf: AlignedBuf, timeout: Duration) -> Self {
        let data = 0..buf.len();
        Self {
            token,
            command,
            buf,
            data,
            timeout,
        }
    }

    pub fn with_data(mut self, data: Range<usize>) -> Self {
        let end = data.end.min(self.buf.len());
        self.data = data.start.min(end)..end;
        self
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

/// What the device (or the transport) said about a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub token: u64,
    pub status: ScsiStatus,
    pub host: HostStatus,
    /// Bytes of the data window that were not transferred.
    pub residual: u32,
    pub sense: Bytes,
}

impl CompletionRecord {
    pub fn good(token: u64) -> Self {
        Self {
            token,
            status: ScsiStatus::Good,
            host: HostStatus::Ok,
            residual: 0,
            sense: Bytes::new(),
        }
    }

    pub fn check_condition(token: u64, sense: impl Into<Bytes>, residual: u32) -> Self {
        Self {
            token,
            status: ScsiStatus::CheckCondition,
            host: HostStatus::Ok,
            residual,
            sense: sense.into(),
        }
    }

    pub fn host_failure(token: u64, host: HostStatus, residual: u32) -> Self {
        Self {
            token,
            status: ScsiStatus::Good,
            host,
            residual,
            sense: Bytes::new(),
        }
    }

    pub fn with_residual(mut self, residual: u32) -> Self {
        self.residual = residual;
        self
    }
}

/// A completion together with the request (and buffer) handed back.
#[derive(Debug)]
pub struct Completed {
    pub record: CompletionRecord,
    pub request: Request,
}

impl Completed {
    pub fn new(record: CompletionRecord, request: Request) -> Self {
        Self { record, request }
    }
}

/// Result of a non-blocking submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    Queued,
    /// The transport refused the request without queueing it.
    Rejected(Box<Completed>),
}

/// A device (or byte-stream) that executes commands.
///
/// Synchronous transports are driven through [`Transport::execute`].
/// Asynchronous ones accept any number of [`Transport::submit`] calls and
/// hand back completions, in any order, from [`Transport::poll`].
/// `submit` never blocks.
pub trait Transport: Send {
    fn discipline(&self) -> Discipline;

    /// Largest per-command block count the transport currently accepts.
    fn max_transfer_blocks(&self) -> Option<u32> {
        None
    }

    /// Submit and wait for the completion.
    fn execute(&mut self, req: Request) -> impl Future<Output = Completed> + Send;

    fn submit(&mut self, req: Request) -> SubmitOutcome;

    /// Next completion, or `None` when nothing is outstanding.
    ///
    /// Must be cancel-safe: dropping the future loses no completion.
    fn poll(&mut self) -> impl Future<Output = Option<Completed>> + Send;

    /// Requests submitted and not yet returned by `poll`.
    fn outstanding(&self) -> usize;

    /// Byte length of the underlying medium, when it has one.
    fn byte_len(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Position the medium at `byte_offset`. A non-seekable source reads
    /// and drops that many bytes from where it stands.
    ///
    /// Command devices ignore it: the offset travels in each CDB.
    fn seek(&mut self, _byte_offset: u64) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
