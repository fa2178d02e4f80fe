//! Endpoints: what a path refers to, how it is opened, how big it is and how
//! it is positioned.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use bitflags::bitflags;
use thiserror::Error;
use tracing::debug;

use crate::{
    control_block::read_capacity::Capacity,
    recovery::classify::Category,
    transport::{Discipline, Transport, token::TokenSource},
};

/// Timeout for commands issued outside the transfer loop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity query (READ CAPACITY or the size of a file or block device).
pub mod capacity;
/// Path classification and opening.
pub mod open;

pub use open::open;

/// Which side of the transfer an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Source => "input",
            Role::Destination => "output",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Addressed by explicit command descriptors.
    CommandDevice,
    BlockDevice,
    RegularFile,
    /// Any non-seekable byte stream other than the std streams.
    Fifo,
    NullSink,
    /// Standard input or output.
    StdStream,
}

impl EndpointKind {
    /// Blocks can be addressed in any order.
    pub fn is_seekable(&self) -> bool {
        matches!(
            self,
            EndpointKind::CommandDevice
                | EndpointKind::BlockDevice
                | EndpointKind::RegularFile
                | EndpointKind::NullSink
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            EndpointKind::CommandDevice => "command device",
            EndpointKind::BlockDevice => "block device",
            EndpointKind::RegularFile => "regular file",
            EndpointKind::Fifo => "fifo",
            EndpointKind::NullSink => "null sink",
            EndpointKind::StdStream => "std stream",
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u8 {
        /// Bypass the page cache (`O_DIRECT`); buffers must be aligned.
        const DIRECT    = 0x01;
        const EXCLUSIVE = 0x02;
        const SYNC      = 0x04;
        /// Output only: append instead of positioned writes.
        const APPEND    = 0x08;
        /// Output only: fail if the file does not exist.
        const NO_CREATE = 0x10;
        /// Drive a file or block device through command descriptors.
        const FORCE_RAW = 0x20;
    }
}

#[derive(Debug, Error)]
#[error("failed to open {path:?}: {cause}")]
pub struct OpenError {
    pub path: PathBuf,
    pub cause: String,
}

impl OpenError {
    pub fn new(path: impl Into<PathBuf>, cause: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("{0} does not report a capacity")]
    Unsupported(&'static str),
    /// The medium changed again after the single retry.
    #[error("capacity query kept reporting a media change")]
    RetryableMediaChanged,
    #[error("{op} failed: {category}")]
    Failed {
        op: &'static str,
        category: Category,
    },
    #[error("malformed capacity data: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// An opened endpoint, owned by one transfer session.
#[derive(Debug)]
pub struct Endpoint<T> {
    path: PathBuf,
    role: Role,
    kind: EndpointKind,
    block_size: u32,
    total_blocks: Option<u64>,
    current_block_offset: u64,
    flags: OpenFlags,
    timeout: Duration,
    transport: T,
}

impl<T: Transport> Endpoint<T> {
    /// Wrap an already constructed transport.
    pub fn with_transport(role: Role, kind: EndpointKind, block_size: u32, transport: T) -> Self {
        Self {
            path: PathBuf::from(match role {
                Role::Source => "<source>",
                Role::Destination => "<destination>",
            }),
            role,
            kind,
            block_size,
            total_blocks: None,
            current_block_offset: 0,
            flags: OpenFlags::empty(),
            timeout: DEFAULT_TIMEOUT,
            transport,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Capacity learned by the last successful [`Endpoint::query_capacity`].
    pub fn total_blocks(&self) -> Option<u64> {
        self.total_blocks
    }

    pub fn current_block_offset(&self) -> u64 {
        self.current_block_offset
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Blocks may be written in any order at any offset.
    pub fn is_seekable(&self) -> bool {
        self.kind.is_seekable() && !self.flags.contains(OpenFlags::APPEND)
    }

    pub fn is_command_device(&self) -> bool {
        self.kind == EndpointKind::CommandDevice
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn discipline(&self) -> Discipline {
        self.transport.discipline()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Ask the endpoint how many blocks it holds.
    pub async fn query_capacity(
        &mut self,
        tokens: &TokenSource,
    ) -> Result<Capacity, CapacityError> {
        let cap = capacity::query(self, tokens).await?;
        self.total_blocks = Some(cap.blocks);
        Ok(cap)
    }

    /// Position the endpoint at `block`.
    ///
    /// Command devices only record the offset: each descriptor carries its
    /// own LBA. Seekable files are addressed positionally as well. A stream
    /// source skips by reading and discarding. A stream output cannot move.
    pub async fn seek(&mut self, block: u64) -> Result<()> {
        let delta = block.saturating_sub(self.current_block_offset);
        match self.kind {
            EndpointKind::CommandDevice | EndpointKind::NullSink => {},
            EndpointKind::BlockDevice | EndpointKind::RegularFile if self.is_seekable() => {
                self.transport
                    .seek(block * self.block_size as u64)
                    .await?;
            },
            _ if delta == 0 => {},
            _ if self.role == Role::Source => {
                self.transport
                    .seek(delta * self.block_size as u64)
                    .await?;
            },
            _ => bail!(
                "cannot seek {} blocks on non-seekable {} {:?}",
                delta,
                self.kind.name(),
                self.path
            ),
        }
        debug!(path = ?self.path, block, "positioned");
        self.current_block_offset = block;
        Ok(())
    }
}
