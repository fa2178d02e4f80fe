// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    endpoint::{Endpoint, EndpointKind, Role},
    session::{SessionConfig, TransferSession, counters::TransferReport},
    transport::{
        Transport,
        backing::MemoryBacking,
        target::CdbTarget,
    },
};
use tokio_util::sync::CancellationToken;

pub const BS: u32 = 512;

/// Never zero, so sparse mode leaves these blocks alone.
pub fn pattern(lba: u64) -> u8 {
    (lba % 251) as u8 + 1
}

/// What `count` blocks of [`pattern`] from `lba` look like.
pub fn expected(lba: u64, count: u64) -> Vec<u8> {
    (lba..lba + count)
        .flat_map(|l| std::iter::repeat_n(pattern(l), BS as usize))
        .collect()
}

pub fn source<T: Transport>(transport: T) -> Endpoint<T> {
    Endpoint::with_transport(Role::Source, EndpointKind::CommandDevice, BS, transport)
}

pub fn destination<T: Transport>(transport: T) -> Endpoint<T> {
    Endpoint::with_transport(Role::Destination, EndpointKind::CommandDevice, BS, transport)
}

/// Patterned device of `blocks` blocks that reports its capacity.
pub fn patterned(blocks: u64) -> CdbTarget<MemoryBacking> {
    CdbTarget::memory(blocks, BS, pattern)
}

/// Empty device that cannot report a capacity.
pub fn blank_target() -> CdbTarget<MemoryBacking> {
    CdbTarget::new(MemoryBacking::new(), BS)
}

pub fn config(queue_depth: usize, blocks_per_transfer: u32) -> SessionConfig {
    SessionConfig {
        block_size: BS,
        blocks_per_transfer,
        queue_depth,
        ..SessionConfig::default()
    }
}

pub async fn run<S: Transport, D: Transport>(
    session: &mut TransferSession<S, D>,
) -> Result<TransferReport> {
    let cancel = CancellationToken::new();
    Ok(session.run(&cancel).await?)
}
