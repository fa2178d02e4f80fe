// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    control_block::read_capacity::{
        Capacity, RC10_LEN, RC16_ALLOC_LEN, parse_read_capacity10_zerocopy,
        parse_read_capacity16_zerocopy,
    },
    endpoint::{CapacityError, Endpoint, EndpointKind},
    recovery::classify::{Category, classify},
    transport::{Command, Request, Transport, buffer::AlignedBuf, token::TokenSource},
};

pub(super) async fn query<T: Transport>(
    ep: &mut Endpoint<T>,
    tokens: &TokenSource,
) -> Result<Capacity, CapacityError> {
    let kind = ep.kind();
    let block_size = ep.block_size().max(1);
    match kind {
        EndpointKind::CommandDevice => {
            let timeout = ep.timeout();
            let cap = read_capacity(ep.transport_mut(), tokens, timeout).await?;
            if cap.block_size != block_size {
                warn!(
                    device = cap.block_size,
                    configured = block_size,
                    "device block size differs from the configured one"
                );
            }
            Ok(cap)
        },
        EndpointKind::BlockDevice | EndpointKind::RegularFile => {
            let len = ep
                .transport_mut()
                .byte_len()?
                .ok_or(CapacityError::Unsupported(kind.name()))?;
            // a trailing partial block of a regular file still counts
            let blocks = if kind == EndpointKind::RegularFile {
                len.div_ceil(block_size as u64)
            } else {
                len / block_size as u64
            };
            Ok(Capacity { blocks, block_size })
        },
        other => Err(CapacityError::Unsupported(other.name())),
    }
}

/// READ CAPACITY(10), falling back to (16) on the all-ones sentinel. A
/// media change is retried exactly once.
pub async fn read_capacity<T: Transport>(
    transport: &mut T,
    tokens: &TokenSource,
    timeout: Duration,
) -> Result<Capacity, CapacityError> {
    let mut media_retry = true;
    loop {
        let data = match issue(transport, Command::ReadCapacity10, RC10_LEN, tokens, timeout).await
        {
            Ok(data) => data,
            Err(Category::MediaChanged) if media_retry => {
                debug!("media changed during READ CAPACITY(10), retrying");
                media_retry = false;
                continue;
            },
            Err(category) => return Err(failure(Command::ReadCapacity10.name(), category)),
        };
        let raw = parse_read_capacity10_zerocopy(&data)
            .map_err(|e| CapacityError::Malformed(e.to_string()))?;
        if !raw.indicates_overflow() {
            return Ok(Capacity::from(raw));
        }

        debug!("READ CAPACITY(10) overflowed, trying READ CAPACITY(16)");
        let len = RC16_ALLOC_LEN as usize;
        let data = match issue(transport, Command::ReadCapacity16, len, tokens, timeout).await {
            Ok(data) => data,
            Err(Category::MediaChanged) if media_retry => {
                media_retry = false;
                continue;
            },
            Err(category) => return Err(failure(Command::ReadCapacity16.name(), category)),
        };
        let raw = parse_read_capacity16_zerocopy(&data)
            .map_err(|e| CapacityError::Malformed(e.to_string()))?;
        return Ok(Capacity::from(raw));
    }
}

fn failure(op: &'static str, category: Category) -> CapacityError {
    match category {
        Category::MediaChanged => CapacityError::RetryableMediaChanged,
        category => CapacityError::Failed { op, category },
    }
}

async fn issue<T: Transport>(
    transport: &mut T,
    command: Command,
    len: usize,
    tokens: &TokenSource,
    timeout: Duration,
) -> Result<Vec<u8>, Category> {
    let req = Request::new(tokens.next_token(), command, AlignedBuf::direct(len), timeout);
    let done = transport.execute(req).await;
    let category = classify(&done.record, &done.request.command);
    if !category.is_success() {
        return Err(category);
    }
    let got = len.saturating_sub(done.record.residual as usize);
    Ok(done.request.buf[..got].to_vec())
}
