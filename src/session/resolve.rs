// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tracing::{info, warn};

use crate::{
    endpoint::{CapacityError, Endpoint, EndpointKind},
    session::exit::SessionError,
    transport::{Transport, token::TokenSource},
};

/// Blocks to transfer, `None` for "until the source ends".
///
/// A user count wins. Otherwise the capacity of every endpoint that can
/// report one (command devices and block devices on both sides, a regular
/// file on the source side), less the starting offset, and the smallest
/// of those is taken. A failed query is only fatal when no side yields a
/// usable value and the source is a command device.
pub async fn resolve_count<S: Transport, D: Transport>(
    src: &mut Endpoint<S>,
    dst: &mut Endpoint<D>,
    skip: u64,
    seek: u64,
    user: Option<u64>,
    tokens: &TokenSource,
) -> Result<Option<u64>, SessionError> {
    if let Some(n) = user {
        return Ok(Some(n));
    }

    let mut source_failure: Option<CapacityError> = None;
    let from_src = if matches!(
        src.kind(),
        EndpointKind::CommandDevice | EndpointKind::BlockDevice | EndpointKind::RegularFile
    ) {
        match src.query_capacity(tokens).await {
            Ok(cap) => {
                info!(blocks = cap.blocks, block_size = cap.block_size, "input capacity");
                Some(cap.blocks.saturating_sub(skip))
            },
            Err(e) => {
                warn!("input capacity unknown: {e}");
                if src.is_command_device() {
                    source_failure = Some(e);
                }
                None
            },
        }
    } else {
        None
    };

    let from_dst = if matches!(
        dst.kind(),
        EndpointKind::CommandDevice | EndpointKind::BlockDevice
    ) {
        match dst.query_capacity(tokens).await {
            Ok(cap) => {
                info!(blocks = cap.blocks, block_size = cap.block_size, "output capacity");
                Some(cap.blocks.saturating_sub(seek))
            },
            Err(e) => {
                warn!("output capacity unknown: {e}");
                None
            },
        }
    } else {
        None
    };

    match (from_src, from_dst) {
        (Some(a), Some(b)) => Ok(Some(a.min(b))),
        (Some(n), None) | (None, Some(n)) => Ok(Some(n)),
        (None, None) => match source_failure {
            Some(e) => Err(SessionError::Capacity(e)),
            None => Ok(None),
        },
    }
}
