// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    session::{TransferSession, exit::ExitStatus},
    transport::{Completed, Discipline, Request, SubmitOutcome, Transport},
};
use tokio_util::sync::CancellationToken;

use crate::integration_tests::common::{blank_target, config, destination, patterned, source};

/// Passes everything through and cancels the session after `left` submits.
struct CancelAfter<T> {
    inner: T,
    left: usize,
    token: CancellationToken,
}

impl<T: Transport> Transport for CancelAfter<T> {
    fn discipline(&self) -> Discipline {
        self.inner.discipline()
    }

    async fn execute(&mut self, req: Request) -> Completed {
        self.inner.execute(req).await
    }

    fn submit(&mut self, req: Request) -> SubmitOutcome {
        if self.left > 0 {
            self.left -= 1;
            if self.left == 0 {
                self.token.cancel();
            }
        }
        self.inner.submit(req)
    }

    async fn poll(&mut self) -> Option<Completed> {
        self.inner.poll().await
    }

    fn outstanding(&self) -> usize {
        self.inner.outstanding()
    }

    fn byte_len(&mut self) -> Result<Option<u64>> {
        self.inner.byte_len()
    }
}

#[tokio::test]
async fn cancelled_before_start() -> Result<()> {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut session =
        TransferSession::new(config(4, 8), source(patterned(100)), destination(blank_target()));
    let report = session.run(&cancel).await?;

    assert!(report.interrupted);
    assert_eq!(report.counters.in_full, 0);
    assert_eq!(report.exit_status(), ExitStatus::Interrupted);
    assert_eq!(report.exit_status().code(), 130);
    Ok(())
}

#[tokio::test]
async fn cancel_mid_copy_drains_in_flight() -> Result<()> {
    let cancel = CancellationToken::new();
    let src = CancelAfter {
        inner: patterned(1000),
        left: 5,
        token: cancel.clone(),
    };
    let dst = blank_target();
    let written = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 8), source(src), destination(dst));
    let report = session.run(&cancel).await?;

    assert!(report.interrupted, "{report}");
    assert!(report.fatal.is_none());
    assert!(report.counters.in_full < 1000);
    assert_eq!(report.exit_status(), ExitStatus::Interrupted);
    assert!(report.to_string().ends_with("interrupted\n"));

    // nothing left outstanding on either side
    let (src, dst) = session.into_endpoints();
    assert_eq!(src.transport().outstanding(), 0);
    assert_eq!(dst.transport().outstanding(), 0);
    assert!(written.written_blocks() as u64 <= report.counters.out_full);
    Ok(())
}
