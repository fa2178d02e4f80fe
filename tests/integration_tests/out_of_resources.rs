// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::session::{TransferSession, exit::ExitStatus};

use crate::integration_tests::common::{
    BS, blank_target, config, destination, expected, patterned, run, source,
};

#[tokio::test]
async fn source_refuses_four_blocks_then_accepts_two() -> Result<()> {
    let src = patterned(64).with_max_transfer(2);
    let stats = src.stats();
    let dst = blank_target();
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 4), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert!(report.fatal.is_none(), "{report}");
    assert!(report.is_complete());
    assert_eq!(report.exit_status(), ExitStatus::Ok);
    assert!(stats.rejected() >= 1);
    assert_eq!(report.counters.in_full, 64);
    assert_eq!(out.snapshot(0, 64, BS), expected(0, 64));
    Ok(())
}

#[tokio::test]
async fn destination_refuses_large_writes() -> Result<()> {
    let src = patterned(40);
    let dst = blank_target().with_max_transfer(2);
    let stats = dst.stats();
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 4), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert!(report.fatal.is_none(), "{report}");
    assert_eq!(report.counters.out_full, 40);
    assert!(stats.rejected() >= 1);
    assert!(stats.data_out_log().iter().all(|c| c.block_count <= 2));
    assert_eq!(out.snapshot(0, 40, BS), expected(0, 40));
    Ok(())
}
