// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    session::{TransferSession, exit::ExitStatus},
    transport::Discipline,
};

use crate::integration_tests::common::{
    BS, blank_target, config, destination, expected, patterned, run, source,
};

#[tokio::test]
async fn copy_1000_blocks_without_count() -> Result<()> {
    let src = patterned(1000);
    let dst = blank_target();
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 128), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.requested, Some(1000));
    assert_eq!(report.to_string(), "1000+0 records in\n1000+0 records out\n");
    assert!(report.fatal.is_none());
    assert!(report.is_complete());
    assert_eq!(report.exit_status(), ExitStatus::Ok);
    assert_eq!(report.exit_status().code(), 0);

    assert_eq!(out.written_blocks(), 1000);
    assert_eq!(out.snapshot(0, 1000, BS), expected(0, 1000));
    Ok(())
}

#[tokio::test]
async fn copy_with_odd_transfer_size() -> Result<()> {
    let src = patterned(100);
    let dst = blank_target();
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(3, 7), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.counters.in_full, 100);
    assert_eq!(report.counters.out_full, 100);
    assert_eq!(out.snapshot(0, 100, BS), expected(0, 100));
    Ok(())
}

#[tokio::test]
async fn seek_places_output() -> Result<()> {
    let src = patterned(16);
    let dst = blank_target();
    let out = dst.backing().clone();

    let cfg = sg_xfer::session::SessionConfig {
        seek: 100,
        ..config(4, 4)
    };
    let mut session = TransferSession::new(cfg, source(src), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.counters.out_full, 16);
    assert!(!out.is_written(0));
    assert!(!out.is_written(99));
    assert_eq!(out.snapshot(100, 16, BS), expected(0, 16));
    Ok(())
}

#[tokio::test]
async fn synchronous_transports_copy_in_place() -> Result<()> {
    let src = patterned(200).with_discipline(Discipline::Sync);
    let dst = blank_target().with_discipline(Discipline::Sync);
    let (rs, ws) = (src.stats(), dst.stats());
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 16), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.to_string(), "200+0 records in\n200+0 records out\n");
    assert_eq!(out.snapshot(0, 200, BS), expected(0, 200));
    // nothing is ever queued on a synchronous transport
    assert_eq!(rs.max_outstanding(), 0);
    assert_eq!(ws.max_outstanding(), 0);
    Ok(())
}
