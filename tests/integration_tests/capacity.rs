// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    control_block::descriptor::Opcode,
    endpoint::CapacityError,
    session::{SessionConfig, TransferSession, exit::{ExitStatus, SessionError}},
    transport::{
        backing::MemoryBacking,
        target::{CapacityReport, CdbTarget, FaultPlan},
        token::TokenSource,
    },
};

use crate::integration_tests::common::{
    BS, blank_target, config, destination, expected, pattern, patterned, run, source,
};

const HUGE: u64 = 0x1_0000_0010;

#[tokio::test]
async fn read_capacity_falls_back_to_16() -> Result<()> {
    let target = CdbTarget::new(MemoryBacking::new(), 4096).with_capacity(CapacityReport::Fixed(HUGE));
    let stats = target.stats();
    let mut ep = source(target);

    let cap = ep.query_capacity(&TokenSource::new()).await?;
    assert_eq!(cap.blocks, HUGE);
    assert_eq!(cap.block_size, 4096);
    assert_eq!(ep.total_blocks(), Some(HUGE));
    assert_eq!(stats.commands(), 2);
    Ok(())
}

#[tokio::test]
async fn small_device_needs_only_read_capacity_10() -> Result<()> {
    let target = patterned(2048);
    let stats = target.stats();
    let mut ep = source(target);

    let cap = ep.query_capacity(&TokenSource::new()).await?;
    assert_eq!(cap.blocks, 2048);
    assert_eq!(stats.commands(), 1);
    Ok(())
}

#[tokio::test]
async fn one_media_change_is_retried() -> Result<()> {
    let target = patterned(64).with_faults(FaultPlan::new().media_changes(1));
    let mut ep = source(target);
    let cap = ep.query_capacity(&TokenSource::new()).await?;
    assert_eq!(cap.blocks, 64);

    let target = patterned(64).with_faults(FaultPlan::new().media_changes(2));
    let mut ep = source(target);
    let err = ep.query_capacity(&TokenSource::new()).await.unwrap_err();
    assert!(matches!(err, CapacityError::RetryableMediaChanged), "{err}");
    Ok(())
}

#[tokio::test]
async fn unsupported_source_capacity_without_count_fails() -> Result<()> {
    let src = CdbTarget::new(MemoryBacking::from_fn(16, BS, pattern), BS);
    let mut session = TransferSession::new(config(4, 8), source(src), destination(blank_target()));
    let cancel = tokio_util::sync::CancellationToken::new();
    let err = session.run(&cancel).await.unwrap_err();
    assert!(matches!(err, SessionError::Capacity(_)), "{err}");
    assert_eq!(ExitStatus::from(&err), ExitStatus::Other);
    Ok(())
}

#[tokio::test]
async fn smaller_side_limits_count() -> Result<()> {
    let src = patterned(100);
    let dst = CdbTarget::new(MemoryBacking::new(), BS).with_capacity(CapacityReport::Fixed(40));
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 8), source(src), destination(dst));
    let report = run(&mut session).await?;
    assert_eq!(report.requested, Some(40));
    assert_eq!(report.counters.out_full, 40);
    assert!(!out.is_written(40));
    Ok(())
}

#[tokio::test]
async fn skip_shortens_resolved_count() -> Result<()> {
    let dst = blank_target();
    let out = dst.backing().clone();
    let cfg = SessionConfig {
        skip: 30,
        ..config(4, 8)
    };
    let mut session = TransferSession::new(cfg, source(patterned(100)), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.requested, Some(70));
    assert_eq!(report.counters.in_full, 70);
    assert_eq!(out.snapshot(0, 70, BS), expected(30, 70));
    Ok(())
}

#[tokio::test]
async fn user_count_wins() -> Result<()> {
    let dst = blank_target();
    let out = dst.backing().clone();
    let cfg = SessionConfig {
        count: Some(5),
        ..config(4, 8)
    };
    let mut session = TransferSession::new(cfg, source(patterned(100)), destination(dst));
    let report = run(&mut session).await?;
    assert_eq!(report.to_string(), "5+0 records in\n5+0 records out\n");
    assert_eq!(out.written_blocks(), 5);
    Ok(())
}

#[tokio::test]
async fn dry_run_moves_nothing() -> Result<()> {
    let dst = blank_target();
    let out = dst.backing().clone();
    let cfg = SessionConfig {
        dry_run: true,
        ..config(4, 8)
    };
    let mut session = TransferSession::new(cfg, source(patterned(100)), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.requested, Some(100));
    assert_eq!(report.counters.in_full, 0);
    assert_eq!(report.exit_status(), ExitStatus::Ok);
    assert_eq!(out.written_blocks(), 0);
    Ok(())
}

#[tokio::test]
async fn high_addresses_use_16_byte_cdbs() -> Result<()> {
    let base = 1u64 << 32;
    let src = CdbTarget::new(MemoryBacking::new(), BS).with_capacity(CapacityReport::Fixed(1 << 33));
    let dst = blank_target();
    let log = dst.stats();
    let cfg = SessionConfig {
        skip: base + 4,
        seek: base,
        count: Some(8),
        ..config(4, 4)
    };
    let mut session = TransferSession::new(cfg, source(src), destination(dst));
    let report = run(&mut session).await?;

    assert!(report.fatal.is_none(), "{report}");
    assert_eq!(report.counters.out_full, 8);
    let cmds = log.data_out_log();
    assert!(!cmds.is_empty());
    assert!(cmds.iter().all(|c| c.opcode == Opcode::Write && c.start_block >= base));
    Ok(())
}
