// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use serial_test::serial;
use sg_xfer::{
    endpoint::{self, OpenFlags, Role},
    session::{SessionConfig, TransferSession, exit::ExitStatus},
    transport::target::{CdbTarget, FaultPlan, MediumFault},
};

use crate::integration_tests::common::{
    BS, blank_target, config, destination, pattern, run, source,
};

/// Blocks 16..40 and 56..64 are zero.
fn holey(lba: u64) -> u8 {
    if (16..40).contains(&lba) || lba >= 56 {
        0
    } else {
        pattern(lba)
    }
}

fn sparse_config() -> SessionConfig {
    SessionConfig {
        sparse: true,
        ..config(4, 8)
    }
}

#[tokio::test]
async fn zero_blocks_are_bypassed() -> Result<()> {
    let src = CdbTarget::memory(64, BS, holey);
    let dst = blank_target();
    let out = dst.backing().clone();
    let log = dst.stats();

    let mut session = TransferSession::new(sparse_config(), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert!(report.is_complete(), "{report}");
    assert_eq!(report.counters.in_full, 64);
    assert_eq!(report.counters.out_full, 32);
    assert_eq!(report.counters.sparse_skipped, 32);
    assert!(report.to_string().contains("32 bypassed records out"));

    for lba in 0..64 {
        assert_eq!(out.is_written(lba), holey(lba) != 0, "lba {lba}");
    }
    // no command ever carried a zero block
    for cmd in log.data_out_log() {
        for lba in cmd.start_block..cmd.start_block + cmd.block_count as u64 {
            assert_ne!(holey(lba), 0, "lba {lba} written");
        }
    }
    Ok(())
}

#[tokio::test]
async fn sparse_off_writes_zeros() -> Result<()> {
    let src = CdbTarget::memory(64, BS, holey);
    let dst = blank_target();
    let out = dst.backing().clone();

    let mut session = TransferSession::new(config(4, 8), source(src), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.counters.sparse_skipped, 0);
    assert_eq!(report.counters.out_full, 64);
    assert_eq!(out.written_blocks(), 64);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn file_is_extended_after_trailing_bypass() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sparse.img");

    let src = CdbTarget::memory(64, BS, holey);
    let dst = endpoint::open(&path, Role::Destination, OpenFlags::empty(), BS)?;

    let mut session = TransferSession::new(sparse_config(), source(src), dst);
    let report = run(&mut session).await?;
    assert_eq!(report.counters.sparse_skipped, 32);

    let meta = std::fs::metadata(&path)?;
    assert_eq!(meta.len(), 64 * BS as u64);

    let data = std::fs::read(&path)?;
    for lba in 0..64u64 {
        let block = &data[(lba * BS as u64) as usize..((lba + 1) * BS as u64) as usize];
        assert!(block.iter().all(|&b| b == holey(lba)), "lba {lba}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn file_is_extended_when_a_fatal_error_follows_a_bypass() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cut.img");

    // blocks 4..8 are zero, block 8 cannot be read
    let src = CdbTarget::memory(16, BS, |lba| {
        if (4..8).contains(&lba) { 0 } else { pattern(lba) }
    })
    .with_faults(FaultPlan::new().medium_error(8, MediumFault::Hard));
    let dst = endpoint::open(&path, Role::Destination, OpenFlags::empty(), BS)?;

    let mut session = TransferSession::new(sparse_config(), source(src), dst);
    let report = run(&mut session).await?;

    let fatal = report.fatal.as_ref().expect("read of block 8 is fatal");
    assert_eq!(fatal.block, 8);
    assert_eq!(report.exit_status(), ExitStatus::Medium);
    assert_eq!(report.counters.sparse_skipped, 4);
    assert_eq!(report.counters.out_full, 4);

    assert_eq!(std::fs::metadata(&path)?.len(), 8 * BS as u64);
    let data = std::fs::read(&path)?;
    for lba in 0..8u64 {
        let block = &data[(lba * BS as u64) as usize..((lba + 1) * BS as u64) as usize];
        let want = if lba < 4 { pattern(lba) } else { 0 };
        assert!(block.iter().all(|&b| b == want), "lba {lba}");
    }
    Ok(())
}
