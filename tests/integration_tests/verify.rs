// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    control_block::descriptor::Opcode,
    recovery::policy::RetryPolicy,
    session::{SessionConfig, TransferSession, exit::ExitStatus},
    transport::{backing::MemoryBacking, target::CdbTarget},
};

use crate::integration_tests::common::{BS, config, destination, pattern, patterned, run, source};

const BAD: u64 = 7;

/// Same content as the source except for one block.
fn almost_copy() -> CdbTarget<MemoryBacking> {
    let backing = MemoryBacking::from_fn(32, BS, |lba| if lba == BAD { 0xEE } else { pattern(lba) });
    CdbTarget::new(backing, BS)
}

fn verify_config(coe: u8) -> SessionConfig {
    SessionConfig {
        verify: true,
        policy: RetryPolicy::default().with_coe(coe, true, true),
        ..config(4, 8)
    }
}

#[tokio::test]
async fn identical_media_verify_clean() -> Result<()> {
    let dst = CdbTarget::new(MemoryBacking::from_fn(32, BS, pattern), BS);
    let log = dst.stats();
    let mut session = TransferSession::new(verify_config(0), source(patterned(32)), destination(dst));
    let report = run(&mut session).await?;

    assert_eq!(report.to_string(), "32+0 records in\n32+0 records verified\n");
    assert_eq!(report.exit_status(), ExitStatus::Ok);
    assert!(log.data_out_log().iter().all(|c| c.opcode == Opcode::Verify));
    Ok(())
}

#[tokio::test]
async fn miscompare_is_fatal_without_coe() -> Result<()> {
    let mut session =
        TransferSession::new(verify_config(0), source(patterned(32)), destination(almost_copy()));
    let report = run(&mut session).await?;

    assert_eq!(report.exit_status(), ExitStatus::Miscompare);
    assert_eq!(report.exit_status().code(), 14);
    let fatal = report.fatal.as_ref().expect("miscompare stops the run");
    assert_eq!(fatal.op, "verify");
    Ok(())
}

#[tokio::test]
async fn miscompare_counted_with_coe() -> Result<()> {
    let mut session =
        TransferSession::new(verify_config(1), source(patterned(32)), destination(almost_copy()));
    let report = run(&mut session).await?;

    assert!(report.fatal.is_none(), "{report}");
    assert_eq!(report.counters.miscompares, 1);
    assert_eq!(report.counters.out_full, 31);
    assert_eq!(report.exit_status(), ExitStatus::Ok);
    assert!(report.to_string().contains("31+0 records verified"));
    Ok(())
}
