// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use serial_test::serial;
use sg_xfer::{
    cfg::config::Config,
    endpoint::{self, OpenFlags, Role},
    session::{SessionConfig, TransferSession, exit::ExitStatus, open_from_config},
};

use crate::integration_tests::common::{BS, config, run};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn partial_tail_block_is_counted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    let data = payload(10 * BS as usize + 100);
    std::fs::write(&input, &data)?;

    let src = endpoint::open(&input, Role::Source, OpenFlags::empty(), BS)?;
    let dst = endpoint::open(&output, Role::Destination, OpenFlags::empty(), BS)?;
    let mut session = TransferSession::new(config(4, 4), src, dst);
    let report = run(&mut session).await?;

    assert_eq!(report.to_string(), "10+1 records in\n10+1 records out\n");
    assert_eq!(report.exit_status(), ExitStatus::Ok);
    assert_eq!(std::fs::read(&output)?, data);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn skip_and_seek_on_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    let data = payload(64 * BS as usize);
    std::fs::write(&input, &data)?;

    let src = endpoint::open(&input, Role::Source, OpenFlags::empty(), BS)?;
    let dst = endpoint::open(&output, Role::Destination, OpenFlags::empty(), BS)?;
    let cfg = SessionConfig {
        skip: 8,
        seek: 2,
        count: Some(16),
        ..config(4, 8)
    };
    let mut session = TransferSession::new(cfg, src, dst);
    let report = run(&mut session).await?;
    assert_eq!(report.counters.out_full, 16);

    let out = std::fs::read(&output)?;
    let bs = BS as usize;
    assert_eq!(out.len(), 18 * bs);
    assert_eq!(&out[2 * bs..], &data[8 * bs..24 * bs]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn forced_raw_output_through_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    let data = payload(40 * BS as usize);
    std::fs::write(&input, &data)?;
    std::fs::write(&output, vec![0u8; 40 * BS as usize])?;

    let yaml = format!(
        "transfer:\n  BlockSize: {BS}\n  BlocksPerTransfer: 16\n  QueueDepth: 4\n\
         input:\n  Path: {}\n\
         output:\n  Path: {}\n  ForceRaw: Yes\n  CdbSize: 16\n  Fua: Yes\n",
        input.display(),
        output.display()
    );
    let cfg = Config::from_yaml(&yaml)?;
    let mut session = open_from_config(&cfg)?;
    assert!(session.destination().is_command_device());

    let report = run(&mut session).await?;
    assert_eq!(report.requested, Some(40));
    assert_eq!(report.counters.out_full, 40);
    assert_eq!(std::fs::read(&output)?, data);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn missing_input_is_an_open_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let yaml = format!(
        "transfer:\n  BlockSize: 512\ninput:\n  Path: {}\noutput:\n  Path: .\n",
        dir.path().join("nope.bin").display()
    );
    let cfg = Config::from_yaml(&yaml)?;
    let err = open_from_config(&cfg).err().expect("open must fail");
    assert_eq!(ExitStatus::from(&err), ExitStatus::FileError);
    Ok(())
}
