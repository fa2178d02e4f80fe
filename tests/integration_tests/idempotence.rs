// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    session::TransferSession,
    transport::{backing::MemoryBacking, target::CdbTarget},
};

use crate::integration_tests::common::{BS, config, destination, expected, patterned, run, source};

#[tokio::test]
async fn second_run_leaves_destination_unchanged() -> Result<()> {
    let shared = MemoryBacking::new();

    let mut first = TransferSession::new(
        config(4, 16),
        source(patterned(150)),
        destination(CdbTarget::new(shared.clone(), BS)),
    );
    let r1 = run(&mut first).await?;
    let after_first = shared.snapshot(0, 150, BS);

    let mut second = TransferSession::new(
        config(6, 5),
        source(patterned(150)),
        destination(CdbTarget::new(shared.clone(), BS)),
    );
    let r2 = run(&mut second).await?;
    let after_second = shared.snapshot(0, 150, BS);

    assert_eq!(r1.counters, r2.counters);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second, expected(0, 150));
    assert_eq!(shared.written_blocks(), 150);
    Ok(())
}
