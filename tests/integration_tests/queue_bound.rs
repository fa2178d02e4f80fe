// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use sg_xfer::{
    session::TransferSession,
    transport::target::CompletionOrder,
};

use crate::integration_tests::common::{blank_target, config, destination, patterned, run, source};

#[tokio::test]
async fn never_more_than_queue_depth_outstanding() -> Result<()> {
    for q in [1usize, 2, 4, 7, 16] {
        let src = patterned(300).with_order(CompletionOrder::Lifo);
        let dst = blank_target().with_order(CompletionOrder::Lifo);
        let (rs, ws) = (src.stats(), dst.stats());

        let mut session = TransferSession::new(config(q, 8), source(src), destination(dst));
        let report = run(&mut session).await?;
        assert!(report.is_complete(), "q={q}: {report}");

        // reads stay strictly under half the window, writes within the rest
        let reads = rs.max_outstanding();
        let writes = ws.max_outstanding();
        assert!(reads >= 1, "q={q}");
        assert!(reads * 2 < q + 2, "q={q} reads={reads}");
        assert!(writes <= q - q / 2, "q={q} writes={writes}");
        assert!(reads + writes <= q.max(1) + 1, "q={q}");
    }
    Ok(())
}
