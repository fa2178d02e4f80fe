// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;

use crate::transport::{
    Completed, Discipline, Request, SubmitOutcome, Transport,
    backing::FileBacking,
    file::FileTransport,
    target::CdbTarget,
};

/// Transport selected at open time.
#[derive(Debug)]
pub enum AnyTransport {
    File(FileTransport),
    /// A file or block device driven through encoded CDBs.
    Emulated(Box<CdbTarget<FileBacking>>),
}

macro_rules! each {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            AnyTransport::File($t) => $body,
            AnyTransport::Emulated($t) => $body,
        }
    };
}

impl Transport for AnyTransport {
    fn discipline(&self) -> Discipline {
        each!(self, t => t.discipline())
    }

    fn max_transfer_blocks(&self) -> Option<u32> {
        each!(self, t => t.max_transfer_blocks())
    }

    async fn execute(&mut self, req: Request) -> Completed {
        each!(self, t => t.execute(req).await)
    }

    fn submit(&mut self, req: Request) -> SubmitOutcome {
        each!(self, t => t.submit(req))
    }

    async fn poll(&mut self) -> Option<Completed> {
        each!(self, t => t.poll().await)
    }

    fn outstanding(&self) -> usize {
        each!(self, t => t.outstanding())
    }

    fn byte_len(&mut self) -> Result<Option<u64>> {
        each!(self, t => t.byte_len())
    }

    async fn seek(&mut self, byte_offset: u64) -> Result<()> {
        each!(self, t => t.seek(byte_offset).await)
    }
}

impl From<FileTransport> for AnyTransport {
    fn from(t: FileTransport) -> Self {
        AnyTransport::File(t)
    }
}

impl From<CdbTarget<FileBacking>> for AnyTransport {
    fn from(t: CdbTarget<FileBacking>) -> Self {
        AnyTransport::Emulated(Box::new(t))
    }
}
