// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs::File,
    io::{self, Seek, SeekFrom},
    os::unix::fs::FileExt,
    sync::Arc,
};

use dashmap::DashMap;

/// Block store that a [`CdbTarget`](crate::transport::target::CdbTarget)
/// serves commands from.
pub trait Backing: Send {
    /// Fill `out` from `lba` onwards; unwritten space reads as zeros.
    fn read_blocks(&self, lba: u64, out: &mut [u8], block_size: u32) -> io::Result<()>;

    /// Store `data` from `lba` onwards; a short tail is zero-padded.
    fn write_blocks(&self, lba: u64, data: &[u8], block_size: u32) -> io::Result<()>;

    /// Number of whole blocks currently stored, if the store is bounded.
    fn stored_blocks(&self, block_size: u32) -> io::Result<Option<u64>>;
}

/// Sparse in-memory block store.
///
/// Clones share the same blocks, so a test can keep a handle and inspect
/// what a session wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryBacking {
    blocks: Arc<DashMap<u64, Box<[u8]>>>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store built from `pattern(lba)` for `count` blocks.
    pub fn from_fn(count: u64, block_size: u32, pattern: impl Fn(u64) -> u8) -> Self {
        let me = Self::new();
        for lba in 0..count {
            let fill = pattern(lba);
            if fill != 0 {
                me.blocks
                    .insert(lba, vec![fill; block_size as usize].into_boxed_slice());
            }
        }
        me
    }

    /// Copy of `count` blocks starting at `lba`.
    pub fn snapshot(&self, lba: u64, count: u64, block_size: u32) -> Vec<u8> {
        let mut out = vec![0u8; (count * block_size as u64) as usize];
        for (i, chunk) in out.chunks_mut(block_size as usize).enumerate() {
            if let Some(b) = self.blocks.get(&(lba + i as u64)) {
                let n = chunk.len().min(b.len());
                chunk[..n].copy_from_slice(&b[..n]);
            }
        }
        out
    }

    /// Whether any data was ever written at `lba`.
    pub fn is_written(&self, lba: u64) -> bool {
        self.blocks.contains_key(&lba)
    }

    pub fn written_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Backing for MemoryBacking {
    fn read_blocks(&self, lba: u64, out: &mut [u8], block_size: u32) -> io::Result<()> {
        for (i, chunk) in out.chunks_mut(block_size as usize).enumerate() {
            match self.blocks.get(&(lba + i as u64)) {
                Some(b) => {
                    let n = chunk.len().min(b.len());
                    chunk[..n].copy_from_slice(&b[..n]);
                },
                None => chunk.fill(0),
            }
        }
        Ok(())
    }

    fn write_blocks(&self, lba: u64, data: &[u8], block_size: u32) -> io::Result<()> {
        for (i, chunk) in data.chunks(block_size as usize).enumerate() {
            let mut block = vec![0u8; block_size as usize].into_boxed_slice();
            block[..chunk.len()].copy_from_slice(chunk);
            self.blocks.insert(lba + i as u64, block);
        }
        Ok(())
    }

    fn stored_blocks(&self, _block_size: u32) -> io::Result<Option<u64>> {
        Ok(self.blocks.iter().map(|e| *e.key() + 1).max())
    }
}

/// A regular file or block device driven with positioned I/O.
#[derive(Debug, Clone)]
pub struct FileBacking {
    file: Arc<File>,
}

impl FileBacking {
    pub fn new(file: Arc<File>) -> Self {
        Self { file }
    }
}

impl Backing for FileBacking {
    fn read_blocks(&self, lba: u64, out: &mut [u8], block_size: u32) -> io::Result<()> {
        let mut at = 0usize;
        let base = lba * block_size as u64;
        while at < out.len() {
            let n = self.file.read_at(&mut out[at..], base + at as u64)?;
            if n == 0 {
                out[at..].fill(0);
                break;
            }
            at += n;
        }
        Ok(())
    }

    fn write_blocks(&self, lba: u64, data: &[u8], block_size: u32) -> io::Result<()> {
        self.file.write_all_at(data, lba * block_size as u64)
    }

    fn stored_blocks(&self, block_size: u32) -> io::Result<Option<u64>> {
        // metadata reports 0 for block devices, seeking to the end does not
        let mut f: &File = &self.file;
        let len = f.seek(SeekFrom::End(0))?;
        Ok(Some(len / block_size.max(1) as u64))
    }
}
