// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Hands out correlation tokens, monotonically increasing and unique for
/// the lifetime of one session. Token 0 is never issued.
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    next: Arc<AtomicU64>,
}

impl TokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_token(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last token handed out, 0 if none.
    pub fn last(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
