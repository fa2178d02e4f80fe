//! Completion classification and the retry/recovery policy built on it.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Maps completion records to error categories.
pub mod classify;
/// Decides what to do with a classified completion.
pub mod policy;
