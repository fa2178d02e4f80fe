//! This module contains the state machine that drives a transfer session.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Common structures and traits for state machines.
pub mod common;
/// Prepare, pump, drain and finish of a transfer session.
pub mod transfer_states;
