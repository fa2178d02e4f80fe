//! This crate moves blocks from a source to a destination through a
//! bounded queue of in-flight SCSI-style commands, the way the `sg_dd` and
//! `sgp_dd` tools do, with retry and continue-on-error recovery.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Handles configuration, command-line parsing, and logging.
pub mod cfg;
/// Builds and decodes READ/WRITE/VERIFY and READ CAPACITY command blocks.
pub mod control_block;
/// Opens files, devices and streams as transfer endpoints.
pub mod endpoint;
/// Sense data and status values reported by devices.
pub mod models;
/// Classifies completions and decides how to recover from failures.
pub mod recovery;
/// Slot ring and the policy that picks the next read or write.
pub mod scheduler;
/// A complete transfer: counting, recovery, sparse output and statistics.
pub mod session;
/// Contains the state machine that drives a transfer session.
pub mod state_machine;
/// Executes commands against files, streams and emulated devices.
pub mod transport;
/// Provides utility functions used throughout the crate.
pub mod utils;
