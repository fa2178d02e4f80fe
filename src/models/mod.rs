//! Device-reported data: sense records and status bytes.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Fixed and descriptor format sense data.
pub mod sense_data;
/// SCSI and host status of a completed command.
pub mod status;
