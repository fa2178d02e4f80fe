// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod descriptor;
pub mod read;
pub mod read_capacity;
pub mod verify;
pub mod write;
