// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use crate::{
    models::{
        sense_data::{ASC_MEDIUM_MAY_HAVE_CHANGED, SenseData, key},
        status::{HostStatus, ScsiStatus},
    },
    transport::{Command, CompletionRecord},
};

/// Outcome class of one completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Clean,
    /// Completed, but the device logged a recoverable condition.
    Recovered,
    MediaChanged,
    UnitAttention,
    AbortedCommand,
    NotReady,
    /// `lba` is the first failing block and lies inside the request.
    MediumErrorWithPosition {
        lba: u64,
    },
    MediumErrorNoPosition,
    Miscompare {
        lba: Option<u64>,
    },
    SubmissionOutOfResources,
    /// Host-side timeout.
    TimedOut,
    Other,
}

impl Category {
    /// Data was transferred in full.
    pub fn is_success(&self) -> bool {
        matches!(self, Category::Clean | Category::Recovered)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Clean => "clean",
            Category::Recovered => "recovered error",
            Category::MediaChanged => "media changed",
            Category::UnitAttention => "unit attention",
            Category::AbortedCommand => "aborted command",
            Category::NotReady => "not ready",
            Category::MediumErrorWithPosition { .. } => "medium error",
            Category::MediumErrorNoPosition => "medium error (no position)",
            Category::Miscompare { .. } => "miscompare",
            Category::SubmissionOutOfResources => "out of resources",
            Category::TimedOut => "timed out",
            Category::Other => "other error",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::MediumErrorWithPosition { lba } => write!(f, "medium error at lba {lba}"),
            Category::Miscompare { lba: Some(lba) } => write!(f, "miscompare at lba {lba}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Classify a completion of `command`. Never fails: anything that cannot be
/// understood is [`Category::Other`].
pub fn classify(record: &CompletionRecord, command: &Command) -> Category {
    match record.host {
        HostStatus::Ok => {},
        HostStatus::OutOfResources => return Category::SubmissionOutOfResources,
        HostStatus::TimedOut => return Category::TimedOut,
        HostStatus::Error(_) => return Category::Other,
    }

    match record.status {
        ScsiStatus::Good | ScsiStatus::ConditionMet => Category::Clean,
        ScsiStatus::CheckCondition => match SenseData::parse(&record.sense) {
            Ok(sense) => from_sense(&sense, command),
            Err(_) => Category::Other,
        },
        _ => Category::Other,
    }
}

fn from_sense(sense: &SenseData, command: &Command) -> Category {
    match sense.sense_key {
        key::NO_SENSE => Category::Clean,
        key::RECOVERED_ERROR => Category::Recovered,
        key::NOT_READY => Category::NotReady,
        key::MEDIUM_ERROR | key::HARDWARE_ERROR => match position(sense, command) {
            Some(lba) => Category::MediumErrorWithPosition { lba },
            None => Category::MediumErrorNoPosition,
        },
        key::UNIT_ATTENTION if sense.asc == ASC_MEDIUM_MAY_HAVE_CHANGED => {
            Category::MediaChanged
        },
        key::UNIT_ATTENTION => Category::UnitAttention,
        key::ABORTED_COMMAND => Category::AbortedCommand,
        key::MISCOMPARE => Category::Miscompare {
            lba: position(sense, command),
        },
        _ => Category::Other,
    }
}

/// The information field, when valid and inside the command's block range.
fn position(sense: &SenseData, command: &Command) -> Option<u64> {
    let d = command.descriptor()?;
    let lba = sense.information;
    (sense.valid && lba >= d.start_block() && lba < d.end_block()).then_some(lba)
}
