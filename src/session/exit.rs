// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use thiserror::Error;

use crate::{
    endpoint::{CapacityError, OpenError},
    recovery::classify::Category,
};

/// Process exit codes, numbered the way the sg3_utils tools number them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    Syntax,
    NotReady,
    Medium,
    UnitAttention,
    AbortedCommand,
    MediaChanged,
    Miscompare,
    FileError,
    Timeout,
    Other,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Syntax => 1,
            ExitStatus::NotReady => 2,
            ExitStatus::Medium => 3,
            ExitStatus::UnitAttention => 6,
            ExitStatus::AbortedCommand => 11,
            ExitStatus::MediaChanged => 13,
            ExitStatus::Miscompare => 14,
            ExitStatus::FileError => 15,
            ExitStatus::Timeout => 33,
            ExitStatus::Other => 99,
            ExitStatus::Interrupted => 130,
        }
    }
}

impl From<Category> for ExitStatus {
    fn from(category: Category) -> Self {
        match category {
            Category::Clean | Category::Recovered => ExitStatus::Ok,
            Category::NotReady => ExitStatus::NotReady,
            Category::MediumErrorWithPosition { .. } | Category::MediumErrorNoPosition => {
                ExitStatus::Medium
            },
            Category::UnitAttention => ExitStatus::UnitAttention,
            Category::AbortedCommand => ExitStatus::AbortedCommand,
            Category::MediaChanged => ExitStatus::MediaChanged,
            Category::Miscompare { .. } => ExitStatus::Miscompare,
            Category::TimedOut => ExitStatus::Timeout,
            Category::SubmissionOutOfResources | Category::Other => ExitStatus::Other,
        }
    }
}

/// The condition that ended a session early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub op: &'static str,
    /// Device block address involved.
    pub block: u64,
    pub category: Category,
    pub detail: Option<String>,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at block {}: {}", self.op, self.block, self.category.name())?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Failures before any block moves.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("cannot determine the transfer length: {0}")]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl From<&SessionError> for ExitStatus {
    fn from(e: &SessionError) -> Self {
        match e {
            SessionError::Config(_) => ExitStatus::Syntax,
            SessionError::Open(_) | SessionError::Io(_) => ExitStatus::FileError,
            SessionError::Capacity(CapacityError::Failed { category, .. }) => {
                ExitStatus::from(*category)
            },
            SessionError::Capacity(CapacityError::RetryableMediaChanged) => {
                ExitStatus::MediaChanged
            },
            SessionError::Capacity(_) => ExitStatus::Other,
        }
    }
}
