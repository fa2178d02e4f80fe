// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::YesNo;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Geometry and range of the copy.
    pub transfer: TransferConfig,
    /// Where the blocks come from.
    pub input: EndpointConfig,
    /// Where the blocks go.
    pub output: EndpointConfig,
    /// Retry budgets and continue-on-error behaviour.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Process-level knobs that never reach a device.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Block geometry, queueing and the block range to move.
pub struct TransferConfig {
    #[serde(rename = "BlockSize")]
    /// Logical block size in bytes, shared by both sides.
    pub block_size: u32,

    #[serde(default, rename = "InputBlockSize", skip_serializing_if = "Option::is_none")]
    /// Optional input block size; must equal `BlockSize`.
    pub input_block_size: Option<u32>,

    #[serde(default, rename = "OutputBlockSize", skip_serializing_if = "Option::is_none")]
    /// Optional output block size; must equal `BlockSize`.
    pub output_block_size: Option<u32>,

    #[serde(default = "default_bpt", rename = "BlocksPerTransfer")]
    /// Blocks moved by one command.
    pub blocks_per_transfer: u32,

    #[serde(default = "default_queue_depth", rename = "QueueDepth")]
    /// Commands outstanding at once, reads and writes together.
    pub queue_depth: u32,

    #[serde(default, rename = "Skip")]
    /// Blocks skipped at the start of the input.
    pub skip: u64,

    #[serde(default, rename = "Seek")]
    /// Blocks skipped at the start of the output.
    pub seek: u64,

    #[serde(default = "auto_count", rename = "Count")]
    /// Blocks to move; negative means "work it out from the endpoints".
    pub count: i64,

    #[serde(default = "no", rename = "Verify")]
    /// Compare against the output with VERIFY instead of writing.
    pub verify: YesNo,

    #[serde(default = "no", rename = "Sparse")]
    /// Bypass all-zero blocks on seekable outputs.
    pub sparse: YesNo,

    #[serde(default = "no", rename = "DryRun")]
    /// Open and size everything, move nothing.
    pub dry_run: YesNo,

    #[serde(default = "no", rename = "ShowTime")]
    /// Report elapsed time and throughput.
    pub show_time: YesNo,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// How one side is opened and addressed.
pub struct EndpointConfig {
    #[serde(rename = "Path")]
    /// File, device, `-` for stdin/stdout or `.` for the null sink.
    pub path: String,

    #[serde(default = "default_cdb_size", rename = "CdbSize")]
    /// Preferred CDB size (6, 10, 12 or 16); widened when a command needs it.
    pub cdb_size: u8,

    #[serde(default = "no", rename = "Fua")]
    pub fua: YesNo,

    #[serde(default = "no", rename = "Dpo")]
    pub dpo: YesNo,

    #[serde(default = "no", rename = "Direct")]
    /// Open with O_DIRECT.
    pub direct: YesNo,

    #[serde(default = "no", rename = "Exclusive")]
    /// Open with O_EXCL.
    pub exclusive: YesNo,

    #[serde(default = "no", rename = "Sync")]
    /// Open with O_SYNC.
    pub sync: YesNo,

    #[serde(default = "no", rename = "Append")]
    /// Output only: append instead of positioned writes.
    pub append: YesNo,

    #[serde(default = "no", rename = "NoCreate")]
    /// Output only: fail when the file does not exist.
    pub no_create: YesNo,

    #[serde(default = "no", rename = "ForceRaw")]
    /// Drive a file or block device through the command path.
    pub force_raw: YesNo,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Retry budgets and continue-on-error.
pub struct RecoveryConfig {
    #[serde(default, rename = "ContinueOnError")]
    /// 0 stops on the first unrecovered error, 1 substitutes zeros, 2 adds a
    /// degraded single-block re-read, 3 asks for error correction on it.
    pub continue_on_error: u8,

    #[serde(default = "yes", rename = "CoeOnRead")]
    pub coe_on_read: YesNo,

    #[serde(default = "yes", rename = "CoeOnWrite")]
    pub coe_on_write: YesNo,

    #[serde(default = "default_ua_budget", rename = "UnitAttentionBudget")]
    pub unit_attention_budget: u32,

    #[serde(default = "default_aborted_budget", rename = "AbortedBudget")]
    pub aborted_budget: u32,

    #[serde(default, rename = "Retries")]
    /// Plain re-issues after a medium error, before continue-on-error.
    pub retries: u32,

    #[serde(default = "default_max_bad", rename = "MaxConsecutiveBad")]
    /// Bad blocks in a row tolerated under continue-on-error; 0 = no limit.
    pub max_consecutive_bad: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            continue_on_error: 0,
            coe_on_read: YesNo::Yes,
            coe_on_write: YesNo::Yes,
            unit_attention_budget: default_ua_budget(),
            aborted_budget: default_aborted_budget(),
            retries: 0,
            max_consecutive_bad: default_max_bad(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings.
pub struct RuntimeConfig {
    #[serde(default = "default_timeout", rename = "CommandTimeout", with = "serde_secs")]
    /// Per-command timeout handed to the transports.
    pub command_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_timeout(),
        }
    }
}

fn default_bpt() -> u32 {
    128
}
fn default_queue_depth() -> u32 {
    4
}
fn auto_count() -> i64 {
    -1
}
fn default_cdb_size() -> u8 {
    10
}
fn default_ua_budget() -> u32 {
    crate::recovery::policy::DEFAULT_UNIT_ATTENTION_BUDGET
}
fn default_aborted_budget() -> u32 {
    crate::recovery::policy::DEFAULT_ABORTED_BUDGET
}
fn default_max_bad() -> u32 {
    crate::recovery::policy::DEFAULT_MAX_CONSECUTIVE_BAD
}
fn default_timeout() -> Duration {
    crate::endpoint::DEFAULT_TIMEOUT
}
fn no() -> YesNo {
    YesNo::No
}
fn yes() -> YesNo {
    YesNo::Yes
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_yaml(&s)
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        let mut cfg: Config = serde_yaml::from_str(s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        let t = &mut self.transfer;
        ensure!(t.block_size > 0, "BlockSize must be > 0");
        for (name, bs) in [
            ("InputBlockSize", t.input_block_size),
            ("OutputBlockSize", t.output_block_size),
        ] {
            if let Some(bs) = bs {
                ensure!(
                    bs == t.block_size,
                    "{name} ({bs}) must equal BlockSize ({})",
                    t.block_size
                );
            }
        }
        ensure!(t.blocks_per_transfer >= 1, "BlocksPerTransfer must be >= 1");
        ensure!(t.queue_depth >= 1, "QueueDepth must be >= 1");
        if t.count < 0 {
            t.count = -1;
        }

        // Sparse output makes no sense when the output is only compared.
        if t.verify.as_bool() && t.sparse.as_bool() {
            t.sparse = YesNo::No;
        }

        for (name, side) in [("input", &self.input), ("output", &self.output)] {
            ensure!(!side.path.is_empty(), "{name} Path must not be empty");
            ensure!(
                matches!(side.cdb_size, 6 | 10 | 12 | 16),
                "{name} CdbSize must be 6, 10, 12 or 16"
            );
            ensure!(
                side.cdb_size != 6 || !(side.fua.as_bool() || side.dpo.as_bool()),
                "{name}: 6 byte CDBs cannot carry FUA/DPO"
            );
        }
        ensure!(
            !self.input.append.as_bool() && !self.input.no_create.as_bool(),
            "Append and NoCreate apply to the output only"
        );
        ensure!(
            self.recovery.continue_on_error <= 3,
            "ContinueOnError must be 0..=3"
        );
        ensure!(
            !self.runtime.command_timeout.is_zero(),
            "CommandTimeout must be > 0"
        );

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
