// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const USAGE: &str = "usage: sg_xfer <config.yaml> [logger.yaml]";

/// Positional command line: the transfer config and an optional logger
/// config, both resolved to absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: PathBuf,
    pub logger: Option<PathBuf>,
}

impl CliArgs {
    /// Parse everything after the program name.
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut args = args.into_iter();
        let config = match args.next() {
            Some(a) if a == "-h" || a == "--help" => bail!("{USAGE}"),
            Some(a) => resolve_config_path(&a)?,
            None => bail!("{USAGE}"),
        };
        let logger = args.next().map(|a| resolve_config_path(&a)).transpose()?;
        if let Some(extra) = args.next() {
            bail!("unexpected argument {extra:?}\n{USAGE}");
        }
        Ok(Self { config, logger })
    }
}

/// Absolute, canonical form of `rel`; the file must exist.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };
    abs.canonicalize()
        .with_context(|| format!("config file {} not found", abs.display()))
}
