// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// A config switch.
///
/// Written back as `Yes`/`No`. Read from any of `Yes`/`No`, `On`/`Off`,
/// `true`/`false` (quoted or plain YAML booleans, any case) and `1`/`0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YesNo {
    Yes,
    #[default]
    No,
}

impl YesNo {
    pub fn as_bool(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}

impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        if b { YesNo::Yes } else { YesNo::No }
    }
}

impl From<YesNo> for bool {
    fn from(v: YesNo) -> Self {
        v.as_bool()
    }
}

impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.as_bool() { "Yes" } else { "No" })
    }
}

impl Serialize for YesNo {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSwitch {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl<'de> Deserialize<'de> for YesNo {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match RawSwitch::deserialize(d)? {
            RawSwitch::Bool(b) => Ok(b.into()),
            RawSwitch::Int(0) => Ok(YesNo::No),
            RawSwitch::Int(1) => Ok(YesNo::Yes),
            RawSwitch::Int(n) => Err(de::Error::custom(format!(
                "expected 0 or 1 for a switch, got {n}"
            ))),
            RawSwitch::Str(s) => match s.to_ascii_lowercase().as_str() {
                "yes" | "on" | "true" | "1" => Ok(YesNo::Yes),
                "no" | "off" | "false" | "0" => Ok(YesNo::No),
                _ => Err(de::Error::custom(format!(
                    "expected Yes or No for a switch, got {s:?}"
                ))),
            },
        }
    }
}
