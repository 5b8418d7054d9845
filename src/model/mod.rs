// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod labels;
mod selector;

pub use labels::*;
pub use selector::*;

use crate::error::{Error, Result};
use std::fmt;

/// Milliseconds since the unix epoch, the resolution used for block time
/// ranges and query windows.
pub type Time = i64;

pub fn time_from_unix_nanos(nanos: i64) -> Time {
    nanos / 1_000_000
}

/// Identity of a series type, rendered as
/// `metric:type:unit:periodType:periodUnit`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProfileType {
    pub name: String,
    pub sample_type: String,
    pub sample_unit: String,
    pub period_type: String,
    pub period_unit: String,
}

impl ProfileType {
    pub fn parse(selector: &str) -> Result<Self> {
        let parts: Vec<&str> = selector.split(':').collect();
        let [name, sample_type, sample_unit, period_type, period_unit] = parts.as_slice() else {
            return Err(Error::invalid(format!(
                "profile type selector {selector:?} must have 5 parts"
            )));
        };
        Ok(Self {
            name: name.to_string(),
            sample_type: sample_type.to_string(),
            sample_unit: sample_unit.to_string(),
            period_type: period_type.to_string(),
            period_unit: period_unit.to_string(),
        })
    }

    /// The matcher pinning a query to this profile type.
    pub fn as_matcher(&self) -> Matcher {
        Matcher::must(
            MatchType::Eq,
            LABEL_NAME_PROFILE_TYPE,
            self.to_string(),
        )
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.name, self.sample_type, self.sample_unit, self.period_type, self.period_unit
        )
    }
}
