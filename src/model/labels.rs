// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

/// Metric name label, as in Prometheus.
pub const LABEL_NAME_METRIC: &str = "__name__";
/// Sample type of the series, e.g. `cpu` or `alloc_objects`.
pub const LABEL_NAME_TYPE: &str = "__type__";
/// Sample unit of the series, e.g. `nanoseconds`.
pub const LABEL_NAME_UNIT: &str = "__unit__";
/// Period type of the originating profile.
pub const LABEL_NAME_PERIOD_TYPE: &str = "__period_type__";
/// Period unit of the originating profile.
pub const LABEL_NAME_PERIOD_UNIT: &str = "__period_unit__";
/// Canonical `metric:type:unit:periodType:periodUnit` identity of the series.
pub const LABEL_NAME_PROFILE_TYPE: &str = "__profile_type__";

/// 64-bit hash of a canonical label set, identifying a series.
pub type Fingerprint = u64;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A canonical label set: pairs sorted by name, no duplicate names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Labels(Vec<LabelPair>);

impl Labels {
    /// Builds a canonical set from arbitrary pairs. Later duplicates win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = LabelPair>) -> Self {
        let mut builder = LabelsBuilder::default();
        for pair in pairs {
            builder.set(pair.name, pair.value);
        }
        builder.labels()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|pair| pair.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelPair> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The series fingerprint: xxhash-64 over `name \xff value \xff` of each
    /// pair in canonical order.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Xxh64::new(0);
        for pair in &self.0 {
            hasher.update(pair.name.as_bytes());
            hasher.update(&[0xff]);
            hasher.update(pair.value.as_bytes());
            hasher.update(&[0xff]);
        }
        hasher.digest()
    }

    /// Projects the set onto the given names, keeping canonical order.
    pub fn with_names(&self, names: &[&str]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|pair| names.contains(&pair.name.as_str()))
                .cloned()
                .collect(),
        )
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, pair) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", pair.name, pair.value)?;
        }
        write!(f, "}}")
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a LabelPair;
    type IntoIter = std::slice::Iter<'a, LabelPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Accumulates label pairs, last write per name wins.
#[derive(Clone, Debug, Default)]
pub struct LabelsBuilder {
    pairs: BTreeMap<String, String>,
}

impl LabelsBuilder {
    pub fn from_labels(labels: &[LabelPair]) -> Self {
        let mut builder = Self::default();
        for pair in labels {
            builder.set(pair.name.clone(), pair.value.clone());
        }
        builder
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.insert(name.into(), value.into());
        self
    }

    pub fn del(&mut self, name: &str) -> &mut Self {
        self.pairs.remove(name);
        self
    }

    pub fn labels(&self) -> Labels {
        Labels(
            self.pairs
                .iter()
                .map(|(name, value)| LabelPair::new(name.clone(), value.clone()))
                .collect(),
        )
    }
}
