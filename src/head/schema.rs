// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Head-local storage models. Unlike the pprof messages these carry
//! head-scoped IDs exclusively; the ingest pipeline rewrites every
//! per-profile reference before anything lands here.

use crate::model::Fingerprint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An ordered sequence of head location IDs, leaf first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Stacktrace {
    pub location_ids: Vec<u64>,
}

/// A pprof sample label, fully translated to head string IDs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleLabel {
    pub key: i64,
    pub str: i64,
    pub num: i64,
    pub num_unit: i64,
}

/// One value of one stack trace within a profile row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub stacktrace_id: u64,
    pub value: i64,
    pub labels: Arc<[SampleLabel]>,
}

/// A profile row: everything one pprof payload contributes to a single
/// series for a single sample type.
#[derive(Clone, Debug)]
pub struct ProfileRow {
    pub id: Uuid,
    pub series_fingerprint: Fingerprint,
    pub samples: Vec<Sample>,
    pub drop_frames: i64,
    pub keep_frames: i64,
    pub time_nanos: i64,
    pub duration_nanos: i64,
    pub comments: Vec<i64>,
    pub default_sample_type: i64,
}

impl ProfileRow {
    /// Sum of the row's sample values, the quantity a time series point
    /// reports for this row.
    pub fn total(&self) -> i64 {
        self.samples.iter().map(|sample| sample.value).sum()
    }
}
