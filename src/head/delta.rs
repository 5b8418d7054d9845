// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::schema::{ProfileRow, SampleLabel};
use crate::collections::FxHashMap;
use crate::model::{Fingerprint, Labels, LABEL_NAME_METRIC, LABEL_NAME_TYPE};
use parking_lot::Mutex;
use std::sync::Arc;

const SHARD_COUNT: usize = 16;

/// Sample types whose values are cumulative snapshots; their series are
/// stored as deltas against the previous profile of the same series.
const CUMULATIVE_TYPES: &[(&str, &str)] = &[
    ("memory", "alloc_objects"),
    ("memory", "alloc_space"),
];

type Baseline = FxHashMap<(u64, Arc<[SampleLabel]>), i64>;

/// Per-series cache of the last accepted cumulative profile, sharded by
/// series fingerprint. Baselines are discarded with the head.
pub(crate) struct DeltaProfiles {
    shards: Vec<Mutex<FxHashMap<Fingerprint, Baseline>>>,
}

impl DeltaProfiles {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
        }
    }

    /// Passes non-cumulative rows through unchanged. For cumulative rows,
    /// returns the elementwise difference against the series baseline and
    /// stores the incoming row as the new baseline; the first row of a
    /// series is swallowed entirely.
    pub(crate) fn compute_delta(
        &self,
        mut row: ProfileRow,
        labels: &Labels,
    ) -> Option<ProfileRow> {
        if !is_cumulative(labels) {
            return Some(row);
        }

        let shard = &self.shards[row.series_fingerprint as usize % SHARD_COUNT];
        let mut baselines = shard.lock();

        let next_baseline: Baseline = row
            .samples
            .iter()
            .map(|sample| {
                (
                    (sample.stacktrace_id, Arc::clone(&sample.labels)),
                    sample.value,
                )
            })
            .collect();

        match baselines.insert(row.series_fingerprint, next_baseline) {
            None => None,
            Some(previous) => {
                // Samples are matched on (stacktrace, label set). A sample
                // seen only in the baseline is not emitted; subtraction
                // saturates so restarts never yield negative values.
                for sample in &mut row.samples {
                    let key = (sample.stacktrace_id, Arc::clone(&sample.labels));
                    if let Some(prev_value) = previous.get(&key) {
                        sample.value = sample.value.saturating_sub(*prev_value).max(0);
                    }
                }
                Some(row)
            }
        }
    }
}

fn is_cumulative(labels: &Labels) -> bool {
    let Some(name) = labels.get(LABEL_NAME_METRIC) else {
        return false;
    };
    let Some(sample_type) = labels.get(LABEL_NAME_TYPE) else {
        return false;
    };
    CUMULATIVE_TYPES
        .iter()
        .any(|(metric, typ)| *metric == name && *typ == sample_type)
}
