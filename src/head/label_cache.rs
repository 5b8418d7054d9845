// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::rewriter::StringConversionTable;
use super::schema::SampleLabel;
use crate::collections::FxHashMap;
use crate::pprof;
use std::sync::Arc;

/// Interns per-sample pprof label slices after translating them to head
/// string IDs, so every sample of the head carrying the same label set
/// shares one allocation. Lives for the head's lifetime.
pub(crate) struct LabelCache {
    sets: FxHashMap<Arc<[SampleLabel]>, ()>,
    empty: Arc<[SampleLabel]>,
}

impl LabelCache {
    pub(crate) fn new() -> Self {
        Self {
            sets: FxHashMap::default(),
            empty: Arc::from(Vec::new()),
        }
    }

    /// Translates the labels through this ingest call's string conversion
    /// table and returns the interned head-ID label set.
    pub(crate) fn rewrite_labels(
        &mut self,
        strings: &StringConversionTable,
        labels: &[pprof::Label],
    ) -> Arc<[SampleLabel]> {
        if labels.is_empty() {
            return Arc::clone(&self.empty);
        }

        let translated: Vec<SampleLabel> = labels
            .iter()
            .map(|label| SampleLabel {
                key: strings.get(label.key),
                str: strings.get(label.str),
                num: label.num,
                num_unit: strings.get(label.num_unit),
            })
            .collect();

        if let Some((existing, ())) = self.sets.get_key_value(translated.as_slice()) {
            return Arc::clone(existing);
        }
        let interned: Arc<[SampleLabel]> = Arc::from(translated);
        self.sets.insert(Arc::clone(&interned), ());
        interned
    }
}
