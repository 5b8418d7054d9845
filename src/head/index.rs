// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::schema::ProfileRow;
use crate::collections::FxHashMap;
use crate::error::Result;
use crate::model::{time_from_unix_nanos, Fingerprint, Labels, MatchType, Matcher, Time};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One selected profile row together with its series identity.
#[derive(Clone, Debug)]
pub struct ProfileWithLabels {
    pub row: Arc<ProfileRow>,
    pub labels: Arc<Labels>,
    pub fingerprint: Fingerprint,
}

impl ProfileWithLabels {
    pub fn timestamp(&self) -> Time {
        time_from_unix_nanos(self.row.time_nanos)
    }

    pub fn total(&self) -> i64 {
        self.row.total()
    }
}

struct ProfileSeries {
    labels: Arc<Labels>,
    profiles: Vec<Arc<ProfileRow>>,
}

#[derive(Default)]
struct IndexInner {
    series: FxHashMap<Fingerprint, ProfileSeries>,
    // name -> value -> sorted fingerprints. Doubles as the label
    // introspection surface, hence the ordered maps.
    postings: BTreeMap<String, BTreeMap<String, Vec<Fingerprint>>>,
}

/// Maps label matchers to series and to per-series, timestamp-ordered
/// profile rows.
pub(crate) struct ProfilesIndex {
    inner: RwLock<IndexInner>,
    pub(crate) total_series: AtomicU64,
    pub(crate) total_profiles: AtomicU64,
}

impl ProfilesIndex {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            total_series: AtomicU64::new(0),
            total_profiles: AtomicU64::new(0),
        }
    }

    /// Indexes a row under its series, creating the series on first sight.
    /// Rows within a series stay sorted by timestamp.
    pub(crate) fn add(&self, row: Arc<ProfileRow>, labels: &Labels, metric_name: &str) {
        let fingerprint = row.series_fingerprint;
        let timestamp = time_from_unix_nanos(row.time_nanos);
        let mut inner = self.inner.write();

        let series = inner.series.entry(fingerprint).or_insert_with(|| {
            self.total_series.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(metric_name, fingerprint, "new series");
            ProfileSeries {
                labels: Arc::new(labels.clone()),
                profiles: Vec::new(),
            }
        });
        debug_assert_eq!(
            series.labels.as_ref(),
            labels,
            "fingerprint collision between distinct label sets"
        );

        let pos = series
            .profiles
            .partition_point(|existing| time_from_unix_nanos(existing.time_nanos) <= timestamp);
        series.profiles.insert(pos, row);

        let labels = Arc::clone(&series.labels);
        for pair in labels.as_ref() {
            let values = inner.postings.entry(pair.name.clone()).or_default();
            let fingerprints = values.entry(pair.value.clone()).or_default();
            if let Err(pos) = fingerprints.binary_search(&fingerprint) {
                fingerprints.insert(pos, fingerprint);
            }
        }

        self.total_profiles.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the rows of every series matching all matchers, restricted
    /// to timestamps within `[start, end]`. Series appear in canonical
    /// label order, rows within a series in timestamp order.
    pub(crate) fn select_profiles(
        &self,
        matchers: &[Matcher],
        start: Time,
        end: Time,
    ) -> Vec<ProfileWithLabels> {
        let inner = self.inner.read();
        let mut matched: Vec<(&ProfileSeries, Fingerprint)> = Vec::new();
        for fingerprint in candidate_fingerprints(&inner, matchers) {
            let Some(series) = inner.series.get(&fingerprint) else {
                continue;
            };
            if matches_all(&series.labels, matchers) {
                matched.push((series, fingerprint));
            }
        }
        matched.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

        let mut out = Vec::new();
        for (series, fingerprint) in matched {
            let from = series
                .profiles
                .partition_point(|row| time_from_unix_nanos(row.time_nanos) < start);
            for row in &series.profiles[from..] {
                if time_from_unix_nanos(row.time_nanos) > end {
                    break;
                }
                out.push(ProfileWithLabels {
                    row: Arc::clone(row),
                    labels: Arc::clone(&series.labels),
                    fingerprint,
                });
            }
        }
        out
    }

    /// Visits the label set and fingerprint of every series matching all
    /// matchers, in unspecified order.
    pub(crate) fn for_matching_labels<F>(&self, matchers: &[Matcher], mut visit: F) -> Result<()>
    where
        F: FnMut(&Labels, Fingerprint) -> Result<()>,
    {
        let inner = self.inner.read();
        for fingerprint in candidate_fingerprints(&inner, matchers) {
            let Some(series) = inner.series.get(&fingerprint) else {
                continue;
            };
            if matches_all(&series.labels, matchers) {
                visit(&series.labels, fingerprint)?;
            }
        }
        Ok(())
    }

    pub(crate) fn label_names(&self) -> Vec<String> {
        self.inner.read().postings.keys().cloned().collect()
    }

    pub(crate) fn label_values(&self, name: &str) -> Vec<String> {
        self.inner
            .read()
            .postings
            .get(name)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Serializes the index snapshot to the block's index file.
    pub(crate) fn write_to(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        let mut series: Vec<IndexSeries> = inner
            .series
            .iter()
            .map(|(fingerprint, series)| IndexSeries {
                fingerprint: *fingerprint,
                labels: series.labels.as_ref().clone(),
                num_profiles: series.profiles.len() as u64,
                min_time: series
                    .profiles
                    .first()
                    .map_or(0, |row| time_from_unix_nanos(row.time_nanos)),
                max_time: series
                    .profiles
                    .last()
                    .map_or(0, |row| time_from_unix_nanos(row.time_nanos)),
            })
            .collect();
        series.sort_by(|a, b| a.labels.cmp(&b.labels));

        let file = IndexFile { version: 1, series };
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &file)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    series: Vec<IndexSeries>,
}

#[derive(Serialize, Deserialize)]
struct IndexSeries {
    fingerprint: Fingerprint,
    labels: Labels,
    num_profiles: u64,
    min_time: Time,
    max_time: Time,
}

/// Narrows the series scan through the postings of equality matchers where
/// possible; every candidate is still verified against the full matcher
/// set afterwards.
fn candidate_fingerprints(inner: &IndexInner, matchers: &[Matcher]) -> Vec<Fingerprint> {
    let mut narrowed: Option<Vec<Fingerprint>> = None;
    for matcher in matchers {
        if matcher.match_type != MatchType::Eq || matcher.value.is_empty() {
            continue;
        }
        let list = inner
            .postings
            .get(&matcher.name)
            .and_then(|values| values.get(&matcher.value))
            .cloned()
            .unwrap_or_default();
        narrowed = Some(match narrowed {
            None => list,
            Some(current) => current
                .into_iter()
                .filter(|fingerprint| list.binary_search(fingerprint).is_ok())
                .collect(),
        });
        if narrowed.as_ref().is_some_and(Vec::is_empty) {
            return Vec::new();
        }
    }
    narrowed.unwrap_or_else(|| inner.series.keys().copied().collect())
}

fn matches_all(labels: &Labels, matchers: &[Matcher]) -> bool {
    matchers
        .iter()
        .all(|matcher| matcher.matches(labels.get(&matcher.name).unwrap_or("")))
}
