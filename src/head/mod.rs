// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The in-memory, append-only head block: deduplicating dictionaries for
//! the referential pprof entities, a label index over profile series, and
//! the flush path that freezes everything into an immutable on-disk block.

mod delta;
mod dictionaries;
mod index;
mod label_cache;
mod rewriter;
pub mod schema;
mod table;

pub use index::ProfileWithLabels;

use self::delta::DeltaProfiles;
use self::dictionaries::{
    FunctionsHelper, LocationsHelper, MappingsHelper, ProfilesHelper, StacktracesHelper,
    StringsHelper,
};
use self::index::ProfilesIndex;
use self::label_cache::LabelCache;
use self::rewriter::Rewriter;
use self::schema::{ProfileRow, Sample, SampleLabel, Stacktrace};
use self::table::{DedupTable, Table};
use crate::block::{
    BlockFile, BlockMeta, ParquetFileMeta, TsdbFileMeta, INDEX_FILENAME, PARQUET_SUFFIX,
};
use crate::collections::{FxHashMap, FxIndexMap};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    time_from_unix_nanos, Fingerprint, LabelPair, Labels, LabelsBuilder, Matcher, ProfileType,
    Time, parse_matchers, LABEL_NAME_METRIC, LABEL_NAME_PERIOD_TYPE, LABEL_NAME_PERIOD_UNIT,
    LABEL_NAME_PROFILE_TYPE, LABEL_NAME_TYPE, LABEL_NAME_UNIT,
};
use crate::persist::{
    FunctionsPersister, LocationsPersister, MappingsPersister, ProfilesPersister,
    StacktracesPersister, StringsPersister,
};
use crate::pprof;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

const PATH_HEAD: &str = "head";
const PATH_LOCAL: &str = "local";
const WATCHDOG_TICK: Duration = Duration::from_secs(5);

type StringsTable = DedupTable<StringsHelper, StringsPersister>;
type MappingsTable = DedupTable<MappingsHelper, MappingsPersister>;
type FunctionsTable = DedupTable<FunctionsHelper, FunctionsPersister>;
type LocationsTable = DedupTable<LocationsHelper, LocationsPersister>;
type StacktracesTable = DedupTable<StacktracesHelper, StacktracesPersister>;
type ProfilesTable = DedupTable<ProfilesHelper, ProfilesPersister>;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Open = 0,
    Flushing = 1,
    Closed = 2,
}

/// Parameters of a profile selection query. Times are inclusive
/// milliseconds since the unix epoch.
#[derive(Clone, Debug)]
pub struct SelectProfilesRequest {
    pub label_selector: String,
    pub profile_type: ProfileType,
    pub start: Time,
    pub end: Time,
}

/// Aggregation of selected rows by stack trace; function names are
/// materialized once and referenced by position.
#[derive(Clone, Debug, Default)]
pub struct MergeStacktracesResult {
    pub stacktraces: Vec<StacktraceSample>,
    pub function_names: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct StacktraceSample {
    pub function_ids: Vec<i32>,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub timestamp: Time,
    pub value: f64,
}

#[derive(Clone, Debug)]
pub struct Series {
    pub labels: Labels,
    pub points: Vec<Point>,
}

pub struct Head {
    head_path: PathBuf,
    local_path: PathBuf,
    max_block_bytes: u64,
    max_block_duration: Duration,

    meta: RwLock<BlockMeta>,
    state: AtomicU8,

    strings: Arc<StringsTable>,
    mappings: Arc<MappingsTable>,
    functions: Arc<FunctionsTable>,
    locations: Arc<LocationsTable>,
    stacktraces: Arc<StacktracesTable>,
    profiles: Arc<ProfilesTable>,
    tables: Vec<Arc<dyn Table>>,

    index: ProfilesIndex,
    delta: DeltaProfiles,
    label_cache: Mutex<LabelCache>,
    total_samples: AtomicU64,

    flush_tx: watch::Sender<bool>,
    flush_rx: watch::Receiver<bool>,
    stop: CancellationToken,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Head {
    /// Creates a head and its on-disk scratch directory, and spawns the
    /// background size/age watchdog. Must be called within a tokio
    /// runtime.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let meta = BlockMeta::new();
        let ulid = meta.ulid.to_string();
        let head_path = config.data_path.join(PATH_HEAD).join(&ulid);
        let local_path = config.data_path.join(PATH_LOCAL).join(&ulid);
        fs::create_dir_all(&head_path)?;

        let strings = Arc::new(StringsTable::default());
        let mappings = Arc::new(MappingsTable::default());
        let functions = Arc::new(FunctionsTable::default());
        let locations = Arc::new(LocationsTable::default());
        let stacktraces = Arc::new(StacktracesTable::default());
        let profiles = Arc::new(ProfilesTable::default());
        let tables: Vec<Arc<dyn Table>> = vec![
            strings.clone(),
            mappings.clone(),
            functions.clone(),
            locations.clone(),
            stacktraces.clone(),
            profiles.clone(),
        ];
        for tbl in &tables {
            tbl.init(&head_path, &config.parquet)?;
        }

        let (flush_tx, flush_rx) = watch::channel(false);
        let head = Arc::new(Self {
            head_path,
            local_path,
            max_block_bytes: config.max_block_bytes,
            max_block_duration: config.max_block_duration,
            meta: RwLock::new(meta),
            state: AtomicU8::new(State::Open as u8),
            strings,
            mappings,
            functions,
            locations,
            stacktraces,
            profiles,
            tables,
            index: ProfilesIndex::new(),
            delta: DeltaProfiles::new(),
            label_cache: Mutex::new(LabelCache::new()),
            total_samples: AtomicU64::new(0),
            flush_tx,
            flush_rx,
            stop: CancellationToken::new(),
            watchdog: Mutex::new(None),
        });
        *head.watchdog.lock() = Some(spawn_watchdog(&head));
        info!(%ulid, path = %head.head_path.display(), "head created");
        Ok(head)
    }

    /// Total estimated in-memory size, the sum of all table sizes.
    pub fn size(&self) -> u64 {
        self.tables.iter().map(|table| table.size()).sum()
    }

    /// Whether the head holds any profile with a timestamp overlapping
    /// `[start, end]`.
    pub fn in_range(&self, start: Time, end: Time) -> bool {
        self.meta.read().in_range(start, end)
    }

    /// Resolves once the watchdog decides the head should be flushed.
    pub fn flush_signal(&self) -> watch::Receiver<bool> {
        self.flush_rx.clone()
    }

    pub fn block_ulid(&self) -> ulid::Ulid {
        self.meta.read().ulid
    }

    /// Ingests one pprof payload under `external_labels`, fanning its
    /// samples out into one profile row per sample type. Dictionaries are
    /// visited in dependency order so every stored reference is a head ID.
    pub fn ingest(
        &self,
        mut profile: pprof::Profile,
        id: Uuid,
        external_labels: &[LabelPair],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        if self.state.load(Ordering::Acquire) != State::Open as u8 {
            return Err(Error::Closed);
        }
        validate_profile(&profile)?;

        let metric_name = Labels::from_pairs(external_labels.iter().cloned())
            .get(LABEL_NAME_METRIC)
            .unwrap_or_default()
            .to_string();
        let (labels_per_type, fingerprints) = labels_for_profile(&profile, external_labels);

        let mut rewriter = Rewriter::default();

        self.strings.ingest(&mut profile.string_table, &mut rewriter);
        check_cancelled(cancel)?;
        self.mappings.ingest(&mut profile.mappings, &mut rewriter);
        check_cancelled(cancel)?;
        self.functions.ingest(&mut profile.functions, &mut rewriter);
        check_cancelled(cancel)?;
        self.locations.ingest(&mut profile.locations, &mut rewriter);
        check_cancelled(cancel)?;

        let samples_per_type = self.convert_samples(&mut rewriter, &mut profile.samples);
        check_cancelled(cancel)?;

        // Row-level string references are translated before the rows are
        // shared with the index.
        rewriter.strings.rewrite(&mut profile.drop_frames);
        rewriter.strings.rewrite(&mut profile.keep_frames);
        rewriter.strings.rewrite(&mut profile.default_sample_type);
        for comment in &mut profile.comment {
            rewriter.strings.rewrite(comment);
        }

        let mut samples_ingested = 0u64;
        for (type_idx, samples) in samples_per_type.into_iter().enumerate() {
            let row = ProfileRow {
                id,
                series_fingerprint: fingerprints[type_idx],
                samples,
                drop_frames: profile.drop_frames,
                keep_frames: profile.keep_frames,
                time_nanos: profile.time_nanos,
                duration_nanos: profile.duration_nanos,
                comments: profile.comment.clone(),
                default_sample_type: profile.default_sample_type,
            };

            let Some(row) = self
                .delta
                .compute_delta(row, &labels_per_type[type_idx])
            else {
                continue;
            };

            samples_ingested += row.samples.len() as u64;
            let row = Arc::new(row);
            let mut batch = [Arc::clone(&row)];
            self.profiles.ingest(&mut batch, &mut rewriter);
            self.index
                .add(row, &labels_per_type[type_idx], &metric_name);
        }

        if samples_ingested == 0 {
            return Ok(());
        }

        self.meta
            .write()
            .observe_time(time_from_unix_nanos(profile.time_nanos));
        self.total_samples
            .fetch_add(samples_ingested, Ordering::Relaxed);
        Ok(())
    }

    /// Translates sample labels, deduplicates one stack trace per sample
    /// and fans the value vector out into per-type sample lists.
    fn convert_samples(
        &self,
        rewriter: &mut Rewriter,
        samples: &mut [pprof::Sample],
    ) -> Vec<Vec<Sample>> {
        if samples.is_empty() {
            return Vec::new();
        }
        let type_count = samples[0].values.len();

        let sample_labels: Vec<Arc<[SampleLabel]>> = {
            let mut cache = self.label_cache.lock();
            samples
                .iter()
                .map(|sample| cache.rewrite_labels(&rewriter.strings, &sample.labels))
                .collect()
        };

        let mut stacktraces: Vec<Stacktrace> = samples
            .iter_mut()
            .map(|sample| Stacktrace {
                location_ids: mem::take(&mut sample.location_ids),
            })
            .collect();
        self.stacktraces.ingest(&mut stacktraces, rewriter);

        (0..type_count)
            .map(|type_idx| {
                samples
                    .iter()
                    .enumerate()
                    .map(|(sample_idx, sample)| Sample {
                        stacktrace_id: rewriter.stacktraces.get(sample_idx as u64),
                        value: sample.values[type_idx],
                        labels: Arc::clone(&sample_labels[sample_idx]),
                    })
                    .collect()
            })
            .collect()
    }

    /// Per-series, timestamp-ordered rows matching the request's selector,
    /// profile type and time range.
    pub fn select_matching_profiles(
        &self,
        request: &SelectProfilesRequest,
    ) -> Result<Vec<ProfileWithLabels>> {
        let mut matchers = parse_selector(&request.label_selector)?;
        matchers.push(request.profile_type.as_matcher());
        Ok(self
            .index
            .select_profiles(&matchers, request.start, request.end))
    }

    /// Sums the selected rows per stack trace. Holds the stacktrace,
    /// location, function and string reader locks for the whole traversal,
    /// which keeps ingest out until the result is built.
    pub fn merge_by_stacktraces(
        &self,
        rows: impl IntoIterator<Item = ProfileWithLabels>,
    ) -> Result<MergeStacktracesResult> {
        let stacktraces = self.stacktraces.read();
        let locations = self.locations.read();
        let functions = self.functions.read();
        let strings = self.strings.read();

        // Insertion order keeps the result deterministic across runs.
        let mut merged: FxIndexMap<u64, StacktraceSample> = FxIndexMap::default();
        let mut positions: FxHashMap<i64, i32> = FxHashMap::default();
        let mut names: Vec<String> = Vec::new();

        for profile in rows {
            for sample in &profile.row.samples {
                if sample.value == 0 {
                    continue;
                }
                if let Some(existing) = merged.get_mut(&sample.stacktrace_id) {
                    existing.value += sample.value;
                    continue;
                }
                let trace = &stacktraces.slice[sample.stacktrace_id as usize];
                let mut function_ids = Vec::with_capacity(2 * trace.location_ids.len());
                for location_id in &trace.location_ids {
                    for line in &locations.slice[*location_id as usize].lines {
                        let name_id = functions.slice[line.function_id as usize].name;
                        let position = *positions.entry(name_id).or_insert_with(|| {
                            names.push(strings.slice[name_id as usize].clone());
                            (names.len() - 1) as i32
                        });
                        function_ids.push(position);
                    }
                }
                merged.insert(
                    sample.stacktrace_id,
                    StacktraceSample {
                        function_ids,
                        value: sample.value,
                    },
                );
            }
        }

        Ok(MergeStacktracesResult {
            stacktraces: merged.into_values().collect(),
            function_names: names,
        })
    }

    /// Groups the selected rows by the projection of their series labels
    /// onto `by`; each group becomes one series of `(timestamp, total)`
    /// points. Series are in canonical label order, points in timestamp
    /// order.
    pub fn merge_by_labels(
        &self,
        rows: impl IntoIterator<Item = ProfileWithLabels>,
        by: &[&str],
    ) -> Result<Vec<Series>> {
        let mut projected: FxHashMap<Fingerprint, Labels> = FxHashMap::default();
        let mut grouped: BTreeMap<Labels, Vec<Point>> = BTreeMap::new();

        for profile in rows {
            let labels = projected
                .entry(profile.fingerprint)
                .or_insert_with(|| profile.labels.with_names(by))
                .clone();
            grouped.entry(labels).or_default().push(Point {
                timestamp: profile.timestamp(),
                value: profile.total() as f64,
            });
        }

        Ok(grouped
            .into_iter()
            .map(|(labels, mut points)| {
                // The projection can interleave rows of distinct source
                // series, so group points need a final sort.
                points.sort_by_key(|point| point.timestamp);
                Series { labels, points }
            })
            .collect())
    }

    pub fn label_names(&self) -> Result<Vec<String>> {
        Ok(self.index.label_names())
    }

    pub fn label_values(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.index.label_values(name))
    }

    /// All profile types stored in this head, parsed from the
    /// `__profile_type__` label.
    pub fn profile_types(&self) -> Result<Vec<ProfileType>> {
        self.index
            .label_values(LABEL_NAME_PROFILE_TYPE)
            .iter()
            .map(|value| ProfileType::parse(value))
            .collect()
    }

    /// The label sets of every series matching any of the selectors,
    /// deduplicated by fingerprint and sorted in canonical label order.
    pub fn series(&self, selectors: &[String]) -> Result<Vec<Labels>> {
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut out: Vec<Labels> = Vec::new();
        for selector in selectors {
            let matchers = parse_selector(selector)?;
            self.index.for_matching_labels(&matchers, |labels, fp| {
                if seen.insert(fp) {
                    out.push(labels.clone());
                }
                Ok(())
            })?;
        }
        out.sort();
        Ok(out)
    }

    /// Freezes the head into an immutable block: index, one columnar file
    /// per table, and the sorted file manifest in `meta.json`, then
    /// atomically renames the scratch directory into place. Terminal; an
    /// empty head just removes its scratch directory.
    pub fn flush(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                State::Open as u8,
                State::Flushing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::Closed);
        }
        self.stop.cancel();

        if self.profiles.rows() == 0 {
            info!("head empty - no block written");
            fs::remove_dir_all(&self.head_path)?;
            self.state.store(State::Closed as u8, Ordering::Release);
            return Ok(());
        }

        let mut files = vec![BlockFile::default(); self.tables.len() + 1];

        let index_path = self.head_path.join(INDEX_FILENAME);
        self.index.write_to(&index_path)?;
        files[0].rel_path = INDEX_FILENAME.to_string();
        files[0].tsdb = Some(TsdbFileMeta {
            num_series: self.index.total_series.load(Ordering::Relaxed),
        });
        if let Ok(stat) = fs::metadata(&index_path) {
            files[0].size_bytes = stat.len();
        }

        for (idx, table) in self.tables.iter().enumerate() {
            let (num_rows, num_row_groups) = table.flush().map_err(|err| {
                Error::Persister(format!("flushing of table {}: {err}", table.name()))
            })?;
            debug!(table = table.name(), num_rows, num_row_groups, "table flushed");
            files[idx + 1].parquet = Some(ParquetFileMeta {
                num_rows,
                num_row_groups,
            });
        }

        for (idx, table) in self.tables.iter().enumerate() {
            table.close()?;
            files[idx + 1].rel_path = format!("{}{}", table.name(), PARQUET_SUFFIX);
            if let Ok(stat) = fs::metadata(self.head_path.join(&files[idx + 1].rel_path)) {
                files[idx + 1].size_bytes = stat.len();
            }
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        {
            let mut meta = self.meta.write();
            meta.files = files;
            meta.stats.num_series = self.index.total_series.load(Ordering::Relaxed);
            meta.stats.num_profiles = self.index.total_profiles.load(Ordering::Relaxed);
            meta.stats.num_samples = self.total_samples.load(Ordering::Relaxed);
            meta.write_to_file(&self.head_path)?;
        }

        if let Some(parent) = self.local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.head_path, &self.local_path)?;
        self.state.store(State::Closed as u8, Ordering::Release);
        info!(block_path = %self.local_path.display(), "head successfully written to block");
        Ok(())
    }

    /// Stops the watchdog and releases persister resources without
    /// flushing. Pending data is dropped with the head.
    pub fn close(&self) -> Result<()> {
        self.stop.cancel();
        self.watchdog.lock().take();
        let _ = self.state.compare_exchange(
            State::Open as u8,
            State::Closed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let mut first_err = None;
        for table in &self.tables {
            if let Err(err) = table.close() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current per-table row counts and global counters.
    pub fn stats(&self) -> HeadStats {
        HeadStats {
            strings: self.strings.rows(),
            mappings: self.mappings.rows(),
            functions: self.functions.rows(),
            locations: self.locations.rows(),
            stacktraces: self.stacktraces.rows(),
            profiles: self.profiles.rows(),
            series: self.index.total_series.load(Ordering::Relaxed),
            samples: self.total_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadStats {
    pub strings: usize,
    pub mappings: usize,
    pub functions: usize,
    pub locations: usize,
    pub stacktraces: usize,
    pub profiles: usize,
    pub series: u64,
    pub samples: u64,
}

fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(Error::Cancelled),
        _ => Ok(()),
    }
}

fn parse_selector(selector: &str) -> Result<Vec<Matcher>> {
    let trimmed = selector.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(Vec::new());
    }
    parse_matchers(trimmed)
}

/// Single cooperative task per head: wakes every five seconds to compare
/// the head size against the flush threshold, fires once the maximum block
/// age is reached, and exits silently on stop.
fn spawn_watchdog(head: &Arc<Head>) -> JoinHandle<()> {
    let head = Arc::clone(head);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(WATCHDOG_TICK);
        let forced = tokio::time::sleep(head.max_block_duration);
        tokio::pin!(forced);
        loop {
            tokio::select! {
                _ = &mut forced => {
                    debug!("max block duration reached, flush to disk");
                    let _ = head.flush_tx.send(true);
                    return;
                }
                _ = tick.tick() => {
                    let current_size = head.size();
                    if current_size > head.max_block_bytes {
                        debug!(
                            max_size = head.max_block_bytes,
                            current_head_size = current_size,
                            "max block bytes reached, flush to disk"
                        );
                        let _ = head.flush_tx.send(true);
                        return;
                    }
                }
                _ = head.stop.cancelled() => return,
            }
        }
    })
}

/// The profile must be internally consistent before any table is touched:
/// value vectors sized to the sample types, and every string or entity
/// reference resolvable within the payload itself.
fn validate_profile(profile: &pprof::Profile) -> Result<()> {
    let strings = profile.string_table.len() as i64;
    let string_in_range = |id: i64| id >= 0 && id < strings;

    if profile.string_table.is_empty() {
        return Err(Error::invalid("empty string table"));
    }
    if profile.sample_types.is_empty() && !profile.samples.is_empty() {
        return Err(Error::invalid("samples without sample types"));
    }
    for value_type in profile
        .sample_types
        .iter()
        .chain(profile.period_type.iter())
    {
        if !string_in_range(value_type.r#type) || !string_in_range(value_type.unit) {
            return Err(Error::invalid("value type string out of range"));
        }
    }
    for id in [
        profile.drop_frames,
        profile.keep_frames,
        profile.default_sample_type,
    ]
    .into_iter()
    .chain(profile.comment.iter().copied())
    {
        if !string_in_range(id) {
            return Err(Error::invalid("string index out of range"));
        }
    }

    for mapping in &profile.mappings {
        if !string_in_range(mapping.filename) || !string_in_range(mapping.build_id) {
            return Err(Error::invalid("mapping string out of range"));
        }
    }
    for function in &profile.functions {
        if !string_in_range(function.name)
            || !string_in_range(function.system_name)
            || !string_in_range(function.filename)
        {
            return Err(Error::invalid("function string out of range"));
        }
    }

    let mapping_ids: HashSet<u64> = profile.mappings.iter().map(|m| m.id).collect();
    let function_ids: HashSet<u64> = profile.functions.iter().map(|f| f.id).collect();
    let location_ids: HashSet<u64> = profile.locations.iter().map(|l| l.id).collect();

    for location in &profile.locations {
        if location.mapping_id != 0 && !mapping_ids.contains(&location.mapping_id) {
            return Err(Error::invalid(format!(
                "location {} references unknown mapping {}",
                location.id, location.mapping_id
            )));
        }
        for line in &location.lines {
            if !function_ids.contains(&line.function_id) {
                return Err(Error::invalid(format!(
                    "location {} references unknown function {}",
                    location.id, line.function_id
                )));
            }
        }
    }

    for sample in &profile.samples {
        if sample.values.len() != profile.sample_types.len() {
            return Err(Error::invalid(format!(
                "expected {} sample values, got {}",
                profile.sample_types.len(),
                sample.values.len()
            )));
        }
        for location_id in &sample.location_ids {
            if !location_ids.contains(location_id) {
                return Err(Error::invalid(format!(
                    "sample references unknown location {location_id}"
                )));
            }
        }
        for label in &sample.labels {
            if !string_in_range(label.key)
                || !string_in_range(label.str)
                || !string_in_range(label.num_unit)
            {
                return Err(Error::invalid("sample label string out of range"));
            }
        }
    }
    Ok(())
}

/// Builds the per-sample-type series label sets: external labels plus the
/// synthetic period/type/unit labels and the canonical profile type.
fn labels_for_profile(
    profile: &pprof::Profile,
    external_labels: &[LabelPair],
) -> (Vec<Labels>, Vec<Fingerprint>) {
    let string = |id: i64| profile.string_table[id as usize].as_str();
    let mut builder = LabelsBuilder::from_labels(external_labels);
    let metric_name = builder
        .labels()
        .get(LABEL_NAME_METRIC)
        .unwrap_or_default()
        .to_string();

    let (period_type, period_unit) = match &profile.period_type {
        Some(period) => {
            let period_type = string(period.r#type);
            let period_unit = string(period.unit);
            builder.set(LABEL_NAME_PERIOD_TYPE, period_type);
            builder.set(LABEL_NAME_PERIOD_UNIT, period_unit);
            (period_type, period_unit)
        }
        None => ("", ""),
    };

    let mut labels_per_type = Vec::with_capacity(profile.sample_types.len());
    let mut fingerprints = Vec::with_capacity(profile.sample_types.len());
    for value_type in &profile.sample_types {
        let sample_type = string(value_type.r#type);
        let sample_unit = string(value_type.unit);
        builder.set(LABEL_NAME_TYPE, sample_type);
        builder.set(LABEL_NAME_UNIT, sample_unit);
        builder.set(
            LABEL_NAME_PROFILE_TYPE,
            format!("{metric_name}:{sample_type}:{sample_unit}:{period_type}:{period_unit}"),
        );
        let labels = builder.labels();
        fingerprints.push(labels.fingerprint());
        labels_per_type.push(labels);
    }
    (labels_per_type, fingerprints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_profile() -> pprof::Profile {
        pprof::Profile {
            string_table: vec!["".into(), "a".into(), "b".into()],
            sample_types: vec![pprof::ValueType { r#type: 2, unit: 1 }],
            period_type: Some(pprof::ValueType { r#type: 2, unit: 1 }),
            functions: vec![pprof::Function {
                name: 1,
                ..Default::default()
            }],
            locations: vec![pprof::Location {
                id: 0,
                mapping_id: 0,
                lines: vec![pprof::Line {
                    function_id: 0,
                    line: 0,
                }],
                ..Default::default()
            }],
            samples: vec![pprof::Sample {
                location_ids: vec![0],
                values: vec![5],
                labels: vec![],
            }],
            time_nanos: 1_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn series_labels_include_synthetic_names() {
        let profile = base_profile();
        let external = [LabelPair::new(LABEL_NAME_METRIC, "cpu")];
        let (labels, fingerprints) = labels_for_profile(&profile, &external);

        assert_eq!(labels.len(), 1);
        assert_eq!(fingerprints.len(), 1);
        let series = &labels[0];
        assert_eq!(series.get(LABEL_NAME_METRIC), Some("cpu"));
        assert_eq!(series.get(LABEL_NAME_PERIOD_TYPE), Some("b"));
        assert_eq!(series.get(LABEL_NAME_PERIOD_UNIT), Some("a"));
        assert_eq!(series.get(LABEL_NAME_TYPE), Some("b"));
        assert_eq!(series.get(LABEL_NAME_UNIT), Some("a"));
        assert_eq!(series.get(LABEL_NAME_PROFILE_TYPE), Some("cpu:b:a:b:a"));
        assert_eq!(fingerprints[0], series.fingerprint());
    }

    #[test]
    fn fan_out_produces_one_label_set_per_sample_type() {
        let mut profile = base_profile();
        profile.sample_types = vec![
            pprof::ValueType { r#type: 1, unit: 2 },
            pprof::ValueType { r#type: 2, unit: 1 },
        ];
        let (labels, fingerprints) = labels_for_profile(&profile, &[]);
        assert_eq!(labels.len(), 2);
        assert_ne!(fingerprints[0], fingerprints[1]);
    }

    #[test]
    fn validation_rejects_bad_payloads() {
        let mut missing_values = base_profile();
        missing_values.samples[0].values.clear();
        assert!(matches!(
            validate_profile(&missing_values),
            Err(Error::Invalid(_))
        ));

        let mut bad_string = base_profile();
        bad_string.sample_types[0].r#type = 99;
        assert!(matches!(
            validate_profile(&bad_string),
            Err(Error::Invalid(_))
        ));

        let mut dangling_location = base_profile();
        dangling_location.samples[0].location_ids = vec![17];
        assert!(matches!(
            validate_profile(&dangling_location),
            Err(Error::Invalid(_))
        ));

        let mut dangling_function = base_profile();
        dangling_function.locations[0].lines[0].function_id = 3;
        assert!(matches!(
            validate_profile(&dangling_function),
            Err(Error::Invalid(_))
        ));

        assert!(validate_profile(&base_profile()).is_ok());
    }
}
