// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Block metadata: the `meta.json` document describing a flushed block's
//! identity, time range, stats and file manifest.

use crate::error::Result;
use crate::model::Time;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use ulid::Ulid;

pub const INDEX_FILENAME: &str = "index.tsdb";
pub const META_FILENAME: &str = "meta.json";
pub const PARQUET_SUFFIX: &str = ".parquet";

const META_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub ulid: Ulid,
    pub min_time: Time,
    pub max_time: Time,
    pub version: u32,
    pub stats: BlockStats,
    pub files: Vec<BlockFile>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    pub num_samples: u64,
    pub num_series: u64,
    pub num_profiles: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFile {
    pub rel_path: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parquet: Option<ParquetFileMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsdb: Option<TsdbFileMeta>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParquetFileMeta {
    pub num_rows: u64,
    pub num_row_groups: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsdbFileMeta {
    pub num_series: u64,
}

impl BlockMeta {
    pub fn new() -> Self {
        Self {
            ulid: Ulid::new(),
            min_time: Time::MAX,
            max_time: Time::MIN,
            version: META_VERSION,
            stats: BlockStats::default(),
            files: Vec::new(),
        }
    }

    /// Widens the time range to include `time`.
    pub fn observe_time(&mut self, time: Time) {
        if time < self.min_time {
            self.min_time = time;
        }
        if time > self.max_time {
            self.max_time = time;
        }
    }

    pub fn in_range(&self, start: Time, end: Time) -> bool {
        // An empty block (no time observed yet) overlaps nothing.
        self.min_time <= self.max_time && self.min_time <= end && self.max_time >= start
    }

    /// Writes `meta.json` into `dir` and returns its path.
    pub fn write_to_file(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(META_FILENAME);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(path)
    }

    pub fn read_from_file(dir: &Path) -> Result<Self> {
        let file = File::open(dir.join(META_FILENAME))?;
        Ok(serde_json::from_reader(file)?)
    }
}

impl Default for BlockMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_widens() {
        let mut meta = BlockMeta::new();
        meta.observe_time(50);
        meta.observe_time(10);
        meta.observe_time(30);
        assert_eq!(meta.min_time, 10);
        assert_eq!(meta.max_time, 50);

        assert!(meta.in_range(0, 20));
        assert!(meta.in_range(40, 100));
        assert!(!meta.in_range(51, 100));
        assert!(!meta.in_range(0, 9));
    }

    #[test]
    fn empty_meta_is_in_range_of_nothing() {
        let meta = BlockMeta::new();
        assert!(!meta.in_range(Time::MIN, Time::MAX));
    }

    #[test]
    fn meta_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = BlockMeta::new();
        meta.observe_time(1);
        meta.stats.num_profiles = 2;
        meta.files.push(BlockFile {
            rel_path: INDEX_FILENAME.to_string(),
            size_bytes: 123,
            parquet: None,
            tsdb: Some(TsdbFileMeta { num_series: 1 }),
        });

        meta.write_to_file(dir.path()).unwrap();
        let read = BlockMeta::read_from_file(dir.path()).unwrap();
        assert_eq!(read.ulid, meta.ulid);
        assert_eq!(read.stats.num_profiles, 2);
        assert_eq!(read.files.len(), 1);
        assert_eq!(read.files[0].rel_path, INDEX_FILENAME);
        assert!(read.files[0].tsdb.is_some());

        let raw = std::fs::read_to_string(dir.path().join(META_FILENAME)).unwrap();
        assert!(raw.contains("\"minTime\""), "camelCase field names: {raw}");
    }
}
