// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a head block store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for blocks. In-progress heads live under
    /// `<data_path>/head/<ULID>`, finished blocks under
    /// `<data_path>/local/<ULID>`.
    pub data_path: PathBuf,

    /// Total estimated head size that triggers a flush signal
    /// (default: 1 GiB).
    pub max_block_bytes: u64,

    /// Maximum age of a head before a flush signal is raised
    /// (default: 1h).
    pub max_block_duration: Duration,

    /// Tuning for the parquet persisters.
    pub parquet: ParquetConfig,
}

#[derive(Debug, Clone)]
pub struct ParquetConfig {
    /// Upper bound on rows per parquet row group (default: 128Ki).
    pub max_row_group_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data"),
            max_block_bytes: 1024 * 1024 * 1024,
            max_block_duration: Duration::from_secs(3600),
            parquet: ParquetConfig::default(),
        }
    }
}

impl Default for ParquetConfig {
    fn default() -> Self {
        Self {
            max_row_group_size: 128 * 1024,
        }
    }
}

impl Config {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Default::default()
        }
    }

    pub fn max_block_bytes(mut self, bytes: u64) -> Self {
        self.max_block_bytes = bytes;
        self
    }

    pub fn max_block_duration(mut self, duration: Duration) -> Self {
        self.max_block_duration = duration;
        self
    }

    pub fn parquet(mut self, parquet: ParquetConfig) -> Self {
        self.parquet = parquet;
        self
    }
}
