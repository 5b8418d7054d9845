// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Columnar persisters, one per dictionary table. Each one materializes
//! the table's backing slice as arrow arrays and writes a single parquet
//! file at flush, reporting `(rows, row_groups)` for the block manifest.

use crate::config::ParquetConfig;
use crate::error::Result;
use crate::head::schema::{ProfileRow, Stacktrace};
use crate::pprof;
use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Int64Builder, ListBuilder, StringBuilder,
    UInt64Builder,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub(crate) trait Persister {
    type Row;

    /// Table name; also the parquet file stem.
    const NAME: &'static str;

    fn write(path: &Path, rows: &[Self::Row], config: &ParquetConfig) -> Result<(u64, u64)>;
}

fn write_batch(path: &Path, batch: RecordBatch, config: &ParquetConfig) -> Result<(u64, u64)> {
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(config.max_row_group_size)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    let metadata = writer.close()?;
    Ok((metadata.num_rows as u64, metadata.row_groups.len() as u64))
}

fn ids(count: usize) -> ArrayRef {
    let mut builder = UInt64Builder::with_capacity(count);
    for id in 0..count as u64 {
        builder.append_value(id);
    }
    Arc::new(builder.finish())
}

pub(crate) struct StringsPersister;

impl Persister for StringsPersister {
    type Row = String;
    const NAME: &'static str = "strings";

    fn write(path: &Path, rows: &[String], config: &ParquetConfig) -> Result<(u64, u64)> {
        let mut strings = StringBuilder::new();
        for row in rows {
            strings.append_value(row);
        }
        let batch = RecordBatch::try_from_iter([
            ("id", ids(rows.len())),
            ("string", Arc::new(strings.finish()) as ArrayRef),
        ])?;
        write_batch(path, batch, config)
    }
}

pub(crate) struct MappingsPersister;

impl Persister for MappingsPersister {
    type Row = pprof::Mapping;
    const NAME: &'static str = "mappings";

    fn write(path: &Path, rows: &[pprof::Mapping], config: &ParquetConfig) -> Result<(u64, u64)> {
        let mut id = UInt64Builder::new();
        let mut memory_start = UInt64Builder::new();
        let mut memory_limit = UInt64Builder::new();
        let mut file_offset = UInt64Builder::new();
        let mut filename = Int64Builder::new();
        let mut build_id = Int64Builder::new();
        let mut has_functions = BooleanBuilder::new();
        let mut has_filenames = BooleanBuilder::new();
        let mut has_line_numbers = BooleanBuilder::new();
        let mut has_inline_frames = BooleanBuilder::new();
        for row in rows {
            id.append_value(row.id);
            memory_start.append_value(row.memory_start);
            memory_limit.append_value(row.memory_limit);
            file_offset.append_value(row.file_offset);
            filename.append_value(row.filename);
            build_id.append_value(row.build_id);
            has_functions.append_value(row.has_functions);
            has_filenames.append_value(row.has_filenames);
            has_line_numbers.append_value(row.has_line_numbers);
            has_inline_frames.append_value(row.has_inline_frames);
        }
        let batch = RecordBatch::try_from_iter([
            ("id", Arc::new(id.finish()) as ArrayRef),
            ("memory_start", Arc::new(memory_start.finish()) as ArrayRef),
            ("memory_limit", Arc::new(memory_limit.finish()) as ArrayRef),
            ("file_offset", Arc::new(file_offset.finish()) as ArrayRef),
            ("filename", Arc::new(filename.finish()) as ArrayRef),
            ("build_id", Arc::new(build_id.finish()) as ArrayRef),
            ("has_functions", Arc::new(has_functions.finish()) as ArrayRef),
            ("has_filenames", Arc::new(has_filenames.finish()) as ArrayRef),
            (
                "has_line_numbers",
                Arc::new(has_line_numbers.finish()) as ArrayRef,
            ),
            (
                "has_inline_frames",
                Arc::new(has_inline_frames.finish()) as ArrayRef,
            ),
        ])?;
        write_batch(path, batch, config)
    }
}

pub(crate) struct FunctionsPersister;

impl Persister for FunctionsPersister {
    type Row = pprof::Function;
    const NAME: &'static str = "functions";

    fn write(path: &Path, rows: &[pprof::Function], config: &ParquetConfig) -> Result<(u64, u64)> {
        let mut id = UInt64Builder::new();
        let mut name = Int64Builder::new();
        let mut system_name = Int64Builder::new();
        let mut filename = Int64Builder::new();
        let mut start_line = Int64Builder::new();
        for row in rows {
            id.append_value(row.id);
            name.append_value(row.name);
            system_name.append_value(row.system_name);
            filename.append_value(row.filename);
            start_line.append_value(row.start_line);
        }
        let batch = RecordBatch::try_from_iter([
            ("id", Arc::new(id.finish()) as ArrayRef),
            ("name", Arc::new(name.finish()) as ArrayRef),
            ("system_name", Arc::new(system_name.finish()) as ArrayRef),
            ("filename", Arc::new(filename.finish()) as ArrayRef),
            ("start_line", Arc::new(start_line.finish()) as ArrayRef),
        ])?;
        write_batch(path, batch, config)
    }
}

pub(crate) struct LocationsPersister;

impl Persister for LocationsPersister {
    type Row = pprof::Location;
    const NAME: &'static str = "locations";

    fn write(path: &Path, rows: &[pprof::Location], config: &ParquetConfig) -> Result<(u64, u64)> {
        let mut id = UInt64Builder::new();
        let mut mapping_id = UInt64Builder::new();
        let mut address = UInt64Builder::new();
        let mut is_folded = BooleanBuilder::new();
        let mut function_ids = ListBuilder::new(UInt64Builder::new());
        let mut lines = ListBuilder::new(Int64Builder::new());
        for row in rows {
            id.append_value(row.id);
            mapping_id.append_value(row.mapping_id);
            address.append_value(row.address);
            is_folded.append_value(row.is_folded);
            for line in &row.lines {
                function_ids.values().append_value(line.function_id);
                lines.values().append_value(line.line);
            }
            function_ids.append(true);
            lines.append(true);
        }
        let batch = RecordBatch::try_from_iter([
            ("id", Arc::new(id.finish()) as ArrayRef),
            ("mapping_id", Arc::new(mapping_id.finish()) as ArrayRef),
            ("address", Arc::new(address.finish()) as ArrayRef),
            ("is_folded", Arc::new(is_folded.finish()) as ArrayRef),
            ("function_ids", Arc::new(function_ids.finish()) as ArrayRef),
            ("lines", Arc::new(lines.finish()) as ArrayRef),
        ])?;
        write_batch(path, batch, config)
    }
}

pub(crate) struct StacktracesPersister;

impl Persister for StacktracesPersister {
    type Row = Stacktrace;
    const NAME: &'static str = "stacktraces";

    fn write(path: &Path, rows: &[Stacktrace], config: &ParquetConfig) -> Result<(u64, u64)> {
        let mut location_ids = ListBuilder::new(UInt64Builder::new());
        for row in rows {
            for location_id in &row.location_ids {
                location_ids.values().append_value(*location_id);
            }
            location_ids.append(true);
        }
        let batch = RecordBatch::try_from_iter([
            ("id", ids(rows.len())),
            ("location_ids", Arc::new(location_ids.finish()) as ArrayRef),
        ])?;
        write_batch(path, batch, config)
    }
}

pub(crate) struct ProfilesPersister;

impl Persister for ProfilesPersister {
    type Row = Arc<ProfileRow>;
    const NAME: &'static str = "profiles";

    fn write(
        path: &Path,
        rows: &[Arc<ProfileRow>],
        config: &ParquetConfig,
    ) -> Result<(u64, u64)> {
        let mut id = StringBuilder::new();
        let mut series_fingerprint = UInt64Builder::new();
        let mut time_nanos = Int64Builder::new();
        let mut duration_nanos = Int64Builder::new();
        let mut drop_frames = Int64Builder::new();
        let mut keep_frames = Int64Builder::new();
        let mut default_sample_type = Int64Builder::new();
        let mut comments = ListBuilder::new(Int64Builder::new());
        let mut stacktrace_ids = ListBuilder::new(UInt64Builder::new());
        let mut values = ListBuilder::new(Int64Builder::new());
        let mut labels = ListBuilder::new(BinaryBuilder::new());
        for row in rows {
            id.append_value(row.id.to_string());
            series_fingerprint.append_value(row.series_fingerprint);
            time_nanos.append_value(row.time_nanos);
            duration_nanos.append_value(row.duration_nanos);
            drop_frames.append_value(row.drop_frames);
            keep_frames.append_value(row.keep_frames);
            default_sample_type.append_value(row.default_sample_type);
            for comment in &row.comments {
                comments.values().append_value(*comment);
            }
            comments.append(true);
            for sample in &row.samples {
                stacktrace_ids.values().append_value(sample.stacktrace_id);
                values.values().append_value(sample.value);
                labels
                    .values()
                    .append_value(bincode::serialize(sample.labels.as_ref())?);
            }
            stacktrace_ids.append(true);
            values.append(true);
            labels.append(true);
        }
        let batch = RecordBatch::try_from_iter([
            ("id", Arc::new(id.finish()) as ArrayRef),
            (
                "series_fingerprint",
                Arc::new(series_fingerprint.finish()) as ArrayRef,
            ),
            ("time_nanos", Arc::new(time_nanos.finish()) as ArrayRef),
            (
                "duration_nanos",
                Arc::new(duration_nanos.finish()) as ArrayRef,
            ),
            ("drop_frames", Arc::new(drop_frames.finish()) as ArrayRef),
            ("keep_frames", Arc::new(keep_frames.finish()) as ArrayRef),
            (
                "default_sample_type",
                Arc::new(default_sample_type.finish()) as ArrayRef,
            ),
            ("comments", Arc::new(comments.finish()) as ArrayRef),
            (
                "stacktrace_ids",
                Arc::new(stacktrace_ids.finish()) as ArrayRef,
            ),
            ("values", Arc::new(values.finish()) as ArrayRef),
            ("labels", Arc::new(labels.finish()) as ArrayRef),
        ])?;
        write_batch(path, batch, config)
    }
}
