// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of the head: ingest, selection, merging, and the
//! flush lifecycle against a real filesystem.

use datadog_profiling_store::block::{BlockMeta, INDEX_FILENAME};
use datadog_profiling_store::model::LABEL_NAME_METRIC;
use datadog_profiling_store::pprof;
use datadog_profiling_store::{
    Config, Error, Head, LabelPair, ProfileType, SelectProfilesRequest,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn cpu_profile() -> pprof::Profile {
    pprof::Profile {
        string_table: vec!["".into(), "a".into(), "b".into()],
        sample_types: vec![pprof::ValueType { r#type: 2, unit: 1 }],
        period_type: Some(pprof::ValueType { r#type: 2, unit: 1 }),
        functions: vec![pprof::Function {
            id: 0,
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

fn cpu_labels() -> Vec<LabelPair> {
    vec![LabelPair::new(LABEL_NAME_METRIC, "cpu")]
}

fn cpu_type() -> ProfileType {
    ProfileType::parse("cpu:b:a:b:a").unwrap()
}

fn memory_profile(alloc_space: i64, time_nanos: i64) -> pprof::Profile {
    pprof::Profile {
        string_table: vec![
            "".into(),
            "alloc_space".into(),
            "bytes".into(),
            "space".into(),
            "malloc".into(),
        ],
        sample_types: vec![pprof::ValueType { r#type: 1, unit: 2 }],
        period_type: Some(pprof::ValueType { r#type: 3, unit: 2 }),
        functions: vec![pprof::Function {
            id: 1,
            name: 4,
            ..Default::default()
        }],
        locations: vec![pprof::Location {
            id: 1,
            lines: vec![pprof::Line {
                function_id: 1,
                line: 12,
            }],
            ..Default::default()
        }],
        samples: vec![pprof::Sample {
            location_ids: vec![1],
            values: vec![alloc_space],
            labels: vec![],
        }],
        time_nanos,
        ..Default::default()
    }
}

fn memory_labels() -> Vec<LabelPair> {
    vec![LabelPair::new(LABEL_NAME_METRIC, "memory")]
}

fn new_head(dir: &tempfile::TempDir) -> Arc<Head> {
    Head::new(Config::new(dir.path())).unwrap()
}

#[tokio::test]
async fn single_profile_populates_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();

    let stats = head.stats();
    assert_eq!(stats.strings, 3);
    assert_eq!(stats.mappings, 0);
    assert_eq!(stats.functions, 1);
    assert_eq!(stats.locations, 1);
    assert_eq!(stats.stacktraces, 1);
    assert_eq!(stats.profiles, 1);
    assert_eq!(stats.series, 1);

    let series = head.series(&["{}".to_string()]).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].get(LABEL_NAME_METRIC), Some("cpu"));
    assert_eq!(series[0].get("__period_type__"), Some("b"));
    assert_eq!(series[0].get("__period_unit__"), Some("a"));

    head.close().unwrap();
}

#[tokio::test]
async fn repeated_payload_dedups_every_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();

    let stats = head.stats();
    assert_eq!(stats.strings, 3);
    assert_eq!(stats.functions, 1);
    assert_eq!(stats.locations, 1);
    assert_eq!(stats.stacktraces, 1);
    assert_eq!(stats.profiles, 2);
    assert_eq!(stats.series, 1);

    head.close().unwrap();
}

#[tokio::test]
async fn string_table_order_does_not_change_head_ids() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();

    // Same content, but the profile-local string table is permuted: "a"
    // and "b" swap positions and every reference follows.
    let mut permuted = cpu_profile();
    permuted.string_table = vec!["".into(), "b".into(), "a".into()];
    permuted.sample_types = vec![pprof::ValueType { r#type: 1, unit: 2 }];
    permuted.period_type = Some(pprof::ValueType { r#type: 1, unit: 2 });
    permuted.functions[0].name = 2;
    head.ingest(permuted, Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();

    let stats = head.stats();
    assert_eq!(stats.strings, 3, "no new strings");
    assert_eq!(stats.functions, 1, "function deduped across string orders");
    assert_eq!(stats.stacktraces, 1, "stacktrace deduped across string orders");
    assert_eq!(stats.profiles, 2);
    assert_eq!(stats.series, 1);

    head.close().unwrap();
}

#[tokio::test]
async fn sample_order_does_not_change_stacktrace_ids() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    let two_samples = |flipped: bool| {
        let mut profile = cpu_profile();
        profile.locations.push(pprof::Location {
            id: 1,
            lines: vec![pprof::Line {
                function_id: 0,
                line: 7,
            }],
            ..Default::default()
        });
        let first = pprof::Sample {
            location_ids: vec![0],
            values: vec![1],
            labels: vec![],
        };
        let second = pprof::Sample {
            location_ids: vec![1, 0],
            values: vec![2],
            labels: vec![],
        };
        profile.samples = if flipped {
            vec![second.clone(), first.clone()]
        } else {
            vec![first, second]
        };
        profile
    };

    head.ingest(two_samples(false), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    let before = head.stats();
    head.ingest(two_samples(true), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    let after = head.stats();

    assert_eq!(before.stacktraces, 2);
    assert_eq!(after.stacktraces, 2, "permuted samples reuse stacktrace ids");

    head.close().unwrap();
}

#[tokio::test]
async fn cumulative_series_store_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(
        memory_profile(100, 1_000_000),
        Uuid::new_v4(),
        &memory_labels(),
        None,
    )
    .unwrap();
    assert_eq!(head.stats().profiles, 0, "first cumulative profile is dropped");

    head.ingest(
        memory_profile(250, 2_000_000),
        Uuid::new_v4(),
        &memory_labels(),
        None,
    )
    .unwrap();
    assert_eq!(head.stats().profiles, 1);

    let request = SelectProfilesRequest {
        label_selector: "{}".to_string(),
        profile_type: ProfileType::parse("memory:alloc_space:bytes:space:bytes").unwrap(),
        start: 0,
        end: 10,
    };
    let rows = head.select_matching_profiles(&request).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total(), 150, "doubled minus original");

    head.close().unwrap();
}

#[tokio::test]
async fn merge_by_stacktraces_aggregates_and_names_functions() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();

    let request = SelectProfilesRequest {
        label_selector: "cpu".to_string(),
        profile_type: cpu_type(),
        start: 0,
        end: 10,
    };
    let rows = head.select_matching_profiles(&request).unwrap();
    assert_eq!(rows.len(), 2);

    let merged = head.merge_by_stacktraces(rows).unwrap();
    assert_eq!(merged.stacktraces.len(), 1);
    assert_eq!(merged.stacktraces[0].value, 10, "5 + 5");
    assert_eq!(merged.function_names, vec!["a".to_string()]);
    assert_eq!(merged.stacktraces[0].function_ids, vec![0]);

    head.close().unwrap();
}

#[tokio::test]
async fn merge_by_stacktraces_skips_zero_values() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    let mut profile = cpu_profile();
    profile.samples[0].values = vec![0];
    head.ingest(profile, Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();

    let request = SelectProfilesRequest {
        label_selector: "cpu".to_string(),
        profile_type: cpu_type(),
        start: 0,
        end: 10,
    };
    let rows = head.select_matching_profiles(&request).unwrap();
    assert_eq!(rows.len(), 1, "zero-valued samples are retained at ingest");

    let merged = head.merge_by_stacktraces(rows).unwrap();
    assert!(merged.stacktraces.is_empty(), "but skipped when merging");

    head.close().unwrap();
}

#[tokio::test]
async fn merge_by_labels_groups_and_sorts_points() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    for (pod, nanos) in [("api-0", 3_000_000), ("api-0", 1_000_000), ("web-1", 2_000_000)] {
        let mut profile = cpu_profile();
        profile.time_nanos = nanos;
        let labels = vec![
            LabelPair::new(LABEL_NAME_METRIC, "cpu"),
            LabelPair::new("pod", pod),
        ];
        head.ingest(profile, Uuid::new_v4(), &labels, None).unwrap();
    }

    let request = SelectProfilesRequest {
        label_selector: "cpu".to_string(),
        profile_type: cpu_type(),
        start: 0,
        end: 10,
    };
    let rows = head.select_matching_profiles(&request).unwrap();
    let series = head.merge_by_labels(rows, &["pod"]).unwrap();

    assert_eq!(series.len(), 2);
    assert_eq!(series[0].labels.get("pod"), Some("api-0"));
    assert_eq!(series[1].labels.get("pod"), Some("web-1"));
    let timestamps: Vec<i64> = series[0].points.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![1, 3], "points sorted by timestamp");
    assert_eq!(series[0].points[0].value, 5.0);

    head.close().unwrap();
}

#[tokio::test]
async fn label_introspection_and_profile_types() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    head.ingest(
        memory_profile(1, 1_000_000),
        Uuid::new_v4(),
        &memory_labels(),
        None,
    )
    .unwrap();

    let names = head.label_names().unwrap();
    assert!(names.contains(&"__name__".to_string()));
    assert!(names.contains(&"__profile_type__".to_string()));

    // The first memory profile was swallowed by the delta engine and a
    // series only exists in the index once a row is stored.
    let metrics = head.label_values(LABEL_NAME_METRIC).unwrap();
    assert_eq!(metrics, vec!["cpu".to_string()]);
    let types = head.profile_types().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "cpu");

    head.ingest(
        memory_profile(2, 2_000_000),
        Uuid::new_v4(),
        &memory_labels(),
        None,
    )
    .unwrap();
    let metrics = head.label_values(LABEL_NAME_METRIC).unwrap();
    assert_eq!(metrics, vec!["cpu".to_string(), "memory".to_string()]);
    let types = head.profile_types().unwrap();
    assert_eq!(types.len(), 2);

    head.close().unwrap();
}

#[tokio::test]
async fn flushing_empty_head_removes_scratch_dir() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    let scratch = dir.path().join("head").join(head.block_ulid().to_string());
    assert!(scratch.is_dir());

    head.flush().unwrap();
    assert!(!scratch.exists(), "scratch directory removed");
    assert!(
        !dir.path().join("local").exists(),
        "no block directory was created"
    );
}

#[tokio::test]
async fn flush_writes_a_complete_sorted_block() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    head.flush().unwrap();

    let block_dir = dir.path().join("local").join(head.block_ulid().to_string());
    assert!(block_dir.is_dir(), "scratch renamed into place");
    assert!(!dir.path().join("head").join(head.block_ulid().to_string()).exists());

    for file in [
        INDEX_FILENAME,
        "strings.parquet",
        "mappings.parquet",
        "functions.parquet",
        "locations.parquet",
        "stacktraces.parquet",
        "profiles.parquet",
        "meta.json",
    ] {
        assert!(block_dir.join(file).is_file(), "missing {file}");
    }

    let meta = BlockMeta::read_from_file(&block_dir).unwrap();
    assert_eq!(meta.stats.num_series, 1);
    assert_eq!(meta.stats.num_profiles, 1);
    assert_eq!(meta.stats.num_samples, 1);
    assert_eq!(meta.files.len(), 7, "index + six tables");

    let rel_paths: Vec<&str> = meta.files.iter().map(|f| f.rel_path.as_str()).collect();
    let mut sorted = rel_paths.clone();
    sorted.sort();
    assert_eq!(rel_paths, sorted, "manifest sorted by relPath");

    for file in &meta.files {
        assert!(file.size_bytes > 0, "{} has a recorded size", file.rel_path);
    }
    let index_entry = meta
        .files
        .iter()
        .find(|f| f.rel_path == INDEX_FILENAME)
        .unwrap();
    assert_eq!(index_entry.tsdb.unwrap().num_series, 1);
    let profiles_entry = meta
        .files
        .iter()
        .find(|f| f.rel_path == "profiles.parquet")
        .unwrap();
    assert_eq!(profiles_entry.parquet.unwrap().num_rows, 1);

    // Time range covers the single stored profile (1ms).
    assert!(meta.min_time <= 1 && 1 <= meta.max_time);
}

#[tokio::test]
async fn closed_head_rejects_everything_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    head.ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap();
    head.flush().unwrap();

    let err = head
        .ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), None)
        .unwrap_err();
    assert!(matches!(err, Error::Closed));

    let err = head.flush().unwrap_err();
    assert!(matches!(err, Error::Closed), "flush is one-way");
}

#[tokio::test]
async fn cancelled_ingest_returns_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let err = head
        .ingest(cpu_profile(), Uuid::new_v4(), &cpu_labels(), Some(&token))
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    head.close().unwrap();
}

#[tokio::test]
async fn watchdog_signals_after_max_block_duration() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(dir.path()).max_block_duration(Duration::from_millis(50));
    let head = Head::new(config).unwrap();

    let mut signal = head.flush_signal();
    let flushable = tokio::time::timeout(Duration::from_secs(5), signal.wait_for(|v| *v))
        .await
        .expect("flush signal within the timeout")
        .expect("watchdog alive");
    assert!(*flushable);

    head.flush().unwrap();
}

#[tokio::test]
async fn time_range_tracks_ingested_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let head = new_head(&dir);

    assert!(!head.in_range(0, i64::MAX / 2), "empty head overlaps nothing");

    for nanos in [5_000_000, 1_000_000, 3_000_000] {
        let mut profile = cpu_profile();
        profile.time_nanos = nanos;
        head.ingest(profile, Uuid::new_v4(), &cpu_labels(), None)
            .unwrap();
    }

    assert!(head.in_range(1, 1));
    assert!(head.in_range(4, 9));
    assert!(!head.in_range(6, 9));
    assert!(!head.in_range(-5, 0));

    head.close().unwrap();
}
