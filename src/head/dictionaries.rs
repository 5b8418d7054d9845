// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The per-dictionary policies: key shape, rewriter slot, reference
//! rewriting, self-ID handling and size accounting for each of the six
//! tables.

use super::rewriter::{IdConversionTable, Rewriter, StringConversionTable};
use super::schema::{ProfileRow, Stacktrace};
use super::table::TableHelper;
use crate::model::Fingerprint;
use crate::pprof;
use std::mem;
use std::sync::Arc;
use uuid::Uuid;
use xxhash_rust::xxh64::Xxh64;

pub(crate) struct StringsHelper;

impl TableHelper for StringsHelper {
    type Model = String;
    type Key = String;

    fn key(model: &String) -> String {
        model.clone()
    }

    fn add_to_rewriter(rewriter: &mut Rewriter, table: IdConversionTable) {
        rewriter.strings = StringConversionTable::from(&table);
    }

    fn rewrite(_rewriter: &Rewriter, _model: &mut String) {}

    fn size(model: &String) -> u64 {
        model.len() as u64
    }

    fn clone_retained(model: &String) -> String {
        model.clone()
    }
}

#[derive(PartialEq, Eq, Hash)]
pub(crate) struct MappingsKey {
    memory_start: u64,
    memory_limit: u64,
    file_offset: u64,
    filename: i64,
    build_id: i64,
    has_functions: bool,
    has_filenames: bool,
    has_line_numbers: bool,
    has_inline_frames: bool,
}

pub(crate) struct MappingsHelper;

impl TableHelper for MappingsHelper {
    type Model = pprof::Mapping;
    type Key = MappingsKey;

    fn key(model: &pprof::Mapping) -> MappingsKey {
        MappingsKey {
            memory_start: model.memory_start,
            memory_limit: model.memory_limit,
            file_offset: model.file_offset,
            filename: model.filename,
            build_id: model.build_id,
            has_functions: model.has_functions,
            has_filenames: model.has_filenames,
            has_line_numbers: model.has_line_numbers,
            has_inline_frames: model.has_inline_frames,
        }
    }

    fn add_to_rewriter(rewriter: &mut Rewriter, table: IdConversionTable) {
        rewriter.mappings = table;
    }

    fn rewrite(rewriter: &Rewriter, model: &mut pprof::Mapping) {
        rewriter.strings.rewrite(&mut model.filename);
        rewriter.strings.rewrite(&mut model.build_id);
    }

    fn set_id(_old_id: u64, new_id: u64, model: &mut pprof::Mapping) -> u64 {
        let old = model.id;
        model.id = new_id;
        old
    }

    fn size(_model: &pprof::Mapping) -> u64 {
        mem::size_of::<pprof::Mapping>() as u64
    }

    fn clone_retained(model: &pprof::Mapping) -> pprof::Mapping {
        *model
    }
}

pub(crate) struct FunctionsHelper;

impl TableHelper for FunctionsHelper {
    type Model = pprof::Function;
    type Key = (i64, i64, i64, i64);

    fn key(model: &pprof::Function) -> Self::Key {
        (
            model.name,
            model.system_name,
            model.filename,
            model.start_line,
        )
    }

    fn add_to_rewriter(rewriter: &mut Rewriter, table: IdConversionTable) {
        rewriter.functions = table;
    }

    fn rewrite(rewriter: &Rewriter, model: &mut pprof::Function) {
        rewriter.strings.rewrite(&mut model.name);
        rewriter.strings.rewrite(&mut model.system_name);
        rewriter.strings.rewrite(&mut model.filename);
    }

    fn set_id(_old_id: u64, new_id: u64, model: &mut pprof::Function) -> u64 {
        let old = model.id;
        model.id = new_id;
        old
    }

    fn size(_model: &pprof::Function) -> u64 {
        mem::size_of::<pprof::Function>() as u64
    }

    fn clone_retained(model: &pprof::Function) -> pprof::Function {
        *model
    }
}

#[derive(PartialEq, Eq, Hash)]
pub(crate) struct LocationsKey {
    mapping_id: u64,
    address: u64,
    is_folded: bool,
    lines: Vec<(u64, i64)>,
}

pub(crate) struct LocationsHelper;

impl TableHelper for LocationsHelper {
    type Model = pprof::Location;
    type Key = LocationsKey;

    fn key(model: &pprof::Location) -> LocationsKey {
        LocationsKey {
            mapping_id: model.mapping_id,
            address: model.address,
            is_folded: model.is_folded,
            lines: model
                .lines
                .iter()
                .map(|line| (line.function_id, line.line))
                .collect(),
        }
    }

    fn add_to_rewriter(rewriter: &mut Rewriter, table: IdConversionTable) {
        rewriter.locations = table;
    }

    fn rewrite(rewriter: &Rewriter, model: &mut pprof::Location) {
        // mapping_id 0 means "no mapping" unless the profile really did
        // carry a mapping with ID 0.
        if model.mapping_id != 0 || rewriter.mappings.try_get(0).is_some() {
            rewriter.mappings.rewrite(&mut model.mapping_id);
        }
        for line in &mut model.lines {
            rewriter.functions.rewrite(&mut line.function_id);
        }
    }

    fn set_id(_old_id: u64, new_id: u64, model: &mut pprof::Location) -> u64 {
        let old = model.id;
        model.id = new_id;
        old
    }

    fn size(model: &pprof::Location) -> u64 {
        (mem::size_of::<pprof::Location>() + model.lines.len() * mem::size_of::<pprof::Line>())
            as u64
    }

    fn clone_retained(model: &pprof::Location) -> pprof::Location {
        model.clone()
    }
}

pub(crate) struct StacktracesHelper;

impl TableHelper for StacktracesHelper {
    type Model = Stacktrace;
    type Key = u64;

    /// xxhash-64 over the little-endian bytes of each location ID, in
    /// order. Collisions are accepted and unhandled.
    fn key(model: &Stacktrace) -> u64 {
        let mut hasher = Xxh64::new(0);
        for location_id in &model.location_ids {
            hasher.update(&location_id.to_le_bytes());
        }
        hasher.digest()
    }

    fn add_to_rewriter(rewriter: &mut Rewriter, table: IdConversionTable) {
        rewriter.stacktraces = table;
    }

    fn rewrite(rewriter: &Rewriter, model: &mut Stacktrace) {
        for location_id in &mut model.location_ids {
            rewriter.locations.rewrite(location_id);
        }
    }

    fn size(model: &Stacktrace) -> u64 {
        (mem::size_of::<Stacktrace>() + model.location_ids.len() * mem::size_of::<u64>()) as u64
    }

    fn clone_retained(model: &Stacktrace) -> Stacktrace {
        Stacktrace {
            location_ids: model.location_ids.clone(),
        }
    }
}

pub(crate) struct ProfilesHelper;

impl TableHelper for ProfilesHelper {
    type Model = Arc<ProfileRow>;
    type Key = (Uuid, Fingerprint);

    /// Unique per emitted row, so profiles never deduplicate.
    fn key(model: &Arc<ProfileRow>) -> Self::Key {
        (model.id, model.series_fingerprint)
    }

    fn add_to_rewriter(_rewriter: &mut Rewriter, _table: IdConversionTable) {
        // Nothing references profile rows, so no conversion table slot.
    }

    fn rewrite(_rewriter: &Rewriter, _model: &mut Arc<ProfileRow>) {
        // Samples, comments and frame filters are translated before the
        // row is built; see Head::ingest.
    }

    fn size(model: &Arc<ProfileRow>) -> u64 {
        (mem::size_of::<ProfileRow>()
            + model.samples.len() * mem::size_of::<super::schema::Sample>()
            + model.comments.len() * mem::size_of::<i64>()) as u64
    }

    fn clone_retained(model: &Arc<ProfileRow>) -> Arc<ProfileRow> {
        Arc::clone(model)
    }
}
