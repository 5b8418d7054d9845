// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collections::FxHashMap;

/// Maps the IDs of one dictionary from their per-profile values to the
/// head-local values assigned during this ingest call.
///
/// Asking for an ID that was never recorded is an integrity violation: the
/// DAG ingest order guarantees every dependent ID has been converted by the
/// time it is rewritten, so a miss means the head is corrupt. It aborts.
#[derive(Debug, Default)]
pub(crate) struct IdConversionTable(FxHashMap<u64, u64>);

impl IdConversionTable {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        let mut map = FxHashMap::default();
        map.reserve(cap);
        Self(map)
    }

    pub(crate) fn insert(&mut self, old: u64, new: u64) {
        self.0.insert(old, new);
    }

    pub(crate) fn get(&self, old: u64) -> u64 {
        match self.0.get(&old) {
            Some(new) => *new,
            None => panic!("unable to rewrite index {old}"),
        }
    }

    pub(crate) fn try_get(&self, old: u64) -> Option<u64> {
        self.0.get(&old).copied()
    }

    pub(crate) fn rewrite(&self, id: &mut u64) {
        *id = self.get(*id);
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.0.iter().map(|(old, new)| (*old, *new))
    }
}

/// String IDs are positional in pprof, so their conversion table is a dense
/// slice indexed by the old ID.
#[derive(Debug, Default)]
pub(crate) struct StringConversionTable(Vec<i64>);

impl StringConversionTable {
    pub(crate) fn get(&self, old: i64) -> i64 {
        match self.0.get(old as usize) {
            Some(new) => *new,
            None => panic!("unable to rewrite string index {old}"),
        }
    }

    pub(crate) fn rewrite(&self, id: &mut i64) {
        *id = self.get(*id);
    }
}

impl From<&IdConversionTable> for StringConversionTable {
    fn from(table: &IdConversionTable) -> Self {
        let mut slice = vec![0i64; table.len()];
        for (old, new) in table.iter() {
            slice[old as usize] = new as i64;
        }
        Self(slice)
    }
}

/// Per-ingest scratch mapping per-profile references onto per-head
/// references, one conversion table per dictionary. Never shared across
/// ingest calls.
#[derive(Debug, Default)]
pub(crate) struct Rewriter {
    pub(crate) strings: StringConversionTable,
    pub(crate) mappings: IdConversionTable,
    pub(crate) functions: IdConversionTable,
    pub(crate) locations: IdConversionTable,
    pub(crate) stacktraces: IdConversionTable,
}
