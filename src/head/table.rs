// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::rewriter::{IdConversionTable, Rewriter};
use crate::collections::FxHashMap;
use crate::config::ParquetConfig;
use crate::error::{Error, Result};
use crate::persist::Persister;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-dictionary policy set. One zero-sized implementation exists per
/// table; the generic [`DedupTable`] drives them.
pub(crate) trait TableHelper {
    type Model: Send + Sync;
    type Key: Eq + Hash + Send + Sync;

    /// The deduplication key, computed over already-rewritten references.
    fn key(model: &Self::Model) -> Self::Key;

    /// Stores this table's conversion table in its slot of the rewriter.
    fn add_to_rewriter(rewriter: &mut Rewriter, table: IdConversionTable);

    /// Converts the model's dependent references from per-profile IDs to
    /// head IDs. Requires that every dependency table has been ingested
    /// (DAG order).
    fn rewrite(rewriter: &Rewriter, model: &mut Self::Model);

    /// Models that carry their own ID record the head ID and hand back the
    /// per-profile ID the conversion table should be keyed by. The default
    /// is for models identified by batch position alone.
    fn set_id(old_id: u64, new_id: u64, model: &mut Self::Model) -> u64 {
        let _ = (new_id, model);
        old_id
    }

    /// Rough per-element memory accounting.
    fn size(model: &Self::Model) -> u64;

    /// Copy taken when an element is retained, so the stored value does not
    /// alias the caller's batch.
    fn clone_retained(model: &Self::Model) -> Self::Model;
}

/// Object-safe view of a dictionary table, used by the head to size, flush
/// and close all six tables uniformly.
pub(crate) trait Table: Send + Sync {
    fn name(&self) -> &'static str;
    fn size(&self) -> u64;
    fn init(&self, dir: &Path, config: &ParquetConfig) -> Result<()>;
    fn flush(&self) -> Result<(u64, u64)>;
    fn close(&self) -> Result<()>;
}

pub(crate) struct TableInner<H: TableHelper> {
    pub(crate) slice: Vec<H::Model>,
    lookup: FxHashMap<H::Key, u64>,
}

impl<H: TableHelper> Default for TableInner<H> {
    fn default() -> Self {
        Self {
            slice: Vec::new(),
            lookup: FxHashMap::default(),
        }
    }
}

/// Append-only deduplicating dictionary. Elements are keyed by a
/// helper-computed fingerprint and assigned dense IDs in insertion order;
/// the per-batch old→new ID pairs are published into the rewriter.
pub(crate) struct DedupTable<H: TableHelper, P> {
    inner: RwLock<TableInner<H>>,
    size: AtomicU64,
    persist: Mutex<Option<(PathBuf, ParquetConfig)>>,
    _persister: PhantomData<P>,
}

impl<H: TableHelper, P> Default for DedupTable<H, P> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(TableInner::default()),
            size: AtomicU64::new(0),
            persist: Mutex::new(None),
            _persister: PhantomData,
        }
    }
}

impl<H: TableHelper, P> DedupTable<H, P> {
    /// Assigns or reuses a dense head ID for every element of the batch.
    ///
    /// Dependent references are rewritten up front, so key computation and
    /// storage both see head IDs only. Newly seen elements are appended;
    /// the batch's conversion table is published into the rewriter last.
    pub(crate) fn ingest(&self, batch: &mut [H::Model], rewriter: &mut Rewriter) {
        for model in batch.iter_mut() {
            H::rewrite(rewriter, model);
        }

        let mut conversions = IdConversionTable::with_capacity(batch.len());
        let mut missing = Vec::new();

        {
            let inner = self.inner.read();
            for (pos, model) in batch.iter_mut().enumerate() {
                match inner.lookup.get(&H::key(model)) {
                    Some(&id) => {
                        let old = H::set_id(pos as u64, id, model);
                        conversions.insert(old, id);
                    }
                    None => missing.push(pos),
                }
            }
        }

        if !missing.is_empty() {
            let mut inner = self.inner.write();
            for pos in missing {
                let key = H::key(&batch[pos]);
                // Another ingest may have raced us between the locks.
                if let Some(&id) = inner.lookup.get(&key) {
                    let old = H::set_id(pos as u64, id, &mut batch[pos]);
                    conversions.insert(old, id);
                    continue;
                }

                let id = inner.slice.len() as u64;
                let old = H::set_id(pos as u64, id, &mut batch[pos]);
                inner.slice.push(H::clone_retained(&batch[pos]));
                inner.lookup.insert(key, id);
                conversions.insert(old, id);
                self.size.fetch_add(H::size(&batch[pos]), Ordering::Relaxed);
            }
        }

        H::add_to_rewriter(rewriter, conversions);
    }

    /// Read access for the query plane. The guard pins out concurrent
    /// ingest for as long as it is held.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TableInner<H>> {
        self.inner.read()
    }

    pub(crate) fn rows(&self) -> usize {
        self.inner.read().slice.len()
    }
}

impl<H, P> Table for DedupTable<H, P>
where
    H: TableHelper,
    P: Persister<Row = H::Model> + Send + Sync,
{
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    fn init(&self, dir: &Path, config: &ParquetConfig) -> Result<()> {
        let path = dir.join(format!("{}{}", P::NAME, crate::block::PARQUET_SUFFIX));
        *self.persist.lock() = Some((path, config.clone()));
        Ok(())
    }

    fn flush(&self) -> Result<(u64, u64)> {
        let guard = self.persist.lock();
        let (path, config) = guard
            .as_ref()
            .ok_or_else(|| Error::Persister(format!("table {} was never initialized", P::NAME)))?;
        let inner = self.inner.read();
        P::write(path, &inner.slice, config)
    }

    fn close(&self) -> Result<()> {
        self.persist.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::dictionaries::StringsHelper;
    use crate::persist::StringsPersister;

    type StringsTable = DedupTable<StringsHelper, StringsPersister>;

    fn ingest_strings(table: &StringsTable, strings: &[&str]) -> Rewriter {
        let mut rewriter = Rewriter::default();
        let mut batch: Vec<String> = strings.iter().map(|s| s.to_string()).collect();
        table.ingest(&mut batch, &mut rewriter);
        rewriter
    }

    #[test]
    fn assigns_dense_ids_in_insertion_order() {
        let table = StringsTable::default();
        let rewriter = ingest_strings(&table, &["", "a", "b"]);

        assert_eq!(table.rows(), 3);
        for old in 0..3 {
            assert_eq!(rewriter.strings.get(old), old);
        }
        let inner = table.read();
        assert_eq!(inner.slice, vec!["", "a", "b"]);
    }

    #[test]
    fn equal_keys_reuse_ids_across_batches() {
        let table = StringsTable::default();
        ingest_strings(&table, &["", "a", "b"]);
        let rewriter = ingest_strings(&table, &["", "b", "c"]);

        assert_eq!(table.rows(), 4, "only c is new");
        assert_eq!(rewriter.strings.get(0), 0);
        assert_eq!(rewriter.strings.get(1), 2, "b keeps its first id");
        assert_eq!(rewriter.strings.get(2), 3, "c is appended");
    }

    #[test]
    fn duplicate_within_one_batch_dedups() {
        let table = StringsTable::default();
        let rewriter = ingest_strings(&table, &["", "x", "x"]);

        assert_eq!(table.rows(), 2);
        assert_eq!(rewriter.strings.get(1), 1);
        assert_eq!(rewriter.strings.get(2), 1);
    }

    #[test]
    fn size_is_monotonic() {
        let table = StringsTable::default();
        ingest_strings(&table, &["", "hello"]);
        let after_first = Table::size(&table);
        ingest_strings(&table, &["", "hello"]);
        assert_eq!(Table::size(&table), after_first, "no new elements");
        ingest_strings(&table, &["world!"]);
        assert!(Table::size(&table) > after_first);
    }
}
