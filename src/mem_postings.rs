//! In-memory postings for series that have not been flushed to an index file yet.
//!
//! A `MemPostings` maps `name -> value -> [series ref]` behind a single lock.
//! Ordered instances keep every list sorted on insert; unordered instances
//! accept appends in any order and are sorted once by
//! [`MemPostings::ensure_order`] after a bulk load.

use std::collections::{HashMap, HashSet};
use std::sync::{mpsc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use log::{debug, warn};

use crate::labels::{Label, Labels};
use crate::postings::{empty_postings, ListPostings, Postings, SeriesRef};
use crate::stats::{PostingsStats, Stat, TopK, MAX_NUM_OF_RECORDS};
use crate::Result;

pub use crate::format::{ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE};

/// Key of the postings list that holds every series.
pub fn all_postings_key() -> Label {
    Label::new(ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE)
}

// Lists handed to a sort worker per channel send.
const SORT_BATCH: usize = 256;
const SORT_CHANNEL_CAPACITY: usize = 4;

type PostingsMap = HashMap<String, HashMap<String, Vec<SeriesRef>>>;

#[derive(Debug, Default)]
struct Inner {
    m: PostingsMap,
    ordered: bool,
}

impl Inner {
    fn add_for(&mut self, id: SeriesRef, name: &str, value: &str) {
        let list = self
            .m
            .entry(name.to_owned())
            .or_default()
            .entry(value.to_owned())
            .or_default();
        list.push(id);

        if !self.ordered {
            return;
        }
        // Ids mostly arrive in order; walk the new one back into place.
        let mut i = list.len() - 1;
        while i > 0 && list[i] < list[i - 1] {
            list.swap(i, i - 1);
            i -= 1;
        }
    }
}

#[derive(Debug)]
pub struct MemPostings {
    inner: RwLock<Inner>,
}

impl Default for MemPostings {
    fn default() -> Self {
        Self::new()
    }
}

impl MemPostings {
    /// Postings that keep every list sorted as ids are added.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                m: HashMap::with_capacity(512),
                ordered: true,
            }),
        }
    }

    /// Postings for bulk loading. Call [`ensure_order`](Self::ensure_order)
    /// before reading.
    pub fn new_unordered() -> Self {
        Self {
            inner: RwLock::new(Inner {
                m: HashMap::with_capacity(512),
                ordered: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("mem postings lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("mem postings lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_ordered(&self) -> bool {
        self.read().ordered
    }

    /// Indexes `id` under each of its labels and under the all-postings key.
    pub fn add(&self, id: SeriesRef, labels: &Labels) {
        let mut inner = self.write();
        for label in labels {
            inner.add_for(id, &label.name, &label.value);
        }
        inner.add_for(id, ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE);
    }

    /// Sorts every list using half of the available cores.
    pub fn ensure_order(&self) {
        self.ensure_order_with_workers(default_sort_workers());
    }

    /// Sorts every list on `workers` threads and marks the postings ordered.
    /// A no-op on postings that are already ordered.
    pub fn ensure_order_with_workers(&self, workers: usize) {
        let mut inner = self.write();
        if inner.ordered {
            return;
        }
        let workers = workers.max(1);

        let mut batches: Vec<Vec<&mut Vec<SeriesRef>>> = Vec::new();
        let mut batch = Vec::with_capacity(SORT_BATCH);
        for list in inner.m.values_mut().flat_map(|values| values.values_mut()) {
            batch.push(list);
            if batch.len() == SORT_BATCH {
                batches.push(std::mem::replace(&mut batch, Vec::with_capacity(SORT_BATCH)));
            }
        }
        if !batch.is_empty() {
            batches.push(batch);
        }
        let num_batches = batches.len();

        thread::scope(|scope| {
            let mut senders = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                let (tx, rx) = mpsc::sync_channel::<Vec<&mut Vec<SeriesRef>>>(SORT_CHANNEL_CAPACITY);
                let spawned = thread::Builder::new()
                    .name(format!("postings-sort-{worker_id}"))
                    .spawn_scoped(scope, move || {
                        while let Ok(batch) = rx.recv() {
                            sort_batch(batch);
                        }
                    });
                match spawned {
                    Ok(_) => senders.push(tx),
                    Err(err) => {
                        warn!("failed to spawn postings sort worker {worker_id}: {err}");
                        break;
                    }
                }
            }

            let spawned = senders.len();
            for (i, batch) in batches.into_iter().enumerate() {
                if senders.is_empty() {
                    sort_batch(batch);
                    continue;
                }
                if let Err(mpsc::SendError(batch)) = senders[i % senders.len()].send(batch) {
                    sort_batch(batch);
                }
            }
            // Closing the channels lets the workers drain and exit before the scope joins them.
            drop(senders);
            debug!("sorted {num_batches} postings batches on {spawned} workers");
        });

        inner.ordered = true;
    }

    /// Removes `deleted` from every list, dropping lists and names left empty.
    pub fn delete(&self, deleted: &HashSet<SeriesRef>) {
        if deleted.is_empty() {
            return;
        }
        let keys: Vec<(String, String)> = {
            let inner = self.read();
            inner
                .m
                .iter()
                .flat_map(|(name, values)| {
                    values.keys().map(move |value| (name.clone(), value.clone()))
                })
                .collect()
        };

        for (name, value) in keys {
            // Short write lock per list so readers interleave with a large delete.
            let mut inner = self.write();
            let Some(values) = inner.m.get_mut(&name) else {
                continue;
            };
            if let Some(list) = values.get_mut(&value) {
                if list.iter().any(|id| deleted.contains(id)) {
                    list.retain(|id| !deleted.contains(id));
                }
                if list.is_empty() {
                    values.remove(&value);
                }
            }
            if values.is_empty() {
                inner.m.remove(&name);
            }
        }
    }

    /// Snapshot of the list for `name=value`, or the empty sentinel.
    pub fn get(&self, name: &str, value: &str) -> Box<dyn Postings + 'static> {
        let inner = self.read();
        match inner.m.get(name).and_then(|values| values.get(value)) {
            Some(list) => Box::new(ListPostings::new(list.clone())),
            None => empty_postings(),
        }
    }

    /// Every series ever added and not deleted.
    pub fn all(&self) -> Box<dyn Postings + 'static> {
        self.get(ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE)
    }

    /// Every `name=value` key, the all-postings key included, sorted.
    pub fn sorted_keys(&self) -> Vec<Label> {
        let mut keys: Vec<Label> = {
            let inner = self.read();
            inner
                .m
                .iter()
                .flat_map(|(name, values)| values.keys().map(move |value| Label::new(name, value)))
                .collect()
        };
        keys.sort();
        keys
    }

    /// Sorted label names, without the all-postings name.
    pub fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .m
            .keys()
            .filter(|name| name.as_str() != ALL_POSTINGS_NAME)
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    /// Sorted values of `name`.
    pub fn label_values(&self, name: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .read()
            .m
            .get(name)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();
        values.sort_unstable();
        values
    }

    /// Calls `f` for every list under the read lock, stopping at the first error.
    /// Iteration order is unspecified.
    pub fn iter<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &str, ListPostings) -> Result<()>,
    {
        let inner = self.read();
        for (name, values) in &inner.m {
            for (value, list) in values {
                f(name, value, ListPostings::new(list.clone()))?;
            }
        }
        Ok(())
    }

    /// Top cardinality figures. `label` selects whose values feed
    /// `cardinality_metrics_stats`, typically `__name__`.
    pub fn stats(&self, label: &str) -> PostingsStats {
        let mut metrics = TopK::new(MAX_NUM_OF_RECORDS);
        let mut labels = TopK::new(MAX_NUM_OF_RECORDS);
        let mut value_length = TopK::new(MAX_NUM_OF_RECORDS);
        let mut value_pairs = TopK::new(MAX_NUM_OF_RECORDS);
        let mut num_label_pairs = 0u64;

        let inner = self.read();
        for (name, values) in &inner.m {
            if name.as_str() == ALL_POSTINGS_NAME {
                continue;
            }
            labels.push(Stat::new(name.as_str(), values.len() as u64));
            num_label_pairs += values.len() as u64;

            let mut size = 0u64;
            for (value, list) in values {
                if name == label {
                    metrics.push(Stat::new(value.as_str(), list.len() as u64));
                }
                value_pairs.push(Stat::new(format!("{name}={value}"), list.len() as u64));
                size += value.len() as u64;
            }
            value_length.push(Stat::new(name.as_str(), size));
        }

        PostingsStats {
            cardinality_metrics_stats: metrics.into_sorted_vec(),
            cardinality_label_stats: labels.into_sorted_vec(),
            label_value_stats: value_length.into_sorted_vec(),
            label_value_pairs_stats: value_pairs.into_sorted_vec(),
            num_label_pairs,
        }
    }
}

fn sort_batch(batch: Vec<&mut Vec<SeriesRef>>) {
    for list in batch {
        list.sort_unstable();
    }
}

fn default_sort_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}
