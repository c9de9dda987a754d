use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Number of entries kept per statistic.
pub const MAX_NUM_OF_RECORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stat {
    pub name: String,
    pub count: u64,
}

impl Stat {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl PartialOrd for Stat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Count first; name only breaks ties so the ordering is total.
impl Ord for Stat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.name.cmp(&self.name))
    }
}

/// Cardinality summary of a [`MemPostings`](crate::MemPostings).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PostingsStats {
    /// Series count per value of the requested label (usually `__name__`).
    pub cardinality_metrics_stats: Vec<Stat>,
    /// Number of distinct values per label name.
    pub cardinality_label_stats: Vec<Stat>,
    /// Total byte length of all values per label name.
    pub label_value_stats: Vec<Stat>,
    /// Series count per `name=value` pair.
    pub label_value_pairs_stats: Vec<Stat>,
    pub num_label_pairs: u64,
}

/// Keeps the `k` largest stats pushed into it.
#[derive(Debug)]
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<Stat>>,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub(crate) fn push(&mut self, stat: Stat) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(stat));
            return;
        }
        if let Some(mut min) = self.heap.peek_mut() {
            if stat > min.0 {
                *min = Reverse(stat);
            }
        }
    }

    /// Largest first.
    pub(crate) fn into_sorted_vec(self) -> Vec<Stat> {
        // Ascending order of Reverse<Stat> is descending order of Stat.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(stat)| stat)
            .collect()
    }
}
