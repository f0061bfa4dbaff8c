//! Bounded top-N neighbor list
//!
//! A fixed-capacity min-heap keyed on similarity. Each neighbor entry id
//! occupies at most one slot; offering a known neighbor replaces its score.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::models::SimilarAbstract;

#[derive(Debug, Clone)]
struct Ranked(SimilarAbstract);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .similarity
            .total_cmp(&other.0.similarity)
            .then_with(|| self.0.entry_id.cmp(&other.0.entry_id))
    }
}

#[derive(Debug, Clone)]
pub struct NeighborHeap {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl NeighborHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
        }
    }

    /// Rehydrate from a persisted list.
    pub fn from_list(capacity: usize, list: &[SimilarAbstract]) -> Self {
        let mut heap = Self::new(capacity);
        for neighbor in list {
            heap.offer(neighbor.clone());
        }
        heap
    }

    /// Returns whether the heap changed.
    pub fn offer(&mut self, candidate: SimilarAbstract) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let unchanged = self
            .heap
            .iter()
            .find(|Reverse(r)| r.0.entry_id == candidate.entry_id)
            .map(|Reverse(r)| r.0.similarity == candidate.similarity && r.0.doi == candidate.doi);
        if let Some(unchanged) = unchanged {
            if unchanged {
                return false;
            }
            self.heap
                .retain(|Reverse(r)| r.0.entry_id != candidate.entry_id);
        }

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(Ranked(candidate)));
            return true;
        }

        match self.min_similarity() {
            Some(min) if candidate.similarity > min => {
                self.heap.pop();
                self.heap.push(Reverse(Ranked(candidate)));
                true
            }
            _ => false,
        }
    }

    pub fn min_similarity(&self) -> Option<f32> {
        self.heap.peek().map(|Reverse(r)| r.0.similarity)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Highest similarity first.
    pub fn into_sorted_vec(self) -> Vec<SimilarAbstract> {
        // Reverse<_> ascending is similarity descending
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| r.0)
            .collect()
    }
}
