//! WeightedSampler - discrete distribution over opaque outcomes.
//!
//! Items carry non-negative weights. A cumulative table of bucket starts is
//! kept alongside the items so a draw is a binary search. Closing the sampler
//! freezes the draw range at `max(total, 1)`; anything past the explicit
//! total is the residual region and yields no item.

use super::rng::ZooRng;
use std::collections::HashMap;
use std::hash::Hash;

/// A weighted random variable over items of type `T`.
///
/// Items are keyed by equality: adding an item that is already present
/// replaces its weight (last writer wins), and a weight of zero removes it.
#[derive(Debug, Clone)]
pub struct WeightedSampler<T> {
    items: Vec<T>,
    weights: Vec<f64>,
    /// starts[i] = sum of weights[..i]
    starts: Vec<f64>,
    index: HashMap<T, usize>,
    total: f64,
    closed_total: Option<f64>,
}

impl<T: Clone + Eq + Hash> Default for WeightedSampler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> WeightedSampler<T> {
    /// Create an empty, open sampler.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            weights: Vec::new(),
            starts: Vec::new(),
            index: HashMap::new(),
            total: 0.0,
            closed_total: None,
        }
    }

    /// Add or reweight an item.
    ///
    /// New items are appended in O(1). Reweighting or removing an existing
    /// item rebuilds the cumulative table in O(n).
    ///
    /// # Panics
    /// Panics if `weight` is negative or NaN.
    pub fn add(&mut self, item: T, weight: f64) {
        assert!(
            weight >= 0.0,
            "sampler weights must be non-negative, got {}",
            weight
        );

        if let Some(&i) = self.index.get(&item) {
            if weight == 0.0 {
                self.remove_at(i);
            } else {
                self.weights[i] = weight;
                self.items[i] = item;
            }
            self.rebuild();
            return;
        }

        if weight == 0.0 {
            return;
        }

        self.index.insert(item.clone(), self.items.len());
        self.items.push(item);
        self.weights.push(weight);
        self.starts.push(self.total);
        self.total += weight;
    }

    fn remove_at(&mut self, i: usize) {
        let removed = self.items.swap_remove(i);
        self.weights.swap_remove(i);
        self.index.remove(&removed);
        if i < self.items.len() {
            self.index.insert(self.items[i].clone(), i);
        }
    }

    fn rebuild(&mut self) {
        self.starts.clear();
        self.total = 0.0;
        for &w in &self.weights {
            self.starts.push(self.total);
            self.total += w;
        }
    }

    /// Freeze the draw range at `max(total, 1)`.
    pub fn close(&mut self) {
        self.closed_total = Some(self.total.max(1.0));
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed_total.is_some()
    }

    /// Sum of explicit item weights.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// The range draws are taken from: the closed total, or the explicit total
    /// for an open sampler.
    pub fn draw_range(&self) -> f64 {
        self.closed_total.unwrap_or(self.total)
    }

    /// Weight of an item, or 0 if absent.
    pub fn weight(&self, item: &T) -> f64 {
        self.index
            .get(item)
            .map(|&i| self.weights[i])
            .unwrap_or(0.0)
    }

    /// Number of items with positive weight.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over (item, weight) pairs in insertion order (modulo removals).
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> + '_ {
        self.items.iter().zip(self.weights.iter().copied())
    }

    /// Draw one item.
    ///
    /// Returns `None` for an empty sampler or when the draw lands in the
    /// residual region of a closed sampler.
    pub fn sample(&self, rng: &mut dyn ZooRng) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let draw = rng.next_double() * self.draw_range();
        self.locate(draw)
    }

    /// Find the bucket whose start is the largest one <= `draw`.
    fn locate(&self, draw: f64) -> Option<&T> {
        if draw >= self.total {
            return None;
        }
        let bucket = self.starts.partition_point(|&s| s <= draw);
        if bucket == 0 {
            return None;
        }
        let i = bucket - 1;
        if draw < self.starts[i] + self.weights[i] {
            Some(&self.items[i])
        } else {
            None
        }
    }
}
