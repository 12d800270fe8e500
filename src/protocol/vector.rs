//! Version vectors.

use std::cmp::Ordering;
use std::fmt;

use crate::types::ShortId;

/// One replica's counter inside a [`Vector`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Counter {
    /// The replica the counter belongs to.
    pub id: ShortId,
    /// Monotonic per-replica value.
    pub value: u64,
}

/// Causal relationship between two vectors.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VectorOrdering {
    /// Identical counters.
    Equal,
    /// Strictly dominates the other vector.
    Greater,
    /// Strictly dominated by the other vector.
    Lesser,
    /// Neither dominates; the edits conflict.
    Concurrent,
}

/// A version vector: counters sorted by replica id, zero counters omitted.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct Vector {
    counters: Vec<Counter>,
}

impl Vector {
    /// The empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vector from arbitrary counters, normalizing order and dropping zeros.
    /// Duplicate ids keep the highest value.
    pub fn from_counters(counters: impl IntoIterator<Item = Counter>) -> Self {
        let mut out: Vec<Counter> = counters.into_iter().filter(|c| c.value > 0).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id).then(b.value.cmp(&a.value)));
        out.dedup_by_key(|c| c.id);
        Self { counters: out }
    }

    /// Convenience constructor from `(id, value)` pairs.
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        Self::from_counters(pairs.iter().map(|&(id, value)| Counter {
            id: ShortId(id),
            value,
        }))
    }

    /// Counters in ascending id order.
    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }

    /// Whether no replica has touched this vector.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// The counter for `id`, zero when absent.
    pub fn counter(&self, id: ShortId) -> u64 {
        match self.counters.binary_search_by(|c| c.id.cmp(&id)) {
            Ok(idx) => self.counters[idx].value,
            Err(_) => 0,
        }
    }

    /// Returns a copy with `id`'s counter incremented.
    pub fn update(&self, id: ShortId) -> Self {
        let mut next = self.clone();
        match next.counters.binary_search_by(|c| c.id.cmp(&id)) {
            Ok(idx) => next.counters[idx].value += 1,
            Err(idx) => next.counters.insert(idx, Counter { id, value: 1 }),
        }
        next
    }

    /// Pointwise maximum of both vectors.
    pub fn merge(&self, other: &Vector) -> Self {
        Self::from_counters(self.counters.iter().chain(other.counters.iter()).copied())
    }

    /// Compares two vectors.
    pub fn compare(&self, other: &Vector) -> VectorOrdering {
        let mut greater = false;
        let mut lesser = false;
        let (mut i, mut j) = (0, 0);
        let (a, b) = (&self.counters, &other.counters);
        while i < a.len() || j < b.len() {
            let (va, vb) = match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) => match x.id.cmp(&y.id) {
                    Ordering::Equal => {
                        i += 1;
                        j += 1;
                        (x.value, y.value)
                    }
                    Ordering::Less => {
                        i += 1;
                        (x.value, 0)
                    }
                    Ordering::Greater => {
                        j += 1;
                        (0, y.value)
                    }
                },
                (Some(x), None) => {
                    i += 1;
                    (x.value, 0)
                }
                (None, Some(y)) => {
                    j += 1;
                    (0, y.value)
                }
                (None, None) => break,
            };
            match va.cmp(&vb) {
                Ordering::Greater => greater = true,
                Ordering::Less => lesser = true,
                Ordering::Equal => {}
            }
            if greater && lesser {
                return VectorOrdering::Concurrent;
            }
        }
        match (greater, lesser) {
            (false, false) => VectorOrdering::Equal,
            (true, false) => VectorOrdering::Greater,
            (false, true) => VectorOrdering::Lesser,
            (true, true) => VectorOrdering::Concurrent,
        }
    }

    /// `self` is equal to or dominates `other`.
    pub fn greater_equal(&self, other: &Vector) -> bool {
        matches!(
            self.compare(other),
            VectorOrdering::Greater | VectorOrdering::Equal
        )
    }

    /// `self` is strictly dominated by `other`.
    pub fn lesser(&self, other: &Vector) -> bool {
        self.compare(other) == VectorOrdering::Lesser
    }

    /// `self` conflicts with `other`.
    pub fn concurrent(&self, other: &Vector) -> bool {
        self.compare(other) == VectorOrdering::Concurrent
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, c) in self.counters.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", c.id, c.value)?;
        }
        f.write_str("}")
    }
}
