//! Buffered time ranges: an ordered set of disjoint half-open intervals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Disjoint `[start, end)` ranges in seconds, ascending by start.
///
/// Touching or overlapping ranges are merged on insertion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRanges {
    ranges: Vec<(f64, f64)>,
}

impl TimeRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn start(&self, index: usize) -> Option<f64> {
        self.ranges.get(index).map(|r| r.0)
    }

    pub fn end(&self, index: usize) -> Option<f64> {
        self.ranges.get(index).map(|r| r.1)
    }

    pub fn as_slice(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges.iter().copied()
    }

    /// End of the last range.
    pub fn last_end(&self) -> Option<f64> {
        self.ranges.last().map(|r| r.1)
    }

    pub fn contains(&self, t: f64) -> bool {
        self.ranges.iter().any(|&(s, e)| s <= t && t < e)
    }

    /// Insert `[start, end)`, merging with any range it touches.
    /// Empty or inverted intervals are ignored.
    pub fn add(&mut self, start: f64, end: f64) {
        if !(start < end) {
            return;
        }
        let mut merged = (start, end);
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for &(s, e) in &self.ranges {
            if e < merged.0 {
                out.push((s, e));
            } else if s > merged.1 {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push((s, e));
            } else {
                merged = (merged.0.min(s), merged.1.max(e));
            }
        }
        if !placed {
            out.push(merged);
        }
        self.ranges = out;
    }

    /// Remove `[start, end)` from every range, splitting where needed.
    pub fn subtract(&mut self, start: f64, end: f64) {
        if !(start < end) {
            return;
        }
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e <= start || s >= end {
                out.push((s, e));
                continue;
            }
            if s < start {
                out.push((s, start));
            }
            if e > end {
                out.push((end, e));
            }
        }
        self.ranges = out;
    }

    /// Ranges are pairwise disjoint, non-touching and ascending.
    pub fn is_normalized(&self) -> bool {
        self.ranges.iter().all(|&(s, e)| s < e)
            && self.ranges.windows(2).all(|w| w[0].1 < w[1].0)
    }
}

impl FromIterator<(f64, f64)> for TimeRanges {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut ranges = Self::new();
        for (start, end) in iter {
            ranges.add(start, end);
        }
        ranges
    }
}

impl fmt::Display for TimeRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (s, e)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{:.3}, {:.3})", s, e)?;
        }
        write!(f, "]")
    }
}
