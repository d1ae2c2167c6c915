// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Key-space ranges
//!
//! The effective partition key space is the set of uppercase hex strings
//! ordered lexicographically, bounded by `MIN_INCLUSIVE` and `MAX_EXCLUSIVE`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::partition_key::PartitionKey;

/// Lower bound of the effective partition key space
pub const MIN_INCLUSIVE: &str = "";

/// Upper bound of the effective partition key space
pub const MAX_EXCLUSIVE: &str = "FF";

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_true() -> bool {
    true
}

/// An interval of the effective partition key space
///
/// Ranges are half-open `[min, max)` unless built with explicit inclusivity,
/// which query plans use to express single-key ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub min: String,
    pub max: String,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub is_min_inclusive: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_max_inclusive: bool,
}

impl Range {
    /// Half-open range `[min, max)`
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
            is_min_inclusive: true,
            is_max_inclusive: false,
        }
    }

    /// The whole key space
    pub fn full() -> Self {
        Self::new(MIN_INCLUSIVE, MAX_EXCLUSIVE)
    }

    /// The single key `value`
    pub fn point(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            min: value.clone(),
            max: value,
            is_min_inclusive: true,
            is_max_inclusive: true,
        }
    }

    pub fn is_single_value(&self) -> bool {
        self.min == self.max && self.is_min_inclusive && self.is_max_inclusive
    }

    pub fn is_empty(&self) -> bool {
        match self.min.cmp(&self.max) {
            Ordering::Greater => true,
            Ordering::Equal => !(self.is_min_inclusive && self.is_max_inclusive),
            Ordering::Less => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let above_min = match key.cmp(self.min.as_str()) {
            Ordering::Greater => true,
            Ordering::Equal => self.is_min_inclusive,
            Ordering::Less => false,
        };
        let below_max = match key.cmp(self.max.as_str()) {
            Ordering::Less => true,
            Ordering::Equal => self.is_max_inclusive,
            Ordering::Greater => false,
        };
        above_min && below_max
    }

    /// Whether the two ranges share at least one key
    pub fn overlaps(&self, other: &Range) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.intersection(other).is_some()
    }

    /// Whether every key of `other` is inside `self`
    pub fn contains_range(&self, other: &Range) -> bool {
        if other.is_empty() {
            return true;
        }
        let min_ok = match self.min.cmp(&other.min) {
            Ordering::Less => true,
            Ordering::Equal => self.is_min_inclusive || !other.is_min_inclusive,
            Ordering::Greater => false,
        };
        let max_ok = match self.max.cmp(&other.max) {
            Ordering::Greater => true,
            Ordering::Equal => self.is_max_inclusive || !other.is_max_inclusive,
            Ordering::Less => false,
        };
        min_ok && max_ok
    }

    /// The keys in both ranges, `None` when disjoint
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        let (min, is_min_inclusive) = match self.min.cmp(&other.min) {
            Ordering::Greater => (self.min.clone(), self.is_min_inclusive),
            Ordering::Less => (other.min.clone(), other.is_min_inclusive),
            Ordering::Equal => (
                self.min.clone(),
                self.is_min_inclusive && other.is_min_inclusive,
            ),
        };
        let (max, is_max_inclusive) = match self.max.cmp(&other.max) {
            Ordering::Less => (self.max.clone(), self.is_max_inclusive),
            Ordering::Greater => (other.max.clone(), other.is_max_inclusive),
            Ordering::Equal => (
                self.max.clone(),
                self.is_max_inclusive && other.is_max_inclusive,
            ),
        };
        let range = Range {
            min,
            max,
            is_min_inclusive,
            is_max_inclusive,
        };
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{},{}{}",
            if self.is_min_inclusive { '[' } else { '(' },
            self.min,
            self.max,
            if self.is_max_inclusive { ']' } else { ')' }
        )
    }
}

/// Orders ranges by their lower bound
pub fn sort_by_min(ranges: &mut [Range]) {
    ranges.sort_by(|a, b| a.min.cmp(&b.min).then_with(|| a.max.cmp(&b.max)));
}

/// Whether `children` cover `parent` exactly, with no gap and no overlap
pub fn covers_exactly(parent: &Range, children: &[Range]) -> bool {
    let mut sorted = children.to_vec();
    sort_by_min(&mut sorted);

    let Some(first) = sorted.first() else {
        return false;
    };
    if first.min != parent.min {
        return false;
    }
    for pair in sorted.windows(2) {
        if pair[0].max != pair[1].min {
            return false;
        }
    }
    sorted.last().map(|last| last.max == parent.max).unwrap_or(false)
}

/// Parts of `parent` that no child covers, in key order
pub fn uncovered(parent: &Range, children: &[Range]) -> Vec<Range> {
    let mut sorted = children.to_vec();
    sort_by_min(&mut sorted);

    let mut gaps = Vec::new();
    let mut cursor = parent.min.clone();
    for child in &sorted {
        if child.min > cursor {
            gaps.push(Range::new(cursor.clone(), child.min.clone()));
        }
        if child.max > cursor {
            cursor = child.max.clone();
        }
    }
    if cursor < parent.max {
        gaps.push(Range::new(cursor, parent.max.clone()));
    }
    gaps
}

/// A physical partition as reported by the routing map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,
    /// Ids of the ranges this one was split or merged from
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
        }
    }

    pub fn to_range(&self) -> Range {
        Range::new(self.min_inclusive.clone(), self.max_exclusive.clone())
    }
}

/// A caller-supplied slice of the container to query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedRange {
    /// An effective partition key range
    Range(Range),
    /// Every document of one logical partition
    PartitionKey(PartitionKey),
    /// One physical partition by id
    PartitionKeyRangeId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_contains() {
        let range = Range::new("20", "40");
        assert!(range.contains("20"));
        assert!(range.contains("3F"));
        assert!(!range.contains("40"));
        assert!(!range.contains("1F"));
    }

    #[test]
    fn test_point_range() {
        let point = Range::point("2A000000");
        assert!(point.is_single_value());
        assert!(!point.is_empty());
        assert!(point.contains("2A000000"));
        assert!(Range::new("20", "40").overlaps(&point));
        assert!(!Range::new("30", "40").overlaps(&point));
    }

    #[test]
    fn test_intersection_and_containment() {
        let a = Range::new("", "80");
        let b = Range::new("40", "FF");

        let both = a.intersection(&b).unwrap();
        assert_eq!(both, Range::new("40", "80"));
        assert!(a.contains_range(&both));
        assert!(b.contains_range(&both));
        assert!(!a.contains_range(&b));

        let adjacent = Range::new("80", "FF");
        assert!(a.intersection(&adjacent).is_none());
        assert!(!a.overlaps(&adjacent));
    }

    #[test]
    fn test_covers_exactly() {
        let parent = Range::new("20", "80");
        let children = vec![Range::new("50", "80"), Range::new("20", "50")];
        assert!(covers_exactly(&parent, &children));

        let gap = vec![Range::new("20", "40"), Range::new("50", "80")];
        assert!(!covers_exactly(&parent, &gap));

        let overlap = vec![Range::new("20", "60"), Range::new("50", "80")];
        assert!(!covers_exactly(&parent, &overlap));
    }

    #[test]
    fn test_uncovered_gaps() {
        let parent = Range::new("", "80");
        assert!(uncovered(&parent, &[Range::new("", "40"), Range::new("40", "80")]).is_empty());
        assert_eq!(
            uncovered(&parent, &[Range::new("10", "20"), Range::new("60", "FF")]),
            vec![Range::new("", "10"), Range::new("20", "60")]
        );
        assert_eq!(uncovered(&parent, &[]), vec![parent.clone()]);
    }

    #[test]
    fn test_range_serializes_without_default_flags() {
        let json = serde_json::to_value(Range::new("", "FF")).unwrap();
        assert_eq!(json, serde_json::json!({"min": "", "max": "FF"}));

        let point = serde_json::to_value(Range::point("AB")).unwrap();
        assert_eq!(point["isMaxInclusive"], serde_json::json!(true));
    }
}
