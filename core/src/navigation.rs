//! Segment cursor and issue-filtered jumping.

use crate::model::{IssueCase, IssueDimension, SegmentRecord, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Severity and dimension filter. An empty set admits everything on that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IssueFilter {
    pub severities: BTreeSet<Severity>,
    pub dimensions: BTreeSet<IssueDimension>,
}

impl IssueFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn severities<I: IntoIterator<Item = Severity>>(severities: I) -> Self {
        Self {
            severities: severities.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_dimensions<I: IntoIterator<Item = IssueDimension>>(mut self, dimensions: I) -> Self {
        self.dimensions = dimensions.into_iter().collect();
        self
    }

    pub fn matches(&self, issue: &IssueCase) -> bool {
        (self.severities.is_empty() || self.severities.contains(&issue.severity))
            && (self.dimensions.is_empty() || self.dimensions.contains(&issue.dimension))
    }

    pub fn matching_count(&self, segment: &SegmentRecord) -> usize {
        segment
            .issues
            .iter()
            .filter(|issue| self.matches(issue))
            .count()
    }
}

/// Indices of segments with at least one issue passing `filter`, ascending.
/// Issues are filtered first, then counted.
pub fn segments_with_matching_issues(segments: &[SegmentRecord], filter: &IssueFilter) -> Vec<usize> {
    let mut indices: Vec<usize> = segments
        .iter()
        .filter(|segment| filter.matching_count(segment) > 0)
        .map(|segment| segment.index)
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Current position within `0..total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentNavigator {
    current: usize,
    total: usize,
}

impl SegmentNavigator {
    pub fn new(total: usize) -> Self {
        Self { current: 0, total }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Adjusts the bound, pulling the cursor back inside it when needed.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
        self.current = self.current.min(total.saturating_sub(1));
    }

    pub fn next(&mut self) -> usize {
        if self.current + 1 < self.total {
            self.current += 1;
        }
        self.current
    }

    pub fn previous(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        self.current
    }

    pub fn first(&mut self) -> usize {
        self.current = 0;
        self.current
    }

    pub fn last(&mut self) -> usize {
        self.current = self.total.saturating_sub(1);
        self.current
    }

    /// Out-of-range targets leave the cursor where it is.
    pub fn go_to(&mut self, index: usize) -> bool {
        if index < self.total {
            self.current = index;
            true
        } else {
            false
        }
    }

    /// Next entry of `matches` after the cursor, wrapping to the first.
    pub fn next_match(&mut self, matches: &[usize]) -> Option<usize> {
        let target = matches
            .iter()
            .copied()
            .find(|index| *index > self.current)
            .or_else(|| matches.first().copied())?;
        self.go_to(target).then_some(target)
    }

    /// Previous entry of `matches` before the cursor, wrapping to the last.
    pub fn previous_match(&mut self, matches: &[usize]) -> Option<usize> {
        let target = matches
            .iter()
            .rev()
            .copied()
            .find(|index| *index < self.current)
            .or_else(|| matches.last().copied())?;
        self.go_to(target).then_some(target)
    }
}
