//! Per-issue opt-out selection for post-editing.
//!
//! Every issue starts selected. The matrix only records segments the current
//! validation report flagged; a segment without an entry counts as fully
//! selected.

use crate::model::{IssueTypeKey, SegmentRecord};
use log::debug;
use std::collections::BTreeMap;

/// segment index -> issue type -> one flag per issue of that type.
pub type SelectionMatrix = BTreeMap<usize, BTreeMap<IssueTypeKey, Vec<bool>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitOutcome {
    pub created: usize,
    pub kept: usize,
    pub reset: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    matrix: SelectionMatrix,
}

fn all_selected(segment: &SegmentRecord) -> BTreeMap<IssueTypeKey, Vec<bool>> {
    segment
        .issue_counts()
        .into_iter()
        .map(|(key, count)| (key, vec![true; count]))
        .collect()
}

fn same_shape(entry: &BTreeMap<IssueTypeKey, Vec<bool>>, segment: &SegmentRecord) -> bool {
    let counts = segment.issue_counts();
    entry.len() == counts.len()
        && counts
            .iter()
            .all(|(key, count)| entry.get(key).map(Vec::len) == Some(*count))
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matrix(&self) -> &SelectionMatrix {
        &self.matrix
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Rebuilds the matrix from a freshly fetched validation report.
    ///
    /// A segment whose per-type issue counts are unchanged keeps the user's
    /// flags. Any other flagged segment is reset to all selected. Segments no
    /// longer flagged lose their entry.
    pub fn initialize_from_report(&mut self, segments: &[SegmentRecord]) -> InitOutcome {
        let mut outcome = InitOutcome::default();
        let mut previous = std::mem::take(&mut self.matrix);

        for segment in segments.iter().filter(|segment| segment.has_issues()) {
            let entry = match previous.remove(&segment.index) {
                Some(entry) if same_shape(&entry, segment) => {
                    outcome.kept += 1;
                    entry
                }
                Some(_) => {
                    outcome.reset += 1;
                    all_selected(segment)
                }
                None => {
                    outcome.created += 1;
                    all_selected(segment)
                }
            };
            self.matrix.insert(segment.index, entry);
        }
        outcome.removed = previous.len();

        debug!(
            "selection rebuilt: {} created, {} kept, {} reset, {} removed",
            outcome.created, outcome.kept, outcome.reset, outcome.removed
        );
        outcome
    }

    /// Sets one flag. Returns false, changing nothing, when the coordinate
    /// does not exist.
    pub fn toggle(
        &mut self,
        segment_index: usize,
        key: IssueTypeKey,
        issue_index: usize,
        selected: bool,
    ) -> bool {
        match self
            .matrix
            .get_mut(&segment_index)
            .and_then(|entry| entry.get_mut(&key))
            .and_then(|flags| flags.get_mut(issue_index))
        {
            Some(flag) => {
                *flag = selected;
                true
            }
            None => false,
        }
    }

    pub fn is_selected(&self, segment_index: usize, key: IssueTypeKey, issue_index: usize) -> bool {
        self.matrix
            .get(&segment_index)
            .and_then(|entry| entry.get(&key))
            .and_then(|flags| flags.get(issue_index))
            .copied()
            .unwrap_or(true)
    }

    /// Selects or deselects every issue of one type across all segments.
    /// Returns how many flags were touched.
    pub fn set_type(
        &mut self,
        segments: &[SegmentRecord],
        key: IssueTypeKey,
        selected: bool,
    ) -> usize {
        let mut touched = 0;
        for segment in segments {
            if segment.issues_of_type(key).next().is_none() {
                continue;
            }
            let entry = self
                .matrix
                .entry(segment.index)
                .or_insert_with(|| all_selected(segment));
            if let Some(flags) = entry.get_mut(&key) {
                flags.iter_mut().for_each(|flag| *flag = selected);
                touched += flags.len();
            }
        }
        touched
    }

    /// Selected issue count per type. A segment with no entry contributes
    /// its full count.
    pub fn compute_selected_counts(
        &self,
        segments: &[SegmentRecord],
    ) -> BTreeMap<IssueTypeKey, usize> {
        let mut totals = BTreeMap::new();
        for segment in segments {
            let entry = self.matrix.get(&segment.index);
            for (key, count) in segment.issue_counts() {
                let selected = match entry.and_then(|entry| entry.get(&key)) {
                    Some(flags) => flags.iter().filter(|flag| **flag).count(),
                    None => count,
                };
                *totals.entry(key).or_insert(0) += selected;
            }
        }
        totals
    }

    /// Flattens the matrix into one flag per issue, in each segment's issue
    /// order, for every segment that has issues.
    pub fn selected_cases(&self, segments: &[SegmentRecord]) -> BTreeMap<usize, Vec<bool>> {
        segments
            .iter()
            .filter(|segment| segment.has_issues())
            .map(|segment| {
                let mut seen: BTreeMap<IssueTypeKey, usize> = BTreeMap::new();
                let flags = segment
                    .issues
                    .iter()
                    .map(|issue| {
                        let key = issue.type_key();
                        let position = seen.entry(key).or_insert(0);
                        let flag = self.is_selected(segment.index, key, *position);
                        *position += 1;
                        flag
                    })
                    .collect();
                (segment.index, flags)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.matrix.clear();
    }
}
