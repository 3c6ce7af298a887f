//! Merges per-segment data from the four read sources into one ordered,
//! de-duplicated sequence.
//!
//! For a given index the record from the highest-priority source wins
//! outright; lower-priority reports for that index are ignored, never merged
//! field by field. Issues are the exception: once a validation report has been
//! ingested, every segment takes its issues from that report.
//!
//! Full-content fallback records are indexed by line, not by segment, so they
//! only fill an otherwise empty sequence. The first record from any other
//! source evicts them, and later fallback batches are ignored.

use crate::model::{FullContent, IssueCase, SegmentRecord};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a batch of segment data came from. Declaration order is priority
/// order, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    FullContentFallback,
    ValidationPreview,
    PaginatedSegment,
    PostEdit,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::FullContentFallback => "full_content_fallback",
            SourceKind::ValidationPreview => "validation_preview",
            SourceKind::PaginatedSegment => "paginated_segment",
            SourceKind::PostEdit => "post_edit",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw fetch result tagged with its source.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentBatch {
    PostEdit(Vec<SegmentRecord>),
    PaginatedSegment(Vec<SegmentRecord>),
    /// A complete validation report. Its issue lists replace every issue list
    /// seen before.
    ValidationPreview(Vec<SegmentRecord>),
    FullContentFallback(Vec<SegmentRecord>),
}

impl SegmentBatch {
    pub fn kind(&self) -> SourceKind {
        match self {
            SegmentBatch::PostEdit(_) => SourceKind::PostEdit,
            SegmentBatch::PaginatedSegment(_) => SourceKind::PaginatedSegment,
            SegmentBatch::ValidationPreview(_) => SourceKind::ValidationPreview,
            SegmentBatch::FullContentFallback(_) => SourceKind::FullContentFallback,
        }
    }

    pub fn records(&self) -> &[SegmentRecord] {
        match self {
            SegmentBatch::PostEdit(records)
            | SegmentBatch::PaginatedSegment(records)
            | SegmentBatch::ValidationPreview(records)
            | SegmentBatch::FullContentFallback(records) => records,
        }
    }

    /// Splits an unsegmented full-content blob into one segment per line,
    /// indexed from zero. Source lines are paired positionally when present.
    pub fn from_full_content(content: &FullContent) -> Self {
        let mut source_lines = content
            .source_text
            .as_deref()
            .map(|text| text.lines().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();

        let records = content
            .translated_text
            .lines()
            .enumerate()
            .map(|(index, line)| {
                let source = source_lines.next().unwrap_or_default();
                SegmentRecord::new(index, source, line)
            })
            .collect();
        SegmentBatch::FullContentFallback(records)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    source: SourceKind,
    record: SegmentRecord,
}

/// Owner of the canonical segment sequence.
#[derive(Debug, Clone, Default)]
pub struct SegmentReconciler {
    slots: BTreeMap<usize, Slot>,
    validation_issues: Option<BTreeMap<usize, Vec<IssueCase>>>,
}

impl SegmentReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles a set of batches from scratch.
    pub fn reconcile<I>(batches: I) -> Vec<SegmentRecord>
    where
        I: IntoIterator<Item = SegmentBatch>,
    {
        let mut reconciler = Self::new();
        for batch in batches {
            reconciler.ingest(batch);
        }
        reconciler.segments()
    }

    /// Applies one batch. Returns how many records took a slot.
    pub fn ingest(&mut self, batch: SegmentBatch) -> usize {
        let source = batch.kind();
        if source == SourceKind::FullContentFallback {
            if self.has_segmented_source() {
                debug!("ignored {source} batch: segmented data already present");
                return 0;
            }
        } else if !batch.records().is_empty() {
            self.evict_fallback();
        }

        let records = match batch {
            SegmentBatch::ValidationPreview(records) => {
                let issues = records
                    .iter()
                    .filter(|record| record.has_issues())
                    .map(|record| (record.index, record.issues.clone()))
                    .collect();
                self.validation_issues = Some(issues);
                records
            }
            SegmentBatch::PostEdit(records)
            | SegmentBatch::PaginatedSegment(records)
            | SegmentBatch::FullContentFallback(records) => records,
        };

        let offered = records.len();
        let mut accepted = 0;
        for record in records {
            if self.offer(source, record) {
                accepted += 1;
            }
        }
        debug!("reconciled {source} batch: {accepted}/{offered} records accepted");
        accepted
    }

    fn has_segmented_source(&self) -> bool {
        self.slots
            .values()
            .any(|slot| slot.source > SourceKind::FullContentFallback)
    }

    fn evict_fallback(&mut self) {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.source != SourceKind::FullContentFallback);
        let evicted = before - self.slots.len();
        if evicted > 0 {
            debug!("dropped {evicted} full-content fallback lines");
        }
    }

    fn offer(&mut self, source: SourceKind, record: SegmentRecord) -> bool {
        match self.slots.get_mut(&record.index) {
            Some(slot) if slot.source > source => false,
            Some(slot) => {
                slot.source = source;
                slot.record = record;
                true
            }
            None => {
                self.slots.insert(record.index, Slot { source, record });
                true
            }
        }
    }

    /// The canonical sequence, ascending by index.
    pub fn segments(&self) -> Vec<SegmentRecord> {
        self.slots
            .keys()
            .filter_map(|index| self.get(*index))
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<SegmentRecord> {
        let slot = self.slots.get(&index)?;
        let mut record = slot.record.clone();
        if let Some(validation) = &self.validation_issues {
            record.issues = validation.get(&index).cloned().unwrap_or_default();
        }
        Some(record)
    }

    pub fn source_of(&self, index: usize) -> Option<SourceKind> {
        self.slots.get(&index).map(|slot| slot.source)
    }

    pub fn has_validation(&self) -> bool {
        self.validation_issues.is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// One past the highest known index, so gaps still count toward the range.
    pub fn index_span(&self) -> usize {
        self.slots
            .keys()
            .next_back()
            .map(|index| index + 1)
            .unwrap_or(0)
    }

    pub fn full_text(&self) -> String {
        reconstruct_full_text(&self.segments())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.validation_issues = None;
    }
}

/// Joins the displayed translation of each record with a single newline, in
/// index order. Missing indices are skipped, not padded.
pub fn reconstruct_full_text(records: &[SegmentRecord]) -> String {
    let mut ordered: Vec<&SegmentRecord> = records.iter().collect();
    ordered.sort_by_key(|record| record.index);
    ordered
        .iter()
        .map(|record| record.display_text())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssueDimension, Severity};

    fn issue(reason: &str) -> IssueCase {
        IssueCase::new(IssueDimension::Accuracy, Severity::Major, reason)
    }

    #[test]
    fn post_edit_beats_paginated_segment() {
        let merged = SegmentReconciler::reconcile(vec![
            SegmentBatch::PaginatedSegment(vec![SegmentRecord::new(0, "src", "A")]),
            SegmentBatch::PostEdit(vec![SegmentRecord::new(0, "src", "A").with_edit("B")]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].display_text(), "B");
    }

    #[test]
    fn arrival_order_does_not_change_winner() {
        let preview = SegmentBatch::ValidationPreview(vec![SegmentRecord::new(1, "s", "trunc")]);
        let page = SegmentBatch::PaginatedSegment(vec![SegmentRecord::new(1, "s", "full")]);

        let forward = SegmentReconciler::reconcile(vec![preview.clone(), page.clone()]);
        let backward = SegmentReconciler::reconcile(vec![page, preview]);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].translated_text, "full");
    }

    #[test]
    fn lower_priority_report_is_ignored_entirely() {
        let mut reconciler = SegmentReconciler::new();
        reconciler.ingest(SegmentBatch::PostEdit(vec![
            SegmentRecord::new(2, "src", "machine").with_edit("edited"),
        ]));
        let accepted = reconciler.ingest(SegmentBatch::FullContentFallback(vec![
            SegmentRecord::new(2, "other src", "fallback"),
        ]));

        assert_eq!(accepted, 0);
        let record = reconciler.get(2).unwrap();
        assert_eq!(record.source_text, "src");
        assert_eq!(record.translated_text, "machine");
        assert_eq!(reconciler.source_of(2), Some(SourceKind::PostEdit));
    }

    #[test]
    fn issues_come_from_validation_regardless_of_text_source() {
        let mut reconciler = SegmentReconciler::new();
        reconciler.ingest(SegmentBatch::ValidationPreview(vec![SegmentRecord::new(
            3, "s", "preview",
        )
        .with_issues(vec![issue("wrong tense")])]));
        reconciler.ingest(SegmentBatch::PostEdit(vec![
            SegmentRecord::new(3, "s", "t").with_edit("edited"),
        ]));

        let record = reconciler.get(3).unwrap();
        assert_eq!(record.display_text(), "edited");
        assert_eq!(record.issues.len(), 1);
        assert_eq!(record.issues[0].reason, "wrong tense");
    }

    #[test]
    fn fresh_validation_replaces_all_issue_lists() {
        let mut reconciler = SegmentReconciler::new();
        reconciler.ingest(SegmentBatch::ValidationPreview(vec![
            SegmentRecord::new(0, "a", "a").with_issues(vec![issue("x")]),
            SegmentRecord::new(1, "b", "b").with_issues(vec![issue("y")]),
        ]));
        reconciler.ingest(SegmentBatch::ValidationPreview(vec![
            SegmentRecord::new(1, "b", "b").with_issues(vec![issue("y"), issue("z")]),
        ]));

        assert!(reconciler.get(0).unwrap().issues.is_empty());
        assert_eq!(reconciler.get(1).unwrap().issues.len(), 2);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let batches = vec![
            SegmentBatch::FullContentFallback(vec![
                SegmentRecord::new(0, "", "zero"),
                SegmentRecord::new(1, "", "one"),
            ]),
            SegmentBatch::PaginatedSegment(vec![SegmentRecord::new(5, "s", "FIVE")]),
            SegmentBatch::ValidationPreview(vec![
                SegmentRecord::new(0, "", "z").with_issues(vec![issue("gap")]),
            ]),
        ];
        let first = SegmentReconciler::reconcile(batches.clone());
        let second = SegmentReconciler::reconcile(batches);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(
            first.iter().map(|record| record.index).collect::<Vec<_>>(),
            vec![0, 5]
        );
    }

    #[test]
    fn empty_input_yields_empty_sequence() {
        let merged = SegmentReconciler::reconcile(Vec::<SegmentBatch>::new());
        assert!(merged.is_empty());
        assert_eq!(SegmentReconciler::new().full_text(), "");
    }

    #[test]
    fn full_text_skips_gaps_and_uses_edits() {
        let records = vec![
            SegmentRecord::new(4, "", "four"),
            SegmentRecord::new(0, "", "zero"),
            SegmentRecord::new(2, "", "two").with_edit("TWO"),
        ];
        assert_eq!(reconstruct_full_text(&records), "zero\nTWO\nfour");
    }

    #[test]
    fn full_content_splits_into_indexed_lines() {
        let batch = SegmentBatch::from_full_content(&FullContent {
            translated_text: "un\ndeux\ntrois\n".into(),
            source_text: Some("one\ntwo".into()),
        });
        let records = batch.records();
        assert_eq!(batch.kind(), SourceKind::FullContentFallback);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].source_text, "two");
        assert_eq!(records[2].source_text, "");
        assert_eq!(records[2].translated_text, "trois");
    }

    #[test]
    fn fallback_lines_never_mix_with_real_segments() {
        let pages = SegmentBatch::PaginatedSegment(vec![
            SegmentRecord::new(0, "S1a\nS1b", "T1a\nT1b"),
            SegmentRecord::new(1, "S2", "T2"),
        ]);
        let fallback = SegmentBatch::from_full_content(&FullContent {
            translated_text: "T1a\nT1b\nT2".into(),
            source_text: None,
        });

        for batches in [
            vec![fallback.clone(), pages.clone()],
            vec![pages.clone(), fallback.clone()],
        ] {
            let mut reconciler = SegmentReconciler::new();
            for batch in batches {
                reconciler.ingest(batch);
            }
            let indices: Vec<usize> = reconciler.segments().iter().map(|r| r.index).collect();
            assert_eq!(indices, vec![0, 1]);
            assert_eq!(reconciler.index_span(), 2);
            assert_eq!(reconciler.full_text(), "T1a\nT1b\nT2");
            assert_eq!(reconciler.source_of(1), Some(SourceKind::PaginatedSegment));
        }
    }

    #[test]
    fn fallback_fills_an_empty_sequence_until_segments_arrive() {
        let mut reconciler = SegmentReconciler::new();
        let accepted = reconciler.ingest(SegmentBatch::from_full_content(&FullContent {
            translated_text: "a\nb\nc".into(),
            source_text: None,
        }));
        assert_eq!(accepted, 3);
        assert_eq!(reconciler.full_text(), "a\nb\nc");

        reconciler.ingest(SegmentBatch::PaginatedSegment(Vec::new()));
        assert_eq!(reconciler.len(), 3);

        reconciler.ingest(SegmentBatch::ValidationPreview(vec![
            SegmentRecord::new(4, "s", "t").with_issues(vec![issue("gap")]),
        ]));
        assert_eq!(reconciler.len(), 1);
        assert_eq!(reconciler.index_span(), 5);
        assert_eq!(reconciler.source_of(0), None);
    }

    #[test]
    fn index_span_counts_gaps() {
        let mut reconciler = SegmentReconciler::new();
        reconciler.ingest(SegmentBatch::PaginatedSegment(vec![
            SegmentRecord::new(0, "", "a"),
            SegmentRecord::new(9, "", "b"),
        ]));
        assert_eq!(reconciler.len(), 2);
        assert_eq!(reconciler.index_span(), 10);
    }
}
