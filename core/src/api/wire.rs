//! JSON payloads as the backend sends them, and their normalization into the
//! model types.
//!
//! The backend has shipped two issue shapes over time: a structured `cases`
//! array and a legacy flat `issues` array whose entries are either plain
//! strings or loosely shaped objects. Both end up as [`IssueCase`] here so no
//! consumer ever branches on field presence.

use crate::model::{
    FullContent, IssueCase, IssueDimension, JobStatus, JobStatusSnapshot, PostEditLog,
    PostEditSummary, SegmentPage, SegmentRecord, Severity, ValidationReport, ValidationSummary,
};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

const LEGACY_DEFAULT_SEVERITY: Severity = Severity::Major;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireCase {
    #[serde(alias = "issue_type", alias = "issueType", alias = "category", alias = "type")]
    pub dimension: Option<String>,
    pub severity: Option<Value>,
    #[serde(alias = "sourceExcerpt", alias = "source", alias = "original")]
    pub source_excerpt: Option<String>,
    #[serde(
        alias = "currentTranslation",
        alias = "translation",
        alias = "target"
    )]
    pub current_translation: Option<String>,
    #[serde(alias = "explanation", alias = "description", alias = "message")]
    pub reason: Option<String>,
    #[serde(alias = "suggestion", alias = "suggested_fix", alias = "suggestedFix")]
    pub correction: Option<String>,
    pub tags: Vec<String>,
}

impl WireCase {
    pub fn into_issue(self) -> IssueCase {
        let dimension = self
            .dimension
            .as_deref()
            .map(IssueDimension::parse_loose)
            .unwrap_or(IssueDimension::Other);
        let severity = self
            .severity
            .as_ref()
            .and_then(parse_severity)
            .unwrap_or(LEGACY_DEFAULT_SEVERITY);
        IssueCase {
            dimension,
            severity,
            source_excerpt: self.source_excerpt.unwrap_or_default(),
            current_translation: self.current_translation.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
            correction: self.correction.filter(|value| !value.trim().is_empty()),
            tags: self.tags,
        }
    }
}

fn parse_severity(value: &Value) -> Option<Severity> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.round() as i64))
            .map(Severity::from_level_clamped),
        Value::String(text) => Severity::parse_loose(text),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireLegacyIssue {
    Text(String),
    Case(WireCase),
}

impl WireLegacyIssue {
    pub fn into_issue(self) -> IssueCase {
        match self {
            WireLegacyIssue::Text(reason) => {
                IssueCase::new(IssueDimension::Other, LEGACY_DEFAULT_SEVERITY, reason)
            }
            WireLegacyIssue::Case(case) => case.into_issue(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireSegment {
    #[serde(alias = "segment_index", alias = "segmentIndex")]
    pub index: Option<usize>,
    #[serde(alias = "sourceText", alias = "source", alias = "original_text")]
    pub source_text: Option<String>,
    #[serde(alias = "translatedText", alias = "translation")]
    pub translated_text: Option<String>,
    #[serde(alias = "editedText", alias = "post_edited_text", alias = "postEditedText")]
    pub edited_text: Option<String>,
    #[serde(alias = "wasEdited")]
    pub was_edited: Option<bool>,
    #[serde(alias = "structured_cases", alias = "structuredCases")]
    pub cases: Option<Vec<WireCase>>,
    pub issues: Option<Vec<WireLegacyIssue>>,
}

impl WireSegment {
    /// Returns `None` for entries without an index; they cannot be joined.
    pub fn into_record(self) -> Option<SegmentRecord> {
        let Some(index) = self.index else {
            warn!("dropping segment payload without an index");
            return None;
        };

        let issues = match (self.cases, self.issues) {
            (Some(cases), _) if !cases.is_empty() => {
                cases.into_iter().map(WireCase::into_issue).collect()
            }
            (_, Some(legacy)) => legacy.into_iter().map(WireLegacyIssue::into_issue).collect(),
            _ => Vec::new(),
        };

        let edited_text = self.edited_text.filter(|text| !text.is_empty());
        let was_edited = self.was_edited.unwrap_or(edited_text.is_some()) && edited_text.is_some();

        Some(SegmentRecord {
            index,
            source_text: self.source_text.unwrap_or_default(),
            translated_text: self.translated_text.unwrap_or_default(),
            edited_text,
            was_edited,
            issues,
        })
    }
}

fn into_records(segments: Vec<WireSegment>) -> Vec<SegmentRecord> {
    segments
        .into_iter()
        .filter_map(WireSegment::into_record)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireFullContent {
    #[serde(alias = "translatedText", alias = "translated_content", alias = "content")]
    pub translated_text: Option<String>,
    #[serde(alias = "sourceText", alias = "source_content")]
    pub source_text: Option<String>,
}

impl From<WireFullContent> for FullContent {
    fn from(wire: WireFullContent) -> Self {
        FullContent {
            translated_text: wire.translated_text.unwrap_or_default(),
            source_text: wire.source_text,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireSegmentPage {
    pub segments: Vec<WireSegment>,
    #[serde(alias = "hasMore")]
    pub has_more: Option<bool>,
    #[serde(alias = "total_segments", alias = "totalSegments")]
    pub total: Option<usize>,
}

impl WireSegmentPage {
    /// When the server omits `has_more` it is derived from `total`, or from
    /// whether the page came back full.
    pub fn into_page(self, offset: usize, limit: usize) -> SegmentPage {
        let received = self.segments.len();
        let has_more = self.has_more.unwrap_or_else(|| match self.total {
            Some(total) => offset + received < total,
            None => received > 0 && received >= limit,
        });
        SegmentPage {
            segments: into_records(self.segments),
            has_more,
            total: self.total,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireValidationReport {
    pub summary: ValidationSummary,
    #[serde(
        alias = "perSegmentResults",
        alias = "segment_results",
        alias = "segments",
        alias = "results"
    )]
    pub per_segment_results: Vec<WireSegment>,
}

impl From<WireValidationReport> for ValidationReport {
    fn from(wire: WireValidationReport) -> Self {
        ValidationReport {
            summary: wire.summary,
            segments: into_records(wire.per_segment_results),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WirePostEditLog {
    pub summary: PostEditSummary,
    #[serde(alias = "edits", alias = "changes")]
    pub segments: Vec<WireSegment>,
}

impl From<WirePostEditLog> for PostEditLog {
    fn from(wire: WirePostEditLog) -> Self {
        let segments = into_records(wire.segments)
            .into_iter()
            .map(|mut record| {
                // Every entry in the change log is a post-edit result, even when
                // the server left the flag out.
                if record.edited_text.is_some() {
                    record.was_edited = true;
                }
                record
            })
            .collect();
        PostEditLog {
            summary: wire.summary,
            segments,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireJobStatus {
    #[serde(alias = "job_status", alias = "jobStatus")]
    pub status: Option<String>,
    #[serde(alias = "validationStatus")]
    pub validation_status: Option<String>,
    #[serde(alias = "postEditStatus")]
    pub post_edit_status: Option<String>,
    #[serde(alias = "illustrationStatus")]
    pub illustration_status: Option<String>,
    #[serde(alias = "validationProgress")]
    pub validation_progress: Option<f32>,
    #[serde(alias = "postEditProgress")]
    pub post_edit_progress: Option<f32>,
}

fn parse_status(field: &str, value: Option<&str>) -> Option<JobStatus> {
    let raw = value?;
    let parsed = JobStatus::parse_loose(raw);
    if parsed.is_none() {
        warn!("ignoring unknown {field} value {raw:?}");
    }
    parsed
}

impl From<WireJobStatus> for JobStatusSnapshot {
    fn from(wire: WireJobStatus) -> Self {
        JobStatusSnapshot {
            job_status: parse_status("job status", wire.status.as_deref())
                .unwrap_or(JobStatus::Pending),
            validation_status: parse_status("validation status", wire.validation_status.as_deref()),
            post_edit_status: parse_status("post-edit status", wire.post_edit_status.as_deref()),
            illustration_status: parse_status(
                "illustration status",
                wire.illustration_status.as_deref(),
            ),
            validation_progress: wire.validation_progress,
            post_edit_progress: wire.post_edit_progress,
        }
    }
}
