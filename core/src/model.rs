use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Quality dimension a detected problem belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueDimension {
    Completeness,
    Accuracy,
    Addition,
    NameConsistency,
    DialogueStyle,
    Flow,
    Other,
}

impl IssueDimension {
    pub const ALL: [IssueDimension; 7] = [
        IssueDimension::Completeness,
        IssueDimension::Accuracy,
        IssueDimension::Addition,
        IssueDimension::NameConsistency,
        IssueDimension::DialogueStyle,
        IssueDimension::Flow,
        IssueDimension::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueDimension::Completeness => "completeness",
            IssueDimension::Accuracy => "accuracy",
            IssueDimension::Addition => "addition",
            IssueDimension::NameConsistency => "name_consistency",
            IssueDimension::DialogueStyle => "dialogue_style",
            IssueDimension::Flow => "flow",
            IssueDimension::Other => "other",
        }
    }

    /// Lenient mapping used for backend payloads. Unknown names fall back to
    /// [`IssueDimension::Other`].
    pub fn parse_loose(value: &str) -> Self {
        let normalized = value
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        match normalized.as_str() {
            "completeness" | "missing_content" | "omission" | "missing" => {
                IssueDimension::Completeness
            }
            "accuracy" | "mistranslation" | "meaning" => IssueDimension::Accuracy,
            "addition" | "added_content" | "addition_content" => IssueDimension::Addition,
            "name_consistency" | "name_inconsistency" | "names" | "terminology" => {
                IssueDimension::NameConsistency
            }
            "dialogue_style" | "style" | "tone" | "dialogue" => IssueDimension::DialogueStyle,
            "flow" | "fluency" | "readability" => IssueDimension::Flow,
            _ => IssueDimension::Other,
        }
    }
}

impl fmt::Display for IssueDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity. `3` is critical, `1` is minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Severity {
    Minor = 1,
    Major = 2,
    Critical = 3,
}

impl Severity {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Clamps any integer into the `1..=3` range.
    pub fn from_level_clamped(level: i64) -> Self {
        match level {
            i64::MIN..=1 => Severity::Minor,
            2 => Severity::Major,
            _ => Severity::Critical,
        }
    }

    pub fn parse_loose(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if let Ok(level) = trimmed.parse::<i64>() {
            return Some(Self::from_level_clamped(level));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "critical" | "high" | "severe" => Some(Severity::Critical),
            "major" | "medium" | "moderate" => Some(Severity::Major),
            "minor" | "low" | "trivial" => Some(Severity::Minor),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Severity::Minor),
            2 => Ok(Severity::Major),
            3 => Ok(Severity::Critical),
            other => Err(format!("severity must be 1, 2 or 3, got {other}")),
        }
    }
}

impl From<Severity> for u8 {
    fn from(value: Severity) -> Self {
        value.level()
    }
}

/// Grouping key used by the selection matrix and its counters.
///
/// Critical issues form their own group regardless of dimension; everything
/// else is grouped by dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueTypeKey {
    Critical,
    MissingContent,
    AddedContent,
    Mistranslation,
    NameInconsistency,
    StyleIssue,
    FlowIssue,
    Other,
}

impl IssueTypeKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueTypeKey::Critical => "critical",
            IssueTypeKey::MissingContent => "missing_content",
            IssueTypeKey::AddedContent => "added_content",
            IssueTypeKey::Mistranslation => "mistranslation",
            IssueTypeKey::NameInconsistency => "name_inconsistency",
            IssueTypeKey::StyleIssue => "style_issue",
            IssueTypeKey::FlowIssue => "flow_issue",
            IssueTypeKey::Other => "other",
        }
    }
}

impl fmt::Display for IssueTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueTypeKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "critical" => IssueTypeKey::Critical,
            "missing_content" => IssueTypeKey::MissingContent,
            "added_content" => IssueTypeKey::AddedContent,
            "mistranslation" => IssueTypeKey::Mistranslation,
            "name_inconsistency" => IssueTypeKey::NameInconsistency,
            "style_issue" => IssueTypeKey::StyleIssue,
            "flow_issue" => IssueTypeKey::FlowIssue,
            "other" => IssueTypeKey::Other,
            _ => return Err(format!("unknown issue type key: {value}")),
        };
        Ok(key)
    }
}

/// One detected translation problem. Immutable once produced by a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCase {
    pub dimension: IssueDimension,
    pub severity: Severity,
    pub source_excerpt: String,
    pub current_translation: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IssueCase {
    pub fn new(dimension: IssueDimension, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            dimension,
            severity,
            source_excerpt: String::new(),
            current_translation: String::new(),
            reason: reason.into(),
            correction: None,
            tags: Vec::new(),
        }
    }

    pub fn with_correction(mut self, correction: impl Into<String>) -> Self {
        self.correction = Some(correction.into());
        self
    }

    pub fn type_key(&self) -> IssueTypeKey {
        if self.severity == Severity::Critical {
            return IssueTypeKey::Critical;
        }
        match self.dimension {
            IssueDimension::Completeness => IssueTypeKey::MissingContent,
            IssueDimension::Addition => IssueTypeKey::AddedContent,
            IssueDimension::Accuracy => IssueTypeKey::Mistranslation,
            IssueDimension::NameConsistency => IssueTypeKey::NameInconsistency,
            IssueDimension::DialogueStyle => IssueTypeKey::StyleIssue,
            IssueDimension::Flow => IssueTypeKey::FlowIssue,
            IssueDimension::Other => IssueTypeKey::Other,
        }
    }
}

/// Canonical per-segment view. `index` is the join key across every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub index: usize,
    pub source_text: String,
    pub translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_text: Option<String>,
    #[serde(default)]
    pub was_edited: bool,
    #[serde(default)]
    pub issues: Vec<IssueCase>,
}

impl SegmentRecord {
    pub fn new(index: usize, source_text: impl Into<String>, translated_text: impl Into<String>) -> Self {
        Self {
            index,
            source_text: source_text.into(),
            translated_text: translated_text.into(),
            edited_text: None,
            was_edited: false,
            issues: Vec::new(),
        }
    }

    pub fn with_edit(mut self, edited_text: impl Into<String>) -> Self {
        self.edited_text = Some(edited_text.into());
        self.was_edited = true;
        self
    }

    pub fn with_issues(mut self, issues: Vec<IssueCase>) -> Self {
        self.issues = issues;
        self
    }

    /// The translation shown to the reader: the post-edited text when the
    /// segment was edited, otherwise the machine translation.
    pub fn display_text(&self) -> &str {
        match (&self.edited_text, self.was_edited) {
            (Some(edited), true) => edited,
            _ => &self.translated_text,
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn issue_counts(&self) -> BTreeMap<IssueTypeKey, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.type_key()).or_insert(0) += 1;
        }
        counts
    }

    pub fn issues_of_type(&self, key: IssueTypeKey) -> impl Iterator<Item = &IssueCase> {
        self.issues.iter().filter(move |issue| issue.type_key() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_in_progress(self) -> bool {
        self == JobStatus::InProgress
    }

    pub fn parse_loose(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" | "queued" | "waiting" | "not_started" => Some(JobStatus::Pending),
            "in_progress" | "running" | "processing" | "started" => Some(JobStatus::InProgress),
            "completed" | "complete" | "done" | "succeeded" | "success" => {
                Some(JobStatus::Completed)
            }
            "failed" | "error" | "cancelled" | "canceled" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Latest known job state. Always replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusSnapshot {
    pub job_status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_edit_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_edit_progress: Option<f32>,
}

impl JobStatusSnapshot {
    pub fn new(job_status: JobStatus) -> Self {
        Self {
            job_status,
            validation_status: None,
            post_edit_status: None,
            illustration_status: None,
            validation_progress: None,
            post_edit_progress: None,
        }
    }

    pub fn with_validation(mut self, status: JobStatus) -> Self {
        self.validation_status = Some(status);
        self
    }

    pub fn with_post_edit(mut self, status: JobStatus) -> Self {
        self.post_edit_status = Some(status);
        self
    }

    pub fn with_illustration(mut self, status: JobStatus) -> Self {
        self.illustration_status = Some(status);
        self
    }

    /// Statuses the polling controller watches.
    pub fn watched(&self) -> impl Iterator<Item = JobStatus> + '_ {
        [
            self.validation_status,
            self.post_edit_status,
            self.illustration_status,
        ]
        .into_iter()
        .flatten()
    }

    pub fn any_in_progress(&self) -> bool {
        self.watched().any(JobStatus::is_in_progress)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSummary {
    #[serde(alias = "total_segments")]
    pub total_segments: usize,
    #[serde(alias = "validated_segments")]
    pub validated_segments: usize,
    #[serde(alias = "segments_with_issues")]
    pub segments_with_issues: usize,
    #[serde(alias = "total_issues")]
    pub total_issues: usize,
    #[serde(alias = "critical_issues")]
    pub critical_issues: usize,
    #[serde(alias = "overall_score")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostEditSummary {
    #[serde(alias = "total_segments")]
    pub total_segments: usize,
    #[serde(alias = "edited_segments", alias = "segments_edited")]
    pub edited_segments: usize,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FullContent {
    pub translated_text: String,
    pub source_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPage {
    pub segments: Vec<SegmentRecord>,
    pub has_more: bool,
    pub total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub summary: ValidationSummary,
    pub segments: Vec<SegmentRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostEditLog {
    pub summary: PostEditSummary,
    pub segments: Vec<SegmentRecord>,
}
