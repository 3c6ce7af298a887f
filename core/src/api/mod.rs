//! Backend seam.
//!
//! The review core talks to the job-processing backend only through
//! [`ReviewBackend`]. Read endpoints translate "not found" and "precondition
//! not satisfied" responses into `Ok(None)`; only transport failures and
//! server errors come back as [`ApiError`].

mod http;
pub mod wire;

pub use http::HttpBackend;

use crate::model::{FullContent, JobStatusSnapshot, PostEditLog, SegmentPage, ValidationReport};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Names the backend call an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetFullContent,
    GetSegmentsPage,
    GetValidationReport,
    GetPostEditLog,
    GetJobStatus,
    TriggerValidation,
    TriggerPostEdit,
    ResumeJob,
    DeleteJob,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::GetFullContent => "load full content",
            Operation::GetSegmentsPage => "load segments",
            Operation::GetValidationReport => "load validation report",
            Operation::GetPostEditLog => "load post-edit log",
            Operation::GetJobStatus => "load job status",
            Operation::TriggerValidation => "start validation",
            Operation::TriggerPostEdit => "start post-edit",
            Operation::ResumeJob => "resume job",
            Operation::DeleteJob => "delete job",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation}: server responded with {status}: {body}")]
    Server {
        operation: Operation,
        status: u16,
        body: String,
    },
    #[error("{operation}: not authorized ({status})")]
    Unauthorized { operation: Operation, status: u16 },
    #[error("{operation}: unexpected response payload: {message}")]
    Decode {
        operation: Operation,
        message: String,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ApiError {
    pub fn operation(&self) -> Option<Operation> {
        match self {
            ApiError::Transport { operation, .. }
            | ApiError::Server { operation, .. }
            | ApiError::Unauthorized { operation, .. }
            | ApiError::Decode { operation, .. } => Some(*operation),
            ApiError::Client(_) => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub quick: bool,
    pub sample_rate: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ValidationRequest {
    pub fn new(quick: bool, sample_rate: f32, model: Option<String>) -> Self {
        let sample_rate = if sample_rate.is_finite() {
            sample_rate.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            quick,
            sample_rate,
            model,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEditRequest {
    /// Per segment, one flag per issue in the segment's issue order.
    pub selected_cases: BTreeMap<usize, Vec<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Supplies the bearer token for each request. The core treats the token as
/// opaque; refreshing it is the provider's business.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            Self(None)
        } else {
            Self(Some(trimmed.to_string()))
        }
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    /// Reads `SEGMENT_REVIEW_TOKEN`.
    pub fn from_env() -> Self {
        std::env::var("SEGMENT_REVIEW_TOKEN")
            .map(Self::new)
            .unwrap_or_default()
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[async_trait]
pub trait ReviewBackend: Send + Sync {
    async fn get_full_content(&self, job_id: &str) -> ApiResult<Option<FullContent>>;

    async fn get_segments_page(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> ApiResult<Option<SegmentPage>>;

    async fn get_validation_report(&self, job_id: &str) -> ApiResult<Option<ValidationReport>>;

    async fn get_post_edit_log(&self, job_id: &str) -> ApiResult<Option<PostEditLog>>;

    /// `None` means the backend does not know the job.
    async fn get_job_status(&self, job_id: &str) -> ApiResult<Option<JobStatusSnapshot>>;

    async fn trigger_validation(&self, job_id: &str, request: &ValidationRequest)
        -> ApiResult<()>;

    async fn trigger_post_edit(&self, job_id: &str, request: &PostEditRequest) -> ApiResult<()>;

    async fn resume_job(&self, job_id: &str) -> ApiResult<()>;

    async fn delete_job(&self, job_id: &str) -> ApiResult<()>;

    fn backend_name(&self) -> &str {
        "review-backend"
    }
}
