use super::wire::{
    WireFullContent, WireJobStatus, WirePostEditLog, WireSegmentPage, WireValidationReport,
};
use super::{
    ApiError, ApiResult, Operation, PostEditRequest, ReviewBackend, TokenProvider,
    ValidationRequest,
};
use crate::config::ApiOptions;
use crate::model::{FullContent, JobStatusSnapshot, PostEditLog, SegmentPage, ValidationReport};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// [`ReviewBackend`] over the job service's JSON API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

/// Responses that mean "not available yet" on a read endpoint.
fn is_not_ready(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
        || status == StatusCode::BAD_REQUEST
        || status == StatusCode::CONFLICT
        || status == StatusCode::PRECONDITION_FAILED
        || status == StatusCode::UNPROCESSABLE_ENTITY
}

fn map_failure(operation: Operation, status: StatusCode, body: String) -> ApiError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ApiError::Unauthorized {
            operation,
            status: status.as_u16(),
        };
    }
    ApiError::Server {
        operation,
        status: status.as_u16(),
        body,
    }
}

impl HttpBackend {
    pub fn new(options: &ApiOptions, tokens: Arc<dyn TokenProvider>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs.max(1)))
            .build()
            .map_err(|err| ApiError::Client(err.to_string()))?;

        let root = options.endpoint_root();
        let base_url = Url::parse(&root)
            .map_err(|err| ApiError::Client(format!("invalid base url {root}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Client(format!("base url {root} cannot carry a path")));
        }

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    /// `{base}/jobs/{job_id}[/{suffix}]`. The job id is pushed as a single
    /// percent-encoded segment.
    fn job_url(&self, job_id: &str, suffix: &str) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ApiError::Client(format!("base url {} cannot carry a path", self.base_url))
            })?;
            segments.pop_if_empty().push("jobs").push(job_id);
            if !suffix.is_empty() {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, operation: Operation, request: RequestBuilder) -> ApiResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|source| ApiError::Transport { operation, source })
    }

    async fn get_optional<T: DeserializeOwned + Send>(
        &self,
        operation: Operation,
        url: Url,
        query: &[(&str, String)],
    ) -> ApiResult<Option<T>> {
        debug!("{operation}: GET {url}");
        let response = self
            .send(operation, self.client.get(url).query(query))
            .await?;

        let status = response.status();
        if is_not_ready(status) {
            debug!("{operation}: not available yet ({status})");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{operation}: server error {status}");
            return Err(map_failure(operation, status, body));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|err| ApiError::Decode {
                operation,
                message: err.to_string(),
            })
    }

    async fn expect_success(&self, operation: Operation, request: RequestBuilder) -> ApiResult<()> {
        let response = self.send(operation, request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!("{operation}: rejected with {status}");
        Err(map_failure(operation, status, body))
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        operation: Operation,
        url: Url,
        body: &B,
    ) -> ApiResult<()> {
        debug!("{operation}: POST {url}");
        self.expect_success(operation, self.client.post(url).json(body))
            .await
    }
}

#[async_trait]
impl ReviewBackend for HttpBackend {
    async fn get_full_content(&self, job_id: &str) -> ApiResult<Option<FullContent>> {
        let payload: Option<WireFullContent> = self
            .get_optional(Operation::GetFullContent, self.job_url(job_id, "content")?, &[])
            .await?;
        Ok(payload.map(FullContent::from))
    }

    async fn get_segments_page(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> ApiResult<Option<SegmentPage>> {
        let query = [("offset", offset.to_string()), ("limit", limit.to_string())];
        let payload: Option<WireSegmentPage> = self
            .get_optional(
                Operation::GetSegmentsPage,
                self.job_url(job_id, "segments")?,
                &query,
            )
            .await?;
        Ok(payload.map(|page| page.into_page(offset, limit)))
    }

    async fn get_validation_report(&self, job_id: &str) -> ApiResult<Option<ValidationReport>> {
        let payload: Option<WireValidationReport> = self
            .get_optional(
                Operation::GetValidationReport,
                self.job_url(job_id, "validation-report")?,
                &[],
            )
            .await?;
        Ok(payload.map(ValidationReport::from))
    }

    async fn get_post_edit_log(&self, job_id: &str) -> ApiResult<Option<PostEditLog>> {
        let payload: Option<WirePostEditLog> = self
            .get_optional(
                Operation::GetPostEditLog,
                self.job_url(job_id, "post-edit-log")?,
                &[],
            )
            .await?;
        Ok(payload.map(PostEditLog::from))
    }

    async fn get_job_status(&self, job_id: &str) -> ApiResult<Option<JobStatusSnapshot>> {
        let payload: Option<WireJobStatus> = self
            .get_optional(Operation::GetJobStatus, self.job_url(job_id, "status")?, &[])
            .await?;
        Ok(payload.map(JobStatusSnapshot::from))
    }

    async fn trigger_validation(
        &self,
        job_id: &str,
        request: &ValidationRequest,
    ) -> ApiResult<()> {
        self.post_json(
            Operation::TriggerValidation,
            self.job_url(job_id, "validation")?,
            request,
        )
        .await
    }

    async fn trigger_post_edit(&self, job_id: &str, request: &PostEditRequest) -> ApiResult<()> {
        self.post_json(
            Operation::TriggerPostEdit,
            self.job_url(job_id, "post-edit")?,
            request,
        )
        .await
    }

    async fn resume_job(&self, job_id: &str) -> ApiResult<()> {
        self.post_json(
            Operation::ResumeJob,
            self.job_url(job_id, "resume")?,
            &serde_json::json!({}),
        )
        .await
    }

    async fn delete_job(&self, job_id: &str) -> ApiResult<()> {
        let url = self.job_url(job_id, "")?;
        debug!("{}: DELETE {url}", Operation::DeleteJob);
        self.expect_success(Operation::DeleteJob, self.client.delete(url))
            .await
    }

    fn backend_name(&self) -> &str {
        "http"
    }
}
