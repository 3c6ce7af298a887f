//! Scripted in-memory backend for unit tests.

use crate::api::{
    ApiError, ApiResult, Operation, PostEditRequest, ReviewBackend, ValidationRequest,
};
use crate::model::{
    FullContent, IssueCase, IssueDimension, JobStatusSnapshot, PostEditLog, SegmentPage,
    SegmentRecord, Severity, ValidationReport,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
pub(crate) struct MockBackend {
    pub segments: Mutex<Option<Vec<SegmentRecord>>>,
    pub report_total: AtomicBool,
    pub full_content: Mutex<Option<FullContent>>,
    pub validation: Mutex<Option<ValidationReport>>,
    pub post_edit: Mutex<Option<PostEditLog>>,
    /// Popped one per status call; the last entry repeats.
    pub statuses: Mutex<VecDeque<JobStatusSnapshot>>,
    pub fail_pages: AtomicBool,
    pub fail_status: AtomicBool,
    pub page_gate: Mutex<Option<Arc<Notify>>>,
    /// Holds the next validation read only; the report is captured before
    /// waiting.
    pub validation_gate: Mutex<Option<Arc<Notify>>>,
    pub validation_requests: Mutex<Vec<ValidationRequest>>,
    pub post_edit_requests: Mutex<Vec<PostEditRequest>>,
    calls: Mutex<BTreeMap<Operation, usize>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `count` segments, indices `0..count`, through the paging endpoint.
    pub fn with_segments(count: usize) -> Self {
        let backend = Self::new();
        *backend.segments.lock().unwrap() = Some(numbered_segments(count));
        backend
    }

    pub fn gate_pages(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.page_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_next_validation(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.validation_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn set_validation(&self, segments: Vec<SegmentRecord>) {
        *self.validation.lock().unwrap() = Some(ValidationReport {
            summary: Default::default(),
            segments,
        });
    }

    pub fn set_post_edit(&self, segments: Vec<SegmentRecord>) {
        *self.post_edit.lock().unwrap() = Some(PostEditLog {
            summary: Default::default(),
            segments,
        });
    }

    pub fn push_statuses<I: IntoIterator<Item = JobStatusSnapshot>>(&self, statuses: I) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, operation: Operation) {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
    }

    fn server_error(operation: Operation) -> ApiError {
        ApiError::Server {
            operation,
            status: 500,
            body: "scripted failure".into(),
        }
    }
}

pub(crate) fn numbered_segments(count: usize) -> Vec<SegmentRecord> {
    (0..count)
        .map(|index| {
            SegmentRecord::new(
                index,
                format!("source {index}"),
                format!("translation {index}"),
            )
        })
        .collect()
}

pub(crate) fn critical(reason: &str) -> IssueCase {
    IssueCase::new(IssueDimension::Accuracy, Severity::Critical, reason)
}

pub(crate) fn missing(reason: &str) -> IssueCase {
    IssueCase::new(IssueDimension::Completeness, Severity::Major, reason)
}

#[async_trait]
impl ReviewBackend for MockBackend {
    async fn get_full_content(&self, _job_id: &str) -> ApiResult<Option<FullContent>> {
        self.record(Operation::GetFullContent);
        Ok(self.full_content.lock().unwrap().clone())
    }

    async fn get_segments_page(
        &self,
        _job_id: &str,
        offset: usize,
        limit: usize,
    ) -> ApiResult<Option<SegmentPage>> {
        self.record(Operation::GetSegmentsPage);
        let gate = self.page_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(Self::server_error(Operation::GetSegmentsPage));
        }

        let segments = self.segments.lock().unwrap().clone();
        Ok(segments.map(|all| {
            let start = offset.min(all.len());
            let end = offset.saturating_add(limit).min(all.len());
            SegmentPage {
                segments: all[start..end].to_vec(),
                has_more: end < all.len(),
                total: self
                    .report_total
                    .load(Ordering::SeqCst)
                    .then_some(all.len()),
            }
        }))
    }

    async fn get_validation_report(&self, _job_id: &str) -> ApiResult<Option<ValidationReport>> {
        self.record(Operation::GetValidationReport);
        let report = self.validation.lock().unwrap().clone();
        let gate = self.validation_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(report)
    }

    async fn get_post_edit_log(&self, _job_id: &str) -> ApiResult<Option<PostEditLog>> {
        self.record(Operation::GetPostEditLog);
        Ok(self.post_edit.lock().unwrap().clone())
    }

    async fn get_job_status(&self, _job_id: &str) -> ApiResult<Option<JobStatusSnapshot>> {
        self.record(Operation::GetJobStatus);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(Self::server_error(Operation::GetJobStatus));
        }
        let mut statuses = self.statuses.lock().unwrap();
        let snapshot = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        Ok(snapshot)
    }

    async fn trigger_validation(
        &self,
        _job_id: &str,
        request: &ValidationRequest,
    ) -> ApiResult<()> {
        self.record(Operation::TriggerValidation);
        self.validation_requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn trigger_post_edit(&self, _job_id: &str, request: &PostEditRequest) -> ApiResult<()> {
        self.record(Operation::TriggerPostEdit);
        self.post_edit_requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn resume_job(&self, _job_id: &str) -> ApiResult<()> {
        self.record(Operation::ResumeJob);
        Ok(())
    }

    async fn delete_job(&self, _job_id: &str) -> ApiResult<()> {
        self.record(Operation::DeleteJob);
        Err(Self::server_error(Operation::DeleteJob))
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}
