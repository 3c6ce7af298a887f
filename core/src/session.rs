//! One review session over one job.
//!
//! The session owns the canonical segment sequence, the selection matrix and
//! the status poller, and is the only thing that mutates them. Hosts get read
//! accessors and the specific mutation entry points below. `close` is the
//! hard cancellation point: it stops the poller and makes any fetch still in
//! flight land on nothing.

use crate::api::{
    ApiError, ApiResult, HttpBackend, Operation, PostEditRequest, ReviewBackend, TokenProvider,
    ValidationRequest,
};
use crate::config::ReviewConfig;
use crate::loader::{IncrementalLoader, LoadAllSummary, LoadError, PageOutcome, StreamKind};
use crate::lock;
use crate::model::{
    IssueTypeKey, JobStatusSnapshot, PostEditSummary, SegmentRecord, ValidationSummary,
};
use crate::navigation::{segments_with_matching_issues, IssueFilter, SegmentNavigator};
use crate::pagination::PaginationCursor;
use crate::reconciler::{SegmentBatch, SegmentReconciler, SourceKind};
use crate::selection::SelectionState;
use crate::status_sync::{PollHandle, PollTarget, SyncController, SyncState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Last failure of one backend operation, kept for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub operation: Operation,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Ready,
    NotReady,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub full_content: Availability,
    pub validation: Availability,
    pub post_edit: Availability,
    pub segments: usize,
    /// The results were dropped: the session closed, or a newer refresh
    /// was applied first.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    pub session_id: Uuid,
    pub job_id: String,
    pub segments: usize,
    pub has_validation: bool,
    pub sync_state: SyncState,
    pub current_segment: usize,
    pub selected_counts: BTreeMap<IssueTypeKey, usize>,
    pub errors: Vec<SessionError>,
}

#[derive(Debug, Default)]
struct Summaries {
    validation: Option<ValidationSummary>,
    post_edit: Option<PostEditSummary>,
}

/// Refresh ordering. Every refresh takes a ticket before it fetches, and
/// only a ticket newer than the last applied one may write.
#[derive(Debug, Default)]
struct RefreshTickets {
    issued: u64,
    applied: u64,
}

impl RefreshTickets {
    fn begin(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn complete(&mut self, ticket: u64) -> bool {
        if ticket <= self.applied {
            return false;
        }
        self.applied = ticket;
        true
    }
}

/// Settled read results waiting to be applied.
#[derive(Default)]
struct Fetched {
    batches: Vec<SegmentBatch>,
    validation: Option<ValidationSummary>,
    post_edit: Option<PostEditSummary>,
}

pub struct ReviewSession {
    session_id: Uuid,
    job_id: String,
    backend: Arc<dyn ReviewBackend>,
    config: ReviewConfig,
    reconciler: Arc<Mutex<SegmentReconciler>>,
    loader: IncrementalLoader,
    selection: Mutex<SelectionState>,
    navigator: Mutex<SegmentNavigator>,
    sync: Mutex<SyncController>,
    summaries: Mutex<Summaries>,
    refreshes: Mutex<RefreshTickets>,
    errors: Mutex<BTreeMap<Operation, SessionError>>,
    poller: Mutex<Option<PollHandle>>,
    closed: AtomicBool,
}

impl ReviewSession {
    pub fn open(
        job_id: impl Into<String>,
        backend: Arc<dyn ReviewBackend>,
        config: ReviewConfig,
    ) -> Arc<Self> {
        let job_id = job_id.into();
        let session_id = Uuid::new_v4();
        let reconciler = Arc::new(Mutex::new(SegmentReconciler::new()));
        let loader = IncrementalLoader::new(
            backend.clone(),
            job_id.clone(),
            reconciler.clone(),
            config.paging.page_size,
            config.paging.load_all_batch_size,
        );
        info!(
            "[{session_id}] review session opened for job {job_id} via {}",
            backend.backend_name()
        );

        Arc::new(Self {
            session_id,
            job_id,
            backend,
            config,
            reconciler,
            loader,
            selection: Mutex::new(SelectionState::new()),
            navigator: Mutex::new(SegmentNavigator::default()),
            sync: Mutex::new(SyncController::new()),
            summaries: Mutex::new(Summaries::default()),
            refreshes: Mutex::new(RefreshTickets::default()),
            errors: Mutex::new(BTreeMap::new()),
            poller: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Opens a session against the HTTP backend described by `config.api`.
    pub fn connect(
        job_id: impl Into<String>,
        config: ReviewConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> ApiResult<Arc<Self>> {
        let backend = HttpBackend::new(&config.api, tokens)?;
        Ok(Self::open(job_id, Arc::new(backend), config))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ---- read path ----

    /// Fetches full content, validation report and post-edit log together and
    /// merges whatever is available. When refreshes overlap, only the most
    /// recently started one that has finished is applied; an older one that
    /// lands later is dropped whole, summaries included.
    pub async fn refresh(&self) -> RefreshReport {
        let ticket = lock(&self.refreshes).begin();
        let (full_content, validation, post_edit) = tokio::join!(
            self.backend.get_full_content(&self.job_id),
            self.backend.get_validation_report(&self.job_id),
            self.backend.get_post_edit_log(&self.job_id),
        );

        let mut fetched = Fetched::default();
        let full_content = match self.settle(Operation::GetFullContent, full_content) {
            Some(Some(content)) => {
                fetched.batches.push(SegmentBatch::from_full_content(&content));
                Availability::Ready
            }
            Some(None) => Availability::NotReady,
            None => Availability::Failed,
        };

        let validation = match self.settle(Operation::GetValidationReport, validation) {
            Some(Some(report)) => {
                fetched.validation = Some(report.summary);
                fetched.batches.push(SegmentBatch::ValidationPreview(report.segments));
                Availability::Ready
            }
            Some(None) => Availability::NotReady,
            None => Availability::Failed,
        };

        let post_edit = match self.settle(Operation::GetPostEditLog, post_edit) {
            Some(Some(log)) => {
                fetched.post_edit = Some(log.summary);
                fetched.batches.push(SegmentBatch::PostEdit(log.segments));
                Availability::Ready
            }
            Some(None) => Availability::NotReady,
            None => Availability::Failed,
        };

        let (segments, stale) = {
            let mut refreshes = lock(&self.refreshes);
            if self.is_closed() {
                debug!("[{}] session closed during refresh; results dropped", self.session_id);
                (0, true)
            } else if !refreshes.complete(ticket) {
                warn!(
                    "[{}] refresh #{ticket} superseded by #{}; results dropped",
                    self.session_id, refreshes.applied
                );
                (lock(&self.reconciler).len(), true)
            } else {
                (self.apply_fetched(fetched), false)
            }
        };

        let report = RefreshReport {
            full_content,
            validation,
            post_edit,
            segments,
            stale,
        };
        debug!("[{}] refresh: {report:?}", self.session_id);
        report
    }

    fn apply_fetched(&self, fetched: Fetched) -> usize {
        let fresh_validation = fetched.validation.is_some();
        {
            let mut summaries = lock(&self.summaries);
            if let Some(summary) = fetched.validation {
                summaries.validation = Some(summary);
            }
            if let Some(summary) = fetched.post_edit {
                summaries.post_edit = Some(summary);
            }
        }

        let (segments, span) = {
            let mut reconciler = lock(&self.reconciler);
            for batch in fetched.batches {
                reconciler.ingest(batch);
            }
            (reconciler.segments(), reconciler.index_span())
        };

        if fresh_validation {
            lock(&self.selection).initialize_from_report(&segments);
        }
        lock(&self.navigator).set_total(span);
        segments.len()
    }

    /// Next page of the browsing stream.
    pub async fn load_more(&self) -> Result<PageOutcome, LoadError> {
        let outcome = self.loader.load_more(StreamKind::Segments).await;
        self.after_load(Operation::GetSegmentsPage, outcome)
    }

    pub async fn load_page(&self, offset: usize, limit: usize) -> Result<PageOutcome, LoadError> {
        let outcome = self
            .loader
            .load_page(StreamKind::Segments, offset, limit)
            .await;
        self.after_load(Operation::GetSegmentsPage, outcome)
    }

    /// Loads every segment. `batch_size` defaults to `paging.loadAllBatchSize`.
    pub async fn load_all(&self, batch_size: Option<usize>) -> Result<LoadAllSummary, LoadError> {
        let summary = self.loader.load_all(batch_size).await;
        self.after_load(Operation::GetSegmentsPage, summary)
    }

    fn after_load<T>(&self, operation: Operation, result: Result<T, LoadError>) -> Result<T, LoadError> {
        match &result {
            Ok(_) => {
                self.clear_error(operation);
                let span = lock(&self.reconciler).index_span();
                lock(&self.navigator).set_total(span);
            }
            Err(LoadError::Api(error)) => self.record_error(error),
            Err(LoadError::InFlight { stream }) => {
                debug!("[{}] {stream} load rejected: already in flight", self.session_id);
            }
        }
        result
    }

    pub fn cursor(&self) -> PaginationCursor {
        self.loader.cursor(StreamKind::Segments)
    }

    pub fn is_loading(&self, stream: StreamKind) -> bool {
        self.loader.is_loading(stream)
    }

    /// Rewinds the browsing stream; a page still in flight is dropped.
    pub fn reset_paging(&self) {
        self.loader.reset(StreamKind::Segments);
    }

    pub fn segments(&self) -> Vec<SegmentRecord> {
        lock(&self.reconciler).segments()
    }

    pub fn segment(&self, index: usize) -> Option<SegmentRecord> {
        lock(&self.reconciler).get(index)
    }

    pub fn source_of(&self, index: usize) -> Option<SourceKind> {
        lock(&self.reconciler).source_of(index)
    }

    pub fn full_text(&self) -> String {
        lock(&self.reconciler).full_text()
    }

    pub fn validation_summary(&self) -> Option<ValidationSummary> {
        lock(&self.summaries).validation.clone()
    }

    pub fn post_edit_summary(&self) -> Option<PostEditSummary> {
        lock(&self.summaries).post_edit.clone()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        lock(&self.errors).values().cloned().collect()
    }

    pub fn error_for(&self, operation: Operation) -> Option<SessionError> {
        lock(&self.errors).get(&operation).cloned()
    }

    pub fn overview(&self) -> SessionOverview {
        let segments = self.segments();
        SessionOverview {
            session_id: self.session_id,
            job_id: self.job_id.clone(),
            segments: segments.len(),
            has_validation: lock(&self.reconciler).has_validation(),
            sync_state: self.sync_state(),
            current_segment: self.current_segment(),
            selected_counts: lock(&self.selection).compute_selected_counts(&segments),
            errors: self.errors(),
        }
    }

    // ---- selection ----

    pub fn toggle_issue(
        &self,
        segment_index: usize,
        key: IssueTypeKey,
        issue_index: usize,
        selected: bool,
    ) -> bool {
        lock(&self.selection).toggle(segment_index, key, issue_index, selected)
    }

    pub fn is_issue_selected(&self, segment_index: usize, key: IssueTypeKey, issue_index: usize) -> bool {
        lock(&self.selection).is_selected(segment_index, key, issue_index)
    }

    pub fn set_issue_type(&self, key: IssueTypeKey, selected: bool) -> usize {
        let segments = self.segments();
        lock(&self.selection).set_type(&segments, key, selected)
    }

    pub fn selected_counts(&self) -> BTreeMap<IssueTypeKey, usize> {
        let segments = self.segments();
        lock(&self.selection).compute_selected_counts(&segments)
    }

    pub fn selected_cases(&self) -> BTreeMap<usize, Vec<bool>> {
        let segments = self.segments();
        lock(&self.selection).selected_cases(&segments)
    }

    // ---- navigation ----

    pub fn current_segment(&self) -> usize {
        lock(&self.navigator).current()
    }

    pub fn next_segment(&self) -> usize {
        lock(&self.navigator).next()
    }

    pub fn previous_segment(&self) -> usize {
        lock(&self.navigator).previous()
    }

    pub fn first_segment(&self) -> usize {
        lock(&self.navigator).first()
    }

    pub fn last_segment(&self) -> usize {
        lock(&self.navigator).last()
    }

    pub fn go_to_segment(&self, index: usize) -> bool {
        lock(&self.navigator).go_to(index)
    }

    pub fn matching_segments(&self, filter: &IssueFilter) -> Vec<usize> {
        segments_with_matching_issues(&self.segments(), filter)
    }

    pub fn next_issue(&self, filter: &IssueFilter) -> Option<usize> {
        let matches = self.matching_segments(filter);
        lock(&self.navigator).next_match(&matches)
    }

    pub fn previous_issue(&self, filter: &IssueFilter) -> Option<usize> {
        let matches = self.matching_segments(filter);
        lock(&self.navigator).previous_match(&matches)
    }

    // ---- status ----

    pub fn sync_state(&self) -> SyncState {
        lock(&self.sync).state()
    }

    pub fn last_status(&self) -> Option<JobStatusSnapshot> {
        lock(&self.sync).last_snapshot().cloned()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poller)
            .as_ref()
            .is_some_and(PollHandle::is_active)
    }

    /// Fetches the job status once and starts the poller if anything is
    /// running.
    pub async fn sync_status(self: &Arc<Self>) -> ApiResult<SyncState> {
        let ticket = lock(&self.sync).begin_fetch();
        let snapshot = self.backend.get_job_status(&self.job_id).await;
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.record_error(&error);
                return Err(error);
            }
        };
        self.clear_error(Operation::GetJobStatus);

        let state = {
            let mut sync = lock(&self.sync);
            sync.apply(ticket, snapshot);
            sync.state()
        };
        if state == SyncState::Watching {
            self.ensure_polling();
        }
        Ok(state)
    }

    fn ensure_polling(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let mut poller = lock(&self.poller);
        if poller.as_ref().is_some_and(PollHandle::is_active) {
            return;
        }
        let period = self.config.polling.interval();
        debug!("[{}] polling job {} every {period:?}", self.session_id, self.job_id);
        *poller = Some(PollHandle::spawn(Arc::downgrade(self), period));
    }

    // ---- writes ----

    /// Starts a validation run. Without a request, the configured defaults
    /// are used.
    pub async fn trigger_validation(
        self: &Arc<Self>,
        request: Option<ValidationRequest>,
    ) -> ApiResult<()> {
        let request = request.unwrap_or_else(|| {
            let defaults = &self.config.validation;
            ValidationRequest::new(defaults.quick, defaults.sample_rate, defaults.model.clone())
        });
        let result = self
            .backend
            .trigger_validation(&self.job_id, &request)
            .await;
        self.after_write(Operation::TriggerValidation, result).await
    }

    /// Starts a post-edit run over the currently selected issues.
    pub async fn trigger_post_edit(self: &Arc<Self>) -> ApiResult<()> {
        let request = PostEditRequest {
            selected_cases: self.selected_cases(),
            model: self.config.post_edit.model.clone(),
        };
        let result = self.backend.trigger_post_edit(&self.job_id, &request).await;
        self.after_write(Operation::TriggerPostEdit, result).await
    }

    pub async fn resume_job(self: &Arc<Self>) -> ApiResult<()> {
        let result = self.backend.resume_job(&self.job_id).await;
        self.after_write(Operation::ResumeJob, result).await
    }

    /// Deletes the job and closes the session.
    pub async fn delete_job(&self) -> ApiResult<()> {
        match self.backend.delete_job(&self.job_id).await {
            Ok(()) => {
                info!("[{}] job {} deleted", self.session_id, self.job_id);
                self.close();
                lock(&self.reconciler).clear();
                lock(&self.selection).clear();
                lock(&self.navigator).set_total(0);
                Ok(())
            }
            Err(error) => {
                self.record_error(&error);
                Err(error)
            }
        }
    }

    async fn after_write(self: &Arc<Self>, operation: Operation, result: ApiResult<()>) -> ApiResult<()> {
        if let Err(error) = result {
            self.record_error(&error);
            return Err(error);
        }
        self.clear_error(operation);
        info!("[{}] {operation} accepted for job {}", self.session_id, self.job_id);

        if let Err(error) = self.sync_status().await {
            debug!("[{}] status check after {operation} failed: {error}", self.session_id);
        }
        Ok(())
    }

    // ---- lifecycle ----

    /// Stops polling and detaches every in-flight fetch. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut poller) = lock(&self.poller).take() {
            poller.stop();
        }
        lock(&self.sync).reset();
        self.loader.reset(StreamKind::Segments);
        self.loader.reset(StreamKind::LoadAll);
        info!("[{}] review session for job {} closed", self.session_id, self.job_id);
    }

    fn settle<T>(&self, operation: Operation, result: ApiResult<Option<T>>) -> Option<Option<T>> {
        match result {
            Ok(value) => {
                self.clear_error(operation);
                Some(value)
            }
            Err(error) => {
                self.record_error(&error);
                None
            }
        }
    }

    fn record_error(&self, error: &ApiError) {
        warn!("[{}] {error}", self.session_id);
        let Some(operation) = error.operation() else {
            return;
        };
        lock(&self.errors).insert(
            operation,
            SessionError {
                operation,
                message: error.to_string(),
                at: Utc::now(),
            },
        );
    }

    fn clear_error(&self, operation: Operation) {
        lock(&self.errors).remove(&operation);
    }
}

#[async_trait]
impl PollTarget for ReviewSession {
    async fn poll_tick(&self) -> SyncState {
        if self.is_closed() {
            return SyncState::Idle;
        }

        let ticket = lock(&self.sync).begin_fetch();
        let snapshot = match self.backend.get_job_status(&self.job_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.record_error(&error);
                return self.sync_state();
            }
        };
        self.clear_error(Operation::GetJobStatus);

        let (transition, state) = {
            let mut sync = lock(&self.sync);
            let transition = sync.apply(ticket, snapshot);
            (transition, sync.state())
        };

        let settled_now = transition.is_some_and(|transition| transition.to == SyncState::Settled);
        if state == SyncState::Watching || settled_now {
            self.refresh().await;
        }

        if self.is_closed() {
            SyncState::Idle
        } else {
            state
        }
    }
}

impl Drop for ReviewSession {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            debug!("[{}] review session dropped without close", self.session_id);
        }
    }
}
