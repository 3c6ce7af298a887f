pub mod api;
pub mod config;
pub mod loader;
pub mod model;
pub mod navigation;
pub mod pagination;
pub mod reconciler;
pub mod selection;
pub mod session;
pub mod status_sync;

#[cfg(test)]
mod test_support;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use api::{
    ApiError, ApiResult, HttpBackend, Operation, PostEditRequest, ReviewBackend, StaticToken,
    TokenProvider, ValidationRequest,
};
pub use config::{ApiOptions, PagingOptions, PollingOptions, ReviewConfig};
pub use loader::{IncrementalLoader, LoadAllSummary, LoadError, LoadedPage, PageOutcome, StreamKind};
pub use model::{
    FullContent, IssueCase, IssueDimension, IssueTypeKey, JobStatus, JobStatusSnapshot,
    PostEditLog, PostEditSummary, SegmentPage, SegmentRecord, Severity, ValidationReport,
    ValidationSummary,
};
pub use navigation::{segments_with_matching_issues, IssueFilter, SegmentNavigator};
pub use pagination::PaginationCursor;
pub use reconciler::{reconstruct_full_text, SegmentBatch, SegmentReconciler, SourceKind};
pub use selection::{InitOutcome, SelectionMatrix, SelectionState};
pub use session::{Availability, RefreshReport, ReviewSession, SessionError, SessionOverview};
pub use status_sync::{PollHandle, PollTarget, SyncController, SyncState, SyncTransition};

/// Locks `mutex`, recovering the data if a previous holder panicked. Guarded
/// state is plain data that every writer leaves consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
