//! Incremental loading of large segment sets.
//!
//! Each logical stream admits one outstanding request at a time. A second
//! request on a busy stream is rejected rather than queued, so pages within a
//! stream always land in request order. `reset` bumps the stream's generation;
//! a response from an older generation is dropped on arrival.

use crate::api::{ApiError, ReviewBackend};
use crate::lock;
use crate::model::SegmentRecord;
use crate::pagination::PaginationCursor;
use crate::reconciler::{SegmentBatch, SegmentReconciler};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Page-at-a-time browsing.
    Segments,
    /// Bulk load of the whole job.
    LoadAll,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Segments => f.write_str("segments"),
            StreamKind::LoadAll => f.write_str("load-all"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("a {stream} request is already in flight")]
    InFlight { stream: StreamKind },
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPage {
    pub offset: usize,
    pub segments: Vec<SegmentRecord>,
    pub has_more: bool,
    pub total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// The page reached the reconciler.
    Applied(LoadedPage),
    /// The stream was reset while the request was outstanding.
    Discarded,
    /// The backend has no segments for this job yet.
    NotReady,
    /// The cursor already reported the end of the stream; nothing was fetched.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAllSummary {
    pub pages: usize,
    pub segments: usize,
    /// True when the loop ended on `has_more == false` or an empty page.
    pub complete: bool,
}

#[derive(Debug)]
struct StreamState {
    in_flight: bool,
    generation: u64,
    cursor: PaginationCursor,
}

impl StreamState {
    fn new(limit: usize) -> Self {
        Self {
            in_flight: false,
            generation: 0,
            cursor: PaginationCursor::new(limit),
        }
    }
}

type Streams = Mutex<BTreeMap<StreamKind, StreamState>>;

/// Releases the in-flight flag if the request future is dropped before it
/// completes.
struct InFlightGuard<'a> {
    streams: &'a Streams,
    stream: StreamKind,
    generation: u64,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut streams = lock(self.streams);
        if let Some(state) = streams.get_mut(&self.stream) {
            if state.generation == self.generation {
                state.in_flight = false;
            }
        }
    }
}

pub struct IncrementalLoader {
    backend: Arc<dyn ReviewBackend>,
    job_id: String,
    reconciler: Arc<Mutex<SegmentReconciler>>,
    streams: Streams,
}

impl IncrementalLoader {
    pub fn new(
        backend: Arc<dyn ReviewBackend>,
        job_id: impl Into<String>,
        reconciler: Arc<Mutex<SegmentReconciler>>,
        page_size: usize,
        load_all_batch_size: usize,
    ) -> Self {
        let mut streams = BTreeMap::new();
        streams.insert(StreamKind::Segments, StreamState::new(page_size));
        streams.insert(StreamKind::LoadAll, StreamState::new(load_all_batch_size));
        Self {
            backend,
            job_id: job_id.into(),
            reconciler,
            streams: Mutex::new(streams),
        }
    }

    pub fn cursor(&self, stream: StreamKind) -> PaginationCursor {
        let mut streams = lock(&self.streams);
        Self::state(&mut streams, stream).cursor
    }

    pub fn is_loading(&self, stream: StreamKind) -> bool {
        let mut streams = lock(&self.streams);
        Self::state(&mut streams, stream).in_flight
    }

    /// Rewinds the stream and supersedes any request still outstanding on it.
    pub fn reset(&self, stream: StreamKind) {
        let mut streams = lock(&self.streams);
        let state = Self::state(&mut streams, stream);
        state.generation += 1;
        state.in_flight = false;
        state.cursor.rewind();
        debug!(
            "job {}: {stream} stream reset to generation {}",
            self.job_id, state.generation
        );
    }

    /// Fetches one page and applies it to the reconciler.
    pub async fn load_page(
        &self,
        stream: StreamKind,
        offset: usize,
        limit: usize,
    ) -> Result<PageOutcome, LoadError> {
        let limit = limit.max(1);
        let generation = {
            let mut streams = lock(&self.streams);
            let state = Self::state(&mut streams, stream);
            if state.in_flight {
                return Err(LoadError::InFlight { stream });
            }
            state.in_flight = true;
            state.generation
        };
        let mut guard = InFlightGuard {
            streams: &self.streams,
            stream,
            generation,
            armed: true,
        };

        let response = self
            .backend
            .get_segments_page(&self.job_id, offset, limit)
            .await;

        guard.disarm();
        let mut streams = lock(&self.streams);
        let state = Self::state(&mut streams, stream);
        if state.generation != generation {
            warn!(
                "job {}: dropping stale {stream} page at offset {offset} (generation {generation}, now {})",
                self.job_id, state.generation
            );
            return Ok(PageOutcome::Discarded);
        }
        state.in_flight = false;

        let page = match response {
            Ok(Some(page)) => page,
            Ok(None) => {
                debug!("job {}: segments not ready yet", self.job_id);
                return Ok(PageOutcome::NotReady);
            }
            Err(error) => {
                warn!("job {}: {stream} page at offset {offset} failed: {error}", self.job_id);
                return Err(error.into());
            }
        };

        state
            .cursor
            .record_page(offset, page.segments.len(), page.has_more, page.total);
        let accepted = lock(&self.reconciler)
            .ingest(SegmentBatch::PaginatedSegment(page.segments.clone()));
        debug!(
            "job {}: applied {stream} page offset={offset} limit={limit} received={} accepted={accepted} has_more={}",
            self.job_id,
            page.segments.len(),
            page.has_more
        );

        Ok(PageOutcome::Applied(LoadedPage {
            offset,
            segments: page.segments,
            has_more: page.has_more,
            total: page.total,
        }))
    }

    /// Loads the page after the last one that landed on this stream.
    pub async fn load_more(&self, stream: StreamKind) -> Result<PageOutcome, LoadError> {
        let cursor = self.cursor(stream);
        if !cursor.has_more() {
            return Ok(PageOutcome::Exhausted);
        }
        self.load_page(stream, cursor.offset(), cursor.limit()).await
    }

    /// Pages through the whole job on the load-all stream until the server
    /// says there is nothing more. `total` is never used as a bound.
    pub async fn load_all(&self, batch_size: Option<usize>) -> Result<LoadAllSummary, LoadError> {
        let stream = StreamKind::LoadAll;
        let batch_size = {
            let mut streams = lock(&self.streams);
            let state = Self::state(&mut streams, stream);
            if state.in_flight {
                return Err(LoadError::InFlight { stream });
            }
            if let Some(size) = batch_size {
                state.cursor.set_limit(size);
            }
            state.cursor.rewind();
            state.cursor.limit()
        };

        let mut summary = LoadAllSummary::default();
        let mut offset = 0;
        loop {
            match self.load_page(stream, offset, batch_size).await? {
                PageOutcome::Applied(page) => {
                    let received = page.segments.len();
                    summary.pages += 1;
                    summary.segments += received;
                    if !page.has_more || received == 0 {
                        summary.complete = true;
                        break;
                    }
                    offset = page.offset + received;
                }
                PageOutcome::Discarded | PageOutcome::NotReady | PageOutcome::Exhausted => break,
            }
        }

        debug!(
            "job {}: load-all finished after {} pages, {} segments (complete={})",
            self.job_id, summary.pages, summary.segments, summary.complete
        );
        Ok(summary)
    }

    fn state(
        streams: &mut BTreeMap<StreamKind, StreamState>,
        stream: StreamKind,
    ) -> &mut StreamState {
        streams
            .entry(stream)
            .or_insert_with(|| StreamState::new(1))
    }
}
