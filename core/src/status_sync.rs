//! Polling state machine for the long-running backend jobs.
//!
//! `Idle -> Watching` when any watched status is in progress, `Watching ->
//! Settled` once none is. The timer only runs while the state is `Watching`
//! and is torn down unconditionally when the session closes.

use crate::model::JobStatusSnapshot;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    #[default]
    Idle,
    Watching,
    Settled,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("IDLE"),
            SyncState::Watching => f.write_str("WATCHING"),
            SyncState::Settled => f.write_str("SETTLED"),
        }
    }
}

impl SyncState {
    /// State implied by one snapshot. An unknown job, or one whose watched
    /// jobs have not started, leaves nothing to watch.
    pub fn for_snapshot(snapshot: Option<&JobStatusSnapshot>) -> Self {
        let Some(snapshot) = snapshot else {
            return SyncState::Idle;
        };
        if snapshot.any_in_progress() {
            return SyncState::Watching;
        }
        let mut watched = snapshot.watched().peekable();
        if watched.peek().is_some() && watched.all(|status| status.is_terminal()) {
            SyncState::Settled
        } else {
            SyncState::Idle
        }
    }
}

/// Stamp for one status fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatusTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTransition {
    pub from: SyncState,
    pub to: SyncState,
}

#[derive(Debug, Clone, Default)]
pub struct SyncController {
    state: SyncState,
    issued: u64,
    applied: u64,
    last: Option<JobStatusSnapshot>,
}

impl SyncController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn last_snapshot(&self) -> Option<&JobStatusSnapshot> {
        self.last.as_ref()
    }

    pub fn begin_fetch(&mut self) -> StatusTicket {
        self.issued += 1;
        StatusTicket(self.issued)
    }

    /// Applies a fetched snapshot. A ticket older than the last applied one
    /// is dropped and changes nothing.
    pub fn apply(
        &mut self,
        ticket: StatusTicket,
        snapshot: Option<JobStatusSnapshot>,
    ) -> Option<SyncTransition> {
        if ticket.0 <= self.applied {
            debug!(
                "dropping stale status fetch #{} (last applied #{})",
                ticket.0, self.applied
            );
            return None;
        }
        self.applied = ticket.0;

        let next = SyncState::for_snapshot(snapshot.as_ref());
        self.last = snapshot;
        if next == self.state {
            return None;
        }

        let transition = SyncTransition {
            from: self.state,
            to: next,
        };
        self.state = next;
        info!("status sync {} -> {}", transition.from, transition.to);
        Some(transition)
    }

    /// Back to `Idle`. Tickets issued before this point are dropped on arrival.
    pub fn reset(&mut self) {
        self.state = SyncState::Idle;
        self.last = None;
        self.applied = self.issued;
    }
}

/// One polling step: fetch status, refresh as needed, report the new state.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    async fn poll_tick(&self) -> SyncState;
}

/// Handle to the background poller. Dropping it stops the timer.
#[derive(Debug)]
pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Ticks every `period`, first tick one period from now, until the target
    /// leaves `Watching`, goes away, or the handle is stopped.
    pub fn spawn<T: PollTarget>(target: Weak<T>, period: Duration) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks = 0u64;

            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                let Some(target) = target.upgrade() else {
                    break;
                };
                ticks += 1;
                let state = target.poll_tick().await;
                drop(target);
                debug!("poll tick {ticks}: {state}");

                if state != SyncState::Watching || flag.load(Ordering::SeqCst) {
                    break;
                }
            }
            flag.store(true, Ordering::SeqCst);
            debug!("poller stopped after {ticks} ticks");
        });

        Self {
            cancelled,
            task: Some(task),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                warn!("cancelling active status poller");
            }
            task.abort();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn snapshot(validation: JobStatus) -> JobStatusSnapshot {
        JobStatusSnapshot::new(JobStatus::Completed).with_validation(validation)
    }

    struct ScriptedTarget {
        controller: Mutex<SyncController>,
        script: Mutex<VecDeque<JobStatusSnapshot>>,
        fetches: AtomicUsize,
    }

    impl ScriptedTarget {
        fn new(script: Vec<JobStatusSnapshot>) -> Arc<Self> {
            let mut controller = SyncController::new();
            let ticket = controller.begin_fetch();
            controller.apply(ticket, Some(snapshot(JobStatus::InProgress)));
            Arc::new(Self {
                controller: Mutex::new(controller),
                script: Mutex::new(script.into()),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PollTarget for ScriptedTarget {
        async fn poll_tick(&self) -> SyncState {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            };
            let mut controller = self.controller.lock().unwrap();
            let ticket = controller.begin_fetch();
            controller.apply(ticket, next);
            controller.state()
        }
    }

    #[test]
    fn state_follows_watched_statuses() {
        assert_eq!(SyncState::for_snapshot(None), SyncState::Idle);
        assert_eq!(
            SyncState::for_snapshot(Some(&JobStatusSnapshot::new(JobStatus::InProgress))),
            SyncState::Idle
        );
        assert_eq!(
            SyncState::for_snapshot(Some(
                &snapshot(JobStatus::Completed).with_illustration(JobStatus::InProgress)
            )),
            SyncState::Watching
        );
        assert_eq!(
            SyncState::for_snapshot(Some(
                &snapshot(JobStatus::Completed).with_post_edit(JobStatus::Failed)
            )),
            SyncState::Settled
        );
        assert_eq!(
            SyncState::for_snapshot(Some(
                &snapshot(JobStatus::Completed).with_post_edit(JobStatus::Pending)
            )),
            SyncState::Idle
        );
    }

    #[test]
    fn stale_ticket_is_dropped() {
        let mut controller = SyncController::new();
        let older = controller.begin_fetch();
        let newer = controller.begin_fetch();

        let transition = controller.apply(newer, Some(snapshot(JobStatus::Completed)));
        assert_eq!(
            transition,
            Some(SyncTransition {
                from: SyncState::Idle,
                to: SyncState::Settled
            })
        );

        assert_eq!(
            controller.apply(older, Some(snapshot(JobStatus::InProgress))),
            None
        );
        assert_eq!(controller.state(), SyncState::Settled);
        assert_eq!(
            controller.last_snapshot().and_then(|s| s.validation_status),
            Some(JobStatus::Completed)
        );
    }

    #[test]
    fn reset_returns_to_idle_and_drops_pending_fetches() {
        let mut controller = SyncController::new();
        let first = controller.begin_fetch();
        controller.apply(first, Some(snapshot(JobStatus::InProgress)));
        let pending = controller.begin_fetch();

        controller.reset();
        assert_eq!(controller.state(), SyncState::Idle);
        assert_eq!(
            controller.apply(pending, Some(snapshot(JobStatus::InProgress))),
            None
        );
        assert_eq!(controller.state(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_stops_after_settling() {
        let target = ScriptedTarget::new(vec![
            snapshot(JobStatus::InProgress),
            snapshot(JobStatus::InProgress),
            snapshot(JobStatus::Completed),
        ]);
        let period = Duration::from_secs(3);
        let handle = PollHandle::spawn(Arc::downgrade(&target), period);

        tokio::time::sleep(period * 10).await;

        assert_eq!(target.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(
            target.controller.lock().unwrap().state(),
            SyncState::Settled
        );
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let target = ScriptedTarget::new(vec![snapshot(JobStatus::Completed)]);
        let period = Duration::from_secs(3);
        let _handle = PollHandle::spawn(Arc::downgrade(&target), period);

        tokio::time::sleep(period - Duration::from_millis(1)).await;
        assert_eq!(target.fetches.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(target.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_cancels_future_ticks() {
        let target = ScriptedTarget::new(vec![snapshot(JobStatus::InProgress)]);
        let period = Duration::from_secs(3);
        let mut handle = PollHandle::spawn(Arc::downgrade(&target), period);

        tokio::time::sleep(period * 2 + Duration::from_millis(10)).await;
        let seen = target.fetches.load(Ordering::SeqCst);
        assert!(handle.is_active());

        handle.stop();
        tokio::time::sleep(period * 5).await;
        assert_eq!(target.fetches.load(Ordering::SeqCst), seen);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_target_ends_the_task() {
        let target = ScriptedTarget::new(vec![snapshot(JobStatus::InProgress)]);
        let period = Duration::from_secs(1);
        let handle = PollHandle::spawn(Arc::downgrade(&target), period);

        drop(target);
        tokio::time::sleep(period * 3).await;
        assert!(!handle.is_active());
    }
}
