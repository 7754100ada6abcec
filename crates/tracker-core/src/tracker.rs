//! The tracker contract and the state every tracker shares.
//!
//! A cycle goes through [`Tracker::track`]: it claims the run lock, makes
//! sure the state is loaded, runs the tracker-specific
//! [`Tracker::do_track`] and records the outcome. Failures other than
//! transient repository errors and shutdowns flag the tracker for
//! rollback; the commit tracker then discards the cycle's writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tracker_types::{TrackerKind, TrackerState};

use crate::error::TrackerError;
use crate::run_lock::{RunGuard, RunLock};

/// Locks, flags and state common to all trackers.
pub struct TrackerBase {
    core: String,
    kind: TrackerKind,
    run_lock: RunLock,
    write_lock: tokio::sync::Mutex<()>,
    state: Mutex<Option<TrackerState>>,
    rollback_cause: Mutex<Option<String>>,
    rollback: AtomicBool,
    shutdown: AtomicBool,
    enabled: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TrackerBase {
    pub fn new(core: impl Into<String>, kind: TrackerKind) -> Self {
        Self {
            core: core.into(),
            kind,
            run_lock: RunLock::new(),
            write_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(None),
            rollback_cause: Mutex::new(None),
            rollback: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn core_name(&self) -> &str {
        &self.core
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub(crate) fn try_run(&self) -> Option<RunGuard> {
        self.run_lock.try_acquire()
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.is_held()
    }

    /// Lock taken around every batch of index writes.
    ///
    /// The commit tracker takes it to keep trackers out while it commits
    /// or rolls back.
    pub fn write_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.write_lock
    }

    /// Current state, loading it with `load` if it was invalidated.
    pub fn current_state<F>(&self, load: F) -> Result<TrackerState, TrackerError>
    where
        F: FnOnce() -> Result<TrackerState, TrackerError>,
    {
        let mut state = locked(&self.state);
        if state.is_none() {
            let loaded = load()?;
            debug!(
                core = %self.core,
                tracker = %self.kind,
                last_indexed_id = loaded.last_indexed_id,
                "Loaded tracker state"
            );
            *state = Some(loaded);
        }
        state
            .clone()
            .ok_or_else(|| TrackerError::IllegalState("state vanished while loading".into()))
    }

    /// Apply `f` to the loaded state.
    ///
    /// Fails if the state was invalidated, which only happens when the
    /// commit tracker rolled back under the write lock.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> Result<R, TrackerError> {
        locked(&self.state)
            .as_mut()
            .map(f)
            .ok_or_else(|| TrackerError::IllegalState(format!("{} state is not loaded", self.kind)))
    }

    pub fn state_snapshot(&self) -> Option<TrackerState> {
        locked(&self.state).clone().map(|mut state| {
            state.running = self.is_running();
            state.in_rollback = self.is_in_rollback();
            state
        })
    }

    /// Drop the in-memory state so the next cycle reloads the durable one.
    pub fn invalidate_state(&self) {
        *locked(&self.state) = None;
    }

    fn begin_cycle<F>(&self, load: F) -> Result<(), TrackerError>
    where
        F: FnOnce() -> Result<TrackerState, TrackerError>,
    {
        self.current_state(load)?;
        self.update_state(|state| {
            state.cycle_count += 1;
            state.running = true;
        })
    }

    fn finish_cycle(&self, result: &Result<(), TrackerError>) {
        let _ = self.update_state(|state| {
            state.running = false;
            if result.is_err() {
                state.record_error();
            }
        });
        if let Err(e) = result {
            self.flag_failure(e);
        }
    }

    /// Flag a rollback for failures that cannot be retried as-is.
    pub fn flag_failure(&self, error: &TrackerError) {
        match error {
            TrackerError::Shutdown => {
                info!(core = %self.core, tracker = %self.kind, "Tracker stopped by shutdown");
            }
            e if e.is_transient() => {
                warn!(core = %self.core, tracker = %self.kind, error = %e, "Transient failure, retrying next cycle");
            }
            e => {
                warn!(core = %self.core, tracker = %self.kind, error = %e, "Tracker failed, requesting rollback");
                self.set_rollback(true, Some(e.to_string()));
            }
        }
    }

    /// Pass `result` through, flagging a rollback if it failed.
    pub fn guard<T>(&self, result: Result<T, TrackerError>) -> Result<T, TrackerError> {
        if let Err(e) = &result {
            self.flag_failure(e);
        }
        result
    }

    pub fn set_rollback(&self, rollback: bool, cause: Option<String>) {
        self.rollback.store(rollback, Ordering::SeqCst);
        *locked(&self.rollback_cause) = if rollback { cause } else { None };
    }

    pub fn is_in_rollback(&self) -> bool {
        self.rollback.load(Ordering::SeqCst)
    }

    pub fn rollback_cause(&self) -> Option<String> {
        locked(&self.rollback_cause).clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Yield point checked before fetching each log entry.
    pub fn check_shutdown(&self) -> Result<(), TrackerError> {
        if self.is_shutdown() {
            Err(TrackerError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// A periodically run poller bound to one index.
#[async_trait]
pub trait Tracker: Send + Sync {
    fn base(&self) -> &TrackerBase;

    /// Run one cycle of tracker-specific work.
    async fn do_track(&self) -> Result<(), TrackerError>;

    /// Load the durable state, used on first run and after invalidation.
    fn load_state(&self) -> Result<TrackerState, TrackerError> {
        Ok(TrackerState::new())
    }

    /// Whether the tracker's prerequisites are met for this cycle.
    fn ready(&self) -> bool {
        true
    }

    fn has_maintenance(&self) -> bool {
        false
    }

    /// Apply queued maintenance. Called by the commit tracker under the
    /// write locks.
    async fn maintenance(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    /// Close the maintenance applied since the last call: dropped once
    /// `committed`, otherwise queued again.
    fn settle_maintenance(&self, _committed: bool) {}

    /// Hook run when the tracker is disabled.
    fn on_disable(&self) {}

    fn kind(&self) -> TrackerKind {
        self.base().kind()
    }

    fn core_name(&self) -> &str {
        self.base().core_name()
    }

    /// Run one cycle unless one is already running.
    async fn track(&self) -> Result<(), TrackerError> {
        let base = self.base();
        if base.is_shutdown() {
            debug!(core = %base.core_name(), tracker = %base.kind(), "Tracker is shut down, not running");
            return Ok(());
        }
        let Some(_run) = base.try_run() else {
            info!(core = %base.core_name(), tracker = %base.kind(), "Tracker already running, skipping cycle");
            return Ok(());
        };
        if !base.is_enabled() {
            debug!(core = %base.core_name(), tracker = %base.kind(), "Tracker disabled, skipping cycle");
            return Ok(());
        }
        if !self.ready() {
            debug!(core = %base.core_name(), tracker = %base.kind(), "Tracker not ready, skipping cycle");
            base.invalidate_state();
            return Ok(());
        }

        let result = match base.begin_cycle(|| self.load_state()) {
            Ok(()) => self.do_track().await,
            Err(e) => Err(e),
        };
        base.finish_cycle(&result);

        match result {
            Err(TrackerError::Shutdown) => Ok(()),
            other => other,
        }
    }

    fn state_snapshot(&self) -> Option<TrackerState> {
        self.base().state_snapshot()
    }

    fn invalidate_state(&self) {
        self.base().invalidate_state();
    }

    fn shutdown(&self) {
        self.base().shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.base().is_shutdown()
    }

    fn set_rollback(&self, rollback: bool, cause: Option<String>) {
        self.base().set_rollback(rollback, cause);
    }

    fn is_in_rollback(&self) -> bool {
        self.base().is_in_rollback()
    }

    fn enable(&self) {
        self.base().enable();
    }

    fn disable(&self) {
        self.base().disable();
        self.on_disable();
    }

    fn is_enabled(&self) -> bool {
        self.base().is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Scripted {
        base: TrackerBase,
        runs: AtomicUsize,
        outcome: Mutex<Option<TrackerError>>,
        pause: Option<Arc<tokio::sync::Notify>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                base: TrackerBase::new("core", TrackerKind::Metadata),
                runs: AtomicUsize::new(0),
                outcome: Mutex::new(None),
                pause: None,
            }
        }

        fn fail_with(&self, error: TrackerError) {
            *locked(&self.outcome) = Some(error);
        }
    }

    #[async_trait]
    impl Tracker for Scripted {
        fn base(&self) -> &TrackerBase {
            &self.base
        }

        async fn do_track(&self) -> Result<(), TrackerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(pause) = &self.pause {
                pause.notified().await;
            }
            match locked(&self.outcome).take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_cycle_count_and_running_flag() {
        let tracker = Scripted::new();
        assert!(tracker.state_snapshot().is_none());

        tracker.track().await.unwrap();
        tracker.track().await.unwrap();

        let state = tracker.state_snapshot().unwrap();
        assert_eq!(state.cycle_count, 2);
        assert!(!state.running);
        assert!(state.last_error_timestamp.is_none());
    }

    #[tokio::test]
    async fn test_non_transient_failure_requests_rollback() {
        let tracker = Scripted::new();
        tracker.fail_with(TrackerError::IllegalState("boom".into()));

        assert!(tracker.track().await.is_err());
        assert!(tracker.is_in_rollback());
        assert!(tracker.base().rollback_cause().unwrap().contains("boom"));
        assert!(tracker.state_snapshot().unwrap().last_error_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_does_not_request_rollback() {
        let tracker = Scripted::new();
        tracker.fail_with(RepositoryError::Unavailable("down".into()).into());

        assert!(tracker.track().await.is_err());
        assert!(!tracker.is_in_rollback());
    }

    #[tokio::test]
    async fn test_shutdown_is_clean() {
        let tracker = Scripted::new();
        tracker.fail_with(TrackerError::Shutdown);
        tracker.track().await.unwrap();
        assert!(!tracker.is_in_rollback());

        tracker.shutdown();
        tracker.track().await.unwrap();
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_tracker_skips() {
        let tracker = Scripted::new();
        tracker.disable();
        tracker.track().await.unwrap();
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 0);

        tracker.enable();
        tracker.track().await.unwrap();
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_cycle_is_skipped() {
        let pause = Arc::new(tokio::sync::Notify::new());
        let tracker = Arc::new(Scripted {
            pause: Some(pause.clone()),
            ..Scripted::new()
        });

        let running = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.track().await })
        };
        while !tracker.base().is_running() {
            tokio::task::yield_now().await;
        }

        // Second cycle returns immediately without running
        tracker.track().await.unwrap();
        assert!(tracker.state_snapshot().unwrap().running);

        pause.notify_one();
        running.await.unwrap().unwrap();
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 1);
        assert!(!tracker.base().is_running());
    }

    #[tokio::test]
    async fn test_invalidated_state_is_reloaded() {
        let tracker = Scripted::new();
        tracker.track().await.unwrap();
        tracker
            .base()
            .update_state(|s| s.advance(9, 90))
            .unwrap();

        tracker.invalidate_state();
        assert!(tracker.state_snapshot().is_none());
        tracker.track().await.unwrap();
        // Default loader starts from scratch
        assert_eq!(tracker.state_snapshot().unwrap().last_indexed_id, 0);
    }
}
