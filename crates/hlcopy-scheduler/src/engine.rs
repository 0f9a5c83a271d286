//! The Scheduler (§4.6): a single-threaded cooperative loop over the four
//! cadences, one tick per wake, highest-priority due cadence wins and the
//! rest defer. Grounded in `mqk-testkit::orchestrator::Orchestrator::run`'s
//! sequential per-bar composition loop, generalized from bar-driven to
//! wall-clock-tick-driven.

use chrono::{DateTime, Duration, Utc};
use hlcopy_schemas::SchedulerState;
use tokio::sync::watch;

use crate::cadence::{due_cadences, Cadence};
use crate::handlers::CadenceHandlers;
use crate::status::StatusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceIntervals {
    pub refresh: Duration,
    pub rebalance: Duration,
    pub monitor: Duration,
    pub ingest: Duration,
}

impl Default for CadenceIntervals {
    fn default() -> Self {
        Self {
            refresh: Cadence::Refresh.default_interval(),
            rebalance: Cadence::Rebalance.default_interval(),
            monitor: Cadence::Monitor.default_interval(),
            ingest: Cadence::Ingest.default_interval(),
        }
    }
}

pub struct Scheduler<H: CadenceHandlers> {
    handlers: H,
    state: SchedulerState,
    intervals: CadenceIntervals,
    config_hash: String,
    started_at: DateTime<Utc>,
    last_error_kind: Option<String>,
}

impl<H: CadenceHandlers> Scheduler<H> {
    pub fn new(handlers: H, state: SchedulerState, intervals: CadenceIntervals, config_hash: String, now: DateTime<Utc>) -> Self {
        Self { handlers, state, intervals, config_hash, started_at: now, last_error_kind: None }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    fn due_now(&self, now: DateTime<Utc>) -> Vec<Cadence> {
        due_cadences(
            self.state.last_refresh_at,
            self.state.last_rebalance_at,
            self.state.last_monitor_at,
            self.state.last_ingest_at,
            [self.intervals.refresh, self.intervals.rebalance, self.intervals.monitor, self.intervals.ingest],
            now,
        )
    }

    /// Runs the single highest-priority due cadence, if any is due. Returns
    /// which one ran (whether it succeeded or not — failures are logged and
    /// do not block the next tick; the next schedule retries on its normal
    /// cadence, never immediately, per §5's timeout/backpressure policy).
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<Cadence> {
        let due = self.due_now(now);
        let cadence = *due.first()?;

        let span = tracing::info_span!("cadence", name = cadence.name());
        let _enter = span.enter();

        let result = match cadence {
            Cadence::Refresh => self.handlers.run_refresh().await,
            Cadence::Rebalance => self.handlers.run_rebalance().await,
            Cadence::Monitor => self.handlers.run_monitor().await,
            Cadence::Ingest => self.handlers.run_ingest().await,
        };

        match result {
            Ok(()) => {
                self.record_success(cadence, now);
                self.last_error_kind = None;
                tracing::info!("cadence completed");
            }
            Err(err) => {
                tracing::error!(error = %err, kind = err.kind_label(), "cadence failed");
                self.last_error_kind = Some(err.kind_label().to_string());
                if err.is_fatal() {
                    tracing::error!("fatal error observed, scheduler will shut down");
                }
            }
        }
        Some(cadence)
    }

    fn record_success(&mut self, cadence: Cadence, now: DateTime<Utc>) {
        match cadence {
            Cadence::Refresh => self.state.last_refresh_at = Some(now),
            Cadence::Rebalance => self.state.last_rebalance_at = Some(now),
            Cadence::Monitor => self.state.last_monitor_at = Some(now),
            Cadence::Ingest => self.state.last_ingest_at = Some(now),
        }
    }

    pub fn status_snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            last_refresh_at: self.state.last_refresh_at,
            last_rebalance_at: self.state.last_rebalance_at,
            last_monitor_at: self.state.last_monitor_at,
            last_ingest_at: self.state.last_ingest_at,
            open_position_count: self.handlers.open_position_count(),
            last_allocation_turnover: self.handlers.last_allocation_turnover(),
            last_error_kind: self.last_error_kind.clone(),
            config_hash: self.config_hash.clone(),
        }
    }
}

/// Drives `scheduler` at `poll_interval` until `stop` flips true, then gives
/// in-flight work `grace_period` to finish before returning. `persist` is
/// invoked after every tick that actually ran a cadence, so the caller (the
/// daemon, wired to `hlcopy-db`) can durably record the new timestamp.
pub async fn run_loop<H: CadenceHandlers>(
    scheduler: &mut Scheduler<H>,
    mut stop: watch::Receiver<bool>,
    poll_interval: std::time::Duration,
    grace_period: std::time::Duration,
    mut persist: impl FnMut(&SchedulerState),
) {
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {
                let now = Utc::now();
                if scheduler.tick(now).await.is_some() {
                    persist(scheduler.state());
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(grace_period_secs = grace_period.as_secs(), "stop signal observed, waiting for grace period");
    tokio::time::sleep(grace_period).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlcopy_schemas::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandlers {
        refresh_calls: AtomicU32,
        rebalance_calls: AtomicU32,
        monitor_calls: AtomicU32,
        ingest_calls: AtomicU32,
    }

    impl CountingHandlers {
        fn new() -> Self {
            Self {
                refresh_calls: AtomicU32::new(0),
                rebalance_calls: AtomicU32::new(0),
                monitor_calls: AtomicU32::new(0),
                ingest_calls: AtomicU32::new(0),
            }
        }
    }

    impl CadenceHandlers for CountingHandlers {
        async fn run_refresh(&mut self) -> Result<(), CoreError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn run_rebalance(&mut self) -> Result<(), CoreError> {
            self.rebalance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn run_monitor(&mut self) -> Result<(), CoreError> {
            self.monitor_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn run_ingest(&mut self) -> Result<(), CoreError> {
            self.ingest_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn open_position_count(&self) -> u32 {
            0
        }
        fn last_allocation_turnover(&self) -> Option<f64> {
            None
        }
    }

    #[tokio::test]
    async fn highest_priority_due_cadence_runs_first() {
        let now = Utc::now();
        let state = SchedulerState {
            last_refresh_at: Some(now - Duration::days(2)),
            last_rebalance_at: Some(now - Duration::hours(8)),
            last_monitor_at: Some(now - Duration::seconds(120)),
            last_ingest_at: Some(now - Duration::minutes(10)),
            last_ml_snapshot_at: None,
        };
        let mut scheduler = Scheduler::new(CountingHandlers::new(), state, CadenceIntervals::default(), "hash".into(), now);
        let ran = scheduler.tick(now).await;
        assert_eq!(ran, Some(Cadence::Refresh));
        assert_eq!(scheduler.handlers.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.handlers.rebalance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn nothing_due_returns_none() {
        let now = Utc::now();
        let state = SchedulerState {
            last_refresh_at: Some(now),
            last_rebalance_at: Some(now),
            last_monitor_at: Some(now),
            last_ingest_at: Some(now),
            last_ml_snapshot_at: None,
        };
        let mut scheduler = Scheduler::new(CountingHandlers::new(), state, CadenceIntervals::default(), "hash".into(), now);
        assert_eq!(scheduler.tick(now).await, None);
    }

    #[tokio::test]
    async fn failed_cadence_still_advances_and_records_error_kind() {
        struct AlwaysFails;
        impl CadenceHandlers for AlwaysFails {
            async fn run_refresh(&mut self) -> Result<(), CoreError> {
                Err(CoreError::fatal("boom"))
            }
            async fn run_rebalance(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            async fn run_monitor(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            async fn run_ingest(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            fn open_position_count(&self) -> u32 {
                0
            }
            fn last_allocation_turnover(&self) -> Option<f64> {
                None
            }
        }

        let now = Utc::now();
        let state = SchedulerState::default();
        let mut scheduler = Scheduler::new(AlwaysFails, state, CadenceIntervals::default(), "hash".into(), now);
        scheduler.tick(now).await;
        let snapshot = scheduler.status_snapshot(now);
        assert_eq!(snapshot.last_error_kind.as_deref(), Some("fatal"));
        // A failed cadence does not advance last_run — it remains due next tick.
        assert!(scheduler.state().last_refresh_at.is_none());
    }
}
