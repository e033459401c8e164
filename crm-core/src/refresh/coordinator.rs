use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::engine::AggregationEngine;
use super::procedures::AggregationProcedure;

/// What happened to a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// No cycle was running; this one starts now.
    Started,
    /// A cycle is running; this request became the follow-up cycle.
    Queued,
    /// A follow-up cycle was already pending; this request joined it.
    Coalesced,
}

/// Acknowledgement returned by [`RefreshCoordinator::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshTicket {
    pub cycle_id: u64,
    pub disposition: Disposition,
}

impl RefreshTicket {
    pub fn coalesced(&self) -> bool {
        self.disposition == Disposition::Coalesced
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleFailure {
    pub cycle_id: u64,
    /// `None` when the cycle task itself died rather than a procedure
    pub procedure: Option<AggregationProcedure>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Observable state of the refresh machinery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    pub running: bool,
    pub current_cycle: Option<u64>,
    pub current_procedure: Option<AggregationProcedure>,
    pub pending_cycle: Option<u64>,
    pub last_completed: Option<CycleReport>,
    pub last_failure: Option<CycleFailure>,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub coalesced_requests: u64,
}

impl RefreshStatus {
    pub fn follow_up_pending(&self) -> bool {
        self.pending_cycle.is_some()
    }
}

struct Inner<E> {
    engine: E,
    state: watch::Sender<RefreshStatus>,
    next_cycle_id: AtomicU64,
    alert_threshold: Duration,
}

/// Runs refresh cycles one at a time.
///
/// At most one cycle runs. Requests arriving while it runs collapse into a
/// single follow-up cycle that starts as soon as the running one ends, so a
/// burst of date changes costs at most two cycles.
pub struct RefreshCoordinator<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for RefreshCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: AggregationEngine> RefreshCoordinator<E> {
    /// Creates a coordinator.
    ///
    /// # Arguments
    ///
    /// * `engine` - Runs the individual procedures
    /// * `alert_threshold` - Cycles taking longer than this log a warning
    pub fn new(engine: E, alert_threshold: Duration) -> Self {
        let (state, _) = watch::channel(RefreshStatus::default());
        Self {
            inner: Arc::new(Inner {
                engine,
                state,
                next_cycle_id: AtomicU64::new(1),
                alert_threshold,
            }),
        }
    }

    /// Requests a refresh cycle without waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self) -> RefreshTicket {
        let mut ticket = RefreshTicket {
            cycle_id: 0,
            disposition: Disposition::Started,
        };
        self.inner
            .state
            .send_modify(|status| ticket = admit(status, &self.inner.next_cycle_id));

        match ticket.disposition {
            Disposition::Started => {
                info!("Refresh cycle {} scheduled", ticket.cycle_id);
                let inner = Arc::clone(&self.inner);
                tokio::spawn(drive(inner, ticket.cycle_id));
            }
            Disposition::Queued => {
                info!("Refresh cycle {} queued behind running cycle", ticket.cycle_id)
            }
            Disposition::Coalesced => {
                info!("Refresh request coalesced into cycle {}", ticket.cycle_id)
            }
        }
        ticket
    }

    pub fn status(&self) -> RefreshStatus {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshStatus> {
        self.inner.state.subscribe()
    }

    /// Resolves once no cycle is running and none is pending.
    pub async fn wait_idle(&self) -> RefreshStatus {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|status| !status.running).await;
        let status = rx.borrow().clone();
        status
    }
}

/// Decides how a request joins the current state and records it.
fn admit(status: &mut RefreshStatus, ids: &AtomicU64) -> RefreshTicket {
    if !status.running {
        let cycle_id = ids.fetch_add(1, Ordering::Relaxed);
        status.running = true;
        status.current_cycle = Some(cycle_id);
        status.cycles_started += 1;
        RefreshTicket {
            cycle_id,
            disposition: Disposition::Started,
        }
    } else if let Some(cycle_id) = status.pending_cycle {
        status.coalesced_requests += 1;
        RefreshTicket {
            cycle_id,
            disposition: Disposition::Coalesced,
        }
    } else {
        let cycle_id = ids.fetch_add(1, Ordering::Relaxed);
        status.pending_cycle = Some(cycle_id);
        RefreshTicket {
            cycle_id,
            disposition: Disposition::Queued,
        }
    }
}

/// Runs the started cycle and then every follow-up until none is pending.
async fn drive<E: AggregationEngine>(inner: Arc<Inner<E>>, first_cycle: u64) {
    let mut cycle_id = first_cycle;
    loop {
        let worker = Arc::clone(&inner);
        let handle = tokio::spawn(async move { run_cycle(&worker, cycle_id).await });
        if let Err(join_err) = handle.await {
            error!("Refresh cycle {} aborted: {}", cycle_id, join_err);
            inner.state.send_modify(|status| {
                status.cycles_failed += 1;
                status.current_procedure = None;
                status.last_failure = Some(CycleFailure {
                    cycle_id,
                    procedure: None,
                    error: join_err.to_string(),
                    failed_at: Utc::now(),
                });
            });
        }

        let mut next = None;
        inner.state.send_modify(|status| match status.pending_cycle.take() {
            Some(pending) => {
                status.current_cycle = Some(pending);
                status.cycles_started += 1;
                next = Some(pending);
            }
            None => {
                status.running = false;
                status.current_cycle = None;
            }
        });

        match next {
            Some(pending) => cycle_id = pending,
            None => break,
        }
    }
}

async fn run_cycle<E: AggregationEngine>(inner: &Inner<E>, cycle_id: u64) {
    let started_at = Utc::now();
    let started = Instant::now();
    info!("Refresh cycle {} started", cycle_id);

    for procedure in AggregationProcedure::ORDERED {
        inner
            .state
            .send_modify(|status| status.current_procedure = Some(procedure));

        let step = Instant::now();
        if let Err(e) = inner.engine.run(procedure).await {
            error!(
                "Refresh cycle {} stopped at {}: {:#}",
                cycle_id, procedure, e
            );
            inner.state.send_modify(|status| {
                status.cycles_failed += 1;
                status.current_procedure = None;
                status.last_failure = Some(CycleFailure {
                    cycle_id,
                    procedure: Some(procedure),
                    error: format!("{:#}", e),
                    failed_at: Utc::now(),
                });
            });
            return;
        }
        info!(
            "Refresh cycle {}: {} finished in {:?}",
            cycle_id,
            procedure,
            step.elapsed()
        );
    }

    let elapsed = started.elapsed();
    if elapsed > inner.alert_threshold {
        warn!(
            "Refresh cycle {} took {:?}, above the {:?} alert threshold",
            cycle_id, elapsed, inner.alert_threshold
        );
    }
    info!("Refresh cycle {} completed in {:?}", cycle_id, elapsed);

    inner.state.send_modify(|status| {
        status.cycles_completed += 1;
        status.current_procedure = None;
        status.last_completed = Some(CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Records calls, optionally fails one procedure and can hold every call
    /// until released.
    struct FakeEngine {
        calls: Arc<Mutex<Vec<AggregationProcedure>>>,
        fail_on: Option<AggregationProcedure>,
        release: watch::Receiver<bool>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    struct Probe {
        calls: Arc<Mutex<Vec<AggregationProcedure>>>,
        max_active: Arc<AtomicUsize>,
        release: watch::Sender<bool>,
    }

    fn fake(fail_on: Option<AggregationProcedure>, open: bool) -> (FakeEngine, Probe) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let max_active = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = watch::channel(open);
        (
            FakeEngine {
                calls: Arc::clone(&calls),
                fail_on,
                release: release_rx,
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::clone(&max_active),
            },
            Probe {
                calls,
                max_active,
                release: release_tx,
            },
        )
    }

    impl AggregationEngine for FakeEngine {
        async fn run(&self, procedure: AggregationProcedure) -> anyhow::Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let mut release = self.release.clone();
            let _ = release.wait_for(|open| *open).await;

            self.calls.lock().expect("calls lock").push(procedure);
            self.active.fetch_sub(1, Ordering::SeqCst);

            if Some(procedure) == self.fail_on {
                anyhow::bail!("{} exploded", procedure);
            }
            Ok(())
        }
    }

    fn coordinator(engine: FakeEngine) -> RefreshCoordinator<FakeEngine> {
        RefreshCoordinator::new(engine, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_cycle_runs_procedures_in_order() {
        let (engine, probe) = fake(None, true);
        let refresh = coordinator(engine);

        let ticket = refresh.schedule();
        assert_eq!(ticket.disposition, Disposition::Started);

        let status = refresh.wait_idle().await;
        assert_eq!(
            *probe.calls.lock().expect("calls lock"),
            AggregationProcedure::ORDERED.to_vec()
        );
        assert_eq!(status.cycles_completed, 1);
        assert_eq!(
            status.last_completed.map(|r| r.cycle_id),
            Some(ticket.cycle_id)
        );
        assert!(status.last_failure.is_none());
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_failure_stops_cycle_and_is_reported() {
        let (engine, probe) = fake(Some(AggregationProcedure::Historical), true);
        let refresh = coordinator(engine);

        let ticket = refresh.schedule();
        let status = refresh.wait_idle().await;

        assert_eq!(
            *probe.calls.lock().expect("calls lock"),
            vec![AggregationProcedure::Daily, AggregationProcedure::Historical]
        );
        let failure = status.last_failure.expect("failure recorded");
        assert_eq!(failure.cycle_id, ticket.cycle_id);
        assert_eq!(failure.procedure, Some(AggregationProcedure::Historical));
        assert!(failure.error.contains("populate_aggregated_data_hist"));
        assert_eq!(status.cycles_failed, 1);
        assert_eq!(status.cycles_completed, 0);
    }

    #[tokio::test]
    async fn test_failed_cycle_can_be_retried() {
        let (engine, probe) = fake(Some(AggregationProcedure::Representatives), true);
        let refresh = coordinator(engine);

        refresh.schedule();
        refresh.wait_idle().await;
        refresh.schedule();
        let status = refresh.wait_idle().await;

        assert_eq!(status.cycles_started, 2);
        assert_eq!(status.cycles_failed, 2);
        assert_eq!(probe.calls.lock().expect("calls lock").len(), 10);
    }

    #[tokio::test]
    async fn test_requests_during_a_cycle_coalesce_into_one_follow_up() {
        let (engine, probe) = fake(None, false);
        let refresh = coordinator(engine);

        let first = refresh.schedule();
        let second = refresh.schedule();
        let third = refresh.schedule();
        let fourth = refresh.schedule();

        assert_eq!(first.disposition, Disposition::Started);
        assert_eq!(second.disposition, Disposition::Queued);
        assert_eq!(third.disposition, Disposition::Coalesced);
        assert_eq!(fourth.disposition, Disposition::Coalesced);
        assert_eq!(second.cycle_id, third.cycle_id);
        assert_eq!(third.cycle_id, fourth.cycle_id);
        assert_ne!(first.cycle_id, second.cycle_id);
        assert!(refresh.status().follow_up_pending());

        probe.release.send(true).expect("release");
        let status = refresh.wait_idle().await;

        assert_eq!(status.cycles_started, 2);
        assert_eq!(status.cycles_completed, 2);
        assert_eq!(status.coalesced_requests, 2);
        assert_eq!(
            status.last_completed.map(|r| r.cycle_id),
            Some(second.cycle_id)
        );
        assert_eq!(probe.calls.lock().expect("calls lock").len(), 10);
        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_is_idle_before_any_request() {
        let (engine, _probe) = fake(None, true);
        let refresh = coordinator(engine);

        let status = refresh.status();
        assert!(!status.running);
        assert_eq!(status.cycles_started, 0);
        assert!(refresh.wait_idle().await.last_completed.is_none());
    }

    #[test]
    fn test_ticket_serializes_disposition() {
        let ticket = RefreshTicket {
            cycle_id: 4,
            disposition: Disposition::Coalesced,
        };
        assert!(ticket.coalesced());
        assert_eq!(
            serde_json::to_value(ticket).expect("serialize"),
            serde_json::json!({"cycle_id": 4, "disposition": "coalesced"})
        );
    }
}
