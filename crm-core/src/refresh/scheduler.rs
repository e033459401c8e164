use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::time::sleep;
use tracing::{error, info};

use super::coordinator::{RefreshCoordinator, RefreshStatus};
use super::engine::AggregationEngine;

/// Periodic refresh backstop.
///
/// Schedules a refresh cycle at a fixed interval so the snapshot tables
/// catch up with imported transactions even when nobody moves the reference
/// date. Requests go through the coordinator, so they coalesce with cycles
/// triggered by date updates.
pub struct RefreshScheduler<E> {
    coordinator: RefreshCoordinator<E>,

    /// Time between the end of one cycle and the next request
    interval: Duration,

    /// Whether the scheduler is running (wrapped in Arc for sharing)
    running: Arc<RwLock<bool>>,

    /// Cuts the pause between cycles short on stop
    wake: Arc<Notify>,
}

/// Stops a [`RefreshScheduler`] from another task.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<RwLock<bool>>,
    wake: Arc<Notify>,
}

impl StopHandle {
    /// Clears the running flag. A cycle in progress finishes; the pause
    /// after it does not happen.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake.notify_one();
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

impl<E: AggregationEngine> RefreshScheduler<E> {
    /// Creates a new refresh scheduler.
    ///
    /// # Arguments
    ///
    /// * `coordinator` - Coordinator the requests are sent to
    /// * `interval` - Pause between cycles
    pub fn new(coordinator: RefreshCoordinator<E>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            running: Arc::new(RwLock::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops the loop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Runs cycles until [`RefreshScheduler::stop`] is called.
    ///
    /// A failed cycle is logged and the loop keeps going; the next tick is
    /// the retry.
    pub async fn start(&self) -> Result<(), anyhow::Error> {
        *self.running.write().await = true;
        info!(
            "RefreshScheduler started with interval: {} seconds",
            self.interval.as_secs()
        );

        while *self.running.read().await {
            match self.run_once().await {
                Ok(status) => {
                    if let Some(report) = status.last_completed {
                        info!(
                            "Refresh cycle {} finished in {} ms",
                            report.cycle_id, report.duration_ms
                        );
                    }
                }
                Err(e) => {
                    error!("Error in refresh loop: {:#}", e);
                    // Continue running even on error
                }
            }

            if !*self.running.read().await {
                break;
            }
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!("RefreshScheduler stopped");
        Ok(())
    }

    /// Sets the running flag to false; the loop exits once the current
    /// cycle is done.
    pub async fn stop(&self) {
        info!("Stopping RefreshScheduler...");
        self.stop_handle().stop().await;
    }

    /// Requests one cycle and waits until the coordinator is idle again.
    ///
    /// # Errors
    ///
    /// Returns an error when the requested cycle failed.
    pub async fn run_once(&self) -> Result<RefreshStatus, anyhow::Error> {
        let ticket = self.coordinator.schedule();
        let status = self.coordinator.wait_idle().await;

        match &status.last_failure {
            Some(failure) if failure.cycle_id >= ticket.cycle_id => Err(anyhow::anyhow!(
                "refresh cycle {} failed at {}: {}",
                failure.cycle_id,
                failure
                    .procedure
                    .map(|p| p.sql_name())
                    .unwrap_or("<aborted>"),
                failure.error
            )),
            _ => Ok(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::procedures::AggregationProcedure;

    struct CountingEngine {
        fail: bool,
    }

    impl AggregationEngine for CountingEngine {
        async fn run(&self, procedure: AggregationProcedure) -> anyhow::Result<()> {
            if self.fail && procedure == AggregationProcedure::YearlySums {
                anyhow::bail!("sums table locked");
            }
            Ok(())
        }
    }

    fn scheduler(fail: bool) -> RefreshScheduler<CountingEngine> {
        let coordinator = RefreshCoordinator::new(CountingEngine { fail }, Duration::from_secs(60));
        RefreshScheduler::new(coordinator, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_run_once_reports_success() {
        let status = scheduler(false).run_once().await.expect("cycle succeeds");
        assert_eq!(status.cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_run_once_surfaces_failed_procedure() {
        let err = scheduler(true).run_once().await.unwrap_err();
        assert!(err.to_string().contains("populate_aggregated_data_sums"));
    }

    #[tokio::test]
    async fn test_stop_ends_loop() {
        let scheduler = Arc::new(scheduler(false));
        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.start().await });

        while scheduler.coordinator.status().cycles_completed == 0 {
            tokio::task::yield_now().await;
        }
        scheduler.stop().await;

        handle.await.expect("join").expect("loop result");
        assert!(!scheduler.stop_handle().is_running().await);
    }

    /// Holds every procedure until the gate opens.
    struct GatedEngine {
        entered: Arc<Notify>,
        gate: tokio::sync::watch::Receiver<bool>,
    }

    impl AggregationEngine for GatedEngine {
        async fn run(&self, _procedure: AggregationProcedure) -> anyhow::Result<()> {
            self.entered.notify_one();
            let mut gate = self.gate.clone();
            let _ = gate.wait_for(|open| *open).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_lets_running_cycle_finish_and_skips_pause() {
        let entered = Arc::new(Notify::new());
        let (open, gate) = tokio::sync::watch::channel(false);
        let coordinator = RefreshCoordinator::new(
            GatedEngine {
                entered: Arc::clone(&entered),
                gate,
            },
            Duration::from_secs(60),
        );
        let scheduler = Arc::new(RefreshScheduler::new(coordinator, Duration::from_secs(3600)));
        let stop = scheduler.stop_handle();

        let runner = Arc::clone(&scheduler);
        let mut handle = tokio::spawn(async move { runner.start().await });

        entered.notified().await;
        stop.stop().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "loop must wait for the cycle in progress");

        open.send(true).expect("open gate");
        tokio::time::timeout(Duration::from_secs(5), &mut handle)
            .await
            .expect("loop ends without waiting for the interval")
            .expect("join")
            .expect("loop result");

        let status = scheduler.coordinator.status();
        assert_eq!(status.cycles_completed, 1);
        assert!(!status.running);
    }
}
