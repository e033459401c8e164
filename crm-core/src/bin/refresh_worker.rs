use dotenv::dotenv;
use tokio::signal;
use tracing::{error, info};

use crm_core::config::AppConfig;
use crm_core::db;
use crm_core::refresh::{PgAggregationEngine, RefreshCoordinator, RefreshScheduler};

/// Background refresh of the snapshot tables.
///
/// Runs a refresh cycle every `REFRESH_INTERVAL_SECONDS` so reports catch up
/// with imported transactions between reference date changes. An interval
/// of zero runs one cycle and exits non-zero if it failed, which suits a
/// cron job.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    crm_core::init_tracing();

    info!("Starting CRM refresh worker...");

    let config = AppConfig::from_env()?;
    let db_pool = db::create_pool(&config).await?;

    let coordinator = RefreshCoordinator::new(
        PgAggregationEngine::new(db_pool),
        config.refresh_alert_threshold,
    );
    let scheduler = RefreshScheduler::new(coordinator, config.refresh_interval);

    if config.refresh_interval.is_zero() {
        let status = scheduler.run_once().await?;
        info!(
            "Single refresh cycle finished ({} completed, {} failed)",
            status.cycles_completed, status.cycles_failed
        );
        return Ok(());
    }

    let stop = scheduler.stop_handle();
    let mut scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Refresh scheduler error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, waiting for the current refresh cycle to finish...");
            stop.stop().await;
            if let Err(e) = (&mut scheduler_handle).await {
                error!("Refresh scheduler task failed: {}", e);
            }
        }
        result = &mut scheduler_handle => {
            if let Err(e) = result {
                error!("Refresh scheduler task failed: {}", e);
            }
            info!("Refresh scheduler task completed");
        }
    }

    info!("CRM refresh worker stopped");
    Ok(())
}
