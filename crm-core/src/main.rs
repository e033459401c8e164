use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tracing::info;

use crm_core::app::{create_router, AppState};
use crm_core::config::AppConfig;
use crm_core::config_date::{ConfigDateService, DateUpdatePolicy};
use crm_core::db;
use crm_core::refresh::{PgAggregationEngine, RefreshCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    crm_core::init_tracing();

    info!("Starting CRM reporting server...");

    let config = AppConfig::from_env()?;
    let db_pool = db::create_pool(&config).await?;
    if config.run_migrations {
        db::run_migrations(&db_pool).await?;
    }

    // One coordinator per process; every date update schedules through it
    let refresh = RefreshCoordinator::new(
        PgAggregationEngine::new(db_pool.clone()),
        config.refresh_alert_threshold,
    );
    let config_dates = ConfigDateService::new(
        db_pool.clone(),
        refresh,
        DateUpdatePolicy::from_config(&config),
    );

    let address = config.bind_address();
    let app_state = AppState {
        db: db_pool,
        config_dates,
        config: Arc::new(config),
    };
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    info!("Server listening on {}", address);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
