use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::config_date::{ConfigDate, ConfigDateLookup, ConfigDateRow};
use crate::refresh::{AggregationEngine, PgAggregationEngine, RefreshCoordinator, RefreshTicket};

/// Limits for one date update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateUpdatePolicy {
    /// Budget for one attempt; also used as the row lock timeout
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
}

impl DateUpdatePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            attempt_timeout: config.date_update_timeout,
            max_attempts: config.date_update_max_attempts.max(1),
        }
    }

    /// Pause before retry number `attempt + 1`: 100 ms doubling, capped at
    /// one second.
    pub fn backoff(attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(4);
        Duration::from_millis((100 * factor).min(1000))
    }
}

impl Default for DateUpdatePolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(2000),
            max_attempts: 3,
        }
    }
}

/// Result of a successful date advance. The refresh has been scheduled,
/// not completed.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceOutcome {
    pub date: ConfigDate,
    pub refresh: RefreshTicket,
    pub elapsed: Duration,
}

/// Owner of the reference date.
///
/// Injected into handlers through the application state. Reads never fall
/// back to the system clock: a missing row is reported as
/// [`AppError::ConfigurationMissing`].
pub struct ConfigDateService<E = PgAggregationEngine> {
    pool: PgPool,
    refresh: RefreshCoordinator<E>,
    policy: DateUpdatePolicy,
}

impl<E> Clone for ConfigDateService<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            refresh: self.refresh.clone(),
            policy: self.policy,
        }
    }
}

impl<E: AggregationEngine> ConfigDateService<E> {
    pub fn new(pool: PgPool, refresh: RefreshCoordinator<E>, policy: DateUpdatePolicy) -> Self {
        Self {
            pool,
            refresh,
            policy,
        }
    }

    pub fn refresh(&self) -> &RefreshCoordinator<E> {
        &self.refresh
    }

    /// Looks up the reference date, reporting absence explicitly.
    pub async fn lookup(&self) -> AppResult<ConfigDateLookup> {
        let row = sqlx::query_as::<_, ConfigDateRow>(
            r#"
            SELECT config_date, year_value, month_value, day_value
            FROM config_current_date
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => ConfigDateLookup::Found(ConfigDate::from(row)),
            None => ConfigDateLookup::Missing,
        })
    }

    /// The reference date, or `ConfigurationMissing`.
    pub async fn get_current(&self) -> AppResult<ConfigDate> {
        self.lookup()
            .await?
            .found()
            .ok_or(AppError::ConfigurationMissing)
    }

    /// Moves the reference date to `new_date` and schedules a refresh.
    ///
    /// The date and its three components change in one UPDATE. Lock
    /// contention and slow attempts are retried with backoff; after the last
    /// attempt the call fails with `Timeout` and nothing is scheduled. A
    /// missing row fails with `ConfigurationMissing`; the row is never
    /// created here.
    pub async fn advance_to(&self, new_date: NaiveDate) -> AppResult<AdvanceOutcome> {
        let started = Instant::now();
        let date = self.update_with_retry(new_date).await?;

        let refresh = self.refresh.schedule();
        let elapsed = started.elapsed();
        info!(
            "Reference date advanced to {} in {:?}; refresh cycle {} {:?}",
            date.reference_date(),
            elapsed,
            refresh.cycle_id,
            refresh.disposition
        );

        Ok(AdvanceOutcome {
            date,
            refresh,
            elapsed,
        })
    }

    async fn update_with_retry(&self, new_date: NaiveDate) -> AppResult<ConfigDate> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            // Only staging is timed; an abandoned attempt rolls back and the
            // commit is never cancelled.
            match timeout(self.policy.attempt_timeout, self.stage_update(new_date)).await {
                Ok(Ok((tx, Some(row)))) => return self.commit_update(tx, row).await,
                Ok(Ok((_tx, None))) => return Err(AppError::ConfigurationMissing),
                Ok(Err(e)) if is_contention(&e) => {
                    warn!(
                        "Reference date update attempt {}/{} hit contention: {}",
                        attempt, attempts, e
                    );
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(
                        "Reference date update attempt {}/{} exceeded {:?}",
                        attempt, attempts, self.policy.attempt_timeout
                    );
                }
            }

            if attempt < attempts {
                sleep(DateUpdatePolicy::backoff(attempt)).await;
            }
        }

        Err(AppError::Timeout(format!(
            "Reference date could not be updated after {} attempts",
            attempts
        )))
    }

    /// Runs the UPDATE inside an open transaction and hands the transaction
    /// back uncommitted.
    async fn stage_update(
        &self,
        new_date: NaiveDate,
    ) -> Result<(Transaction<'static, Postgres>, Option<ConfigDateRow>), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // SET cannot take bind parameters; the value is an integer we format.
        let lock_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.policy.attempt_timeout.as_millis()
        );
        sqlx::query(&lock_timeout).execute(&mut *tx).await?;

        let row = sqlx::query_as::<_, ConfigDateRow>(
            r#"
            UPDATE config_current_date
            SET config_date = $1,
                year_value = $2,
                month_value = $3,
                day_value = $4
            WHERE id = 1
            RETURNING config_date, year_value, month_value, day_value
            "#,
        )
        .bind(new_date)
        .bind(new_date.year())
        .bind(new_date.month() as i32)
        .bind(new_date.day() as i32)
        .fetch_optional(&mut *tx)
        .await?;

        Ok((tx, row))
    }

    /// Commits a staged update. When the commit reports an error the stored
    /// row is read back, because the server may have applied it anyway.
    async fn commit_update(
        &self,
        tx: Transaction<'static, Postgres>,
        row: ConfigDateRow,
    ) -> AppResult<ConfigDate> {
        let staged = ConfigDate::from(row);
        let Err(commit_err) = tx.commit().await else {
            return Ok(staged);
        };

        warn!("Reference date commit reported an error: {}", commit_err);
        let stored = self.lookup().await?;
        match committed(stored, &staged) {
            Some(date) => Ok(date),
            None => Err(commit_err.into()),
        }
    }
}

/// The stored date when it already equals the staged one.
fn committed(stored: ConfigDateLookup, staged: &ConfigDate) -> Option<ConfigDate> {
    stored.found().filter(|date| date == staged)
}

/// Errors worth another attempt: lock wait timeouts, cancellations,
/// serialization failures, deadlocks and an exhausted pool.
fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("55P03") | Some("57014") | Some("40001") | Some("40P01")
        ),
        _ => false,
    }
}
