use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::diff::{diff, snapshot};
use super::FieldMap;
use crate::models::audit::{AuditAction, AuditEntry};

/// Writes audit entries for one target table.
///
/// All methods run on the caller's transaction; the entry becomes visible
/// only when the caller commits.
#[derive(Debug, Clone, Copy)]
pub struct AuditLogger {
    target_table: &'static str,
    snapshot_fields: &'static [&'static str],
}

impl AuditLogger {
    /// Creates a logger for `target_table`.
    ///
    /// # Arguments
    ///
    /// * `target_table` - Table name stored with every entry
    /// * `snapshot_fields` - Allow-list captured on CREATE and DELETE
    pub const fn new(target_table: &'static str, snapshot_fields: &'static [&'static str]) -> Self {
        Self {
            target_table,
            snapshot_fields,
        }
    }

    pub async fn record_create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        target_id: i64,
        actor: &str,
        fields: &FieldMap,
    ) -> Result<AuditEntry, sqlx::Error> {
        let snap = snapshot(fields, self.snapshot_fields);
        self.insert(tx, AuditAction::Create, target_id, actor, None, Some(snap))
            .await
    }

    /// Records the difference between `old` and `new`, restricted to
    /// `editable_fields`.
    ///
    /// # Returns
    ///
    /// Returns `None` without writing anything when no editable field
    /// changed value.
    pub async fn record_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        target_id: i64,
        actor: &str,
        old: &FieldMap,
        new: &FieldMap,
        editable_fields: &[&str],
    ) -> Result<Option<AuditEntry>, sqlx::Error> {
        let changes = diff(old, new, editable_fields);
        if changes.is_empty() {
            debug!(
                "No audited changes for {}:{}, skipping audit entry",
                self.target_table, target_id
            );
            return Ok(None);
        }

        let entry = self
            .insert(
                tx,
                AuditAction::Update,
                target_id,
                actor,
                Some(changes.to_json()),
                None,
            )
            .await?;
        Ok(Some(entry))
    }

    pub async fn record_delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        target_id: i64,
        actor: &str,
        fields: &FieldMap,
    ) -> Result<AuditEntry, sqlx::Error> {
        let snap = snapshot(fields, self.snapshot_fields);
        self.insert(tx, AuditAction::Delete, target_id, actor, None, Some(snap))
            .await
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        action: AuditAction,
        target_id: i64,
        actor: &str,
        changes: Option<Value>,
        snap: Option<Value>,
    ) -> Result<AuditEntry, sqlx::Error> {
        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_log (id, action, target_table, target_id, actor, changes, snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
            RETURNING id, action, target_table, target_id, actor, changes, snapshot, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(action)
        .bind(self.target_table)
        .bind(target_id)
        .bind(actor)
        .bind(changes)
        .bind(snap)
        .fetch_one(&mut **tx)
        .await?;

        info!(
            "Audit {} {}:{} by {}",
            action, self.target_table, target_id, actor
        );
        Ok(entry)
    }

    /// Entries for one record, oldest first.
    pub async fn history(&self, pool: &PgPool, target_id: i64) -> Result<Vec<AuditEntry>, sqlx::Error> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, action, target_table, target_id, actor, changes, snapshot, created_at
            FROM audit_log
            WHERE target_table = $1 AND target_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(self.target_table)
        .bind(target_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    const TEST_AUDIT: AuditLogger = AuditLogger::new("audit_order_test", &["cost_value"]);

    fn fields(value: &str) -> FieldMap {
        FieldMap::from([("cost_value".to_string(), Some(value.to_string()))])
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_history_keeps_write_order_within_one_transaction() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect");
        crate::db::run_migrations(&pool).await.expect("migrations");

        let target_id = i64::from(Uuid::new_v4().as_fields().0);
        let mut tx = pool.begin().await.expect("begin");
        TEST_AUDIT
            .record_create(&mut tx, target_id, "anna.kowalska", &fields("100.00"))
            .await
            .expect("create");
        for (old, new) in [("100.00", "120.00"), ("120.00", "90.00"), ("90.00", "95.00")] {
            TEST_AUDIT
                .record_update(&mut tx, target_id, "anna.kowalska", &fields(old), &fields(new), &["cost_value"])
                .await
                .expect("update");
        }
        TEST_AUDIT
            .record_delete(&mut tx, target_id, "anna.kowalska", &fields("95.00"))
            .await
            .expect("delete");
        tx.commit().await.expect("commit");

        let history = TEST_AUDIT.history(&pool, target_id).await.expect("history");
        let actions: Vec<_> = history.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Create,
                AuditAction::Update,
                AuditAction::Update,
                AuditAction::Update,
                AuditAction::Delete,
            ]
        );
        let new_values: Vec<_> = history
            .iter()
            .filter_map(|e| e.changes.as_ref())
            .map(|c| c["cost_value"]["new"].clone())
            .collect();
        assert_eq!(new_values, vec!["120.00", "90.00", "95.00"]);

        let again = TEST_AUDIT.history(&pool, target_id).await.expect("history");
        let ids: Vec<_> = history.iter().map(|e| e.id).collect();
        assert_eq!(again.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    }
}
