use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::info;

use super::filters::{CostFilter, CostScope};
use crate::actor::Actor;
use crate::audit::{AuditFields, AuditLogger};
use crate::error::{AppError, AppResult};
use crate::models::audit::AuditEntry;
use crate::models::config_date::ConfigDate;
use crate::models::cost::{Cost, CostInput, COST_EDITABLE_FIELDS, COST_SNAPSHOT_FIELDS};
use crate::pagination::PageParams;

const COST_COLUMNS: &str = "cost_id, cur_day, cur_mo, cur_yr, cost_year, cost_mo, \
    cost_contrahent, cost_nip, cost_doc_no, cost_value, cost_kind, cost_4what, cost_own, \
    cost_ph, cost_author, cost_branch, cost_branch_value, cost_hq_value, cost_ph_value, \
    branch_payout, rep_payout, to_pay";

pub const COST_AUDIT: AuditLogger = AuditLogger::new("all_costs", COST_SNAPSHOT_FIELDS);

/// One page of costs plus the number of rows matching the filter.
pub async fn list(pool: &PgPool, filter: &CostFilter, page: PageParams) -> AppResult<(Vec<Cost>, i64)> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM all_costs");
    filter.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(format!("SELECT {} FROM all_costs", COST_COLUMNS));
    filter.push_where(&mut select);
    select
        .push(" ORDER BY cost_id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
    let costs = select.build_query_as::<Cost>().fetch_all(pool).await?;

    Ok((costs, total))
}

pub async fn get(pool: &PgPool, cost_id: i32) -> AppResult<Cost> {
    sqlx::query_as::<_, Cost>(&format!(
        "SELECT {} FROM all_costs WHERE cost_id = $1",
        COST_COLUMNS
    ))
    .bind(cost_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found(cost_id))
}

/// Inserts a cost stamped with the reference date and writes a CREATE entry.
///
/// # Errors
///
/// `ReferenceNotFound` when `cost_kind` is not a known kind.
pub async fn create(pool: &PgPool, input: CostInput, actor: &Actor, today: ConfigDate) -> AppResult<Cost> {
    input.validate()?;
    let mut tx = pool.begin().await?;
    ensure_kind_exists(&mut tx, &input.cost_kind).await?;

    let cost = sqlx::query_as::<_, Cost>(&format!(
        r#"
        INSERT INTO all_costs (
            cur_day, cur_mo, cur_yr, cost_year, cost_mo, cost_contrahent, cost_nip,
            cost_doc_no, cost_value, cost_kind, cost_4what, cost_own, cost_ph,
            cost_author, cost_branch, branch_payout, rep_payout, to_pay
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
        )
        RETURNING {}
        "#,
        COST_COLUMNS
    ))
    .bind(today.day() as i32)
    .bind(today.month() as i32)
    .bind(today.year())
    .bind(input.cost_year)
    .bind(input.cost_mo)
    .bind(input.cost_contrahent)
    .bind(input.cost_nip)
    .bind(input.cost_doc_no)
    .bind(input.cost_value)
    .bind(input.cost_kind)
    .bind(input.cost_4what)
    .bind(input.cost_own)
    .bind(input.cost_ph)
    .bind(input.cost_author)
    .bind(input.cost_branch)
    .bind(input.branch_payout)
    .bind(input.rep_payout)
    .bind(input.to_pay.map(|b| b.into_stored()))
    .fetch_one(&mut *tx)
    .await?;

    COST_AUDIT
        .record_create(&mut tx, cost.cost_id.into(), actor.as_str(), &cost.audit_fields())
        .await?;
    tx.commit().await?;

    info!("Cost {} created by {}", cost.cost_id, actor.as_str());
    Ok(cost)
}

/// Replaces the editable fields of a cost.
///
/// The pre-update row is locked and compared with the row returned by the
/// UPDATE, so values recomputed by triggers are what gets audited. An
/// update that changes nothing writes no audit entry.
pub async fn update(pool: &PgPool, cost_id: i32, input: CostInput, actor: &Actor) -> AppResult<Cost> {
    input.validate()?;
    let mut tx = pool.begin().await?;
    let before = lock(&mut tx, cost_id).await?;
    ensure_kind_exists(&mut tx, &input.cost_kind).await?;

    let after = sqlx::query_as::<_, Cost>(&format!(
        r#"
        UPDATE all_costs
        SET cost_year = $2, cost_mo = $3, cost_contrahent = $4, cost_nip = $5,
            cost_doc_no = $6, cost_value = $7, cost_kind = $8, cost_4what = $9,
            cost_own = $10, cost_ph = $11, cost_author = $12, cost_branch = $13,
            branch_payout = $14, rep_payout = $15, to_pay = $16
        WHERE cost_id = $1
        RETURNING {}
        "#,
        COST_COLUMNS
    ))
    .bind(cost_id)
    .bind(input.cost_year)
    .bind(input.cost_mo)
    .bind(input.cost_contrahent)
    .bind(input.cost_nip)
    .bind(input.cost_doc_no)
    .bind(input.cost_value)
    .bind(input.cost_kind)
    .bind(input.cost_4what)
    .bind(input.cost_own)
    .bind(input.cost_ph)
    .bind(input.cost_author)
    .bind(input.cost_branch)
    .bind(input.branch_payout)
    .bind(input.rep_payout)
    .bind(input.to_pay.map(|b| b.into_stored()))
    .fetch_one(&mut *tx)
    .await?;

    let entry = COST_AUDIT
        .record_update(
            &mut tx,
            cost_id.into(),
            actor.as_str(),
            &before.audit_fields(),
            &after.audit_fields(),
            COST_EDITABLE_FIELDS,
        )
        .await?;
    tx.commit().await?;

    match entry {
        Some(entry) => info!("Cost {} updated by {} (audit {})", cost_id, actor.as_str(), entry.id),
        None => info!("Cost {} update by {} changed nothing", cost_id, actor.as_str()),
    }
    Ok(after)
}

/// Deletes a cost, recording its allow-listed fields in a DELETE entry.
pub async fn delete(pool: &PgPool, cost_id: i32, actor: &Actor) -> AppResult<AuditEntry> {
    let mut tx = pool.begin().await?;
    let cost = lock(&mut tx, cost_id).await?;

    sqlx::query("DELETE FROM all_costs WHERE cost_id = $1")
        .bind(cost_id)
        .execute(&mut *tx)
        .await?;

    let entry = COST_AUDIT
        .record_delete(&mut tx, cost_id.into(), actor.as_str(), &cost.audit_fields())
        .await?;
    tx.commit().await?;

    info!("Cost {} deleted by {}", cost_id, actor.as_str());
    Ok(entry)
}

async fn lock(tx: &mut Transaction<'_, Postgres>, cost_id: i32) -> AppResult<Cost> {
    sqlx::query_as::<_, Cost>(&format!(
        "SELECT {} FROM all_costs WHERE cost_id = $1 FOR UPDATE",
        COST_COLUMNS
    ))
    .bind(cost_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| not_found(cost_id))
}

/// Checks that `kind` exists and holds a share lock on it until `tx` ends,
/// so a concurrent rename or delete of the kind waits for this cost.
async fn ensure_kind_exists(tx: &mut Transaction<'_, Postgres>, kind: &str) -> AppResult<()> {
    let locked: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM cost_kinds WHERE kind = $1 FOR SHARE")
            .bind(kind)
            .fetch_optional(&mut **tx)
            .await?;
    if locked.is_some() {
        Ok(())
    } else {
        Err(AppError::ReferenceNotFound(format!(
            "Cost kind '{}' does not exist",
            kind
        )))
    }
}

fn not_found(cost_id: i32) -> AppError {
    AppError::NotFound(format!("Cost {} not found", cost_id))
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalSummary {
    pub total_cost: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_branch_cost: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hq_cost: Option<Decimal>,
    pub total_ph_cost: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub total_summary: TotalSummary,
    pub by_cost_type: BTreeMap<String, Decimal>,
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    total_cost: Decimal,
    total_branch_cost: Decimal,
    total_hq_cost: Decimal,
    total_ph_cost: Decimal,
}

/// Totals and per-kind totals for the scope. A representative scope only
/// reports the overall and representative shares.
pub async fn summary(pool: &PgPool, scope: &CostScope) -> AppResult<CostSummary> {
    let mut totals = QueryBuilder::new(
        "SELECT COALESCE(SUM(cost_value), 0) AS total_cost, \
         COALESCE(SUM(cost_branch_value), 0) AS total_branch_cost, \
         COALESCE(SUM(cost_hq_value), 0) AS total_hq_cost, \
         COALESCE(SUM(cost_ph_value), 0) AS total_ph_cost \
         FROM all_costs",
    );
    scope.push_where(&mut totals);
    let row = totals.build_query_as::<SummaryRow>().fetch_one(pool).await?;

    let mut by_kind = QueryBuilder::new(
        "SELECT cost_kind, COALESCE(SUM(cost_value), 0) FROM all_costs",
    );
    scope.push_where(&mut by_kind);
    by_kind.push(" GROUP BY cost_kind");
    let kinds: Vec<(String, Decimal)> = by_kind.build_query_as().fetch_all(pool).await?;

    let per_representative = scope.representative().is_some();
    Ok(CostSummary {
        total_summary: TotalSummary {
            total_cost: row.total_cost,
            total_branch_cost: (!per_representative).then_some(row.total_branch_cost),
            total_hq_cost: (!per_representative).then_some(row.total_hq_cost),
            total_ph_cost: row.total_ph_cost,
        },
        by_cost_type: kinds.into_iter().collect(),
    })
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RepresentativeCost {
    pub representative: String,
    pub year: i32,
    pub month: i32,
    pub branch: String,
    pub total_ph_cost: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepresentativeCostTotals {
    pub total_records: usize,
    pub total_cost: Decimal,
    pub unique_representatives: usize,
    pub unique_branches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepresentativeCostReport {
    pub data: Vec<RepresentativeCost>,
    pub summary: RepresentativeCostTotals,
}

impl RepresentativeCostReport {
    pub fn from_rows(data: Vec<RepresentativeCost>) -> Self {
        let representatives: BTreeSet<_> = data.iter().map(|r| r.representative.as_str()).collect();
        let branches: BTreeSet<_> = data.iter().map(|r| r.branch.as_str()).collect();
        let summary = RepresentativeCostTotals {
            total_records: data.len(),
            total_cost: data.iter().map(|r| r.total_ph_cost).sum(),
            unique_representatives: representatives.len(),
            unique_branches: branches.len(),
        };
        Self { data, summary }
    }
}

/// Positive representative cost shares per representative, period and
/// branch, newest period first.
pub async fn representatives_summary(pool: &PgPool, scope: &CostScope) -> AppResult<RepresentativeCostReport> {
    let mut qb = QueryBuilder::new(
        "SELECT cost_ph AS representative, cost_year AS year, cost_mo AS month, \
         cost_branch AS branch, SUM(cost_ph_value) AS total_ph_cost FROM all_costs",
    );
    scope.push_where(&mut qb);
    qb.push(
        " AND cost_ph IS NOT NULL AND cost_ph <> '' AND cost_ph_value > 0 \
         GROUP BY cost_ph, cost_year, cost_mo, cost_branch \
         ORDER BY cost_year DESC, cost_mo DESC, cost_ph, cost_branch",
    );
    let rows = qb.build_query_as::<RepresentativeCost>().fetch_all(pool).await?;
    Ok(RepresentativeCostReport::from_rows(rows))
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BranchPayout {
    pub branch: String,
    pub total_payout: Decimal,
}

pub async fn branch_payouts(pool: &PgPool, scope: &CostScope) -> AppResult<Vec<BranchPayout>> {
    let mut qb = QueryBuilder::new(
        "SELECT cost_branch AS branch, COALESCE(SUM(branch_payout), 0) AS total_payout \
         FROM all_costs",
    );
    scope.push_where(&mut qb);
    qb.push(" GROUP BY cost_branch ORDER BY cost_branch");
    Ok(qb.build_query_as::<BranchPayout>().fetch_all(pool).await?)
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RepresentativePayout {
    pub representative: String,
    pub branch: String,
    pub year: i32,
    pub month: i32,
    pub total_payout: Decimal,
}

pub async fn representative_payouts(pool: &PgPool, scope: &CostScope) -> AppResult<Vec<RepresentativePayout>> {
    let mut qb = QueryBuilder::new(
        "SELECT cost_ph AS representative, cost_branch AS branch, cost_year AS year, \
         cost_mo AS month, COALESCE(SUM(rep_payout), 0) AS total_payout FROM all_costs",
    );
    scope.push_where(&mut qb);
    qb.push(
        " AND cost_ph IS NOT NULL AND cost_ph <> '' \
         GROUP BY cost_ph, cost_branch, cost_year, cost_mo \
         ORDER BY cost_year DESC, cost_mo DESC, cost_ph",
    );
    Ok(qb.build_query_as::<RepresentativePayout>().fetch_all(pool).await?)
}

pub async fn authors(pool: &PgPool) -> AppResult<Vec<String>> {
    Ok(
        sqlx::query_scalar("SELECT DISTINCT cost_author FROM all_costs ORDER BY cost_author")
            .fetch_all(pool)
            .await?,
    )
}

pub async fn representatives(pool: &PgPool) -> AppResult<Vec<String>> {
    Ok(sqlx::query_scalar(
        "SELECT DISTINCT cost_ph FROM all_costs \
         WHERE cost_ph IS NOT NULL AND cost_ph <> '' ORDER BY cost_ph",
    )
    .fetch_all(pool)
    .await?)
}
