use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};

use crate::paid::{is_paid_filter, is_unpaid_filter};

/// Query parameters of `GET /api/costs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CostFilter {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub branch: Option<String>,
    pub cost_own: Option<String>,
    pub cost_kind: Option<String>,
    pub cost_author: Option<String>,
    pub cost_ph: Option<String>,
    /// Case-insensitive substring of the contractor name
    pub contrahent_like: Option<String>,
    pub amount_gte: Option<Decimal>,
    pub amount_lte: Option<Decimal>,
    pub is_paid: Option<bool>,
}

/// Period/branch/representative scope shared by the summary and payout
/// reports. `rep` and `representative` are accepted as spellings of
/// `cost_ph`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CostScope {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub branch: Option<String>,
    #[serde(alias = "rep", alias = "representative")]
    pub cost_ph: Option<String>,
}

/// Treats an empty query value (`?branch=`) as absent.
fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Escapes `%`, `_` and `\` so user text matches literally inside LIKE.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl CostFilter {
    /// Appends ` WHERE ...` for every set filter. Values are bound, never
    /// interpolated.
    pub fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(year) = self.year {
            qb.push(" AND cost_year = ").push_bind(year);
        }
        if let Some(month) = self.month {
            qb.push(" AND cost_mo = ").push_bind(month);
        }
        if let Some(branch) = present(&self.branch) {
            qb.push(" AND cost_branch = ").push_bind(branch);
        }
        if let Some(own) = present(&self.cost_own) {
            qb.push(" AND cost_own = ").push_bind(own);
        }
        if let Some(kind) = present(&self.cost_kind) {
            qb.push(" AND cost_kind = ").push_bind(kind);
        }
        if let Some(author) = present(&self.cost_author) {
            qb.push(" AND cost_author = ").push_bind(author);
        }
        if let Some(ph) = present(&self.cost_ph) {
            qb.push(" AND cost_ph = ").push_bind(ph);
        }
        if let Some(fragment) = present(&self.contrahent_like) {
            qb.push(" AND cost_contrahent ILIKE ")
                .push_bind(format!("%{}%", escape_like(&fragment)));
        }
        if let Some(min) = self.amount_gte {
            qb.push(" AND cost_value >= ").push_bind(min);
        }
        if let Some(max) = self.amount_lte {
            qb.push(" AND cost_value <= ").push_bind(max);
        }
        match self.is_paid {
            Some(true) => {
                qb.push(" AND ").push(is_paid_filter("to_pay"));
            }
            Some(false) => {
                qb.push(" AND ").push(is_unpaid_filter("to_pay"));
            }
            None => {}
        }
    }
}

impl CostScope {
    pub fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(year) = self.year {
            qb.push(" AND cost_year = ").push_bind(year);
        }
        if let Some(month) = self.month {
            qb.push(" AND cost_mo = ").push_bind(month);
        }
        if let Some(branch) = present(&self.branch) {
            qb.push(" AND cost_branch = ").push_bind(branch);
        }
        if let Some(ph) = present(&self.cost_ph) {
            qb.push(" AND cost_ph = ").push_bind(ph);
        }
    }

    pub fn representative(&self) -> Option<String> {
        present(&self.cost_ph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn where_sql(filter: &CostFilter) -> String {
        let mut qb = QueryBuilder::new("SELECT cost_id FROM all_costs");
        filter.push_where(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn test_empty_filter_selects_everything() {
        assert_eq!(
            where_sql(&CostFilter::default()),
            "SELECT cost_id FROM all_costs WHERE TRUE"
        );
    }

    #[test]
    fn test_filters_are_bound_in_order() {
        let filter = CostFilter {
            year: Some(2024),
            branch: Some("Lublin".into()),
            amount_gte: Some(Decimal::new(5000, 2)),
            ..Default::default()
        };
        assert_eq!(
            where_sql(&filter),
            "SELECT cost_id FROM all_costs WHERE TRUE AND cost_year = $1 \
             AND cost_branch = $2 AND cost_value >= $3"
        );
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let filter = CostFilter {
            branch: Some("  ".into()),
            cost_kind: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            where_sql(&filter),
            "SELECT cost_id FROM all_costs WHERE TRUE"
        );
    }

    #[test]
    fn test_is_paid_pushes_the_paid_predicate() {
        let paid = where_sql(&CostFilter {
            is_paid: Some(true),
            ..Default::default()
        });
        assert!(paid.ends_with(&is_paid_filter("to_pay")));

        let unpaid = where_sql(&CostFilter {
            is_paid: Some(false),
            ..Default::default()
        });
        assert!(unpaid.contains("(NOT (to_pay IS NULL"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("Opał"), "Opał");
    }

    #[test]
    fn test_scope_accepts_rep_alias() {
        let scope: CostScope = serde_json::from_str(r#"{"rep": "Jan Kowalski"}"#).expect("scope");
        assert_eq!(scope.representative().as_deref(), Some("Jan Kowalski"));
    }
}
