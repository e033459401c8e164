use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::audit::{AuditFields, FieldMap};
use crate::error::AppError;
use crate::paid::{MonetaryRecord, OutstandingBalance};

/// Fields a user may change through `PUT /api/costs/{id}`. Only these take
/// part in update diffs.
pub const COST_EDITABLE_FIELDS: &[&str] = &[
    "cost_year",
    "cost_mo",
    "cost_contrahent",
    "cost_nip",
    "cost_doc_no",
    "cost_value",
    "cost_kind",
    "cost_4what",
    "cost_own",
    "cost_ph",
    "cost_author",
    "cost_branch",
    "branch_payout",
    "rep_payout",
    "to_pay",
];

/// Fields captured when a cost is created or deleted.
pub const COST_SNAPSHOT_FIELDS: &[&str] = &[
    "cost_id",
    "cost_year",
    "cost_mo",
    "cost_contrahent",
    "cost_nip",
    "cost_doc_no",
    "cost_value",
    "cost_kind",
    "cost_own",
    "cost_ph",
    "cost_author",
    "cost_branch",
    "to_pay",
];

/// Cost model mapping the `all_costs` table.
///
/// `cost_branch_value`, `cost_hq_value`, `cost_ph_value`, `branch_payout`
/// and `rep_payout` may be recomputed by database triggers on write, so the
/// row returned by the write is the one to report.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cost {
    pub cost_id: i32,

    /// Reference date components at the time the cost was entered
    pub cur_day: Option<i32>,
    pub cur_mo: Option<i32>,
    pub cur_yr: Option<i32>,

    pub cost_year: i32,
    pub cost_mo: i32,
    pub cost_contrahent: String,
    pub cost_nip: String,
    pub cost_doc_no: String,
    pub cost_value: Decimal,
    pub cost_kind: String,
    pub cost_4what: String,
    pub cost_own: String,

    /// Sales representative the cost is assigned to
    pub cost_ph: Option<String>,
    pub cost_author: String,
    pub cost_branch: String,

    pub cost_branch_value: Option<Decimal>,
    pub cost_hq_value: Option<Decimal>,
    pub cost_ph_value: Option<Decimal>,
    pub branch_payout: Option<Decimal>,
    pub rep_payout: Option<Decimal>,

    /// Outstanding balance, stored as text
    pub to_pay: Option<String>,
}

impl MonetaryRecord for Cost {
    fn outstanding_balance(&self) -> OutstandingBalance<'_> {
        OutstandingBalance::from(self.to_pay.as_deref())
    }
}

impl AuditFields for Cost {
    fn audit_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("cost_id".into(), Some(self.cost_id.to_string()));
        fields.insert("cost_year".into(), Some(self.cost_year.to_string()));
        fields.insert("cost_mo".into(), Some(self.cost_mo.to_string()));
        fields.insert("cost_contrahent".into(), Some(self.cost_contrahent.clone()));
        fields.insert("cost_nip".into(), Some(self.cost_nip.clone()));
        fields.insert("cost_doc_no".into(), Some(self.cost_doc_no.clone()));
        fields.insert("cost_value".into(), Some(self.cost_value.to_string()));
        fields.insert("cost_kind".into(), Some(self.cost_kind.clone()));
        fields.insert("cost_4what".into(), Some(self.cost_4what.clone()));
        fields.insert("cost_own".into(), Some(self.cost_own.clone()));
        fields.insert("cost_ph".into(), self.cost_ph.clone());
        fields.insert("cost_author".into(), Some(self.cost_author.clone()));
        fields.insert("cost_branch".into(), Some(self.cost_branch.clone()));
        fields.insert(
            "branch_payout".into(),
            self.branch_payout.map(|v| v.to_string()),
        );
        fields.insert("rep_payout".into(), self.rep_payout.map(|v| v.to_string()));
        fields.insert("to_pay".into(), self.to_pay.clone());
        fields
    }
}

/// Outstanding balance as sent by clients: either a JSON number or text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BalanceInput {
    Amount(Decimal),
    Text(String),
}

impl BalanceInput {
    pub fn into_stored(self) -> String {
        match self {
            BalanceInput::Amount(amount) => amount.to_string(),
            BalanceInput::Text(text) => text,
        }
    }
}

/// Cost creation and full-replacement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostInput {
    pub cost_year: i32,
    pub cost_mo: i32,
    pub cost_contrahent: String,
    pub cost_nip: String,
    pub cost_doc_no: String,
    pub cost_value: Decimal,
    pub cost_kind: String,
    pub cost_4what: String,
    pub cost_own: String,
    pub cost_ph: Option<String>,
    pub cost_author: String,
    pub cost_branch: String,
    pub branch_payout: Option<Decimal>,
    pub rep_payout: Option<Decimal>,
    pub to_pay: Option<BalanceInput>,
}

impl CostInput {
    /// Rejects out-of-range periods and blank required text.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=12).contains(&self.cost_mo) {
            return Err(AppError::Validation("cost_mo must be between 1 and 12".into()));
        }
        if !(2000..=2100).contains(&self.cost_year) {
            return Err(AppError::Validation(
                "cost_year must be between 2000 and 2100".into(),
            ));
        }
        let required = [
            ("cost_contrahent", &self.cost_contrahent),
            ("cost_kind", &self.cost_kind),
            ("cost_author", &self.cost_author),
            ("cost_branch", &self.cost_branch),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(AppError::Validation(format!("{} must not be blank", name)));
        }
        Ok(())
    }
}

/// Cost response with the derived paid flag.
#[derive(Debug, Clone, Serialize)]
pub struct CostResponse {
    #[serde(flatten)]
    pub cost: Cost,
    pub is_paid: bool,
}

impl From<Cost> for CostResponse {
    fn from(cost: Cost) -> Self {
        let is_paid = cost.is_paid();
        CostResponse { cost, is_paid }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{self, cost};
    use super::*;

    #[test]
    fn test_cost_paid_flag() {
        assert!(cost(1, Decimal::new(10000, 2), None).is_paid());
        assert!(cost(2, Decimal::new(10000, 2), Some("0")).is_paid());
        assert!(!cost(3, Decimal::new(10000, 2), Some("-5.00")).is_paid());
    }

    #[test]
    fn test_audit_fields_keep_scale() {
        let fields = cost(1, Decimal::new(10000, 2), None).audit_fields();
        assert_eq!(fields["cost_value"].as_deref(), Some("100.00"));
        assert_eq!(fields["to_pay"], None);
    }

    #[test]
    fn test_every_editable_field_is_audited() {
        let fields = cost(1, Decimal::ONE, None).audit_fields();
        for name in COST_EDITABLE_FIELDS.iter().chain(COST_SNAPSHOT_FIELDS) {
            assert!(fields.contains_key(*name), "{name} missing from audit fields");
        }
    }

    #[test]
    fn test_balance_input_accepts_number_or_text() {
        let number: BalanceInput = serde_json::from_str("12.5").expect("number");
        let text: BalanceInput = serde_json::from_str("\"0\"").expect("text");
        assert_eq!(number.into_stored(), "12.5");
        assert_eq!(text.into_stored(), "0");
    }

    #[test]
    fn test_input_validation() {
        assert!(fixtures::input().validate().is_ok());

        let mut bad_month = fixtures::input();
        bad_month.cost_mo = 13;
        assert!(matches!(bad_month.validate(), Err(AppError::Validation(_))));

        let mut blank_kind = fixtures::input();
        blank_kind.cost_kind = "  ".into();
        let err = blank_kind.validate().unwrap_err();
        assert!(err.to_string().contains("cost_kind"));
    }

    #[test]
    fn test_response_flattens_cost() {
        let json = serde_json::to_value(CostResponse::from(cost(7, Decimal::new(500, 2), Some("0"))))
            .expect("serialize");
        assert_eq!(json["cost_id"], 7);
        assert_eq!(json["is_paid"], true);
    }
}
