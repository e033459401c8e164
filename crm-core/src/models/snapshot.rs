//! Read models for the snapshot tables filled by the aggregation procedures.
//!
//! The daily, historical and yearly tables are wide: one pair of columns per
//! branch. Rows are decoded by column name using [`KNOWN_BRANCHES`], so adding
//! a branch means adding one table entry here plus the columns.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

/// A branch as shown to users and as spelled in snapshot column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub name: &'static str,
    pub column_suffix: &'static str,
}

pub const KNOWN_BRANCHES: &[Branch] = &[
    Branch { name: "Rzgów", column_suffix: "rzgow" },
    Branch { name: "Malbork", column_suffix: "malbork" },
    Branch { name: "Pcim", column_suffix: "pcim" },
    Branch { name: "Lublin", column_suffix: "lublin" },
    Branch { name: "Łomża", column_suffix: "lomza" },
    Branch { name: "Myślibórz", column_suffix: "mysliborz" },
    Branch { name: "MG", column_suffix: "mg" },
    Branch { name: "STH", column_suffix: "sth" },
    Branch { name: "BHP", column_suffix: "bhp" },
];

/// Maps loosely typed branch input ("LOMZA", "łomża", "Lomza") to the
/// stored branch name. Unknown names are passed through unchanged.
pub fn normalize_branch(input: &str) -> String {
    let folded = fold_ascii(input.trim());
    KNOWN_BRANCHES
        .iter()
        .find(|b| fold_ascii(b.name) == folded)
        .map(|b| b.name.to_string())
        .unwrap_or_else(|| input.trim().to_string())
}

fn fold_ascii(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'ą' | 'Ą' => 'a',
            'ć' | 'Ć' => 'c',
            'ę' | 'Ę' => 'e',
            'ł' | 'Ł' => 'l',
            'ń' | 'Ń' => 'n',
            'ó' | 'Ó' => 'o',
            'ś' | 'Ś' => 's',
            'ź' | 'Ź' | 'ż' | 'Ż' => 'z',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SalesProfit {
    pub net_sales: Decimal,
    pub profit: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PaidTotals {
    pub net_sales: Decimal,
    pub profit: Decimal,
    pub net_sales_paid: Decimal,
    pub profit_paid: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchBreakdown {
    pub total: PaidTotals,
    pub details: BTreeMap<String, SalesProfit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepresentativeTotals {
    pub total: SalesProfit,
}

/// One `aggregated_data` or `aggregated_data_hist` row.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodSnapshot {
    pub branches: BranchBreakdown,
    pub representatives: RepresentativeTotals,
}

fn decimal(row: &PgRow, column: &str) -> Result<Decimal, sqlx::Error> {
    Ok(row.try_get::<Option<Decimal>, _>(column)?.unwrap_or_default())
}

impl<'r> FromRow<'r, PgRow> for PeriodSnapshot {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let mut details = BTreeMap::new();
        for branch in KNOWN_BRANCHES {
            details.insert(
                branch.name.to_string(),
                SalesProfit {
                    net_sales: decimal(row, &format!("net_sale_total_{}", branch.column_suffix))?,
                    profit: decimal(row, &format!("net_profit_total_{}", branch.column_suffix))?,
                },
            );
        }

        Ok(PeriodSnapshot {
            branches: BranchBreakdown {
                total: PaidTotals {
                    net_sales: decimal(row, "net_sale_total_all_branch")?,
                    profit: decimal(row, "net_profit_total_all_branch")?,
                    net_sales_paid: decimal(row, "net_sale_payd_all_branch")?,
                    profit_paid: decimal(row, "net_profit_payd_all_branch")?,
                },
                details,
            },
            representatives: RepresentativeTotals {
                total: SalesProfit {
                    net_sales: decimal(row, "net_sale_total_all_representative")?,
                    profit: decimal(row, "net_profit_total_all_representative")?,
                },
            },
        })
    }
}

/// `aggregated_data_hist` row keyed by `YYYY-MM`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoricalSnapshot {
    pub month: String,
    #[serde(flatten)]
    pub snapshot: PeriodSnapshot,
}

impl<'r> FromRow<'r, PgRow> for HistoricalSnapshot {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(HistoricalSnapshot {
            month: row.try_get("aggregation_month")?,
            snapshot: PeriodSnapshot::from_row(row)?,
        })
    }
}

/// The singleton `aggregated_data_sums` row.
#[derive(Debug, Clone, Serialize)]
pub struct YearTotals {
    pub total: PaidTotals,
    pub representatives: SalesProfit,
    pub branches: BTreeMap<String, SalesProfit>,
}

impl<'r> FromRow<'r, PgRow> for YearTotals {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let mut branches = BTreeMap::new();
        for branch in KNOWN_BRANCHES {
            branches.insert(
                branch.name.to_string(),
                SalesProfit {
                    net_sales: decimal(row, &format!("net_sales_{}_year", branch.column_suffix))?,
                    profit: decimal(row, &format!("profit_{}_year", branch.column_suffix))?,
                },
            );
        }

        Ok(YearTotals {
            total: PaidTotals {
                net_sales: decimal(row, "net_sales_total_year")?,
                profit: decimal(row, "profit_total_year")?,
                net_sales_paid: decimal(row, "net_sales_payd_year")?,
                profit_paid: decimal(row, "profit_payd_year")?,
            },
            representatives: SalesProfit {
                net_sales: decimal(row, "net_sales_ph_year")?,
                profit: decimal(row, "profit_ph_year")?,
            },
            branches,
        })
    }
}

/// `representative_aggregated_data` row.
#[derive(Debug, Clone, FromRow)]
pub struct RepresentativeAggregate {
    pub year: i32,
    pub month: i32,
    pub branch_name: String,
    pub representative_name: String,
    pub net_sales_total: Option<Decimal>,
    pub net_sales_paid: Option<Decimal>,
    pub profit_total: Option<Decimal>,
    pub profit_paid: Option<Decimal>,
    pub sales_paid_percentage: Option<Decimal>,
    pub profit_margin_percentage: Option<Decimal>,
    pub paid_profit_margin_percentage: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_branch_folds_diacritics_and_case() {
        assert_eq!(normalize_branch("LOMZA"), "Łomża");
        assert_eq!(normalize_branch("łomża"), "Łomża");
        assert_eq!(normalize_branch("MYSLIBORZ"), "Myślibórz");
        assert_eq!(normalize_branch("rzgów"), "Rzgów");
        assert_eq!(normalize_branch("mg"), "MG");
    }

    #[test]
    fn test_normalize_branch_passes_unknown_through() {
        assert_eq!(normalize_branch(" Gdańsk "), "Gdańsk");
    }

    #[test]
    fn test_branch_suffixes_are_unique() {
        let mut suffixes: Vec<_> = KNOWN_BRANCHES.iter().map(|b| b.column_suffix).collect();
        suffixes.sort_unstable();
        suffixes.dedup();
        assert_eq!(suffixes.len(), KNOWN_BRANCHES.len());
    }
}
