//! The paid-status rule for monetary records.
//!
//! A record is paid when its outstanding balance (`to_pay`) is absent or
//! numerically zero. The balance may be stored as NUMERIC or as TEXT, so the
//! rule is defined over both representations, and the same rule is exposed
//! as a SQL predicate for set-oriented queries.
//!
//! Negative balances (overpayments) count as unpaid.

use rust_decimal::Decimal;

/// The outstanding-balance field of a monetary record, in whatever
/// representation the row stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutstandingBalance<'a> {
    Absent,
    Amount(Decimal),
    Text(&'a str),
}

impl<'a> From<Option<Decimal>> for OutstandingBalance<'a> {
    fn from(value: Option<Decimal>) -> Self {
        value.map_or(OutstandingBalance::Absent, OutstandingBalance::Amount)
    }
}

impl<'a> From<Option<&'a str>> for OutstandingBalance<'a> {
    fn from(value: Option<&'a str>) -> Self {
        value.map_or(OutstandingBalance::Absent, OutstandingBalance::Text)
    }
}

/// Anything carrying an outstanding balance.
pub trait MonetaryRecord {
    fn outstanding_balance(&self) -> OutstandingBalance<'_>;

    fn is_paid(&self) -> bool {
        is_paid(self.outstanding_balance())
    }
}

/// Decimal literal grammar accepted on both sides of the rule. It mirrors
/// `NUMERIC_LITERAL_PATTERN`, so text the database would not cast is never
/// considered zero.
fn is_numeric_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    match frac_part {
        None => !int_part.is_empty() && all_digits(int_part),
        Some(frac) => {
            all_digits(int_part) && all_digits(frac) && (!int_part.is_empty() || !frac.is_empty())
        }
    }
}

/// POSIX regex equivalent of [`is_numeric_literal`].
pub const NUMERIC_LITERAL_PATTERN: &str = r"^[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)$";

/// Padding stripped from both ends of a text balance: ASCII whitespace only.
/// Must list the same characters as [`SQL_BALANCE_PADDING`].
const BALANCE_PADDING: [char; 6] = [' ', '\t', '\n', '\r', '\x0B', '\x0C'];

/// `btrim` character set equivalent to [`BALANCE_PADDING`].
const SQL_BALANCE_PADDING: &str = r"E' \t\n\r\x0B\f'";

fn trim_padding(raw: &str) -> &str {
    raw.trim_matches(&BALANCE_PADDING[..])
}

/// Evaluates the rule against an already loaded balance.
pub fn is_paid(balance: OutstandingBalance<'_>) -> bool {
    match balance {
        OutstandingBalance::Absent => true,
        OutstandingBalance::Amount(amount) => amount.is_zero(),
        OutstandingBalance::Text(raw) => {
            let trimmed = trim_padding(raw);
            if trimmed.is_empty() {
                return true;
            }
            // A literal is zero exactly when every digit in it is zero.
            is_numeric_literal(trimmed) && trimmed.bytes().filter(u8::is_ascii_digit).all(|b| b == b'0')
        }
    }
}

/// Builds the SQL form of the rule for `column`.
///
/// `column` must be a trusted identifier (a constant in this crate), never
/// user input. The cast to numeric is guarded by the literal grammar so that
/// malformed text evaluates to unpaid instead of raising.
pub fn is_paid_filter(column: &str) -> String {
    let trimmed = format!("btrim({}::text, {})", column, SQL_BALANCE_PADDING);
    format!(
        "({col} IS NULL OR {trimmed} = '' OR \
         (CASE WHEN {trimmed} ~ '{pattern}' \
         THEN {trimmed}::numeric = 0 ELSE FALSE END))",
        col = column,
        trimmed = trimmed,
        pattern = NUMERIC_LITERAL_PATTERN,
    )
}

/// Negation of [`is_paid_filter`].
pub fn is_unpaid_filter(column: &str) -> String {
    format!("(NOT {})", is_paid_filter(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn text(s: &str) -> bool {
        is_paid(OutstandingBalance::Text(s))
    }

    fn amount(s: &str) -> bool {
        is_paid(OutstandingBalance::Amount(Decimal::from_str(s).expect("decimal")))
    }

    #[test]
    fn test_absent_balance_is_paid() {
        assert!(is_paid(OutstandingBalance::Absent));
        assert!(is_paid(OutstandingBalance::from(None::<Decimal>)));
        assert!(is_paid(OutstandingBalance::from(None::<&str>)));
    }

    #[test]
    fn test_numeric_zero_is_paid() {
        assert!(amount("0"));
        assert!(amount("0.00"));
        assert!(amount("-0.00"));
    }

    #[test]
    fn test_text_zero_is_paid() {
        assert!(text("0"));
        assert!(text("0.00"));
        assert!(text(" 0 "));
        assert!(text("-0"));
        assert!(text(".0"));
        assert!(text("0."));
    }

    #[test]
    fn test_blank_text_is_paid() {
        assert!(text(""));
        assert!(text("   "));
        assert!(text("\n"));
        assert!(text(" \t\r\n "));
    }

    #[test]
    fn test_ascii_padding_is_ignored() {
        assert!(text("0\n"));
        assert!(text("\t0"));
        assert!(text("\x0B0.00\x0C"));
        assert!(!text("\t12.50\n"));
    }

    #[test]
    fn test_non_ascii_padding_is_not_stripped() {
        assert!(!text("0\u{a0}"));
        assert!(!text("\u{2003}0"));
        assert!(!text("\u{a0}"));
    }

    #[test]
    fn test_non_zero_is_unpaid() {
        assert!(!amount("100.00"));
        assert!(!amount("0.01"));
        assert!(!text("12.50"));
        assert!(!text("0.001"));
    }

    #[test]
    fn test_negative_balance_is_unpaid() {
        assert!(!amount("-5.00"));
        assert!(!text("-5.00"));
    }

    #[test]
    fn test_malformed_text_is_unpaid() {
        assert!(!text("zero"));
        assert!(!text("0,00"));
        assert!(!text("."));
        assert!(!text("+"));
        assert!(!text("0e0"));
        assert!(!text("--0"));
    }

    #[test]
    fn test_numeric_literal_grammar() {
        for ok in ["0", "12", "+3", "-4.5", "4.", ".5", "007.000"] {
            assert!(is_numeric_literal(ok), "{ok} should be accepted");
        }
        for bad in ["", ".", "-", "+.", "1.2.3", "1e5", " 1", "1-"] {
            assert!(!is_numeric_literal(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_sql_filter_shape() {
        let sql = is_paid_filter("to_pay");
        assert!(sql.starts_with("(to_pay IS NULL OR"));
        assert!(sql.contains(&format!("btrim(to_pay::text, {})::numeric = 0", SQL_BALANCE_PADDING)));
        assert!(sql.contains(NUMERIC_LITERAL_PATTERN));
        assert_eq!(is_unpaid_filter("to_pay"), format!("(NOT {})", sql));
    }

    #[test]
    fn test_cost_scenarios() {
        // cost_value 100.00 with no outstanding balance
        assert!(is_paid(OutstandingBalance::from(None::<&str>)));
        // outstanding balance stored as text zero
        assert!(is_paid(OutstandingBalance::from(Some("0"))));
        // overpayment
        assert!(!is_paid(OutstandingBalance::from(Some(Decimal::new(-500, 2)))));
    }

    /// Text balances covering padding, signs, malformed literals and
    /// non-ASCII whitespace.
    const TEXT_CASES: &[&str] = &[
        "", " ", "0", " 0 ", "0\n", "\t0", "\n", "\r\n", "\x0B0\x0C", "0\u{a0}",
        "\u{a0}", "-0.0", "+0", ".0", "0.", ".", "+", "0e0", "0,00", "zero", "1",
        "-5.00", "12.50", "0.001", "\t12.50\n", "--0",
    ];

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_sql_filter_agrees_with_rust_rule() {
        use sqlx::postgres::PgPoolOptions;

        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect");

        let on_text = format!("SELECT {} FROM (SELECT $1::text AS v) AS t", is_paid_filter("v"));
        for input in TEXT_CASES {
            let in_db: bool = sqlx::query_scalar(&on_text)
                .bind(*input)
                .fetch_one(&pool)
                .await
                .expect("evaluate text balance");
            assert_eq!(in_db, text(input), "text balance {:?}", input);
        }

        let absent: bool = sqlx::query_scalar(&on_text)
            .bind(None::<String>)
            .fetch_one(&pool)
            .await
            .expect("evaluate null balance");
        assert!(absent);

        let on_numeric = format!("SELECT {} FROM (SELECT $1::numeric AS v) AS t", is_paid_filter("v"));
        for input in ["0", "0.00", "-0.00", "0.01", "-5.00", "100.00"] {
            let in_db: bool = sqlx::query_scalar(&on_numeric)
                .bind(Decimal::from_str(input).expect("decimal"))
                .fetch_one(&pool)
                .await
                .expect("evaluate numeric balance");
            assert_eq!(in_db, amount(input), "numeric balance {}", input);
        }
    }
}
