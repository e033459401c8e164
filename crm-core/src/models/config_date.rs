use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

/// The system-wide reference date ("today" for every period report).
///
/// Only constructible from a calendar date, so `year`, `month` and `day`
/// always match `reference_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigDate {
    #[serde(rename = "date")]
    reference_date: NaiveDate,
    year: i32,
    month: u32,
    day: u32,
}

impl ConfigDate {
    pub fn from_date(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            year: reference_date.year(),
            month: reference_date.month(),
            day: reference_date.day(),
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

/// Raw `config_current_date` row.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigDateRow {
    pub config_date: NaiveDate,
    pub year_value: Option<i32>,
    pub month_value: Option<i32>,
    pub day_value: Option<i32>,
}

impl From<ConfigDateRow> for ConfigDate {
    fn from(row: ConfigDateRow) -> Self {
        let date = ConfigDate::from_date(row.config_date);
        let stored = (row.year_value, row.month_value, row.day_value);
        let expected = (
            Some(date.year),
            Some(date.month as i32),
            Some(date.day as i32),
        );
        if stored != expected {
            // config_date wins; the components are derived data
            warn!(
                "config_current_date components {:?} disagree with config_date {}",
                stored, row.config_date
            );
        }
        date
    }
}

/// Outcome of looking up the reference date. Callers decide what a missing
/// configuration means for them; nothing substitutes the system clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDateLookup {
    Found(ConfigDate),
    Missing,
}

impl ConfigDateLookup {
    pub fn found(self) -> Option<ConfigDate> {
        match self {
            ConfigDateLookup::Found(date) => Some(date),
            ConfigDateLookup::Missing => None,
        }
    }
}

/// Body of `PUT /api/config/update-date`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvanceDateRequest {
    pub date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_date_decomposes() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).expect("date");
        let config = ConfigDate::from_date(date);
        assert_eq!(config.year(), 2024);
        assert_eq!(config.month(), 12);
        assert_eq!(config.day(), 31);
        assert_eq!(config.reference_date(), date);
    }

    #[test]
    fn test_leap_day_decomposes() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).expect("date");
        let config = ConfigDate::from_date(date);
        assert_eq!((config.year(), config.month(), config.day()), (2024, 2, 29));
    }

    #[test]
    fn test_row_with_stale_components_trusts_date() {
        let row = ConfigDateRow {
            config_date: NaiveDate::from_ymd_opt(2025, 1, 2).expect("date"),
            year_value: Some(2024),
            month_value: Some(12),
            day_value: Some(31),
        };
        let config = ConfigDate::from(row);
        assert_eq!((config.year(), config.month(), config.day()), (2025, 1, 2));
    }

    #[test]
    fn test_serializes_with_date_key() {
        let config = ConfigDate::from_date(NaiveDate::from_ymd_opt(2024, 12, 30).expect("date"));
        let json = serde_json::to_value(config).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"date": "2024-12-30", "year": 2024, "month": 12, "day": 30})
        );
    }

    #[test]
    fn test_lookup_found() {
        let config = ConfigDate::from_date(NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"));
        assert_eq!(ConfigDateLookup::Found(config).found(), Some(config));
        assert_eq!(ConfigDateLookup::Missing.found(), None);
    }
}
