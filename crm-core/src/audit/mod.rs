//! Append-only change records for monetary records.
//!
//! Every mutation of a cost writes at most one `audit_log` row, on the same
//! transaction as the mutation itself, so a rollback discards both.

pub mod diff;
pub mod logger;

use std::collections::BTreeMap;

pub use diff::{diff, snapshot, ChangeSet, FieldChange};
pub use logger::AuditLogger;

/// Stringified field values of one record, keyed by column name.
///
/// Values are rendered the way the database returns them (`NUMERIC(12,2)`
/// keeps its scale, so `100` is `"100.00"`), and NULL is `None`.
pub type FieldMap = BTreeMap<String, Option<String>>;

/// Records that can be audited expose their fields as a [`FieldMap`].
pub trait AuditFields {
    fn audit_fields(&self) -> FieldMap;
}
