use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cost classification mapping the `cost_kinds` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CostKind {
    pub id: i32,
    pub kind: String,
}

/// Cost kind creation and rename request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostKindInput {
    pub kind: String,
}

impl CostKindInput {
    /// The name to store, or `None` when it is blank.
    pub fn normalized(&self) -> Option<&str> {
        let kind = self.kind.trim();
        (!kind.is_empty()).then_some(kind)
    }
}
