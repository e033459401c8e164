use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::FieldMap;

/// Before and after values of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// `field -> {old, new}` for every field whose value actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, FieldChange>);

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Writes every `old` value back into `fields`, undoing the change.
    pub fn apply_old(&self, fields: &mut FieldMap) {
        for (name, change) in &self.0 {
            fields.insert(name.clone(), change.old.clone());
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Compares `old` and `new`, restricted to `editable` fields.
///
/// A field missing from a map counts as NULL.
pub fn diff(old: &FieldMap, new: &FieldMap, editable: &[&str]) -> ChangeSet {
    let mut changes = BTreeMap::new();
    for field in editable {
        let before = old.get(*field).cloned().flatten();
        let after = new.get(*field).cloned().flatten();
        if before != after {
            changes.insert(
                (*field).to_string(),
                FieldChange {
                    old: before,
                    new: after,
                },
            );
        }
    }
    ChangeSet(changes)
}

/// Projects `fields` onto the allow-list as a JSON object of strings and
/// nulls. Allow-listed fields absent from the map come out as null.
pub fn snapshot(fields: &FieldMap, allowed: &[&str]) -> Value {
    let mut object = Map::new();
    for field in allowed {
        let value = fields
            .get(*field)
            .cloned()
            .flatten()
            .map_or(Value::Null, Value::String);
        object.insert((*field).to_string(), value);
    }
    Value::Object(object)
}
