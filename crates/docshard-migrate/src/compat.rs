//! Schema compatibility classification.
//!
//! Field sets of two schema versions are flattened to `(table, dotted path)
//! -> type` maps and diffed. The classification is advisory; nothing here
//! blocks a schema change.

use std::collections::{BTreeMap, BTreeSet};

use docshard_types::SchemaDocument;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::path::{parse_declared, parse_step_key};
use crate::transform::Transform;
use crate::Result;

/// Overall verdict for a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    /// No removals and no type changes.
    FullyCompatible,
    /// Every type change is covered by a declared migration.
    ForwardCompatible,
    /// A field was removed, or a type change has no migration.
    Breaking,
}

/// A field identified by table and dotted path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FieldRef {
    pub table: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeChange {
    pub field: FieldRef,
    pub old_type: String,
    pub new_type: String,
    /// Whether a declared migration touches this field.
    pub migrated: bool,
}

/// Field-level differences between two schema versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub added: Vec<FieldRef>,
    pub removed: Vec<FieldRef>,
    pub type_changed: Vec<TypeChange>,
}

/// Result of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub from_version: u32,
    pub to_version: u32,
    pub compatibility: Compatibility,
    pub diff: SchemaDiff,
    /// Live documents that may need attention because of this change.
    pub affected_documents: u64,
}

impl SchemaDiff {
    pub fn classify(&self) -> Compatibility {
        if !self.removed.is_empty() || self.type_changed.iter().any(|c| !c.migrated) {
            Compatibility::Breaking
        } else if self.type_changed.is_empty() {
            Compatibility::FullyCompatible
        } else {
            Compatibility::ForwardCompatible
        }
    }

    /// Whether existing documents are touched by the change at all.
    pub fn affects_data(&self) -> bool {
        !self.removed.is_empty() || !self.type_changed.is_empty()
    }
}

/// Diff two parsed schemas. Type changes are checked against migrations the
/// new schema declares for steps inside `(old_version, new_version]`.
pub fn diff_schemas(
    old: &SchemaDocument,
    new: &SchemaDocument,
    old_version: u32,
    new_version: u32,
) -> Result<SchemaDiff> {
    let old_fields = field_types(old);
    let new_fields = field_types(new);
    let migrated = migrated_fields(new, old_version, new_version)?;

    let mut diff = SchemaDiff::default();
    for (field, new_type) in &new_fields {
        match old_fields.get(field) {
            None => diff.added.push(field.clone()),
            Some(old_type) if old_type != new_type => diff.type_changed.push(TypeChange {
                field: field.clone(),
                old_type: old_type.clone(),
                new_type: new_type.clone(),
                migrated: migrated.contains(&field.path),
            }),
            Some(_) => {}
        }
    }
    diff.removed = old_fields
        .keys()
        .filter(|f| !new_fields.contains_key(*f))
        .cloned()
        .collect();
    Ok(diff)
}

fn field_types(doc: &SchemaDocument) -> BTreeMap<FieldRef, String> {
    let mut out = BTreeMap::new();
    for (table, schema) in doc.tables() {
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            collect(table, props, "", &mut out);
        }
    }
    out
}

fn collect(table: &str, props: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<FieldRef, String>) {
    for (name, prop) in props {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        out.insert(
            FieldRef {
                table: table.to_string(),
                path: path.clone(),
            },
            type_name(prop),
        );
        if let Some(nested) = prop.get("properties").and_then(Value::as_object) {
            collect(table, nested, &path, out);
        }
    }
}

/// Normalised JSON Schema type. `null` members of a type union are ignored
/// so that making a field nullable is not reported as a type change.
fn type_name(prop: &Value) -> String {
    match prop.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => {
            let set: BTreeSet<&str> = types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .collect();
            if set.is_empty() {
                "null".to_string()
            } else {
                set.into_iter().collect::<Vec<_>>().join("|")
            }
        }
        _ if prop.get("properties").is_some() => "object".to_string(),
        _ => "any".to_string(),
    }
}

fn migrated_fields(doc: &SchemaDocument, old_version: u32, new_version: u32) -> Result<BTreeSet<String>> {
    let mut fields = BTreeSet::new();
    let Some(map) = doc.migrations() else {
        return Ok(fields);
    };
    for key in map.keys() {
        let Some((from, to)) = parse_step_key(key) else {
            continue;
        };
        if from < old_version || to > new_version {
            continue;
        }
        for transform in parse_declared(doc, key)? {
            if let Transform::Rename { to } = &transform.transform {
                fields.insert(rename_target(&transform.field, to));
            }
            fields.insert(transform.field);
        }
    }
    Ok(fields)
}

fn rename_target(field: &str, to: &str) -> String {
    match field.rsplit_once('.') {
        Some((parent, _)) => format!("{parent}.{to}"),
        None => to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> SchemaDocument {
        SchemaDocument::parse(&value.to_string()).expect("parse")
    }

    fn base() -> Value {
        json!({"tables": {"orders": {"properties": {
            "sku": {"type": "string"},
            "price_cents": {"type": "integer"},
            "address": {"type": "object", "properties": {"zip": {"type": "string"}}}
        }}}})
    }

    #[test]
    fn test_adding_optional_field_is_fully_compatible() {
        let mut next = base();
        next["tables"]["orders"]["properties"]["notes"] = json!({"type": ["string", "null"]});
        let diff = diff_schemas(&doc(base()), &doc(next), 1, 2).expect("diff");
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, "notes");
        assert_eq!(diff.classify(), Compatibility::FullyCompatible);
        assert!(!diff.affects_data());
    }

    #[test]
    fn test_removal_is_breaking_even_with_migration() {
        let mut next = base();
        next["tables"]["orders"]["properties"]
            .as_object_mut()
            .expect("props")
            .remove("sku");
        next["x-migrations"] = json!({"1_to_2": [
            {"field": "sku", "transform": "rename", "args": {"to": "code"}}
        ]});
        let diff = diff_schemas(&doc(base()), &doc(next), 1, 2).expect("diff");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.classify(), Compatibility::Breaking);
    }

    #[test]
    fn test_type_change_with_migration_is_forward_compatible() {
        let mut next = base();
        next["tables"]["orders"]["properties"]["price_cents"] = json!({"type": "number"});
        next["x-migrations"] = json!({"1_to_2": [
            {"field": "price_cents", "transform": "divide", "args": {"divisor": 100}}
        ]});
        let diff = diff_schemas(&doc(base()), &doc(next), 1, 2).expect("diff");
        assert_eq!(diff.type_changed.len(), 1);
        assert!(diff.type_changed[0].migrated);
        assert_eq!(diff.classify(), Compatibility::ForwardCompatible);
    }

    #[test]
    fn test_type_change_without_migration_is_breaking() {
        let mut next = base();
        next["tables"]["orders"]["properties"]["address"]["properties"]["zip"] =
            json!({"type": "integer"});
        let diff = diff_schemas(&doc(base()), &doc(next), 1, 2).expect("diff");
        assert_eq!(diff.type_changed[0].field.path, "address.zip");
        assert_eq!(diff.classify(), Compatibility::Breaking);
    }

    #[test]
    fn test_migration_outside_range_does_not_cover() {
        let mut next = base();
        next["tables"]["orders"]["properties"]["price_cents"] = json!({"type": "number"});
        next["x-migrations"] = json!({"0_to_1": [
            {"field": "price_cents", "transform": "cast", "args": "double"}
        ]});
        let diff = diff_schemas(&doc(base()), &doc(next), 1, 2).expect("diff");
        assert_eq!(diff.classify(), Compatibility::Breaking);
    }
}
