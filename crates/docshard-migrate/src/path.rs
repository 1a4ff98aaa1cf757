//! Migration path resolution over the version chain.
//!
//! Versions form a simple increasing chain, so a path is a sorted-range walk:
//! every stored version in `(from, to]` contributes one step whose
//! transforms come from that version's migrations map under the key
//! `"<previous>_to_<version>"`. A missing key is a schema-only bump.

use docshard_types::{CollectionSchema, SchemaDocument};
use serde::Serialize;
use serde_json::Value;

use crate::transform::FieldTransform;
use crate::{MigrationError, Result};

/// An edge between two adjacent stored versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStep {
    pub from: u32,
    pub to: u32,
    /// Applied in declared order.
    pub transforms: Vec<FieldTransform>,
}

/// Ordered steps from one version to another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPath {
    pub from: u32,
    pub to: u32,
    pub steps: Vec<MigrationStep>,
}

impl MigrationPath {
    /// Resolve the path from `from` to `to` given every stored version of a
    /// collection. `from >= to` yields an empty path.
    pub fn resolve(versions: &[CollectionSchema], from: u32, to: u32) -> Result<Self> {
        let mut chain: Vec<&CollectionSchema> = versions
            .iter()
            .filter(|s| s.version > from && s.version <= to)
            .collect();
        chain.sort_by_key(|s| s.version);
        chain.dedup_by_key(|s| s.version);

        let mut steps = Vec::with_capacity(chain.len());
        let mut previous = from;
        for schema in chain {
            let transforms = step_transforms(schema, previous)?;
            steps.push(MigrationStep {
                from: previous,
                to: schema.version,
                transforms,
            });
            previous = schema.version;
        }

        Ok(Self { from, to, steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(|s| s.transforms.is_empty())
    }

    pub fn transform_count(&self) -> usize {
        self.steps.iter().map(|s| s.transforms.len()).sum()
    }

    /// Apply every step to a copy of `data`. The input is never modified.
    pub fn apply(&self, data: &Value) -> Result<Value> {
        let mut working = data.clone();
        if !working.is_object() {
            return Err(MigrationError::NotAnObject);
        }
        for step in &self.steps {
            for transform in &step.transforms {
                transform.apply(&mut working)?;
            }
        }
        Ok(working)
    }
}

/// Format the migrations-map key for one step.
pub fn step_key(from: u32, to: u32) -> String {
    format!("{from}_to_{to}")
}

/// Parse a `"<from>_to_<to>"` key.
pub fn parse_step_key(key: &str) -> Option<(u32, u32)> {
    let (from, to) = key.split_once("_to_")?;
    let from = from.parse().ok()?;
    let to = to.parse().ok()?;
    (from < to).then_some((from, to))
}

fn step_transforms(schema: &CollectionSchema, previous: u32) -> Result<Vec<FieldTransform>> {
    let doc = schema
        .document()
        .map_err(|e| MigrationError::InvalidSchema {
            collection: schema.collection.to_string(),
            version: schema.version,
            detail: e.to_string(),
        })?;
    parse_declared(&doc, &step_key(previous, schema.version))
}

/// Parse the transform list declared under `key`, if any.
pub fn parse_declared(doc: &SchemaDocument, key: &str) -> Result<Vec<FieldTransform>> {
    let Some(declared) = doc.migrations().and_then(|m| m.get(key)) else {
        return Ok(Vec::new());
    };
    let Some(entries) = declared.as_array() else {
        return Err(MigrationError::MalformedStep(key.to_string()));
    };
    entries.iter().map(FieldTransform::parse).collect()
}

/// Problems found in a schema's migrations map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationIssue {
    pub key: String,
    pub detail: String,
}

/// Check every entry of a schema's migrations map without applying it.
pub fn validate_migrations(doc: &SchemaDocument) -> Vec<MigrationIssue> {
    let Some(map) = doc.migrations() else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for key in map.keys() {
        if parse_step_key(key).is_none() {
            issues.push(MigrationIssue {
                key: key.clone(),
                detail: "key must look like '<from>_to_<to>' with from < to".to_string(),
            });
            continue;
        }
        if let Err(e) = parse_declared(doc, key) {
            issues.push(MigrationIssue {
                key: key.clone(),
                detail: e.to_string(),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshard_types::{CollectionName, TenantId};
    use serde_json::json;

    fn schema(version: u32, raw: Value) -> CollectionSchema {
        CollectionSchema {
            tenant: TenantId::new("t1").expect("tenant"),
            collection: CollectionName::new("shop").expect("collection"),
            version,
            active: false,
            locked: false,
            system: false,
            raw: raw.to_string(),
        }
    }

    fn versions() -> Vec<CollectionSchema> {
        vec![
            schema(1, json!({"tables": {}})),
            schema(
                2,
                json!({"x-migrations": {"1_to_2": [
                    {"field": "price_cents", "transform": "divide", "args": {"divisor": 100}},
                    {"field": "price_cents", "transform": "rename", "args": {"to": "price"}}
                ]}}),
            ),
            schema(3, json!({"tables": {}})),
            schema(
                5,
                json!({"x-migrations": {"3_to_5": [
                    {"field": "status", "transform": "default", "args": {"value": "active"}}
                ]}}),
            ),
        ]
    }

    #[test]
    fn test_resolve_walks_stored_versions() {
        let path = MigrationPath::resolve(&versions(), 1, 5).expect("resolve");
        let edges: Vec<(u32, u32)> = path.steps.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(edges, vec![(1, 2), (2, 3), (3, 5)]);
        assert_eq!(path.steps[0].transforms.len(), 2);
        assert!(path.steps[1].transforms.is_empty());
        assert_eq!(path.transform_count(), 3);
    }

    #[test]
    fn test_empty_when_not_ahead() {
        let path = MigrationPath::resolve(&versions(), 5, 5).expect("resolve");
        assert!(path.steps.is_empty());
        let backwards = MigrationPath::resolve(&versions(), 5, 2).expect("resolve");
        assert!(backwards.steps.is_empty());
    }

    #[test]
    fn test_apply_in_declared_order() {
        let path = MigrationPath::resolve(&versions(), 1, 5).expect("resolve");
        let out = path.apply(&json!({"price_cents": 1050})).expect("apply");
        assert_eq!(out, json!({"price": 10.5, "status": "active"}));
    }

    #[test]
    fn test_apply_is_deterministic() {
        let path = MigrationPath::resolve(&versions(), 1, 5).expect("resolve");
        let source = json!({"price_cents": 999, "tags": ["a", "b"]});
        let first = serde_json::to_vec(&path.apply(&source).expect("first")).expect("encode");
        let second = serde_json::to_vec(&path.apply(&source).expect("second")).expect("encode");
        assert_eq!(first, second);
    }

    #[test]
    fn test_step_key_parsing() {
        assert_eq!(parse_step_key("1_to_2"), Some((1, 2)));
        assert_eq!(parse_step_key("10_to_12"), Some((10, 12)));
        assert_eq!(parse_step_key("2_to_1"), None);
        assert_eq!(parse_step_key("one_to_two"), None);
        assert_eq!(step_key(3, 4), "3_to_4");
    }

    #[test]
    fn test_validate_reports_bad_entries() {
        let doc = SchemaDocument::parse(
            &json!({"x-migrations": {
                "1_to_2": [{"field": "a", "transform": "rename", "args": {"to": "b"}}],
                "2-3": [],
                "3_to_4": [{"field": "a", "transform": "teleport"}],
                "4_to_5": {"field": "a"}
            }})
            .to_string(),
        )
        .expect("parse");
        let issues = validate_migrations(&doc);
        let keys: Vec<&str> = issues.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["2-3", "3_to_4", "4_to_5"]);
    }
}
