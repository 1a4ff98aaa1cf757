//! Index declarations embedded in collection schemas.
//!
//! Two forms are recognised per table:
//! - `"x-index": true` on a property (nested properties included) asks for a
//!   single-field index named `idx_<table>_<path>`;
//! - a table-level `"x-indexes"` array of composite declarations.
//!
//! A malformed declaration is skipped with a warning; it never prevents the
//! rest of the schema from being parsed.

use std::collections::BTreeSet;

use docshard_types::schema::{COMPOSITE_INDEXES_KEY, INDEX_HINT_KEY};
use docshard_types::{IndexMethod, SchemaDocument, TableName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{IndexError, Result};

/// Postgres identifier limit.
pub const MAX_INDEX_NAME_LEN: usize = 63;

/// A logical index wanted by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table: TableName,
    pub name: String,
    /// Dotted document paths, in index column order.
    pub fields: Vec<String>,
    /// Predicate with `{field}` placeholders.
    #[serde(default)]
    pub partial: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub method: IndexMethod,
}

/// A declaration that was ignored, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedIndex {
    pub table: String,
    pub detail: String,
}

/// Result of scanning a schema for index hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedIndexes {
    pub definitions: Vec<IndexDefinition>,
    pub skipped: Vec<SkippedIndex>,
}

impl IndexDefinition {
    /// Check the names and paths that end up inside generated DDL.
    pub fn validate(&self) -> Result<()> {
        if !valid_name(&self.name) {
            return Err(IndexError::InvalidDefinition(format!(
                "index name '{}' must be 1-{MAX_INDEX_NAME_LEN} chars of [A-Za-z0-9_]",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(IndexError::InvalidDefinition(format!(
                "index '{}' has no fields",
                self.name
            )));
        }
        if let Some(field) = self.fields.iter().find(|f| !valid_path(f)) {
            return Err(IndexError::InvalidDefinition(format!(
                "index '{}' has invalid field path '{field}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Scan every table of `schema` for index hints.
pub fn parse_index_definitions(schema: &SchemaDocument) -> ParsedIndexes {
    let mut parsed = ParsedIndexes::default();
    let mut names = BTreeSet::new();

    for (table_name, table) in schema.tables() {
        let table_id = match TableName::new(table_name) {
            Ok(t) => t,
            Err(e) => {
                skip(&mut parsed, table_name, e.to_string());
                continue;
            }
        };

        let mut candidates = Vec::new();
        if let Some(props) = table.get("properties").and_then(Value::as_object) {
            field_hints(&table_id, props, "", &mut candidates, &mut parsed);
        }
        match table.get(COMPOSITE_INDEXES_KEY) {
            None => {}
            Some(Value::Array(entries)) => {
                for (position, entry) in entries.iter().enumerate() {
                    match composite(&table_id, entry) {
                        Ok(def) => candidates.push(def),
                        Err(e) => skip(
                            &mut parsed,
                            table_name,
                            format!("{COMPOSITE_INDEXES_KEY}[{position}]: {e}"),
                        ),
                    }
                }
            }
            Some(_) => skip(
                &mut parsed,
                table_name,
                format!("{COMPOSITE_INDEXES_KEY} must be an array"),
            ),
        }

        for def in candidates {
            if let Err(e) = def.validate() {
                skip(&mut parsed, table_name, e.to_string());
            } else if !names.insert(def.name.clone()) {
                skip(
                    &mut parsed,
                    table_name,
                    format!("duplicate index name '{}'", def.name),
                );
            } else {
                parsed.definitions.push(def);
            }
        }
    }

    parsed
}

fn field_hints(
    table: &TableName,
    props: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<IndexDefinition>,
    parsed: &mut ParsedIndexes,
) {
    for (name, prop) in props {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match prop.get(INDEX_HINT_KEY) {
            None | Some(Value::Bool(false)) => {}
            Some(Value::Bool(true)) => out.push(IndexDefinition {
                table: table.clone(),
                name: default_name(table, std::slice::from_ref(&path)),
                fields: vec![path.clone()],
                partial: None,
                unique: false,
                method: IndexMethod::Btree,
            }),
            Some(_) => skip(
                parsed,
                table.as_str(),
                format!("{INDEX_HINT_KEY} on '{path}' must be a boolean"),
            ),
        }
        if let Some(nested) = prop.get("properties").and_then(Value::as_object) {
            field_hints(table, nested, &path, out, parsed);
        }
    }
}

fn composite(table: &TableName, entry: &Value) -> std::result::Result<IndexDefinition, String> {
    let entry = entry.as_object().ok_or("declaration must be an object")?;
    let fields = entry
        .get("fields")
        .and_then(Value::as_array)
        .ok_or("'fields' must be an array")?
        .iter()
        .map(|f| f.as_str().map(str::to_string).ok_or("'fields' must contain strings"))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if fields.is_empty() {
        return Err("'fields' must not be empty".to_string());
    }

    let name = match entry.get("name") {
        None | Some(Value::Null) => default_name(table, &fields),
        Some(Value::String(name)) => name.clone(),
        Some(_) => return Err("'name' must be a string".to_string()),
    };
    let partial = match entry.get("partial") {
        None | Some(Value::Null) => None,
        Some(Value::String(p)) if p.trim().is_empty() => None,
        Some(Value::String(p)) => Some(p.trim().to_string()),
        Some(_) => return Err("'partial' must be a string".to_string()),
    };
    let unique = match entry.get("unique") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err("'unique' must be a boolean".to_string()),
    };
    let method = match entry.get("type") {
        None | Some(Value::Null) => IndexMethod::Btree,
        Some(Value::String(t)) => t.parse()?,
        Some(_) => return Err("'type' must be a string".to_string()),
    };

    Ok(IndexDefinition {
        table: table.clone(),
        name,
        fields,
        partial,
        unique,
        method,
    })
}

/// `idx_<table>_<fields>` with every non-identifier character folded to `_`.
///
/// Names over [`MAX_INDEX_NAME_LEN`] keep a prefix and end in a short hash of
/// the full name, so distinct long paths still get distinct names.
fn default_name(table: &TableName, fields: &[String]) -> String {
    let raw = format!("idx_{}_{}", table, fields.join("_"));
    let folded: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if folded.len() <= MAX_INDEX_NAME_LEN {
        return folded;
    }
    let digest = blake3::hash(raw.as_bytes());
    let suffix = hex::encode(&digest.as_bytes()[..4]);
    // Folded names are ASCII, so any byte offset is a char boundary.
    let keep = MAX_INDEX_NAME_LEN - suffix.len() - 1;
    format!("{}_{suffix}", &folded[..keep])
}

fn skip(parsed: &mut ParsedIndexes, table: &str, detail: String) {
    tracing::warn!(table, %detail, "skipping malformed index declaration");
    parsed.skipped.push(SkippedIndex {
        table: table.to_string(),
        detail,
    });
}

pub(crate) fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_INDEX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn valid_path(path: &str) -> bool {
    path.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}
