//! Field transforms applied to document payloads.
//!
//! Transforms operate on a working copy of the payload. Dotted paths
//! (`address.zip`) descend through nested objects; only the touched branch
//! is modified and sibling keys are left as they were.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{MigrationError, Result};

/// Target kind for the `cast` transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CastKind {
    Int,
    Double,
    String,
    Bool,
}

/// One transform kind with its parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Rename { to: String },
    Default { value: Value },
    Multiply { factor: Number },
    Divide { divisor: Number },
    Map { mapping: Map<String, Value> },
    Cast { kind: CastKind },
}

/// A transform bound to the field it operates on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTransform {
    pub field: String,
    pub transform: Transform,
    pub reason: Option<String>,
}

/// Wire form of a transform declaration inside the migrations map.
#[derive(Debug, Deserialize)]
struct TransformDecl {
    field: String,
    transform: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    reason: Option<String>,
}

impl FieldTransform {
    /// Parse one `{field, transform, args, reason}` declaration.
    pub fn parse(decl: &Value) -> Result<Self> {
        let decl: TransformDecl =
            serde_json::from_value(decl.clone()).map_err(|e| MigrationError::InvalidTransform {
                field: decl
                    .get("field")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>")
                    .to_string(),
                detail: e.to_string(),
            })?;

        if decl.field.is_empty() || decl.field.split('.').any(str::is_empty) {
            return Err(invalid(&decl.field, "field path has empty segments"));
        }

        let transform = Transform::parse(&decl.field, &decl.transform, &decl.args)?;
        Ok(Self {
            field: decl.field,
            transform,
            reason: decl.reason,
        })
    }

    /// Apply this transform to `root` in place.
    pub fn apply(&self, root: &mut Value) -> Result<()> {
        let segments: Vec<&str> = self.field.split('.').collect();
        let (leaf, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        let create = matches!(self.transform, Transform::Default { .. });
        let Some(parent) = parent_mut(root, parents, &self.field, create)? else {
            return Ok(());
        };
        self.transform.apply_at(parent, leaf);
        Ok(())
    }
}

impl Transform {
    fn parse(field: &str, kind: &str, args: &Value) -> Result<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "rename" => {
                let to = arg(args, &["to", "new_name", "newName"])
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty() && !s.contains('.'))
                    .ok_or_else(|| invalid(field, "rename needs a non-empty target key"))?;
                Ok(Self::Rename { to: to.to_string() })
            }
            "default" => {
                let value = args.get("value").unwrap_or(args).clone();
                Ok(Self::Default { value })
            }
            "multiply" => {
                let factor = number_arg(args, &["factor", "by", "value"])
                    .ok_or_else(|| invalid(field, "multiply needs a numeric factor"))?;
                Ok(Self::Multiply { factor })
            }
            "divide" => {
                let divisor = number_arg(args, &["divisor", "by", "value"])
                    .ok_or_else(|| invalid(field, "divide needs a numeric divisor"))?;
                Ok(Self::Divide { divisor })
            }
            "map" => {
                let mapping = match args {
                    Value::Object(map) => match map.get("mapping") {
                        Some(Value::Object(inner)) => inner.clone(),
                        Some(_) => return Err(invalid(field, "map.mapping must be an object")),
                        None => map.clone(),
                    },
                    _ => return Err(invalid(field, "map needs an object of substitutions")),
                };
                Ok(Self::Map { mapping })
            }
            "cast" => {
                let kind = arg(args, &["to", "type"])
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(field, "cast needs a target type"))?;
                let kind = match kind.to_ascii_lowercase().as_str() {
                    "int" | "integer" | "long" => CastKind::Int,
                    "double" | "float" | "number" | "decimal" => CastKind::Double,
                    "string" => CastKind::String,
                    "bool" | "boolean" => CastKind::Bool,
                    other => return Err(invalid(field, &format!("unknown cast type '{other}'"))),
                };
                Ok(Self::Cast { kind })
            }
            other => Err(invalid(field, &format!("unknown transform '{other}'"))),
        }
    }

    fn apply_at(&self, parent: &mut Map<String, Value>, leaf: &str) {
        match self {
            Self::Rename { to } => {
                if let Some(value) = parent.remove(leaf) {
                    parent.insert(to.clone(), value);
                }
            }
            Self::Default { value } => {
                if matches!(parent.get(leaf), None | Some(Value::Null)) {
                    parent.insert(leaf.to_string(), value.clone());
                }
            }
            Self::Multiply { factor } => {
                if let Some(Value::Number(current)) = parent.get(leaf) {
                    if let Some(product) = multiply(current, factor) {
                        parent.insert(leaf.to_string(), Value::Number(product));
                    }
                }
            }
            Self::Divide { divisor } => {
                if let Some(Value::Number(current)) = parent.get(leaf) {
                    if let Some(quotient) = divide(current, divisor) {
                        parent.insert(leaf.to_string(), Value::Number(quotient));
                    }
                }
            }
            Self::Map { mapping } => {
                let replacement = match parent.get(leaf) {
                    Some(Value::String(s)) => mapping.get(s).cloned(),
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    parent.insert(leaf.to_string(), replacement);
                }
            }
            Self::Cast { kind } => {
                if let Some(current) = parent.get(leaf) {
                    if !current.is_null() {
                        let converted = cast(current, *kind);
                        parent.insert(leaf.to_string(), converted);
                    }
                }
            }
        }
    }
}

/// Walk to the object holding the leaf of a dotted path.
///
/// Returns `Ok(None)` when an intermediate object is missing and `create`
/// is false. A non-object intermediate is a conflict.
fn parent_mut<'a>(
    root: &'a mut Value,
    parents: &[&str],
    path: &str,
    create: bool,
) -> Result<Option<&'a mut Map<String, Value>>> {
    let mut current = root.as_object_mut().ok_or(MigrationError::NotAnObject)?;
    for segment in parents {
        match current.get(*segment) {
            Some(Value::Object(_)) => {}
            None | Some(Value::Null) if create => {
                current.insert((*segment).to_string(), Value::Object(Map::new()));
            }
            None | Some(Value::Null) => return Ok(None),
            Some(_) => return Err(MigrationError::PathConflict(path.to_string())),
        }
        let Some(Value::Object(next)) = current.get_mut(*segment) else {
            return Err(MigrationError::PathConflict(path.to_string()));
        };
        current = next;
    }
    Ok(Some(current))
}

fn arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    match args {
        Value::Object(map) => keys.iter().find_map(|k| map.get(*k)),
        Value::Null => None,
        other => Some(other),
    }
}

fn number_arg(args: &Value, keys: &[&str]) -> Option<Number> {
    match arg(args, keys)? {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(Number::from_f64),
        _ => None,
    }
}

fn invalid(field: &str, detail: &str) -> MigrationError {
    MigrationError::InvalidTransform {
        field: field.to_string(),
        detail: detail.to_string(),
    }
}

fn multiply(current: &Number, factor: &Number) -> Option<Number> {
    if let (Some(a), Some(b)) = (current.as_i64(), factor.as_i64()) {
        if let Some(product) = a.checked_mul(b) {
            return Some(Number::from(product));
        }
    }
    let product = current.as_f64()? * factor.as_f64()?;
    Number::from_f64(product)
}

/// Division always produces a float; a zero divisor leaves the value alone.
fn divide(current: &Number, divisor: &Number) -> Option<Number> {
    let divisor = divisor.as_f64()?;
    if divisor == 0.0 {
        return None;
    }
    Number::from_f64(current.as_f64()? / divisor)
}

/// Best-effort conversion. Unparsable input falls back to `0`, `0.0` or
/// `false`; historical migration output depends on this.
fn cast(value: &Value, kind: CastKind) -> Value {
    match kind {
        CastKind::Int => Value::from(to_int(value)),
        CastKind::Double => Number::from_f64(to_double(value))
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(0.0)),
        CastKind::String => Value::String(match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }),
        CastKind::Bool => Value::Bool(match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "y" | "on"
            ),
            _ => false,
        }),
    }
}

fn to_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(truncate))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(truncate))
                .unwrap_or(0)
        }
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn to_double(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

fn truncate(f: f64) -> i64 {
    if f.is_finite() {
        f.trunc() as i64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transform(decl: Value) -> FieldTransform {
        FieldTransform::parse(&decl).expect("parse transform")
    }

    fn applied(decl: Value, mut doc: Value) -> Value {
        transform(decl).apply(&mut doc).expect("apply");
        doc
    }

    #[test]
    fn test_divide_cents() {
        let out = applied(
            json!({"field": "price_cents", "transform": "divide", "args": {"divisor": 100}}),
            json!({"price_cents": 1050}),
        );
        assert_eq!(out, json!({"price_cents": 10.5}));
    }

    #[test]
    fn test_divide_by_zero_is_unchanged() {
        let out = applied(
            json!({"field": "price_cents", "transform": "divide", "args": 0}),
            json!({"price_cents": 0}),
        );
        assert_eq!(out, json!({"price_cents": 0}));
    }

    #[test]
    fn test_rename_preserves_siblings() {
        let out = applied(
            json!({"field": "old_name", "transform": "rename", "args": {"to": "new_name"}}),
            json!({"old_name": "x", "other": 1}),
        );
        assert_eq!(out, json!({"new_name": "x", "other": 1}));
    }

    #[test]
    fn test_rename_missing_is_noop() {
        let out = applied(
            json!({"field": "absent", "transform": "rename", "args": "present"}),
            json!({"other": 1}),
        );
        assert_eq!(out, json!({"other": 1}));
    }

    #[test]
    fn test_default_only_fills_missing_or_null() {
        let decl = json!({"field": "status", "transform": "default", "args": {"value": "active"}});
        assert_eq!(applied(decl.clone(), json!({})), json!({"status": "active"}));
        assert_eq!(
            applied(decl.clone(), json!({"status": null})),
            json!({"status": "active"})
        );
        assert_eq!(
            applied(decl, json!({"status": "closed"})),
            json!({"status": "closed"})
        );
    }

    #[test]
    fn test_multiply_non_numeric_passes_through() {
        let decl = json!({"field": "qty", "transform": "multiply", "args": {"factor": 3}});
        assert_eq!(applied(decl.clone(), json!({"qty": 4})), json!({"qty": 12}));
        assert_eq!(applied(decl.clone(), json!({"qty": "four"})), json!({"qty": "four"}));
        assert_eq!(applied(decl, json!({})), json!({}));
    }

    #[test]
    fn test_map_substitutes_known_values() {
        let decl = json!({
            "field": "state",
            "transform": "map",
            "args": {"mapping": {"A": "active", "I": "inactive"}}
        });
        assert_eq!(applied(decl.clone(), json!({"state": "A"})), json!({"state": "active"}));
        assert_eq!(applied(decl.clone(), json!({"state": "Z"})), json!({"state": "Z"}));
        assert_eq!(applied(decl, json!({"state": 1})), json!({"state": 1}));
    }

    #[test]
    fn test_cast_fallbacks() {
        let int = json!({"field": "n", "transform": "cast", "args": {"to": "int"}});
        assert_eq!(applied(int.clone(), json!({"n": "42"})), json!({"n": 42}));
        assert_eq!(applied(int.clone(), json!({"n": "4.9"})), json!({"n": 4}));
        assert_eq!(applied(int, json!({"n": "abc"})), json!({"n": 0}));

        let double = json!({"field": "n", "transform": "cast", "args": "double"});
        assert_eq!(applied(double.clone(), json!({"n": "2.5"})), json!({"n": 2.5}));
        assert_eq!(applied(double, json!({"n": "NaN"})), json!({"n": 0.0}));

        let boolean = json!({"field": "b", "transform": "cast", "args": "bool"});
        assert_eq!(applied(boolean.clone(), json!({"b": "yes"})), json!({"b": true}));
        assert_eq!(applied(boolean, json!({"b": "maybe"})), json!({"b": false}));

        let string = json!({"field": "s", "transform": "cast", "args": "string"});
        assert_eq!(applied(string, json!({"s": 7})), json!({"s": "7"}));
    }

    #[test]
    fn test_dotted_path_touches_only_branch() {
        let out = applied(
            json!({"field": "address.zip", "transform": "cast", "args": "string"}),
            json!({"address": {"zip": 12345, "city": "Oslo"}, "name": "n"}),
        );
        assert_eq!(
            out,
            json!({"address": {"zip": "12345", "city": "Oslo"}, "name": "n"})
        );
    }

    #[test]
    fn test_default_creates_missing_parents() {
        let out = applied(
            json!({"field": "meta.source", "transform": "default", "args": "import"}),
            json!({"id": 1}),
        );
        assert_eq!(out, json!({"id": 1, "meta": {"source": "import"}}));
    }

    #[test]
    fn test_path_through_scalar_conflicts() {
        let t = transform(json!({"field": "a.b", "transform": "cast", "args": "int"}));
        let mut doc = json!({"a": "scalar"});
        assert!(matches!(
            t.apply(&mut doc),
            Err(MigrationError::PathConflict(_))
        ));
    }

    #[test]
    fn test_non_object_root_fails() {
        let t = transform(json!({"field": "a", "transform": "default", "args": 1}));
        let mut doc = json!([1, 2, 3]);
        assert!(matches!(t.apply(&mut doc), Err(MigrationError::NotAnObject)));
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let result = FieldTransform::parse(&json!({"field": "a", "transform": "explode"}));
        assert!(matches!(
            result,
            Err(MigrationError::InvalidTransform { .. })
        ));
    }
}
