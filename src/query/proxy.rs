//! Schema-driven field tree: the static-language stand-in for the
//! source's runtime attribute proxy (spec §4.6, §9 Design Notes).
//!
//! Walking a `SchemaDescriptor` recursively at ontology registration
//! time builds a `path -> FieldLeaf` map instead of intercepting
//! attribute access; `FieldLeaf`'s operator methods produce
//! `QueryExpression`s exactly as the dynamic proxy's leaf objects would.

use crate::ontology::{FieldKind, SchemaDescriptor};
use crate::query::expression::{OpCode, QueryExpression};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Which operators a field accepts, mirroring spec §4.6's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafKind {
    Numeric,
    Text,
    Boolean,
    /// Dict-shaped fields (including `user_metadata`): no type check,
    /// every operator is accepted.
    Dynamic,
}

/// One queryable field, identified by its dot-joined attribute path.
#[derive(Clone, Debug)]
pub struct FieldLeaf {
    pub path: String,
    pub kind: LeafKind,
}

impl FieldLeaf {
    fn accepts(&self, op: OpCode) -> bool {
        use LeafKind::*;
        use OpCode::*;
        match self.kind {
            Dynamic => true,
            Numeric => matches!(op, Eq | Neq | Lt | Leq | Gt | Geq | Between | In),
            Text => matches!(op, Eq | Neq | Match | In),
            Boolean => matches!(op, Eq),
        }
    }

    fn expr(&self, op: OpCode, value: Value) -> QueryExpression {
        debug_assert!(
            self.accepts(op),
            "operator {op:?} is not valid for field `{}` ({:?})",
            self.path,
            self.kind
        );
        QueryExpression::new(self.path.clone(), op, value)
    }

    pub fn eq(&self, value: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Eq, value.into())
    }

    pub fn neq(&self, value: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Neq, value.into())
    }

    pub fn lt(&self, value: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Lt, value.into())
    }

    pub fn leq(&self, value: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Leq, value.into())
    }

    pub fn gt(&self, value: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Gt, value.into())
    }

    pub fn geq(&self, value: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Geq, value.into())
    }

    pub fn between(&self, low: impl Into<Value>, high: impl Into<Value>) -> QueryExpression {
        self.expr(OpCode::Between, json!([low.into(), high.into()]))
    }

    pub fn in_set(&self, values: Vec<Value>) -> QueryExpression {
        self.expr(OpCode::In, Value::Array(values))
    }

    pub fn matches(&self, pattern: impl Into<String>) -> QueryExpression {
        self.expr(OpCode::Match, json!(pattern.into()))
    }

    /// Bracket access into a dict-shaped field, e.g.
    /// `leaf.key("environment.visibility")` for nested map traversal.
    /// Only valid on `Dynamic` leaves.
    pub fn key(&self, key: impl AsRef<str>) -> FieldLeaf {
        debug_assert_eq!(
            self.kind,
            LeafKind::Dynamic,
            "bracket access is only valid on dict-shaped fields"
        );
        FieldLeaf {
            path: format!("{}.{}", self.path, key.as_ref()),
            kind: LeafKind::Dynamic,
        }
    }
}

/// `path -> FieldLeaf` map generated by walking one ontology schema.
#[derive(Clone, Debug, Default)]
pub struct FieldTree {
    leaves: HashMap<String, FieldLeaf>,
}

impl FieldTree {
    /// Build the field tree for one schema, recursing into nested
    /// records and skipping `Container` fields (not queryable).
    pub fn from_schema(schema: &SchemaDescriptor) -> Self {
        let mut leaves = HashMap::new();
        walk(schema, "", &mut leaves);
        Self { leaves }
    }

    pub fn get(&self, path: &str) -> Option<&FieldLeaf> {
        self.leaves.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.leaves.keys().map(String::as_str)
    }
}

fn walk(schema: &SchemaDescriptor, prefix: &str, out: &mut HashMap<String, FieldLeaf>) {
    for field in &schema.fields {
        let path = if prefix.is_empty() {
            field.path.clone()
        } else {
            format!("{prefix}.{}", field.path)
        };
        match &field.kind {
            FieldKind::I64 | FieldKind::F64 => {
                out.insert(
                    path.clone(),
                    FieldLeaf {
                        path,
                        kind: LeafKind::Numeric,
                    },
                );
            }
            FieldKind::String => {
                out.insert(
                    path.clone(),
                    FieldLeaf {
                        path,
                        kind: LeafKind::Text,
                    },
                );
            }
            FieldKind::Bool => {
                out.insert(
                    path.clone(),
                    FieldLeaf {
                        path,
                        kind: LeafKind::Boolean,
                    },
                );
            }
            FieldKind::Dict => {
                out.insert(
                    path.clone(),
                    FieldLeaf {
                        path,
                        kind: LeafKind::Dynamic,
                    },
                );
            }
            FieldKind::Nested(nested) => walk(nested, &path, out),
            FieldKind::Container => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::FieldPath;

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new(vec![
            FieldPath {
                path: "v".to_string(),
                kind: FieldKind::F64,
            },
            FieldPath {
                path: "label".to_string(),
                kind: FieldKind::String,
            },
            FieldPath {
                path: "user_metadata".to_string(),
                kind: FieldKind::Dict,
            },
            FieldPath {
                path: "tags".to_string(),
                kind: FieldKind::Container,
            },
            FieldPath {
                path: "pose".to_string(),
                kind: FieldKind::Nested(SchemaDescriptor::new(vec![FieldPath {
                    path: "x".to_string(),
                    kind: FieldKind::F64,
                }])),
            },
        ])
    }

    #[test]
    fn container_fields_are_skipped() {
        let tree = FieldTree::from_schema(&schema());
        assert!(tree.get("tags").is_none());
    }

    #[test]
    fn nested_fields_are_flattened_with_dot_paths() {
        let tree = FieldTree::from_schema(&schema());
        let leaf = tree.get("pose.x").expect("nested field flattened");
        assert_eq!(leaf.kind, LeafKind::Numeric);
    }

    #[test]
    fn dict_bracket_access_supports_dotted_keys() {
        let tree = FieldTree::from_schema(&schema());
        let meta = tree.get("user_metadata").unwrap();
        let nested = meta.key("environment.visibility");
        assert_eq!(nested.path, "user_metadata.environment.visibility");
    }

    #[test]
    fn numeric_leaf_produces_between_expression() {
        let tree = FieldTree::from_schema(&schema());
        let leaf = tree.get("v").unwrap();
        let expr = leaf.between(1.0, 2.0);
        assert_eq!(expr.path, "v");
        assert!(matches!(expr.op, OpCode::Between));
    }
}
