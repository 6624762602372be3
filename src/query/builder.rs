//! Query builders: `QuerySequence`, `QueryTopic`, `QueryOntologyCatalog`
//! (spec §4.7). Each accumulates a flat list of `QueryExpression`s
//! under a single-occurrence-per-path invariant, method-chaining in the
//! teacher's builder shape but fallibly (`with_*` returns `Result<Self,
//! ValidationError>`, since duplicate-path detection can fail where the
//! teacher's infallible `ClientBuilder::with_*` never does).

use crate::error::ValidationError;
use crate::query::expression::{OpCode, QueryExpression};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// `(start, None) -> gt`, `(None, end) -> lt`, `(start, end) -> between`
/// (inclusive). `(None, None)` adds nothing.
fn timestamp_expr(path: &str, start: Option<i64>, end: Option<i64>) -> Option<QueryExpression> {
    match (start, end) {
        (Some(s), None) => Some(QueryExpression::new(path, OpCode::Gt, json!(s))),
        (None, Some(e)) => Some(QueryExpression::new(path, OpCode::Lt, json!(e))),
        (Some(s), Some(e)) => Some(QueryExpression::new(path, OpCode::Between, json!([s, e]))),
        (None, None) => None,
    }
}

/// Document a builder serializes to: a logical AND of its leaves under
/// one scope (spec §6's `{"filters": [...], "scope": "..."}` shape).
#[derive(Serialize)]
struct QueryDocumentWire<'a> {
    filters: &'a [QueryExpression],
    scope: &'static str,
}

/// Implemented by every query builder so `Client::query` can accept any
/// of them generically.
pub trait QueryDocument {
    fn to_json(&self) -> Value;
}

fn push(expressions: &mut Vec<QueryExpression>, seen: &mut HashSet<String>, expr: QueryExpression) -> Result<(), ValidationError> {
    if !seen.insert(expr.path.clone()) {
        return Err(ValidationError::DuplicateField(expr.path));
    }
    expressions.push(expr);
    Ok(())
}

/// Filter over sequences: name, creation time, and expressions rooted
/// at `sequence.user_metadata`.
#[derive(Clone, Debug, Default)]
pub struct QuerySequence {
    expressions: Vec<QueryExpression>,
    seen_paths: HashSet<String>,
}

impl QuerySequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_unchecked(&mut self, expr: QueryExpression) {
        self.seen_paths.insert(expr.path.clone());
        self.expressions.push(expr);
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Result<Self, ValidationError> {
        push(
            &mut self.expressions,
            &mut self.seen_paths,
            QueryExpression::new("sequence.name", OpCode::Eq, json!(name.into())),
        )?;
        Ok(self)
    }

    pub fn with_name_match(mut self, pattern: impl Into<String>) -> Result<Self, ValidationError> {
        push(
            &mut self.expressions,
            &mut self.seen_paths,
            QueryExpression::new("sequence.name", OpCode::Match, json!(pattern.into())),
        )?;
        Ok(self)
    }

    pub fn with_created_timestamp(mut self, start: Option<i64>, end: Option<i64>) -> Result<Self, ValidationError> {
        if let Some(expr) = timestamp_expr("sequence.created_at", start, end) {
            push(&mut self.expressions, &mut self.seen_paths, expr)?;
        }
        Ok(self)
    }

    /// `expr.path` must be rooted at `sequence.user_metadata`.
    pub fn with_expression(mut self, expr: QueryExpression) -> Result<Self, ValidationError> {
        debug_assert!(
            expr.path.starts_with("sequence.user_metadata"),
            "QuerySequence::with_expression is restricted to sequence.user_metadata paths, got `{}`",
            expr.path
        );
        push(&mut self.expressions, &mut self.seen_paths, expr)?;
        Ok(self)
    }
}

impl QueryDocument for QuerySequence {
    fn to_json(&self) -> Value {
        serde_json::to_value(QueryDocumentWire {
            filters: &self.expressions,
            scope: "sequence",
        })
        .expect("QueryDocumentWire always serializes")
    }
}

/// Filter over topics: name, ontology tag, creation time, and
/// expressions rooted at `topic.user_metadata`.
#[derive(Clone, Debug, Default)]
pub struct QueryTopic {
    expressions: Vec<QueryExpression>,
    seen_paths: HashSet<String>,
}

impl QueryTopic {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_unchecked(&mut self, expr: QueryExpression) {
        self.seen_paths.insert(expr.path.clone());
        self.expressions.push(expr);
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Result<Self, ValidationError> {
        push(
            &mut self.expressions,
            &mut self.seen_paths,
            QueryExpression::new("topic.name", OpCode::Eq, json!(name.into())),
        )?;
        Ok(self)
    }

    pub fn with_name_match(mut self, pattern: impl Into<String>) -> Result<Self, ValidationError> {
        push(
            &mut self.expressions,
            &mut self.seen_paths,
            QueryExpression::new("topic.name", OpCode::Match, json!(pattern.into())),
        )?;
        Ok(self)
    }

    pub fn with_ontology_tag(mut self, tag: impl Into<String>) -> Result<Self, ValidationError> {
        push(
            &mut self.expressions,
            &mut self.seen_paths,
            QueryExpression::new("topic.ontology_tag", OpCode::Eq, json!(tag.into())),
        )?;
        Ok(self)
    }

    pub fn with_created_timestamp(mut self, start: Option<i64>, end: Option<i64>) -> Result<Self, ValidationError> {
        if let Some(expr) = timestamp_expr("topic.created_at", start, end) {
            push(&mut self.expressions, &mut self.seen_paths, expr)?;
        }
        Ok(self)
    }

    /// `expr.path` must be rooted at `topic.user_metadata`.
    pub fn with_expression(mut self, expr: QueryExpression) -> Result<Self, ValidationError> {
        debug_assert!(
            expr.path.starts_with("topic.user_metadata"),
            "QueryTopic::with_expression is restricted to topic.user_metadata paths, got `{}`",
            expr.path
        );
        push(&mut self.expressions, &mut self.seen_paths, expr)?;
        Ok(self)
    }
}

impl QueryDocument for QueryTopic {
    fn to_json(&self) -> Value {
        serde_json::to_value(QueryDocumentWire {
            filters: &self.expressions,
            scope: "topic",
        })
        .expect("QueryDocumentWire always serializes")
    }
}

/// Filter over ontology records: timestamps plus any field expression,
/// as long as every expression added shares one root ontology tag.
#[derive(Clone, Debug, Default)]
pub struct QueryOntologyCatalog {
    expressions: Vec<QueryExpression>,
    seen_paths: HashSet<String>,
    root_tag: Option<String>,
}

impl QueryOntologyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_timestamp(mut self, start: Option<i64>, end: Option<i64>) -> Result<Self, ValidationError> {
        if let Some(expr) = timestamp_expr("message.timestamp_ns", start, end) {
            push(&mut self.expressions, &mut self.seen_paths, expr)?;
        }
        Ok(self)
    }

    pub fn with_data_timestamp(mut self, start: Option<i64>, end: Option<i64>) -> Result<Self, ValidationError> {
        if let Some(expr) = timestamp_expr("message.header.stamp", start, end) {
            push(&mut self.expressions, &mut self.seen_paths, expr)?;
        }
        Ok(self)
    }

    /// `ontology_tag` is checked against every previously added
    /// expression's tag; a mismatch fails with
    /// `HeterogeneousCatalogQuery` rather than silently scoping the
    /// query to the first tag seen.
    pub fn with_expression(mut self, ontology_tag: &str, expr: QueryExpression) -> Result<Self, ValidationError> {
        match &self.root_tag {
            Some(existing) if existing != ontology_tag => {
                return Err(ValidationError::HeterogeneousCatalogQuery {
                    first: existing.clone(),
                    second: ontology_tag.to_string(),
                });
            }
            _ => self.root_tag = Some(ontology_tag.to_string()),
        }
        push(&mut self.expressions, &mut self.seen_paths, expr)?;
        Ok(self)
    }
}

impl QueryDocument for QueryOntologyCatalog {
    fn to_json(&self) -> Value {
        serde_json::to_value(QueryDocumentWire {
            filters: &self.expressions,
            scope: "catalog",
        })
        .expect("QueryDocumentWire always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_path_fails() {
        let q = QuerySequence::new().with_name("s1").unwrap();
        let err = q.with_name("s2").unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateField(p) if p == "sequence.name"));
    }

    #[test]
    fn timestamp_helper_picks_operator_by_bound_shape() {
        let start_only = QuerySequence::new().with_created_timestamp(Some(10), None).unwrap();
        let doc = start_only.to_json();
        assert_eq!(doc["filters"][0]["op"], "$gt");

        let end_only = QuerySequence::new().with_created_timestamp(None, Some(10)).unwrap();
        assert_eq!(end_only.to_json()["filters"][0]["op"], "$lt");

        let both = QuerySequence::new().with_created_timestamp(Some(1), Some(10)).unwrap();
        assert_eq!(both.to_json()["filters"][0]["op"], "$between");
    }

    #[test]
    fn missing_bounds_adds_no_expression() {
        let q = QuerySequence::new().with_created_timestamp(None, None).unwrap();
        assert_eq!(q.to_json()["filters"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn catalog_rejects_heterogeneous_tags() {
        let expr = QueryExpression::new("v", OpCode::Eq, json!(1.0));
        let q = QueryOntologyCatalog::new().with_expression("gps", expr).unwrap();
        let other = QueryExpression::new("w", OpCode::Eq, json!(2.0));
        let err = q.with_expression("imu", other).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::HeterogeneousCatalogQuery { first, second }
                if first == "gps" && second == "imu"
        ));
    }

    #[test]
    fn catalog_accepts_repeated_matching_tag() {
        let e1 = QueryExpression::new("v", OpCode::Eq, json!(1.0));
        let e2 = QueryExpression::new("w", OpCode::Eq, json!(2.0));
        let q = QueryOntologyCatalog::new()
            .with_expression("gps", e1)
            .unwrap()
            .with_expression("gps", e2)
            .unwrap();
        assert_eq!(q.to_json()["filters"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn scope_is_stamped_on_serialization() {
        let q = QueryTopic::new().with_ontology_tag("gps").unwrap();
        assert_eq!(q.to_json()["scope"], "topic");
    }
}
