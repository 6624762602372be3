//! The query expression tree: a typed, operator-constrained leaf
//! serialized to the platform's filter JSON.

use serde::Serialize;
use serde_json::Value;

/// Filter operator, serialized to the platform's `$`-prefixed wire
/// encoding (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OpCode {
    #[serde(rename = "$eq")]
    Eq,
    #[serde(rename = "$ne")]
    Neq,
    #[serde(rename = "$lt")]
    Lt,
    #[serde(rename = "$lte")]
    Leq,
    #[serde(rename = "$gt")]
    Gt,
    #[serde(rename = "$gte")]
    Geq,
    #[serde(rename = "$between")]
    Between,
    #[serde(rename = "$in")]
    In,
    #[serde(rename = "$match")]
    Match,
}

/// One filter leaf: `(path, op, value)`. A pure value with no side
/// effects — producing one doesn't touch the schema registry or any
/// builder state.
#[derive(Clone, Debug, Serialize)]
pub struct QueryExpression {
    pub path: String,
    pub op: OpCode,
    pub value: Value,
}

impl QueryExpression {
    pub fn new(path: impl Into<String>, op: OpCode, value: Value) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_serializes_to_dollar_prefixed_code() {
        let expr = QueryExpression::new("v", OpCode::Between, serde_json::json!([1, 2]));
        let value = serde_json::to_value(&expr).unwrap();
        assert_eq!(value["op"], "$between");
        assert_eq!(value["path"], "v");
    }
}
