//! Query result types, and the chaining factories that turn a result
//! set back into a builder for a follow-up query (spec §4.7, scenario
//! 6: "query sequences, then query their topics").

use crate::message::relative_topic_path;
use crate::query::builder::{QuerySequence, QueryTopic};
use crate::query::expression::{OpCode, QueryExpression};
use serde_json::json;
use std::ops::Index;
use std::slice::Iter;

/// One matched `(sequence, topics)` pair.
#[derive(Clone, Debug)]
pub struct QueryResponseItem {
    pub sequence: String,
    pub topics: Vec<String>,
}

impl QueryResponseItem {
    pub(crate) fn new(sequence: String, raw_topics: Vec<String>) -> Self {
        let topics = raw_topics
            .iter()
            .map(|t| relative_topic_path(&sequence, t))
            .collect();
        Self { sequence, topics }
    }
}

/// The result of a query call: every matched sequence, with its
/// matched topics.
#[derive(Clone, Debug, Default)]
pub struct QueryResponse {
    items: Vec<QueryResponseItem>,
}

impl QueryResponse {
    pub(crate) fn new(items: Vec<QueryResponseItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, QueryResponseItem> {
        self.items.iter()
    }

    /// Build a [`QuerySequence`] filtering to exactly the sequence names
    /// this response matched, so a second query can be chained off the
    /// first (spec scenario 6).
    pub fn to_query_sequence(&self) -> QuerySequence {
        let names: Vec<_> = self.items.iter().map(|i| json!(i.sequence.clone())).collect();
        let expr = QueryExpression::new("sequence.name", OpCode::In, serde_json::Value::Array(names));
        let mut q = QuerySequence::new();
        q.push_unchecked(expr);
        q
    }

    /// Build a [`QueryTopic`] filtering to exactly the topic paths this
    /// response matched, across every matched sequence.
    pub fn to_query_topic(&self) -> QueryTopic {
        let paths: Vec<_> = self
            .items
            .iter()
            .flat_map(|i| i.topics.iter().cloned())
            .map(|t| json!(t))
            .collect();
        let expr = QueryExpression::new("topic.name", OpCode::In, serde_json::Value::Array(paths));
        let mut q = QueryTopic::new();
        q.push_unchecked(expr);
        q
    }
}

impl Index<usize> for QueryResponse {
    type Output = QueryResponseItem;

    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

impl<'a> IntoIterator for &'a QueryResponse {
    type Item = &'a QueryResponseItem;
    type IntoIter = Iter<'a, QueryResponseItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for QueryResponse {
    type Item = QueryResponseItem;
    type IntoIter = std::vec::IntoIter<QueryResponseItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryResponse {
        QueryResponse::new(vec![
            QueryResponseItem::new("seq1".to_string(), vec!["seq1/cam/front".to_string()]),
            QueryResponseItem::new("seq2".to_string(), vec!["seq2/cam/rear".to_string(), "seq2/imu".to_string()]),
        ])
    }

    #[test]
    fn topics_are_normalized_relative_to_their_sequence() {
        let resp = sample();
        assert_eq!(resp[0].topics, vec!["/cam/front".to_string()]);
        assert_eq!(resp[1].topics, vec!["/cam/rear".to_string(), "/imu".to_string()]);
    }

    #[test]
    fn to_query_sequence_builds_an_in_filter_over_matched_names() {
        let resp = sample();
        let q = resp.to_query_sequence();
        let doc = q.to_json();
        assert_eq!(doc["filters"][0]["op"], "$in");
        assert_eq!(doc["filters"][0]["value"], json!(["seq1", "seq2"]));
    }

    #[test]
    fn to_query_topic_builds_an_in_filter_over_matched_paths() {
        let resp = sample();
        let q = resp.to_query_topic();
        let doc = q.to_json();
        assert_eq!(doc["filters"][0]["op"], "$in");
        assert_eq!(
            doc["filters"][0]["value"],
            json!(["/cam/front", "/cam/rear", "/imu"])
        );
    }

    #[test]
    fn empty_response_reports_empty() {
        let resp = QueryResponse::new(vec![]);
        assert!(resp.is_empty());
        assert_eq!(resp.len(), 0);
    }
}
