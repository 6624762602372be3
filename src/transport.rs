//! The record-batch channel: transport for one `(sequence, topic)` pair,
//! and the control-plane client for sequence/topic/query operations.
//!
//! Modeled on Arrow Flight `DoPut`/`DoGet` per spec §6, but the wire
//! bytes of a record batch are out of scope — this module only fixes
//! the channel *contract* (push/pull framing, control messages,
//! chunk-metadata headers) and realizes it over HTTP in the teacher's
//! idiom: verbs and header-based metadata exactly as `DurableStream`
//! uses them for `create`/`append`/`head`.

use crate::client::Client;
use crate::error::TransportError;
use crate::ontology::RecordBatchBytes;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub(crate) const HEADER_SEQUENCE: &str = "x-sequence-name";
pub(crate) const HEADER_TOPIC: &str = "x-topic-name";
pub(crate) const HEADER_CHUNK_SIZE_BYTES: &str = "x-chunk-size-bytes";
pub(crate) const HEADER_CHUNK_ROW_COUNT: &str = "x-chunk-row-count";
pub(crate) const HEADER_ONTOLOGY_TAG: &str = "x-ontology-tag";

/// Chunk metadata persisted alongside record batches (spec §6):
/// mandatory columns used by the server, and passed through to the
/// streamer, to size the next fetch without HEAD-requesting storage.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub size_bytes: i64,
    pub row_count: i64,
}

/// One `(sequence, topic)` push/pull channel. Implementations are
/// opaque to the caller: `TopicWriter` only pushes batches, and
/// `TopicDataStreamer` only pulls them, in the order spec §4.1/§4.3
/// require.
#[async_trait]
pub trait RecordBatchChannel: Send + Sync {
    /// Push one record batch (append semantics: batches from a single
    /// writer arrive in push order).
    async fn push(&self, batch: RecordBatchBytes) -> Result<(), TransportError>;

    /// Pull the next record batch, or `None` at end-of-stream (no
    /// further batches currently available).
    async fn pull(&mut self) -> Result<Option<(RecordBatchBytes, ChunkMetadata)>, TransportError>;

    /// Half-close the sender side / release the receiver side.
    async fn close(&mut self);
}

/// HTTP-backed `RecordBatchChannel`, one instance per `(sequence,
/// topic)`, built on the shared `Client`'s `reqwest::Client` exactly as
/// `DurableStream` builds requests: header-carried metadata, status-code
/// match arms, `TransportError::from_status` on anything unexpected.
pub struct HttpRecordBatchChannel {
    client: Client,
    push_url: String,
    pull_url: String,
    sequence: String,
    topic: String,
    next_cursor: Option<String>,
    done: bool,
}

impl HttpRecordBatchChannel {
    pub(crate) fn new(client: Client, sequence: &str, topic: &str) -> Self {
        let base = client.endpoint_url(sequence, topic);
        Self {
            client,
            push_url: base.clone(),
            pull_url: base,
            sequence: sequence.to_string(),
            topic: topic.to_string(),
            next_cursor: None,
            done: false,
        }
    }
}

#[async_trait]
impl RecordBatchChannel for HttpRecordBatchChannel {
    async fn push(&self, batch: RecordBatchBytes) -> Result<(), TransportError> {
        let mut req = self
            .client
            .inner()
            .post(&self.push_url)
            .header(HEADER_SEQUENCE, &self.sequence)
            .header(HEADER_TOPIC, &self.topic)
            .body(batch.0);

        for (key, value) in self.client.get_headers().iter() {
            req = req.header(key.clone(), value.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        match status {
            200 | 201 | 204 => Ok(()),
            404 => Err(TransportError::NotFound {
                url: self.push_url.clone(),
            }),
            _ => Err(TransportError::from_status(status, &self.push_url)),
        }
    }

    async fn pull(&mut self) -> Result<Option<(RecordBatchBytes, ChunkMetadata)>, TransportError> {
        if self.done {
            return Ok(None);
        }

        let mut url = self.pull_url.clone();
        if let Some(cursor) = &self.next_cursor {
            url.push_str(&format!("?cursor={cursor}"));
        }

        let mut req = self.client.inner().get(&url);
        for (key, value) in self.client.get_headers().iter() {
            req = req.header(key.clone(), value.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();

        match status {
            200 => {
                let size_bytes = resp
                    .headers()
                    .get(HEADER_CHUNK_SIZE_BYTES)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);
                let row_count = resp
                    .headers()
                    .get(HEADER_CHUNK_ROW_COUNT)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);

                let data = resp.bytes().await?;
                Ok(Some((
                    RecordBatchBytes(data),
                    ChunkMetadata {
                        size_bytes,
                        row_count,
                    },
                )))
            }
            204 => {
                self.done = true;
                Ok(None)
            }
            404 => Err(TransportError::NotFound {
                url: self.pull_url.clone(),
            }),
            _ => Err(TransportError::from_status(status, &self.pull_url)),
        }
    }

    async fn close(&mut self) {
        self.done = true;
    }
}

/// Control-plane message kinds (spec §6), sent as small JSON bodies the
/// way the teacher's SSE control events carry JSON metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SequenceCreate,
    SequenceFinalize,
    SequenceAbort,
    SequenceUnlock,
    SequenceInfo,
    TopicCreate,
    TopicFinalize,
    TopicInfo,
    Query,
}

/// Wire shape of a `SEQUENCE_INFO` response body, used by
/// `SequenceHandler`'s metadata accessors.
#[derive(Deserialize)]
pub(crate) struct SequenceInfoResponse {
    pub size_bytes: i64,
    pub created_at_unix_ms: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Map<String, serde_json::Value>,
}

/// Wire shape of a `TOPIC_INFO` response body, used by `TopicHandler`'s
/// metadata accessors.
#[derive(Deserialize)]
pub(crate) struct TopicInfoResponse {
    pub created_at_unix_ms: i64,
    pub volume_bytes: i64,
    pub ontology_tag: String,
    #[serde(default)]
    pub user_metadata: serde_json::Map<String, serde_json::Value>,
}

/// Wire shape of one matched item in a query response body.
#[derive(Deserialize)]
pub(crate) struct QueryResponseItemWire {
    pub sequence: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Wire shape of a query response body.
#[derive(Deserialize)]
pub(crate) struct QueryResponseWire {
    pub items: Vec<QueryResponseItemWire>,
}

#[derive(Serialize)]
struct ControlBody<'a> {
    message: ControlMessage,
    sequence: &'a str,
    topic: Option<&'a str>,
}

/// Thin client for control-plane calls against the sequence/topic
/// resource endpoints.
#[derive(Clone)]
pub struct ControlClient {
    client: Client,
}

impl ControlClient {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        message: ControlMessage,
        sequence: &str,
        topic: Option<&str>,
    ) -> Result<(), TransportError> {
        let url = self.client.control_url();
        let body = ControlBody {
            message,
            sequence,
            topic,
        };
        let bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut req = self.client.inner().post(&url).body(Bytes::from(bytes));
        for (key, value) in self.client.get_headers().iter() {
            req = req.header(key.clone(), value.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        match status {
            200 | 201 | 204 => Ok(()),
            409 => Err(TransportError::Conflict),
            404 => Err(TransportError::NotFound { url }),
            _ => Err(TransportError::from_status(status, &url)),
        }
    }

    async fn send_and_parse<T: serde::de::DeserializeOwned>(
        &self,
        message: ControlMessage,
        sequence: &str,
        topic: Option<&str>,
    ) -> Result<T, TransportError> {
        let url = self.client.control_url();
        let body = ControlBody {
            message,
            sequence,
            topic,
        };
        let bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut req = self.client.inner().post(&url).body(Bytes::from(bytes));
        for (key, value) in self.client.get_headers().iter() {
            req = req.header(key.clone(), value.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(match status {
                404 => TransportError::NotFound { url },
                409 => TransportError::Conflict,
                _ => TransportError::from_status(status, &url),
            });
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::BadRequest {
            message: format!("malformed info response: {e}"),
        })
    }

    pub async fn sequence_create(&self, sequence: &str) -> Result<(), TransportError> {
        self.send(ControlMessage::SequenceCreate, sequence, None).await
    }

    pub async fn sequence_finalize(&self, sequence: &str) -> Result<(), TransportError> {
        self.send(ControlMessage::SequenceFinalize, sequence, None).await
    }

    pub async fn sequence_abort(&self, sequence: &str) -> Result<(), TransportError> {
        self.send(ControlMessage::SequenceAbort, sequence, None).await
    }

    pub async fn sequence_unlock(&self, sequence: &str) -> Result<(), TransportError> {
        self.send(ControlMessage::SequenceUnlock, sequence, None).await
    }

    pub async fn topic_create(&self, sequence: &str, topic: &str) -> Result<(), TransportError> {
        self.send(ControlMessage::TopicCreate, sequence, Some(topic)).await
    }

    /// Lock the topic and consolidate its manifest (spec: topic finalize
    /// happens independently of the owning sequence's finalize, the way
    /// `FacadeTopicWriterGuard::finalize` locks its topic on its own).
    pub async fn topic_finalize(&self, sequence: &str, topic: &str) -> Result<(), TransportError> {
        self.send(ControlMessage::TopicFinalize, sequence, Some(topic)).await
    }

    pub async fn sequence_info(&self, sequence: &str) -> Result<SequenceInfoResponse, TransportError> {
        self.send_and_parse(ControlMessage::SequenceInfo, sequence, None).await
    }

    pub async fn topic_info(&self, sequence: &str, topic: &str) -> Result<TopicInfoResponse, TransportError> {
        self.send_and_parse(ControlMessage::TopicInfo, sequence, Some(topic)).await
    }

    /// Post a filter document (the builder's own `{"filters": [...],
    /// "scope": "..."}` shape, not a `ControlBody` envelope) to the
    /// dedicated query endpoint.
    pub async fn query(&self, filter_doc: serde_json::Value) -> Result<QueryResponseWire, TransportError> {
        let url = self.client.query_url();
        let bytes = serde_json::to_vec(&filter_doc).unwrap_or_default();

        let mut req = self.client.inner().post(&url).body(Bytes::from(bytes));
        for (key, value) in self.client.get_headers().iter() {
            req = req.header(key.clone(), value.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(match status {
                404 => TransportError::NotFound { url },
                409 => TransportError::Conflict,
                _ => TransportError::from_status(status, &url),
            });
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::BadRequest {
            message: format!("malformed query response: {e}"),
        })
    }
}

/// In-memory `RecordBatchChannel` test double: one `VecDeque` of
/// pre-pushed batches, consumed in push order. Grounded on the
/// teacher's pattern of testing `SseParser` directly against a
/// `Cursor` rather than a live connection.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct MockChannel {
        inner: Arc<Mutex<VecDeque<(RecordBatchBytes, ChunkMetadata)>>>,
    }

    impl MockChannel {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RecordBatchChannel for MockChannel {
        async fn push(&self, batch: RecordBatchBytes) -> Result<(), TransportError> {
            let metadata = ChunkMetadata {
                size_bytes: batch.len() as i64,
                row_count: 1,
            };
            self.inner.lock().await.push_back((batch, metadata));
            Ok(())
        }

        async fn pull(&mut self) -> Result<Option<(RecordBatchBytes, ChunkMetadata)>, TransportError> {
            Ok(self.inner.lock().await.pop_front())
        }

        async fn close(&mut self) {}
    }
}
