//! HTTP client, shared worker pools, and sequence/topic entry points.

use crate::config::{OnErrorPolicy, ReaderConfig, WriterConfig};
use crate::error::{InvalidHeaderError, SdkError};
use crate::handlers::SequenceHandler;
use crate::query::{QueryDocument, QueryResponse, QueryResponseItem};
use crate::sequence_writer::{with_sequence, with_sequence_policy, SequenceWriter};
use crate::transport::ControlClient;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Resources shared across every sequence/topic opened from one
/// `Client`: the pooled HTTP connections (via `reqwest::Client`'s own
/// internal pool) plus a semaphore bounding concurrent topic writers,
/// so allocation is atomic and reference-counted as spec §5 requires.
pub(crate) struct ClientPools {
    pub(crate) topic_writer_slots: Arc<Semaphore>,
}

/// A client for the sequence/topic recording platform.
///
/// The client is cheaply `Clone`-able and shares connection pooling and
/// writer-slot accounting across clones, the way `reqwest::Client` (and
/// the teacher's own `Client`) is designed to be shared across threads.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) default_headers: HeaderMap,
    pub(crate) header_provider: Option<Arc<dyn Fn() -> HeaderMap + Send + Sync>>,
    pub(crate) pools: Arc<ClientPools>,
    pub(crate) writer_config: WriterConfig,
    pub(crate) reader_config: ReaderConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .field("has_header_provider", &self.header_provider.is_some())
            .finish()
    }
}

impl Client {
    /// Create a new client pointed at `base_url` with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build. Use
    /// [`Client::builder`] for fallible construction.
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientBuilder::new(base_url)
            .build()
            .expect("failed to build default HTTP client")
    }

    /// Create a client builder for customization.
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    /// Open (or resume) a sequence for writing, running `body` with
    /// exclusive access to the `SequenceWriter` and guaranteeing
    /// `close()` runs on every exit path, per spec §4.2's mandatory
    /// scoped-acquisition contract.
    pub async fn with_sequence<F, Fut, R>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<R, crate::error::SdkError>
    where
        F: FnOnce(&mut SequenceWriter) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        with_sequence(self.clone(), name.into(), body).await
    }

    /// Like [`Client::with_sequence`] but with an explicit `OnErrorPolicy`
    /// governing the failure path on `close()`.
    pub async fn with_sequence_on_error<F, Fut, R>(
        &self,
        name: impl Into<String>,
        on_error: OnErrorPolicy,
        body: F,
    ) -> Result<R, crate::error::SdkError>
    where
        F: FnOnce(&mut SequenceWriter) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        with_sequence_policy(self.clone(), name.into(), on_error, body).await
    }

    /// Get a read-only handle to an existing sequence.
    pub fn sequence_handler(&self, name: impl Into<String>) -> SequenceHandler {
        SequenceHandler::new(self.clone(), name.into())
    }

    /// Run a [`QuerySequence`](crate::query::QuerySequence),
    /// [`QueryTopic`](crate::query::QueryTopic), or
    /// [`QueryOntologyCatalog`](crate::query::QueryOntologyCatalog)
    /// against the platform's query endpoint.
    pub async fn query<Q: QueryDocument>(&self, query: &Q) -> Result<QueryResponse, SdkError> {
        let wire = self.control().query(query.to_json()).await?;
        let items = wire
            .items
            .into_iter()
            .map(|item| QueryResponseItem::new(item.sequence, item.topics))
            .collect();
        Ok(QueryResponse::new(items))
    }

    pub(crate) fn control(&self) -> ControlClient {
        ControlClient::new(self.clone())
    }

    /// Build the push/pull endpoint URL for one `(sequence, topic)` pair.
    pub(crate) fn endpoint_url(&self, sequence: &str, topic: &str) -> String {
        format!(
            "{}/sequences/{}/topics{}",
            self.base_url.trim_end_matches('/'),
            sequence,
            topic
        )
    }

    pub(crate) fn control_url(&self) -> String {
        format!("{}/control", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn query_url(&self) -> String {
        format!("{}/query", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    pub(crate) fn writer_config(&self) -> &WriterConfig {
        &self.writer_config
    }

    pub(crate) fn reader_config(&self) -> &ReaderConfig {
        &self.reader_config
    }

    /// Get headers for a request, including dynamic headers if configured.
    pub(crate) fn get_headers(&self) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        if let Some(provider) = &self.header_provider {
            for (key, value) in provider().iter() {
                headers.insert(key.clone(), value.clone());
            }
        }
        headers
    }
}

/// Builder for configuring a `Client`.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ClientBuilder {
    base_url: String,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    header_provider: Option<Arc<dyn Fn() -> HeaderMap + Send + Sync>>,
    max_concurrent_topic_writers: usize,
    writer_config: WriterConfig,
    reader_config: ReaderConfig,
}

impl ClientBuilder {
    /// Create a new client builder pointed at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            timeout: None,
            header_provider: None,
            max_concurrent_topic_writers: 256,
            writer_config: WriterConfig::default(),
            reader_config: ReaderConfig::default(),
        }
    }

    /// Add a default header for all requests.
    ///
    /// Invalid header names or values are silently ignored. Use
    /// [`try_default_header`](Self::try_default_header) if you need
    /// error handling.
    pub fn default_header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(val)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            self.default_headers.insert(name, val);
        }
        self
    }

    /// Add a default header, returning an error if the name or value is
    /// invalid.
    pub fn try_default_header(
        mut self,
        key: &str,
        value: &str,
    ) -> Result<Self, InvalidHeaderError> {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| InvalidHeaderError::InvalidName(key.to_string()))?;
        let val = reqwest::header::HeaderValue::from_str(value)
            .map_err(|_| InvalidHeaderError::InvalidValue(value.to_string()))?;
        self.default_headers.insert(name, val);
        Ok(self)
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a dynamic header provider (called per-request).
    pub fn header_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        self.header_provider = Some(Arc::new(provider));
        self
    }

    /// Bound the number of topic writers that may be open at once
    /// across every sequence opened from this client (spec §5: writers
    /// acquire a slot on `topic_create`, release it on `finalize`).
    pub fn max_concurrent_topic_writers(mut self, max: usize) -> Self {
        self.max_concurrent_topic_writers = max;
        self
    }

    /// Default batching policy for topic writers created from this
    /// client.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Default buffering policy for topic streamers created from this
    /// client.
    pub fn reader_config(mut self, config: ReaderConfig) -> Self {
        self.reader_config = config;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let inner = builder.build()?;

        Ok(Client {
            inner,
            base_url: self.base_url,
            default_headers: self.default_headers,
            header_provider: self.header_provider,
            pools: Arc::new(ClientPools {
                topic_writer_slots: Arc::new(Semaphore::new(self.max_concurrent_topic_writers)),
            }),
            writer_config: self.writer_config,
            reader_config: self.reader_config,
        })
    }
}
