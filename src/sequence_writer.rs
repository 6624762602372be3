//! Sequence lifecycle ownership and the mandatory scoped-acquisition
//! entry point.
//!
//! The "must be used within a scope" contract (spec §9) becomes: the
//! constructor is private, and [`with_sequence`] is the only entry
//! point, taking a user closure that receives the writer by exclusive
//! reference and guaranteeing `close()` runs on every exit path,
//! including panics, via `futures::FutureExt::catch_unwind`.

use crate::client::Client;
use crate::config::OnErrorPolicy;
use crate::error::{LifecycleError, SdkError, ValidationError};
use crate::message::{normalize_topic, SequenceStatus, TopicInfo};
use crate::obs::sdk_warn;
use crate::ontology::{OntologyPayload, SchemaDescriptor};
use crate::topic_writer::{ErasedTopicWriter, TopicWriter};
use crate::transport::HttpRecordBatchChannel;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::SystemTime;
use tokio::sync::OwnedSemaphorePermit;

struct TopicEntry {
    writer: Box<dyn ErasedTopicWriter>,
    ontology_tag: &'static str,
    schema: SchemaDescriptor,
    created_at: SystemTime,
    _permit: OwnedSemaphorePermit,
}

/// Owns the lifecycle of one sequence: its topic writers, their
/// background flushers, and the `Pending -> {Finalized, Error,
/// Unlocked}` transition.
///
/// Constructible only through [`with_sequence`]; `SequenceWriter`
/// itself has no public constructor.
pub struct SequenceWriter {
    client: Client,
    name: String,
    status: SequenceStatus,
    topics: HashMap<String, TopicEntry>,
    on_error: OnErrorPolicy,
    constructed_safely: bool,
}

impl SequenceWriter {
    fn new_unsafe(client: Client, name: String, on_error: OnErrorPolicy) -> Self {
        Self {
            client,
            name,
            status: SequenceStatus::Pending,
            topics: HashMap::new(),
            on_error,
            constructed_safely: false,
        }
    }

    /// The sequence's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn sequence_status(&self) -> SequenceStatus {
        self.status
    }

    /// Whether a topic with this (normalized) name is already open.
    pub fn topic_exists(&self, name: &str) -> bool {
        self.topics.contains_key(&normalize_topic(name))
    }

    /// Normalized names of every open topic.
    pub fn list_topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Read-only metadata for one open topic.
    pub fn get_topic(&self, name: &str) -> Option<TopicInfo> {
        let normalized = normalize_topic(name);
        self.topics.get(&normalized).map(|entry| TopicInfo {
            created_at: entry.created_at,
            volume_bytes: entry.writer.volume_bytes(),
        })
    }

    /// Register and open a new topic for writing, under the ontology
    /// type `T`.
    ///
    /// Fails with `DuplicateTopic` if the normalized name is already
    /// open, `SequenceClosed` if this writer is no longer `Pending`.
    pub async fn topic_create<T: OntologyPayload>(
        &mut self,
        name: impl AsRef<str>,
        ontology_tag: &'static str,
        schema: SchemaDescriptor,
    ) -> Result<(), SdkError> {
        if !self.constructed_safely {
            return Err(LifecycleError::UnsafeLifecycle.into());
        }
        if self.status != SequenceStatus::Pending {
            return Err(LifecycleError::SequenceClosed.into());
        }

        let normalized = normalize_topic(name.as_ref());
        if self.topics.contains_key(&normalized) {
            return Err(ValidationError::DuplicateTopic(normalized).into());
        }

        let permit = self
            .client
            .pools
            .topic_writer_slots
            .clone()
            .acquire_owned()
            .await
            .expect("topic writer semaphore is never closed");

        self.client
            .control()
            .topic_create(&self.name, &normalized)
            .await?;

        let channel = HttpRecordBatchChannel::new(self.client.clone(), &self.name, &normalized);
        let writer: TopicWriter<T> = TopicWriter::spawn(
            normalized.clone(),
            ontology_tag,
            Box::new(channel),
            self.client.writer_config().clone(),
        );

        self.topics.insert(
            normalized,
            TopicEntry {
                writer: Box::new(writer),
                ontology_tag,
                schema,
                created_at: SystemTime::now(),
                _permit: permit,
            },
        );

        Ok(())
    }

    /// Push one message to an already-created topic.
    ///
    /// `T` must match the ontology type the topic was created with;
    /// a mismatch surfaces as `OntologyMismatch` rather than a panic.
    pub async fn push<T: OntologyPayload>(
        &self,
        topic: &str,
        message: crate::message::Message<T>,
    ) -> Result<(), SdkError> {
        let normalized = normalize_topic(topic);
        let entry = self
            .topics
            .get(&normalized)
            .ok_or(LifecycleError::WriterClosed)?;

        match entry.writer.as_any().downcast_ref::<TopicWriter<T>>() {
            Some(writer) => writer.push(message).await,
            None => Err(ValidationError::OntologyMismatch {
                expected: entry.ontology_tag.to_string(),
                actual: message.data.tag().to_string(),
            }
            .into()),
        }
    }

    /// The schema registered for one open topic, if any.
    pub fn topic_schema(&self, topic: &str) -> Option<SchemaDescriptor> {
        self.topics
            .get(&normalize_topic(topic))
            .map(|e| e.schema.clone())
    }

    /// Finalize every open topic writer, then transition the sequence
    /// per the configured `OnErrorPolicy` if any topic failed to
    /// finalize cleanly. Idempotent: a non-`Pending` writer does
    /// nothing on a second call.
    async fn close(&mut self) -> Result<(), SdkError> {
        if self.status != SequenceStatus::Pending {
            return Ok(());
        }

        let control = self.client.control();
        let mut any_failed = false;

        for (topic, mut entry) in self.topics.drain().collect::<Vec<_>>() {
            if let Err(e) = entry.writer.finalize(&control, &self.name).await {
                sdk_warn!(topic = %topic, error = %e, "topic finalize failed during sequence close");
                any_failed = true;
            }
        }

        if any_failed {
            match self.on_error {
                OnErrorPolicy::Delete => {
                    control.sequence_abort(&self.name).await?;
                    self.status = SequenceStatus::Error;
                }
                OnErrorPolicy::Report => {
                    control.sequence_unlock(&self.name).await?;
                    self.status = SequenceStatus::Unlocked;
                }
            }
        } else {
            control.sequence_finalize(&self.name).await?;
            self.status = SequenceStatus::Finalized;
        }

        Ok(())
    }
}

/// The sole constructor for [`SequenceWriter`]: opens the sequence
/// server-side, runs `body` with exclusive access to the writer, and
/// guarantees `close()` runs whether `body` returns normally or
/// panics.
pub(crate) async fn with_sequence<F, Fut, R>(
    client: Client,
    name: String,
    body: F,
) -> Result<R, SdkError>
where
    F: FnOnce(&mut SequenceWriter) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    with_sequence_policy(client, name, OnErrorPolicy::default(), body).await
}

/// Like [`with_sequence`] but with an explicit `OnErrorPolicy` for the
/// failure path (spec §4.2, §7).
pub(crate) async fn with_sequence_policy<F, Fut, R>(
    client: Client,
    name: String,
    on_error: OnErrorPolicy,
    body: F,
) -> Result<R, SdkError>
where
    F: FnOnce(&mut SequenceWriter) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    client.control().sequence_create(&name).await?;

    let mut writer = SequenceWriter::new_unsafe(client, name, on_error);
    writer.constructed_safely = true;

    let body_future = body(&mut writer);
    let outcome = AssertUnwindSafe(body_future).catch_unwind().await;
    let close_result = writer.close().await;

    match outcome {
        Ok(value) => {
            close_result?;
            Ok(value)
        }
        Err(panic) => {
            if let Err(e) = close_result {
                sdk_warn!(error = %e, "sequence close failed while unwinding a panic");
            }
            std::panic::resume_unwind(panic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::ontology::{FieldKind, FieldPath, Scalar};

    fn scalar_schema() -> SchemaDescriptor {
        SchemaDescriptor::new(vec![FieldPath {
            path: "v".to_string(),
            kind: FieldKind::F64,
        }])
    }

    #[test]
    fn direct_construction_is_unsafe() {
        let client = Client::new("http://example.invalid");
        let writer = SequenceWriter::new_unsafe(client, "s1".to_string(), OnErrorPolicy::default());
        assert!(!writer.constructed_safely);
    }

    #[tokio::test]
    async fn topic_create_without_scope_fails_unsafe_lifecycle() {
        let client = Client::new("http://example.invalid");
        let mut writer = SequenceWriter::new_unsafe(client, "s1".to_string(), OnErrorPolicy::default());
        let err = writer
            .topic_create::<Scalar>("/t/a", "scalar", scalar_schema())
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Lifecycle(LifecycleError::UnsafeLifecycle)));
    }
}
