//! Read-only resource proxies (spec: "thin proxies"): metadata
//! accessors plus streamer factories that cache one instance per
//! handler, the way a `DurableStream` handle wraps one resource name
//! without owning its lifecycle.

use crate::client::Client;
use crate::config::ReaderConfig;
use crate::error::{SdkError, ValidationError};
use crate::message::{relative_topic_path, unix_ms_to_system_time, SequenceInfo, TopicInfo};
use crate::ontology::OntologyPayload;
use crate::sequence_streamer::{ErasedTopicStreamer, SequenceDataStreamer};
use crate::topic_streamer::{ErasedTopicDataStreamer, TopicDataStreamer};
use crate::transport::HttpRecordBatchChannel;
use std::any::Any;
use std::collections::HashMap;

/// Read-only proxy for one topic of a sequence.
///
/// Caches at most one [`TopicDataStreamer`] instance, keyed by the
/// ontology tag it was opened with; `force_new_instance` closes that
/// instance and opens a fresh channel.
pub struct TopicHandler {
    client: Client,
    sequence: String,
    topic: String,
    cached: Option<(&'static str, Box<dyn Any + Send>)>,
}

impl TopicHandler {
    pub(crate) fn new(client: Client, sequence: String, topic: String) -> Self {
        Self {
            client,
            sequence,
            topic,
            cached: None,
        }
    }

    /// The normalized topic path.
    pub fn name(&self) -> &str {
        &self.topic
    }

    /// System metadata: creation time and cumulative volume.
    pub async fn topic_info(&self) -> Result<TopicInfo, SdkError> {
        let info = self
            .client
            .control()
            .topic_info(&self.sequence, &self.topic)
            .await?;
        Ok(TopicInfo {
            created_at: unix_ms_to_system_time(info.created_at_unix_ms),
            volume_bytes: info.volume_bytes as u64,
        })
    }

    /// The caller-supplied metadata map attached at topic creation.
    pub async fn user_metadata(&self) -> Result<HashMap<String, serde_json::Value>, SdkError> {
        let info = self
            .client
            .control()
            .topic_info(&self.sequence, &self.topic)
            .await?;
        Ok(info.user_metadata.into_iter().collect())
    }

    /// Get (or lazily create) the cached data streamer for this topic,
    /// typed to ontology `T`. `force_new_instance` closes the cached
    /// streamer, if any, and opens a fresh one.
    ///
    /// Fails with `OntologyMismatch` if a streamer is already cached
    /// under a different tag and `force_new_instance` was not set.
    pub async fn data_streamer<T: OntologyPayload>(
        &mut self,
        ontology_tag: &'static str,
        force_new_instance: bool,
    ) -> Result<&mut TopicDataStreamer<T>, SdkError> {
        if force_new_instance {
            if let Some((old_tag, mut boxed)) = self.cached.take() {
                if old_tag == ontology_tag {
                    if let Some(streamer) = boxed.downcast_mut::<TopicDataStreamer<T>>() {
                        streamer.close().await;
                    }
                }
            }
        }

        match &self.cached {
            Some((cached_tag, _)) if *cached_tag != ontology_tag => {
                return Err(ValidationError::OntologyMismatch {
                    expected: cached_tag.to_string(),
                    actual: ontology_tag.to_string(),
                }
                .into());
            }
            Some(_) => {}
            None => {
                let channel = HttpRecordBatchChannel::new(self.client.clone(), &self.sequence, &self.topic);
                let streamer: TopicDataStreamer<T> = TopicDataStreamer::new(
                    self.topic.clone(),
                    ontology_tag,
                    Box::new(channel),
                    self.client.reader_config().clone(),
                );
                self.cached = Some((ontology_tag, Box::new(streamer)));
            }
        }

        Ok(self
            .cached
            .as_mut()
            .expect("just populated above")
            .1
            .downcast_mut::<TopicDataStreamer<T>>()
            .expect("ontology tag check above guarantees the concrete type matches"))
    }

    /// Release the cached streamer, if any.
    pub async fn close(&mut self) {
        self.cached = None;
    }
}

/// Read-only proxy for one sequence: metadata access plus factories
/// for per-topic and cross-topic (merged) streamers.
pub struct SequenceHandler {
    client: Client,
    name: String,
    topic_handlers: HashMap<String, TopicHandler>,
    cached_merge: Option<SequenceDataStreamer>,
}

impl SequenceHandler {
    pub(crate) fn new(client: Client, name: String) -> Self {
        Self {
            client,
            name,
            topic_handlers: HashMap::new(),
            cached_merge: None,
        }
    }

    /// The sequence's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// System metadata: size and creation time.
    pub async fn sequence_info(&self) -> Result<SequenceInfo, SdkError> {
        let info = self.client.control().sequence_info(&self.name).await?;
        Ok(SequenceInfo {
            size_bytes: info.size_bytes as u64,
            created_at: unix_ms_to_system_time(info.created_at_unix_ms),
        })
    }

    /// The caller-supplied metadata map attached at sequence creation.
    pub async fn user_metadata(&self) -> Result<HashMap<String, serde_json::Value>, SdkError> {
        let info = self.client.control().sequence_info(&self.name).await?;
        Ok(info.user_metadata.into_iter().collect())
    }

    /// Normalized, sequence-prefix-stripped names of every topic the
    /// server reports for this sequence.
    pub async fn topics(&self) -> Result<Vec<String>, SdkError> {
        let info = self.client.control().sequence_info(&self.name).await?;
        Ok(info
            .topics
            .iter()
            .map(|t| relative_topic_path(&self.name, t))
            .collect())
    }

    /// Get (or create) the cached [`TopicHandler`] for one topic.
    pub fn topic_handler(&mut self, topic: impl Into<String>) -> &mut TopicHandler {
        let topic = topic.into();
        let client = self.client.clone();
        let sequence = self.name.clone();
        self.topic_handlers
            .entry(topic.clone())
            .or_insert_with(|| TopicHandler::new(client, sequence, topic))
    }

    /// Open one [`ErasedTopicDataStreamer`] per named topic and return
    /// the merge heap over them (spec §4.4). `topics` must be every
    /// topic of the sequence the caller wants merged, each paired with
    /// its ontology tag (resolved from the registry at `topic_create`
    /// time and persisted server-side as topic metadata).
    ///
    /// Caches the merge; a second call without `force_new_instance`
    /// returns the same in-progress merge rather than reopening every
    /// topic's channel from the start.
    pub async fn data_streamer(
        &mut self,
        topics: Vec<(String, String)>,
        force_new_instance: bool,
    ) -> Result<&mut SequenceDataStreamer, SdkError> {
        if force_new_instance {
            if let Some(mut old) = self.cached_merge.take() {
                old.close().await;
            }
        }

        if self.cached_merge.is_none() {
            let reader_config = self.client.reader_config().clone();
            let mut streamers: HashMap<String, Box<dyn ErasedTopicStreamer>> = HashMap::new();
            for (topic, ontology_tag) in topics {
                let channel = HttpRecordBatchChannel::new(self.client.clone(), &self.name, &topic);
                let streamer = ErasedTopicDataStreamer::new(
                    topic.clone(),
                    ontology_tag,
                    Box::new(channel),
                    reader_config.clone(),
                );
                streamers.insert(topic, Box::new(streamer));
            }
            self.cached_merge = Some(SequenceDataStreamer::new(streamers).await?);
        }

        Ok(self.cached_merge.as_mut().expect("just populated above"))
    }

    /// Release every cached topic handler's streamer and the cached
    /// merge, if any.
    pub async fn close(&mut self) {
        for handler in self.topic_handlers.values_mut() {
            handler.close().await;
        }
        if let Some(mut merge) = self.cached_merge.take() {
            merge.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::Scalar;

    #[tokio::test]
    async fn topic_handler_is_cached_across_calls() {
        let client = Client::new("http://example.invalid");
        let mut handler = SequenceHandler::new(client, "s1".to_string());

        let _ = handler.topic_handler("/t/a");
        assert_eq!(handler.topic_handlers.len(), 1);
        let _ = handler.topic_handler("/t/a");
        assert_eq!(handler.topic_handlers.len(), 1);
        let _ = handler.topic_handler("/t/b");
        assert_eq!(handler.topic_handlers.len(), 2);
    }

    #[tokio::test]
    async fn data_streamer_rejects_ontology_mismatch_without_force() {
        Scalar::register();
        let client = Client::new("http://example.invalid");
        let mut handler = TopicHandler::new(client, "s1".to_string(), "/t/a".to_string());

        handler.data_streamer::<Scalar>("scalar", false).await.unwrap();

        let err = handler.data_streamer::<Scalar>("not-scalar", false).await;
        assert!(matches!(
            err,
            Err(SdkError::Validation(ValidationError::OntologyMismatch { .. }))
        ));
    }
}
