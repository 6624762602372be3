//! Per-topic read path: a pull-mode iterator with a memory-bounded
//! in-process buffer, fetching the next record batch from the
//! transport only once the buffer drains.

use crate::config::ReaderConfig;
use crate::error::{SdkError, TransportError};
use crate::message::{decode_envelope, decode_envelope_erased, ErasedMessage, Message};
use crate::ontology::{split_batch, OntologyPayload};
use crate::transport::RecordBatchChannel;
use std::collections::VecDeque;

/// Pull-mode iterator over one topic.
///
/// Messages are produced in strictly non-decreasing `timestamp_ns`
/// order (a server-side guarantee this SDK relies on but does not
/// itself enforce). At most one record batch's worth of decoded
/// messages is resident at a time.
pub struct TopicDataStreamer<T: OntologyPayload> {
    topic: String,
    ontology_tag: &'static str,
    channel: Box<dyn RecordBatchChannel>,
    buffer: VecDeque<Message<T>>,
    config: ReaderConfig,
    closed: bool,
    end_of_stream: bool,
}

impl<T: OntologyPayload> TopicDataStreamer<T> {
    pub(crate) fn new(
        topic: String,
        ontology_tag: &'static str,
        channel: Box<dyn RecordBatchChannel>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            topic,
            ontology_tag,
            channel,
            buffer: VecDeque::new(),
            config,
            closed: false,
            end_of_stream: false,
        }
    }

    /// The topic path this streamer reads from.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn fill_buffer(&mut self) -> Result<(), SdkError> {
        if !self.buffer.is_empty() || self.end_of_stream || self.closed {
            return Ok(());
        }

        let fetch = tokio::time::timeout(self.config.fetch_timeout, self.channel.pull());
        let pulled = match fetch.await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout.into()),
        };

        match pulled {
            Some((chunk, _metadata)) => {
                // An empty chunk is legal; the caller's loop pulls again
                // rather than this treating it as end-of-stream.
                let records = split_batch(&chunk)?;
                for record in records {
                    let message: Message<T> = decode_envelope(self.ontology_tag, record)?;
                    self.buffer.push_back(message);
                }
            }
            None => {
                self.end_of_stream = true;
            }
        }

        Ok(())
    }

    /// Pull and consume the next message, or `None` at end-of-stream.
    pub async fn next(&mut self) -> Result<Option<Message<T>>, SdkError> {
        if self.closed {
            return Err(SdkError::Cancelled);
        }
        loop {
            if let Some(msg) = self.buffer.pop_front() {
                return Ok(Some(msg));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            self.fill_buffer().await?;
            if self.buffer.is_empty() && self.end_of_stream {
                return Ok(None);
            }
        }
    }

    /// Peek the timestamp of the head message without consuming it.
    /// Triggers a batch fetch if the buffer is empty; `None` at
    /// end-of-stream.
    pub async fn next_timestamp(&mut self) -> Result<Option<i64>, SdkError> {
        if self.closed {
            return Err(SdkError::Cancelled);
        }
        loop {
            if let Some(msg) = self.buffer.front() {
                return Ok(Some(msg.timestamp_ns));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            self.fill_buffer().await?;
            if self.buffer.is_empty() && self.end_of_stream {
                return Ok(None);
            }
        }
    }

    /// Release the transport channel. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close().await;
        self.buffer.clear();
    }
}

/// Type-erased counterpart of [`TopicDataStreamer`], decoding through
/// the ontology registry instead of a concrete `T`.
///
/// `SequenceHandler`'s cross-topic merge opens one of these per topic
/// rather than a typed `TopicDataStreamer<T>`, since the sequence
/// doesn't know each topic's ontology type at compile time — only the
/// registry, keyed by the tag recorded at `topic_create`, does.
pub(crate) struct ErasedTopicDataStreamer {
    topic: String,
    ontology_tag: String,
    channel: Box<dyn RecordBatchChannel>,
    buffer: VecDeque<ErasedMessage>,
    config: ReaderConfig,
    closed: bool,
    end_of_stream: bool,
}

impl ErasedTopicDataStreamer {
    pub(crate) fn new(
        topic: String,
        ontology_tag: String,
        channel: Box<dyn RecordBatchChannel>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            topic,
            ontology_tag,
            channel,
            buffer: VecDeque::new(),
            config,
            closed: false,
            end_of_stream: false,
        }
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    async fn fill_buffer(&mut self) -> Result<(), SdkError> {
        if !self.buffer.is_empty() || self.end_of_stream || self.closed {
            return Ok(());
        }

        let fetch = tokio::time::timeout(self.config.fetch_timeout, self.channel.pull());
        let pulled = match fetch.await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout.into()),
        };

        match pulled {
            Some((chunk, _metadata)) => {
                let records = split_batch(&chunk)?;
                for record in records {
                    let message = decode_envelope_erased(&self.ontology_tag, record)?;
                    self.buffer.push_back(message);
                }
            }
            None => {
                self.end_of_stream = true;
            }
        }

        Ok(())
    }

    pub(crate) async fn next(&mut self) -> Result<Option<ErasedMessage>, SdkError> {
        if self.closed {
            return Err(SdkError::Cancelled);
        }
        loop {
            if let Some(msg) = self.buffer.pop_front() {
                return Ok(Some(msg));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            self.fill_buffer().await?;
            if self.buffer.is_empty() && self.end_of_stream {
                return Ok(None);
            }
        }
    }

    pub(crate) async fn next_timestamp(&mut self) -> Result<Option<i64>, SdkError> {
        if self.closed {
            return Err(SdkError::Cancelled);
        }
        loop {
            if let Some(msg) = self.buffer.front() {
                return Ok(Some(msg.timestamp_ns));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            self.fill_buffer().await?;
            if self.buffer.is_empty() && self.end_of_stream {
                return Ok(None);
            }
        }
    }

    pub(crate) async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close().await;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Header;
    use crate::message::Stamp;
    use crate::ontology::Scalar;
    use crate::transport::mock::MockChannel;

    async fn push_scalar(channel: &MockChannel, ts: i64, v: f64) {
        let msg = Message::new(ts, Scalar::new(v));
        let envelope = crate::message::encode_envelope(&msg);
        channel.push(envelope).await.unwrap();
    }

    #[tokio::test]
    async fn yields_messages_in_push_order() {
        Scalar::register();
        let mock = MockChannel::new();
        push_scalar(&mock, 100, 1.0).await;
        push_scalar(&mock, 200, 2.0).await;

        let mut streamer: TopicDataStreamer<Scalar> =
            TopicDataStreamer::new("/t/a".into(), "scalar", Box::new(mock), ReaderConfig::default());

        let m1 = streamer.next().await.unwrap().expect("first message");
        assert_eq!(m1.timestamp_ns, 100);
        assert_eq!(m1.data, Scalar::new(1.0));

        let m2 = streamer.next().await.unwrap().expect("second message");
        assert_eq!(m2.timestamp_ns, 200);

        assert!(streamer.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_timestamp_peeks_without_consuming() {
        Scalar::register();
        let mock = MockChannel::new();
        push_scalar(&mock, 100, 1.0).await;

        let mut streamer: TopicDataStreamer<Scalar> =
            TopicDataStreamer::new("/t/a".into(), "scalar", Box::new(mock), ReaderConfig::default());

        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(100));
        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(100));
        let m = streamer.next().await.unwrap().unwrap();
        assert_eq!(m.timestamp_ns, 100);
    }

    #[tokio::test]
    async fn empty_topic_yields_end_of_stream_immediately() {
        Scalar::register();
        let mock = MockChannel::new();
        let mut streamer: TopicDataStreamer<Scalar> =
            TopicDataStreamer::new("/t/a".into(), "scalar", Box::new(mock), ReaderConfig::default());

        assert!(streamer.next().await.unwrap().is_none());
        assert_eq!(streamer.next_timestamp().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_buffer() {
        Scalar::register();
        let mock = MockChannel::new();
        push_scalar(&mock, 100, 1.0).await;

        let mut streamer: TopicDataStreamer<Scalar> =
            TopicDataStreamer::new("/t/a".into(), "scalar", Box::new(mock), ReaderConfig::default());
        streamer.next_timestamp().await.unwrap();
        streamer.close().await;
        streamer.close().await;

        assert!(streamer.next().await.is_err());
    }

    #[tokio::test]
    async fn erased_streamer_decodes_through_the_registry() {
        Scalar::register();
        let mock = MockChannel::new();
        push_scalar(&mock, 100, 1.0).await;
        push_scalar(&mock, 200, 2.0).await;

        let mut streamer = ErasedTopicDataStreamer::new(
            "/t/a".into(),
            "scalar".into(),
            Box::new(mock),
            ReaderConfig::default(),
        );

        let m1 = streamer.next().await.unwrap().expect("first message");
        assert_eq!(m1.timestamp_ns, 100);
        assert_eq!(m1.data.tag(), "scalar");

        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(200));
        streamer.next().await.unwrap();
        assert!(streamer.next().await.unwrap().is_none());
    }

    #[allow(dead_code)]
    fn header_fields_compile(h: Header) -> (Stamp, String) {
        (h.stamp, h.frame_id)
    }
}
