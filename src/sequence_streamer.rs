//! Sequence-level read path: a deterministic k-way merge across every
//! topic streamer opened for one sequence.
//!
//! A min-heap of `(next_timestamp, topic_name)` entries drives the
//! merge so each yielded message costs `O(log N)` across `N` topics
//! rather than a recursive pairwise merge. Ties break on ascending
//! lexicographic topic name.

use crate::error::SdkError;
use crate::message::ErasedMessage;
use crate::obs::sdk_warn;
use crate::topic_streamer::ErasedTopicDataStreamer;
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Type-erased handle so the merge can hold topic streamers of
/// differing ontology types in one collection, the same erasure shape
/// `ErasedTopicWriter` gives the write path.
#[async_trait]
pub(crate) trait ErasedTopicStreamer: Send {
    fn topic(&self) -> &str;
    async fn next(&mut self) -> Result<Option<ErasedMessage>, SdkError>;
    async fn next_timestamp(&mut self) -> Result<Option<i64>, SdkError>;
    async fn close(&mut self);
}

#[async_trait]
impl ErasedTopicStreamer for ErasedTopicDataStreamer {
    fn topic(&self) -> &str {
        ErasedTopicDataStreamer::topic(self)
    }

    async fn next(&mut self) -> Result<Option<ErasedMessage>, SdkError> {
        ErasedTopicDataStreamer::next(self).await
    }

    async fn next_timestamp(&mut self) -> Result<Option<i64>, SdkError> {
        ErasedTopicDataStreamer::next_timestamp(self).await
    }

    async fn close(&mut self) {
        ErasedTopicDataStreamer::close(self).await
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    timestamp_ns: i64,
    topic: String,
}

/// Merges every open topic streamer of one sequence into a single
/// timestamp-ordered stream.
///
/// Constructed only via [`crate::handlers::SequenceHandler`]. A
/// transport or decode failure on any one topic aborts the merge: the
/// error surfaces on the `next()` call that would have pulled from that
/// topic, and messages already returned by earlier calls remain valid.
pub struct SequenceDataStreamer {
    streamers: HashMap<String, Box<dyn ErasedTopicStreamer>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    closed: bool,
}

impl SequenceDataStreamer {
    pub(crate) async fn new(
        mut streamers: HashMap<String, Box<dyn ErasedTopicStreamer>>,
    ) -> Result<Self, SdkError> {
        let mut heap = BinaryHeap::with_capacity(streamers.len());
        for (topic, streamer) in streamers.iter_mut() {
            if let Some(ts) = streamer.next_timestamp().await? {
                heap.push(Reverse(HeapEntry {
                    timestamp_ns: ts,
                    topic: topic.clone(),
                }));
            }
        }
        Ok(Self {
            streamers,
            heap,
            closed: false,
        })
    }

    /// Pull the next message in timestamp order across every open
    /// topic, or `None` once every topic has reached end-of-stream.
    pub async fn next(&mut self) -> Result<Option<(String, ErasedMessage)>, SdkError> {
        if self.closed {
            return Err(SdkError::Cancelled);
        }

        let Reverse(entry) = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };

        let streamer = self
            .streamers
            .get_mut(&entry.topic)
            .expect("heap entry always has a matching streamer");

        let message = match streamer.next().await {
            Ok(m) => m.expect("heap entry implies a ready message"),
            Err(e) => {
                sdk_warn!(topic = %entry.topic, error = %e, "sequence merge aborted on topic read failure");
                return Err(e);
            }
        };

        match streamer.next_timestamp().await {
            Ok(Some(next_ts)) => self.heap.push(Reverse(HeapEntry {
                timestamp_ns: next_ts,
                topic: entry.topic.clone(),
            })),
            Ok(None) => {}
            Err(e) => {
                sdk_warn!(topic = %entry.topic, error = %e, "sequence merge aborted while repolling topic");
                return Err(e);
            }
        }

        Ok(Some((entry.topic, message)))
    }

    /// The timestamp that the next `next()` call would yield, without
    /// consuming it. `None` once every topic has reached end-of-stream.
    pub fn next_timestamp(&self) -> Option<i64> {
        self.heap.peek().map(|Reverse(e)| e.timestamp_ns)
    }

    /// Close every underlying topic streamer. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for streamer in self.streamers.values_mut() {
            streamer.close().await;
        }
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::message::Message;
    use crate::ontology::Scalar;
    use crate::transport::mock::MockChannel;

    async fn push_scalar(channel: &MockChannel, ts: i64, v: f64) {
        let msg = Message::new(ts, Scalar::new(v));
        let envelope = crate::message::encode_envelope(&msg);
        channel.push(envelope).await.unwrap();
    }

    fn boxed_streamer(topic: &str, mock: MockChannel) -> Box<dyn ErasedTopicStreamer> {
        let streamer = ErasedTopicDataStreamer::new(
            topic.to_string(),
            "scalar".to_string(),
            Box::new(mock),
            ReaderConfig::default(),
        );
        Box::new(streamer)
    }

    #[tokio::test]
    async fn merges_two_topics_in_timestamp_order() {
        Scalar::register();

        let a = MockChannel::new();
        push_scalar(&a, 100, 1.0).await;
        push_scalar(&a, 300, 3.0).await;

        let b = MockChannel::new();
        push_scalar(&b, 200, 2.0).await;

        let mut streamers: HashMap<String, Box<dyn ErasedTopicStreamer>> = HashMap::new();
        streamers.insert("/a".to_string(), boxed_streamer("/a", a));
        streamers.insert("/b".to_string(), boxed_streamer("/b", b));

        let mut merged = SequenceDataStreamer::new(streamers).await.unwrap();

        let (topic1, m1) = merged.next().await.unwrap().expect("first");
        assert_eq!((topic1.as_str(), m1.timestamp_ns), ("/a", 100));

        let (topic2, m2) = merged.next().await.unwrap().expect("second");
        assert_eq!((topic2.as_str(), m2.timestamp_ns), ("/b", 200));

        let (topic3, m3) = merged.next().await.unwrap().expect("third");
        assert_eq!((topic3.as_str(), m3.timestamp_ns), ("/a", 300));

        assert!(merged.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ties_break_on_ascending_topic_name() {
        Scalar::register();

        let a = MockChannel::new();
        push_scalar(&a, 100, 1.0).await;
        let z = MockChannel::new();
        push_scalar(&z, 100, 9.0).await;

        let mut streamers: HashMap<String, Box<dyn ErasedTopicStreamer>> = HashMap::new();
        streamers.insert("/z".to_string(), boxed_streamer("/z", z));
        streamers.insert("/a".to_string(), boxed_streamer("/a", a));

        let mut merged = SequenceDataStreamer::new(streamers).await.unwrap();

        let (topic, _) = merged.next().await.unwrap().expect("first tied entry");
        assert_eq!(topic, "/a");
        let (topic, _) = merged.next().await.unwrap().expect("second tied entry");
        assert_eq!(topic, "/z");
    }

    #[tokio::test]
    async fn empty_sequence_yields_end_of_stream_immediately() {
        let streamers: HashMap<String, Box<dyn ErasedTopicStreamer>> = HashMap::new();
        let mut merged = SequenceDataStreamer::new(streamers).await.unwrap();
        assert_eq!(merged.next_timestamp(), None);
        assert!(merged.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        Scalar::register();
        let a = MockChannel::new();
        push_scalar(&a, 100, 1.0).await;

        let mut streamers: HashMap<String, Box<dyn ErasedTopicStreamer>> = HashMap::new();
        streamers.insert("/a".to_string(), boxed_streamer("/a", a));

        let mut merged = SequenceDataStreamer::new(streamers).await.unwrap();
        merged.close().await;
        merged.close().await;
        assert!(merged.next().await.is_err());
    }
}
