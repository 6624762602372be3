//! Core data-model types: messages, headers, sequence/topic metadata,
//! and topic-name normalization.

use crate::error::DataError;
use crate::ontology::{OntologyPayload, RecordBatchBytes};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Data-generation timestamp carried on a message's optional header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stamp {
    pub sec: i64,
    pub nanosec: i32,
}

/// Optional per-message header: data-generation timestamp plus the
/// originating frame/sensor identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub stamp: Stamp,
    pub frame_id: String,
}

/// One ingested/delivered record.
///
/// `timestamp_ns` is the platform *reception* timestamp; `header`, when
/// present, carries the *data-generation* timestamp instead.
#[derive(Clone, Debug)]
pub struct Message<T: OntologyPayload> {
    pub timestamp_ns: i64,
    pub header: Option<Header>,
    pub data: T,
}

impl<T: OntologyPayload> Message<T> {
    pub fn new(timestamp_ns: i64, data: T) -> Self {
        Self {
            timestamp_ns,
            header: None,
            data,
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Some(header);
        self
    }
}

/// A type-erased message, used where topics of differing ontology types
/// must be held in one collection (the sequence-level k-way merge).
#[derive(Debug)]
pub struct ErasedMessage {
    pub timestamp_ns: i64,
    pub header: Option<Header>,
    pub data: Box<dyn OntologyPayload>,
}

impl<T: OntologyPayload> From<Message<T>> for ErasedMessage {
    fn from(m: Message<T>) -> Self {
        ErasedMessage {
            timestamp_ns: m.timestamp_ns,
            header: m.header,
            data: Box::new(m.data),
        }
    }
}

/// Sequence lifecycle state (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceStatus {
    Pending,
    Finalized,
    Error,
    Unlocked,
}

impl SequenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceStatus::Pending => "pending",
            SequenceStatus::Finalized => "finalized",
            SequenceStatus::Error => "error",
            SequenceStatus::Unlocked => "unlocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SequenceStatus::Pending),
            "finalized" => Some(SequenceStatus::Finalized),
            "error" => Some(SequenceStatus::Error),
            "unlocked" => Some(SequenceStatus::Unlocked),
            _ => None,
        }
    }
}

pub(crate) fn unix_ms_to_system_time(unix_ms: i64) -> SystemTime {
    if unix_ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(unix_ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis((-unix_ms) as u64)
    }
}

/// Sequence system info: size and creation time.
#[derive(Clone, Debug)]
pub struct SequenceInfo {
    pub size_bytes: u64,
    pub created_at: SystemTime,
}

/// Topic system info: creation time and cumulative volume.
#[derive(Clone, Debug)]
pub struct TopicInfo {
    pub created_at: SystemTime,
    pub volume_bytes: u64,
}

/// Normalize a topic name to always carry a leading `/`.
///
/// Idempotent: `normalize_topic(normalize_topic(x)) == normalize_topic(x)`,
/// and `normalize_topic(x) == normalize_topic("/" + x.trim_start_matches('/'))`.
pub fn normalize_topic(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

/// Strip a sequence name prefix from a topic path returned by the
/// platform, enforcing the leading `/` invariant on what remains.
pub fn relative_topic_path(sequence_name: &str, full_path: &str) -> String {
    let stripped = full_path
        .strip_prefix(sequence_name)
        .unwrap_or(full_path);
    normalize_topic(stripped)
}

#[derive(Serialize, Deserialize)]
struct WireHeader {
    sec: i64,
    nanosec: i32,
    frame_id: String,
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    timestamp_ns: i64,
    header: Option<WireHeader>,
    payload: String,
}

/// Envelope one message for the record-batch channel: the opaque
/// ontology payload encode()s to transport bytes, and this wraps that
/// with the timestamp/header columns the wire format carries
/// alongside it (spec §6: "timestamp_ns: i64, header: struct | null,
/// data: <ontology-schema struct>").
pub fn encode_envelope<T: OntologyPayload>(message: &Message<T>) -> RecordBatchBytes {
    let record = WireRecord {
        timestamp_ns: message.timestamp_ns,
        header: message.header.as_ref().map(|h| WireHeader {
            sec: h.stamp.sec,
            nanosec: h.stamp.nanosec,
            frame_id: h.frame_id.clone(),
        }),
        payload: base64::engine::general_purpose::STANDARD.encode(message.data.encode().0),
    };
    let bytes = serde_json::to_vec(&record).expect("WireRecord always serializes");
    RecordBatchBytes(bytes::Bytes::from(bytes))
}

/// Type-erased counterpart of [`decode_envelope`], used by the
/// sequence-level merge where topics of differing ontology types are
/// decoded through the process-wide registry rather than a concrete `T`.
pub fn decode_envelope_erased(tag: &str, bytes: RecordBatchBytes) -> Result<ErasedMessage, DataError> {
    let record: WireRecord = serde_json::from_slice(&bytes.0).map_err(|e| DataError::DecodeFailed {
        topic: tag.to_string(),
        message: e.to_string(),
    })?;

    let payload_bytes = base64::engine::general_purpose::STANDARD
        .decode(record.payload)
        .map_err(|_| DataError::CorruptBatch {
            topic: tag.to_string(),
        })?;

    let data = crate::ontology::decode_erased(tag, RecordBatchBytes(bytes::Bytes::from(payload_bytes)))?;

    Ok(ErasedMessage {
        timestamp_ns: record.timestamp_ns,
        header: record.header.map(|h| Header {
            stamp: Stamp {
                sec: h.sec,
                nanosec: h.nanosec,
            },
            frame_id: h.frame_id,
        }),
        data,
    })
}

/// Inverse of [`encode_envelope`].
pub fn decode_envelope<T: OntologyPayload>(
    tag: &str,
    bytes: RecordBatchBytes,
) -> Result<Message<T>, DataError> {
    let record: WireRecord = serde_json::from_slice(&bytes.0).map_err(|e| DataError::DecodeFailed {
        topic: tag.to_string(),
        message: e.to_string(),
    })?;

    let payload_bytes = base64::engine::general_purpose::STANDARD
        .decode(record.payload)
        .map_err(|_| DataError::CorruptBatch {
            topic: tag.to_string(),
        })?;

    let data = T::decode(tag, RecordBatchBytes(bytes::Bytes::from(payload_bytes)))?;

    Ok(Message {
        timestamp_ns: record.timestamp_ns,
        header: record.header.map(|h| Header {
            stamp: Stamp {
                sec: h.sec,
                nanosec: h.nanosec,
            },
            frame_id: h.frame_id,
        }),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_leading_slash() {
        assert_eq!(normalize_topic("a/b"), "/a/b");
        assert_eq!(normalize_topic("/a/b"), "/a/b");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_topic("cam/front");
        let twice = normalize_topic(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_matches_explicit_form() {
        let name = "cam/front";
        assert_eq!(
            normalize_topic(name),
            normalize_topic(&format!("/{}", name.trim_start_matches('/')))
        );
    }

    #[test]
    fn relative_path_strips_sequence_prefix() {
        assert_eq!(relative_topic_path("seq1", "seq1/cam/front"), "/cam/front");
    }

    #[test]
    fn envelope_round_trips_without_header() {
        use crate::ontology::Scalar;

        let msg = Message::new(100, Scalar::new(2.5));
        let encoded = encode_envelope(&msg);
        let decoded: Message<Scalar> = decode_envelope("scalar", encoded).unwrap();

        assert_eq!(decoded.timestamp_ns, 100);
        assert!(decoded.header.is_none());
        assert_eq!(decoded.data, Scalar::new(2.5));
    }

    #[test]
    fn erased_envelope_round_trips() {
        use crate::ontology::Scalar;
        Scalar::register();

        let msg = Message::new(42, Scalar::new(9.5));
        let encoded = encode_envelope(&msg);
        let decoded = decode_envelope_erased("scalar", encoded).unwrap();

        assert_eq!(decoded.timestamp_ns, 42);
        assert_eq!(decoded.data.tag(), "scalar");
    }

    #[test]
    fn envelope_round_trips_with_header() {
        use crate::ontology::Scalar;

        let msg = Message::new(100, Scalar::new(2.5)).with_header(Header {
            stamp: Stamp { sec: 7, nanosec: 42 },
            frame_id: "cam0".to_string(),
        });
        let encoded = encode_envelope(&msg);
        let decoded: Message<Scalar> = decode_envelope("scalar", encoded).unwrap();

        let header = decoded.header.expect("header preserved");
        assert_eq!(header.stamp.sec, 7);
        assert_eq!(header.stamp.nanosec, 42);
        assert_eq!(header.frame_id, "cam0");
    }
}
