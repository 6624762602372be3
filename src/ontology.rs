//! Ontology payload contract and the process-wide schema registry.
//!
//! The concrete ontology/data-model definitions (GPS, IMU, image
//! payloads, ...) are out of scope: this module only fixes the trait a
//! payload type must satisfy to ride the write/read paths, plus the
//! registry that resolves a stable tag string to a schema descriptor and
//! a codec (component table, spec §2: "Resolve tag -> schema + codec").
//! `Scalar`, below, is a single minimal example used by tests and
//! doctests, not a real ontology type.

use crate::error::DataError;
use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Primitive type tag for one field of a schema.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    I64,
    F64,
    Bool,
    String,
    /// Nested record: recurses into its own field paths.
    Nested(SchemaDescriptor),
    /// Dict-shaped field (e.g. `user_metadata`): not type-checked.
    Dict,
    /// List/tuple field: not queryable.
    Container,
}

/// One field of a schema, identified by its dot-joined attribute path.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldPath {
    pub path: String,
    pub kind: FieldKind,
}

/// Schema descriptor: an ordered enumeration of field paths with
/// primitive type tags, as exposed by an ontology payload type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaDescriptor {
    pub fields: Vec<FieldPath>,
}

impl SchemaDescriptor {
    pub fn new(fields: Vec<FieldPath>) -> Self {
        Self { fields }
    }
}

/// Opaque columnar transport payload: the record-batch representation
/// an `OntologyPayload` encodes to and decodes from. The real codec
/// (Arrow or otherwise) lives outside this SDK; this newtype is the
/// contract boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordBatchBytes(pub Bytes);

impl RecordBatchBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A record-schema type whose instances can ride a topic.
///
/// Messages on one topic all share one ontology: the invariant checked
/// on every `TopicWriter::push` is `topic.ontology_tag() ==
/// payload.tag()`.
pub trait OntologyPayload: std::fmt::Debug + Send + Sync + 'static {
    /// Stable tag identifying this record schema, shared by every
    /// instance (e.g. `"gps"`, `"imu"`).
    fn tag(&self) -> &'static str;

    /// Schema descriptor enumerating this type's field paths.
    fn schema(&self) -> SchemaDescriptor;

    /// Encode to the transport's record-batch representation.
    fn encode(&self) -> RecordBatchBytes;

    /// Decode from the transport's record-batch representation.
    fn decode(tag: &str, bytes: RecordBatchBytes) -> Result<Self, DataError>
    where
        Self: Sized;
}

type DecodeFn = Arc<dyn Fn(RecordBatchBytes) -> Result<Box<dyn OntologyPayload>, DataError> + Send + Sync>;

#[derive(Clone)]
struct OntologyEntry {
    schema: SchemaDescriptor,
    decode: DecodeFn,
}

/// Process-wide immutable table of `tag -> (schema, codec)`, populated at
/// ontology registration time. No other global mutable state exists in
/// the SDK beyond this and the client's shared transport/worker pools.
static REGISTRY: Lazy<RwLock<HashMap<&'static str, OntologyEntry>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an ontology type `T` under its tag, along with a
/// type-erasing decoder used by `decode_erased` (needed when a
/// `SequenceDataStreamer` merges topics of differing ontology types).
/// Call once at process startup, before any writer/streamer touches
/// the tag.
pub fn register<T: OntologyPayload>(tag: &'static str, schema: SchemaDescriptor) {
    let decode: DecodeFn = Arc::new(move |bytes| {
        T::decode(tag, bytes).map(|v| Box::new(v) as Box<dyn OntologyPayload>)
    });
    REGISTRY.write().insert(tag, OntologyEntry { schema, decode });
}

/// Resolve a tag to its registered schema.
pub fn resolve(tag: &str) -> Option<SchemaDescriptor> {
    REGISTRY.read().get(tag).map(|e| e.schema.clone())
}

/// Decode record-batch bytes into a type-erased ontology payload using
/// the codec registered under `tag`.
pub fn decode_erased(tag: &str, bytes: RecordBatchBytes) -> Result<Box<dyn OntologyPayload>, DataError> {
    let decode = {
        let registry = REGISTRY.read();
        registry
            .get(tag)
            .map(|e| e.decode.clone())
            .ok_or_else(|| DataError::DecodeFailed {
                topic: tag.to_string(),
                message: "tag not registered".to_string(),
            })?
    };
    decode(bytes)
}

/// Frame several encoded records into one transport chunk.
///
/// The per-record codec stays opaque (spec: wire bytes of a record are
/// out of scope), but a `TopicWriter` still needs to coalesce several
/// pushes into one batch for throughput. Each record is framed with a
/// `u32` little-endian length prefix so `split_batch` can recover the
/// original boundaries without understanding the payload itself.
pub fn frame_batch(records: &[RecordBatchBytes]) -> RecordBatchBytes {
    let mut out = Vec::with_capacity(records.iter().map(|r| r.len() + 4).sum());
    for record in records {
        out.extend_from_slice(&(record.len() as u32).to_le_bytes());
        out.extend_from_slice(&record.0);
    }
    RecordBatchBytes(Bytes::from(out))
}

/// Inverse of [`frame_batch`]: split a transport chunk back into its
/// constituent records.
pub fn split_batch(chunk: &RecordBatchBytes) -> Result<Vec<RecordBatchBytes>, DataError> {
    let bytes = &chunk.0;
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        if offset + 4 > bytes.len() {
            return Err(DataError::CorruptBatch {
                topic: String::new(),
            });
        }
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        if offset + len > bytes.len() {
            return Err(DataError::CorruptBatch {
                topic: String::new(),
            });
        }
        out.push(RecordBatchBytes(chunk.0.slice(offset..offset + len)));
        offset += len;
    }
    Ok(out)
}

/// A minimal example ontology payload: one `f64` field. Used by tests
/// and doctests standing in for a real sensor record type.
#[derive(Clone, Debug, PartialEq)]
pub struct Scalar {
    pub v: f64,
}

impl Scalar {
    pub fn new(v: f64) -> Self {
        Self { v }
    }

    /// Register this type's schema and codec under its tag.
    pub fn register() {
        register::<Scalar>(
            "scalar",
            SchemaDescriptor::new(vec![FieldPath {
                path: "v".to_string(),
                kind: FieldKind::F64,
            }]),
        );
    }
}

impl OntologyPayload for Scalar {
    fn tag(&self) -> &'static str {
        "scalar"
    }

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new(vec![FieldPath {
            path: "v".to_string(),
            kind: FieldKind::F64,
        }])
    }

    fn encode(&self) -> RecordBatchBytes {
        RecordBatchBytes(Bytes::from(self.v.to_le_bytes().to_vec()))
    }

    fn decode(tag: &str, bytes: RecordBatchBytes) -> Result<Self, DataError> {
        if tag != "scalar" {
            return Err(DataError::DecodeFailed {
                topic: tag.to_string(),
                message: format!("expected tag `scalar`, got `{tag}`"),
            });
        }
        let arr: [u8; 8] = bytes
            .0
            .as_ref()
            .try_into()
            .map_err(|_| DataError::CorruptBatch {
                topic: tag.to_string(),
            })?;
        Ok(Scalar {
            v: f64::from_le_bytes(arr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips() {
        let s = Scalar::new(3.5);
        let encoded = s.encode();
        let decoded = Scalar::decode("scalar", encoded).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn registry_resolves_registered_tag() {
        Scalar::register();
        let schema = resolve("scalar").expect("scalar should be registered");
        assert_eq!(schema.fields.len(), 1);
        assert_eq!(schema.fields[0].path, "v");
    }

    #[test]
    fn registry_misses_unknown_tag() {
        assert!(resolve("definitely-not-registered").is_none());
    }

    #[test]
    fn decode_erased_round_trips() {
        Scalar::register();
        let s = Scalar::new(7.0);
        let boxed = decode_erased("scalar", s.encode()).unwrap();
        assert_eq!(boxed.tag(), "scalar");
    }

    #[test]
    fn frame_and_split_batch_round_trips() {
        let records = vec![
            Scalar::new(1.0).encode(),
            Scalar::new(2.0).encode(),
            Scalar::new(3.0).encode(),
        ];
        let framed = frame_batch(&records);
        let split = split_batch(&framed).unwrap();
        assert_eq!(split, records);
    }

    #[test]
    fn split_batch_rejects_truncated_chunk() {
        let chunk = RecordBatchBytes(Bytes::from(vec![5, 0, 0, 0, 1, 2]));
        assert!(split_batch(&chunk).is_err());
    }

    #[test]
    fn frame_batch_of_empty_slice_splits_to_empty() {
        let framed = frame_batch(&[]);
        assert!(split_batch(&framed).unwrap().is_empty());
    }
}
