//! Durable sequence/topic recording client.
//!
//! A Rust client for a time-series recording platform built around two
//! resources: a *sequence* (one recording session) containing one or
//! more *topics* (one ontology-typed data stream each). Writers record
//! append-only batches to topics under a scoped sequence lifecycle;
//! readers stream a single topic back in order, or merge every topic of
//! a sequence into one timestamp-ordered stream.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sequence_sdk::{Client, Message, Scalar, SdkError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     Scalar::register();
//!     let client = Client::new("https://api.example.com");
//!
//!     client
//!         .with_sequence("run-001", |sequence| async move {
//!             sequence
//!                 .topic_create::<Scalar>("/speed", "scalar", Scalar::new(0.0).schema())
//!                 .await?;
//!             sequence
//!                 .push("/speed", Message::new(1_700_000_000_000, Scalar::new(3.2)))
//!                 .await?;
//!             Ok::<(), SdkError>(())
//!         })
//!         .await??;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod handlers;
mod message;
mod obs;
mod ontology;
mod query;
mod sequence_streamer;
mod sequence_writer;
mod topic_streamer;
mod topic_writer;
mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{OnErrorPolicy, ReaderConfig, WriterConfig};
pub use error::{
    DataError, InvalidHeaderError, LifecycleError, SdkError, TransportError, ValidationError,
};
pub use handlers::{SequenceHandler, TopicHandler};
pub use message::{
    normalize_topic, relative_topic_path, ErasedMessage, Header, Message, SequenceInfo,
    SequenceStatus, Stamp, TopicInfo,
};
pub use ontology::{register, resolve, FieldKind, FieldPath, OntologyPayload, Scalar, SchemaDescriptor};
pub use query::{
    FieldLeaf, FieldTree, LeafKind, OpCode, QueryDocument, QueryExpression, QueryOntologyCatalog,
    QueryResponse, QueryResponseItem, QuerySequence, QueryTopic,
};
pub use sequence_streamer::SequenceDataStreamer;
pub use sequence_writer::SequenceWriter;
pub use topic_streamer::TopicDataStreamer;
pub use topic_writer::TopicWriter;
