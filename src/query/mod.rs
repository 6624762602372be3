//! Query support: expression trees, a schema-driven field proxy,
//! fallible builders, and chaining results (spec §4.6, §4.7).

mod builder;
mod expression;
mod proxy;
mod response;

pub use builder::{QueryDocument, QueryOntologyCatalog, QuerySequence, QueryTopic};
pub use expression::{OpCode, QueryExpression};
pub use proxy::{FieldLeaf, FieldTree, LeafKind};
pub use response::{QueryResponse, QueryResponseItem};
