//! Relational persistence for the concept graph, backed by redb.
//!
//! - [`schema`]: table layout and [`SchemaTemplate`] handling
//! - [`record`]: generic [`RecordMapper`] with an identity cache
//! - [`graph_db`]: [`GraphDatabase`], node/edge CRUD and adjacency queries
//! - [`binder`]: [`MetaGraphDatabase`], loading a `MetaGraph` and flushing it back

pub mod binder;
pub mod graph_db;
pub mod record;
pub mod schema;

pub use binder::{FlushReport, MetaGraphDatabase, StoreSource};
pub use graph_db::{GraphDatabase, StoredEdge, StoredNode};
pub use record::{Record, RecordMapper, SaveOutcome};
pub use schema::SchemaTemplate;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
