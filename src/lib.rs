// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # concept-graph
//!
//! A persistent knowledge store that turns extracted `(subject, relation,
//! object)` triples into a deduplicated concept graph.
//!
//! ## Architecture
//!
//! - **Properties** (`property`): typed key/value maps with pluggable merge policies
//! - **Graph** (`graph`): in-memory `MetaGraph` over petgraph with label and
//!   triple dedup, an inverted term index, hierarchy views and traversals
//! - **Storage** (`store`): redb-backed `GraphDatabase`, generic record
//!   mappers, schema templates, and the `MetaGraphDatabase` binder that
//!   loads and flushes a graph
//! - **Knowledge** (`knowledge`): token canonicalization, the `Knowledge`
//!   facade and the named relation vocabulary (`Language`)
//!
//! ## Library usage
//!
//! ```no_run
//! use concept_graph::config::KnowledgeConfig;
//! use concept_graph::knowledge::Knowledge;
//!
//! let kb = Knowledge::create("kb.redb".as_ref(), None, KnowledgeConfig::default()).unwrap();
//! let say = kb.speak();
//! say.is_a("cat", "animal").unwrap();
//! say.has("cat", "color", "black").unwrap();
//! assert!(kb.is_descendant("cats", "animal").unwrap());
//! kb.close().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod knowledge;
pub mod property;
pub mod store;
