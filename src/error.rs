//! Rich diagnostic error types for the concept-graph store.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Every message names the
//! offending label or id so callers never have to decode a raw storage error.

use miette::Diagnostic;
use thiserror::Error;

use crate::graph::EntityRef;

/// Coarse classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Lookup by id or label with no match.
    NotFound,
    /// Dangling edge reference, duplicate label, or delete of a node with live edges.
    ConstraintViolation,
    /// A hierarchy view was requested over a relation that contains a cycle.
    CycleDetected,
    /// Row-level storage error during load, save, delete, or flush.
    PersistenceFailure,
    /// Schema template missing or malformed.
    SchemaTemplate,
    /// Caller supplied something unusable (empty label, bad config value).
    InvalidInput,
}

/// Top-level error type for the knowledge store.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Flush(#[from] FlushError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl KbError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KbError::Store(e) => e.kind(),
            KbError::Schema(_) => ErrorKind::SchemaTemplate,
            KbError::Graph(e) => e.kind(),
            KbError::Property(PropertyError::Missing { .. }) => ErrorKind::NotFound,
            KbError::Property(PropertyError::TypeMismatch { .. }) => ErrorKind::InvalidInput,
            KbError::Flush(_) => ErrorKind::PersistenceFailure,
            KbError::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, KbError::Store(e) if e.is_transient())
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{entity} {id} not found in store")]
    #[diagnostic(
        code(cg::store::not_found),
        help("No row exists with this id. It may have been deleted, or never flushed.")
    )]
    NotFound { entity: &'static str, id: u64 },

    #[error("label \"{label}\" already belongs to node {existing_id}")]
    #[diagnostic(
        code(cg::store::duplicate_label),
        help("Node labels are unique. Reuse the existing node instead of creating a new one.")
    )]
    DuplicateLabel { label: String, existing_id: u64 },

    #[error("edge {edge_id} references missing {role} node {node_id}")]
    #[diagnostic(
        code(cg::store::dangling_edge),
        help("Create (or flush) both endpoint nodes before writing the edge.")
    )]
    DanglingEdge {
        edge_id: u64,
        role: &'static str,
        node_id: u64,
    },

    #[error("node {id} (\"{label}\") is still referenced by {edges} edge(s)")]
    #[diagnostic(
        code(cg::store::node_in_use),
        help(
            "Delete the incident edges first. Cascading deletes are never implicit: \
             use `get_edges_from`/`get_edges_to` and `delete_edge` explicitly."
        )
    )]
    NodeInUse { id: u64, label: String, edges: usize },

    #[error("storage failure during {context}: {message}")]
    #[diagnostic(
        code(cg::store::persistence),
        help(
            "The embedded database rejected the operation. The in-memory graph is \
             unchanged and the operation can be retried."
        )
    )]
    Persistence { context: String, message: String },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(cg::store::io),
        help("Check that the path exists, has correct permissions, and the disk is not full.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {entity} {id}: {message}")]
    #[diagnostic(
        code(cg::store::serde),
        help(
            "The stored row could not be decoded. The store may have been written by \
             an incompatible version; re-ingest into a fresh store."
        )
    )]
    Serialization {
        entity: &'static str,
        id: u64,
        message: String,
    },
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::DuplicateLabel { .. }
            | StoreError::DanglingEdge { .. }
            | StoreError::NodeInUse { .. } => ErrorKind::ConstraintViolation,
            StoreError::Persistence { .. }
            | StoreError::Io { .. }
            | StoreError::Serialization { .. } => ErrorKind::PersistenceFailure,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Persistence { .. } => true,
            StoreError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Build a `map_err` adapter that wraps any displayable storage error.
pub(crate) fn persistence<E: std::fmt::Display>(
    context: impl Into<String>,
) -> impl FnOnce(E) -> StoreError {
    let context = context.into();
    move |e| StoreError::Persistence {
        context,
        message: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Schema template errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("schema template not found: {path}")]
    #[diagnostic(
        code(cg::schema::missing),
        help(
            "Create a template first with `concept-graph template <path>`, \
             or point at an existing store instead."
        )
    )]
    Missing { path: String },

    #[error("malformed schema in {path}: {reason}")]
    #[diagnostic(
        code(cg::schema::malformed),
        help("The file is not a concept-graph store or template. Recreate the template.")
    )]
    Malformed { path: String, reason: String },

    #[error("schema version mismatch in {path}: found {found}, expected {expected}")]
    #[diagnostic(
        code(cg::schema::version),
        help("This store was written by a different schema version. Schema migration is not supported.")
    )]
    VersionMismatch {
        path: String,
        found: String,
        expected: String,
    },

    #[error("failed to copy template {template} to {target}: {source}")]
    #[diagnostic(
        code(cg::schema::copy),
        help("Ensure the target directory exists and is writable.")
    )]
    Copy {
        template: String,
        target: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("concept {id} not found")]
    #[diagnostic(
        code(cg::graph::concept_not_found),
        help("The concept does not exist in the graph. Resolve a token first to create it.")
    )]
    ConceptNotFound { id: u64 },

    #[error("no concept labelled \"{label}\"")]
    #[diagnostic(
        code(cg::graph::label_not_found),
        help("Labels are matched after normalization (case, whitespace, lemma, synonyms).")
    )]
    LabelNotFound { label: String },

    #[error("conception {id} not found")]
    #[diagnostic(
        code(cg::graph::conception_not_found),
        help("The relation does not exist. It may have been removed together with an endpoint.")
    )]
    ConceptionNotFound { id: u64 },

    #[error("relation {role} concept {id} does not exist")]
    #[diagnostic(
        code(cg::graph::dangling_reference),
        help("Both endpoints of a relation must be added to the graph before the relation.")
    )]
    DanglingReference { role: &'static str, id: u64 },

    #[error("label \"{label}\" is already used by concept {existing_id}")]
    #[diagnostic(
        code(cg::graph::duplicate_label),
        help("Concept labels are unique after normalization.")
    )]
    DuplicateLabel { label: String, existing_id: u64 },

    #[error("token {token:?} normalizes to an empty label")]
    #[diagnostic(
        code(cg::graph::empty_label),
        help("Provide a token with at least one non-whitespace character.")
    )]
    EmptyLabel { token: String },

    #[error("cycle in {relation} hierarchy through concept {id} (\"{label}\")")]
    #[diagnostic(
        code(cg::graph::cycle),
        help(
            "A tree view requires the hierarchy relation to be acyclic. \
             Remove one of the relations forming the cycle."
        )
    )]
    CycleDetected {
        relation: String,
        id: u64,
        label: String,
    },

    #[error("identifier space exhausted for {entity}")]
    #[diagnostic(
        code(cg::graph::ids_exhausted),
        help("More than u64::MAX ids were allocated. Check for allocation loops.")
    )]
    IdsExhausted { entity: &'static str },
}

impl GraphError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::ConceptNotFound { .. }
            | GraphError::LabelNotFound { .. }
            | GraphError::ConceptionNotFound { .. } => ErrorKind::NotFound,
            GraphError::DanglingReference { .. } | GraphError::DuplicateLabel { .. } => {
                ErrorKind::ConstraintViolation
            }
            GraphError::CycleDetected { .. } => ErrorKind::CycleDetected,
            GraphError::EmptyLabel { .. } | GraphError::IdsExhausted { .. } => {
                ErrorKind::InvalidInput
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Property errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PropertyError {
    #[error("property \"{key}\" not set")]
    #[diagnostic(code(cg::property::missing))]
    Missing { key: String },

    #[error("property \"{key}\" holds {found}, expected {expected}")]
    #[diagnostic(code(cg::property::type_mismatch))]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Flush errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FlushError {
    #[error(
        "flush aborted at {failed}: {source} ({} written, {} pending)",
        .completed.len(),
        .pending.len()
    )]
    #[diagnostic(
        code(cg::flush::aborted),
        help(
            "Entities listed as pending are still marked dirty in memory. \
             Fix the cause and call flush again; already written entities are skipped."
        )
    )]
    Aborted {
        failed: EntityRef,
        #[source]
        source: StoreError,
        completed: Vec<EntityRef>,
        pending: Vec<EntityRef>,
    },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(cg::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(cg::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(cg::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(cg::config::invalid), help("Check the KnowledgeConfig fields. {message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning knowledge-store results.
pub type KbResult<T> = std::result::Result<T, KbError>;
