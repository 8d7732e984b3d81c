//! Concept graph: concepts (nodes), conceptions (typed edges), and the
//! derived structures built over them.
//!
//! - [`meta::MetaGraph`]: the authoritative in-memory graph (petgraph adjacency,
//!   label and triple dedup tables, dirty tracking)
//! - [`index::InvertedIndex`]: normalized term → concept ids
//! - [`tree::TreeView`]: read-only hierarchy over one relation kind
//! - [`traverse`]: bounded BFS/DFS walks and subgraph extraction

pub mod index;
pub mod meta;
pub mod traverse;
pub mod tree;

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::property::PropertySet;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create an id from a raw `u64`. Returns `None` for zero.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// Get the underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Stable identifier of a [`Concept`]. Uses `NonZeroU64` so that
    /// `Option<ConceptId>` costs nothing extra.
    ConceptId,
    "concept"
);

define_id!(
    /// Stable identifier of a [`Conception`].
    ConceptionId,
    "conception"
);

/// Relation type carried by a [`Conception`].
///
/// The named kinds are the built-in vocabulary; anything else is kept as a
/// [`RelationKind::Custom`] with an upper-cased, underscore-joined name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RelationKind {
    Is,
    Has,
    IsA,
    Of,
    In,
    From,
    To,
    Relates,
    Contains,
    Custom(String),
}

impl RelationKind {
    /// Canonical storage name.
    pub fn as_str(&self) -> &str {
        match self {
            RelationKind::Is => "IS",
            RelationKind::Has => "HAS",
            RelationKind::IsA => "IS_A",
            RelationKind::Of => "OF",
            RelationKind::In => "IN",
            RelationKind::From => "FROM",
            RelationKind::To => "TO",
            RelationKind::Relates => "RELATES",
            RelationKind::Contains => "CONTAINS",
            RelationKind::Custom(name) => name,
        }
    }

    /// Parse a relation name. Case, surrounding whitespace and `-`/space
    /// separators are ignored, so `"is-a"`, `"Is A"` and `"IS_A"` agree.
    pub fn parse(name: &str) -> Self {
        let canonical: String = name
            .trim()
            .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase();
        match canonical.as_str() {
            "IS" => RelationKind::Is,
            "HAS" => RelationKind::Has,
            "IS_A" | "ISA" => RelationKind::IsA,
            "OF" => RelationKind::Of,
            "IN" => RelationKind::In,
            "FROM" => RelationKind::From,
            "TO" => RelationKind::To,
            "RELATES" => RelationKind::Relates,
            "CONTAINS" => RelationKind::Contains,
            _ => RelationKind::Custom(canonical),
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RelationKind {
    fn from(name: &str) -> Self {
        RelationKind::parse(name)
    }
}

impl From<String> for RelationKind {
    fn from(name: String) -> Self {
        RelationKind::parse(&name)
    }
}

impl From<RelationKind> for String {
    fn from(kind: RelationKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl FromStr for RelationKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RelationKind::parse(s))
    }
}

/// A graph node: one lexical/semantic unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    /// Canonical (normalized) label; unique within a graph.
    pub label: String,
    pub properties: PropertySet,
}

/// A typed, directed edge between two concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conception {
    pub id: ConceptionId,
    pub source: ConceptId,
    pub kind: RelationKind,
    pub target: ConceptId,
    pub properties: PropertySet,
}

impl Conception {
    /// The dedup key of this edge.
    pub fn key(&self) -> (ConceptId, RelationKind, ConceptId) {
        (self.source, self.kind.clone(), self.target)
    }
}

/// Collaborator input: one extracted `(subject, relation, object)` unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relation: RelationKind,
    pub object: String,
    #[serde(default)]
    pub properties: PropertySet,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<RelationKind>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
            properties: PropertySet::new(),
        }
    }

    /// Attach auxiliary properties (provenance, sentence offsets, ...).
    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }
}

/// Human-readable reference to a graph entity, used in flush reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Concept {
        id: ConceptId,
        label: String,
    },
    Conception {
        id: ConceptionId,
        source: ConceptId,
        kind: RelationKind,
        target: ConceptId,
    },
}

impl EntityRef {
    pub fn concept(concept: &Concept) -> Self {
        EntityRef::Concept {
            id: concept.id,
            label: concept.label.clone(),
        }
    }

    pub fn conception(conception: &Conception) -> Self {
        EntityRef::Conception {
            id: conception.id,
            source: conception.source,
            kind: conception.kind.clone(),
            target: conception.target,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Concept { id, label } => write!(f, "{id} ({label:?})"),
            EntityRef::Conception {
                id,
                source,
                kind,
                target,
            } => write!(f, "{id} ({source} -{kind}-> {target})"),
        }
    }
}

/// Monotonic id allocator. Resumes after the largest id seen when a graph
/// is restored from storage.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Start allocating at 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next raw id.
    pub fn next_raw(&mut self, entity: &'static str) -> Result<NonZeroU64, GraphError> {
        let id = NonZeroU64::new(self.next).ok_or(GraphError::IdsExhausted { entity })?;
        self.next = self
            .next
            .checked_add(1)
            .ok_or(GraphError::IdsExhausted { entity })?;
        Ok(id)
    }

    /// Make sure future ids are strictly greater than `seen`.
    pub fn observe(&mut self, seen: u64) {
        if seen >= self.next {
            self.next = seen.saturating_add(1);
        }
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
