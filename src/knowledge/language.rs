//! Named relation vocabulary over a [`Knowledge`] store.
//!
//! Each verb resolves its arguments to concepts (creating them on demand)
//! and records one conception. Argument order follows the reading of the
//! verb: `is_a("cat", "animal")` stores `cat --IS_A--> animal`.
//!
//! | verb                      | stored as                                 |
//! |---------------------------|-------------------------------------------|
//! | `is(a, b)`                | `a --IS--> b`                             |
//! | `has(a, attr, b)`         | `a --HAS--> b`, qualified by `attr`       |
//! | `of_attribute(attr, a, b)`| same as `has(a, attr, b)`                 |
//! | `of(b, a)`                | `b --OF--> a`                             |
//! | `is_a(b, a)`              | `b --IS_A--> a`                           |
//! | `in_(a, b)`               | `b --IS_A--> a`                           |
//! | `from(a, b, program)`     | `a --FROM--> b`, `program` property set   |
//! | `to(b, a, program)`       | `b --TO--> a`, `program` property set     |
//! | `relates(a, b)`           | `a --RELATES--> b`                        |
//! | `contains(a, b)`          | `a --CONTAINS--> b`                       |

use crate::error::KbResult;
use crate::graph::{Conception, RelationKind};
use crate::property::PropertySet;

use super::Knowledge;

/// Edge property holding the qualifier concept's id.
pub const ANCHOR: &str = "anchor";
/// Edge property holding the qualifier concept's label.
pub const QUALIFIER: &str = "qualifier";
/// Edge property naming the program behind a FROM/TO relation.
pub const PROGRAM: &str = "program";

/// Borrowed vocabulary view; obtain one with [`Knowledge::speak`].
#[derive(Debug, Clone, Copy)]
pub struct Language<'k> {
    knowledge: &'k Knowledge,
}

impl<'k> Language<'k> {
    pub fn new(knowledge: &'k Knowledge) -> Self {
        Self { knowledge }
    }

    pub fn is(&self, a: &str, b: &str) -> KbResult<Conception> {
        self.link(a, b, RelationKind::Is, None)
    }

    /// `a` has `b` as its `attribute`, e.g. `has("cat", "color", "black")`.
    pub fn has(&self, a: &str, attribute: &str, b: &str) -> KbResult<Conception> {
        self.link(a, b, RelationKind::Has, Some(attribute))
    }

    /// The `attribute` of `a` is `b`; stored exactly like [`has`](Self::has).
    pub fn of_attribute(&self, attribute: &str, a: &str, b: &str) -> KbResult<Conception> {
        self.has(a, attribute, b)
    }

    /// `b` is of `a`.
    pub fn of(&self, b: &str, a: &str) -> KbResult<Conception> {
        self.link(b, a, RelationKind::Of, None)
    }

    /// `b` is an `a`.
    pub fn is_a(&self, b: &str, a: &str) -> KbResult<Conception> {
        self.link(b, a, RelationKind::IsA, None)
    }

    /// `a` is in `b`: the inverse of `is_a`, stored as `b --IS_A--> a`.
    pub fn in_(&self, a: &str, b: &str) -> KbResult<Conception> {
        self.link(b, a, RelationKind::IsA, None)
    }

    pub fn from(&self, a: &str, b: &str, program: &str) -> KbResult<Conception> {
        self.link_with_program(a, b, RelationKind::From, program)
    }

    pub fn to(&self, b: &str, a: &str, program: &str) -> KbResult<Conception> {
        self.link_with_program(b, a, RelationKind::To, program)
    }

    pub fn relates(&self, a: &str, b: &str) -> KbResult<Conception> {
        self.link(a, b, RelationKind::Relates, None)
    }

    pub fn contains(&self, a: &str, b: &str) -> KbResult<Conception> {
        self.link(a, b, RelationKind::Contains, None)
    }

    /// Record `a --kind--> b`. A `qualifier` is resolved to a concept too;
    /// its id lands in the edge's `anchor` property and its label in
    /// `qualifier`. Re-linking with another qualifier replaces both.
    pub fn link(
        &self,
        a: &str,
        b: &str,
        kind: RelationKind,
        qualifier: Option<&str>,
    ) -> KbResult<Conception> {
        self.knowledge
            .link(a, kind, b, PropertySet::new(), qualifier, PropertySet::new())
    }

    fn link_with_program(
        &self,
        a: &str,
        b: &str,
        kind: RelationKind,
        program: &str,
    ) -> KbResult<Conception> {
        let pinned = PropertySet::new().with(PROGRAM, program);
        self.knowledge
            .link(a, kind, b, PropertySet::new(), None, pinned)
    }
}
