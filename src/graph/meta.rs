//! The authoritative in-memory concept graph.
//!
//! Uses a petgraph `StableDiGraph` for adjacency (indices survive removals)
//! plus explicit keyed tables for identity: normalized label → concept and
//! `(source, kind, target)` → conception. Every mutation updates the
//! [`InvertedIndex`] in the same call, bumps the generation counter that
//! derived views key their caches on, and records the entity in the
//! [`ChangeSet`] consumed by the persistence binder.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

use crate::error::GraphError;
use crate::property::{MergePolicy, OccurrenceCounting, PropertySet, PropertyValue};

use super::index::{InvertedIndex, normalize_term};
use super::{Concept, ConceptId, Conception, ConceptionId, EntityRef, IdAllocator, RelationKind};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

type TripleKey = (ConceptId, RelationKind, ConceptId);

/// Entities changed since the last successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub(crate) concepts: BTreeSet<ConceptId>,
    pub(crate) conceptions: BTreeSet<ConceptionId>,
    pub(crate) removed_concepts: BTreeMap<ConceptId, EntityRef>,
    pub(crate) removed_conceptions: BTreeMap<ConceptionId, EntityRef>,
    /// Dirty concepts whose label changed since they were last stored.
    pub(crate) relabeled: BTreeSet<ConceptId>,
}

impl ChangeSet {
    /// Concepts created or modified.
    pub fn dirty_concepts(&self) -> impl Iterator<Item = ConceptId> + '_ {
        self.concepts.iter().copied()
    }

    /// Conceptions created or modified.
    pub fn dirty_conceptions(&self) -> impl Iterator<Item = ConceptionId> + '_ {
        self.conceptions.iter().copied()
    }

    /// Dirty concepts renamed since the last flush. Always a subset of
    /// [`dirty_concepts`](Self::dirty_concepts).
    pub fn relabeled_concepts(&self) -> impl Iterator<Item = ConceptId> + '_ {
        self.relabeled.iter().copied()
    }

    /// Concepts removed since the last flush, with what they looked like.
    pub fn removed_concepts(&self) -> impl Iterator<Item = (ConceptId, &EntityRef)> + '_ {
        self.removed_concepts.iter().map(|(id, entity)| (*id, entity))
    }

    pub fn removed_conceptions(&self) -> impl Iterator<Item = (ConceptionId, &EntityRef)> + '_ {
        self.removed_conceptions.iter().map(|(id, entity)| (*id, entity))
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
            + self.conceptions.len()
            + self.removed_concepts.len()
            + self.removed_conceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory graph of concepts and conceptions.
pub struct MetaGraph {
    graph: StableDiGraph<ConceptId, ConceptionId>,
    node_index: HashMap<ConceptId, NodeIndex>,
    edge_index: HashMap<ConceptionId, EdgeIndex>,
    concepts: BTreeMap<ConceptId, Concept>,
    conceptions: BTreeMap<ConceptionId, Conception>,
    by_label: HashMap<String, ConceptId>,
    by_triple: HashMap<TripleKey, ConceptionId>,
    index: InvertedIndex,
    merge: Arc<dyn MergePolicy>,
    concept_ids: IdAllocator,
    conception_ids: IdAllocator,
    changes: ChangeSet,
    generation: u64,
}

impl MetaGraph {
    /// Create an empty graph with the occurrence-counting merge policy.
    pub fn new() -> Self {
        Self::with_merge_policy(Arc::new(OccurrenceCounting))
    }

    /// Create an empty graph with an explicit merge policy.
    pub fn with_merge_policy(merge: Arc<dyn MergePolicy>) -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
            concepts: BTreeMap::new(),
            conceptions: BTreeMap::new(),
            by_label: HashMap::new(),
            by_triple: HashMap::new(),
            index: InvertedIndex::new(),
            merge,
            concept_ids: IdAllocator::new(),
            conception_ids: IdAllocator::new(),
            changes: ChangeSet::default(),
            generation: 0,
        }
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add a concept, or merge `properties` into the existing concept whose
    /// label normalizes to the same form.
    pub fn add_concept(&mut self, label: &str, properties: PropertySet) -> GraphResult<&Concept> {
        let normalized = normalize_term(label);
        if normalized.is_empty() {
            return Err(GraphError::EmptyLabel {
                token: label.to_owned(),
            });
        }

        if let Some(&id) = self.by_label.get(&normalized) {
            if !properties.is_empty() {
                let concept = self
                    .concepts
                    .get_mut(&id)
                    .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
                concept.properties.merge_from(properties, self.merge.as_ref());
                self.changes.concepts.insert(id);
                self.touch();
            }
            return self
                .concepts
                .get(&id)
                .ok_or(GraphError::ConceptNotFound { id: id.get() });
        }

        let id = ConceptId(self.concept_ids.next_raw("concept")?);
        let node = self.graph.add_node(id);
        self.node_index.insert(id, node);
        self.index.index_label(&normalized, id);
        self.by_label.insert(normalized.clone(), id);
        self.concepts.insert(
            id,
            Concept {
                id,
                label: normalized,
                properties,
            },
        );
        self.changes.concepts.insert(id);
        self.touch();

        self.concepts
            .get(&id)
            .ok_or(GraphError::ConceptNotFound { id: id.get() })
    }

    /// Add a relation, or merge `properties` into the existing one with the
    /// same `(source, kind, target)`.
    pub fn add_relation(
        &mut self,
        source: ConceptId,
        kind: RelationKind,
        target: ConceptId,
        properties: PropertySet,
    ) -> GraphResult<&Conception> {
        let source_node = *self.node_index.get(&source).ok_or(GraphError::DanglingReference {
            role: "source",
            id: source.get(),
        })?;
        let target_node = *self.node_index.get(&target).ok_or(GraphError::DanglingReference {
            role: "target",
            id: target.get(),
        })?;

        let key = (source, kind, target);
        if let Some(&id) = self.by_triple.get(&key) {
            if !properties.is_empty() {
                let conception = self
                    .conceptions
                    .get_mut(&id)
                    .ok_or(GraphError::ConceptionNotFound { id: id.get() })?;
                conception
                    .properties
                    .merge_from(properties, self.merge.as_ref());
                self.changes.conceptions.insert(id);
                self.touch();
            }
            return self
                .conceptions
                .get(&id)
                .ok_or(GraphError::ConceptionNotFound { id: id.get() });
        }

        let id = ConceptionId(self.conception_ids.next_raw("conception")?);
        let edge = self.graph.add_edge(source_node, target_node, id);
        self.edge_index.insert(id, edge);
        let (source, kind, target) = key;
        self.by_triple.insert((source, kind.clone(), target), id);
        self.conceptions.insert(
            id,
            Conception {
                id,
                source,
                kind,
                target,
                properties,
            },
        );
        self.changes.conceptions.insert(id);
        self.touch();

        self.conceptions
            .get(&id)
            .ok_or(GraphError::ConceptionNotFound { id: id.get() })
    }

    /// Remove a concept together with every conception touching it and its
    /// index postings.
    pub fn remove_concept(&mut self, id: ConceptId) -> GraphResult<Concept> {
        let node = *self
            .node_index
            .get(&id)
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?;

        let incident: BTreeSet<ConceptionId> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .chain(self.graph.edges_directed(node, Direction::Incoming))
            .map(|e| *e.weight())
            .collect();
        for conception in incident {
            self.detach_conception(conception)?;
        }

        self.graph.remove_node(node);
        self.node_index.remove(&id);
        let concept = self
            .concepts
            .remove(&id)
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
        self.by_label.remove(&concept.label);
        self.index.unindex_label(&concept.label, id);

        self.changes.concepts.remove(&id);
        self.changes.relabeled.remove(&id);
        self.changes
            .removed_concepts
            .insert(id, EntityRef::concept(&concept));
        self.touch();
        Ok(concept)
    }

    /// Remove a single conception.
    pub fn remove_conception(&mut self, id: ConceptionId) -> GraphResult<Conception> {
        let conception = self.detach_conception(id)?;
        self.touch();
        Ok(conception)
    }

    fn detach_conception(&mut self, id: ConceptionId) -> GraphResult<Conception> {
        let conception = self
            .conceptions
            .remove(&id)
            .ok_or(GraphError::ConceptionNotFound { id: id.get() })?;
        if let Some(edge) = self.edge_index.remove(&id) {
            self.graph.remove_edge(edge);
        }
        self.by_triple.remove(&conception.key());
        self.changes.conceptions.remove(&id);
        self.changes
            .removed_conceptions
            .insert(id, EntityRef::conception(&conception));
        Ok(conception)
    }

    /// Change a concept's label. The old term postings are removed and the new
    /// ones added in the same step.
    pub fn rename_concept(&mut self, id: ConceptId, label: &str) -> GraphResult<&Concept> {
        let normalized = normalize_term(label);
        if normalized.is_empty() {
            return Err(GraphError::EmptyLabel {
                token: label.to_owned(),
            });
        }
        if let Some(&existing_id) = self.by_label.get(&normalized) {
            if existing_id != id {
                return Err(GraphError::DuplicateLabel {
                    label: normalized,
                    existing_id: existing_id.get(),
                });
            }
        }

        let concept = self
            .concepts
            .get_mut(&id)
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
        if concept.label != normalized {
            let old = std::mem::replace(&mut concept.label, normalized.clone());
            self.index.unindex_label(&old, id);
            self.by_label.remove(&old);
            self.index.index_label(&normalized, id);
            self.by_label.insert(normalized, id);
            self.changes.concepts.insert(id);
            self.changes.relabeled.insert(id);
            self.touch();
        }

        self.concepts
            .get(&id)
            .ok_or(GraphError::ConceptNotFound { id: id.get() })
    }

    /// Set a property on a concept, returning the replaced value.
    pub fn set_concept_property(
        &mut self,
        id: ConceptId,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        let concept = self
            .concepts
            .get_mut(&id)
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?;
        let old = concept.properties.set(key, value);
        self.changes.concepts.insert(id);
        self.touch();
        Ok(old)
    }

    /// Set a property on a conception, returning the replaced value.
    pub fn set_conception_property(
        &mut self,
        id: ConceptionId,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        let conception = self
            .conceptions
            .get_mut(&id)
            .ok_or(GraphError::ConceptionNotFound { id: id.get() })?;
        let old = conception.properties.set(key, value);
        self.changes.conceptions.insert(id);
        self.touch();
        Ok(old)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    /// Look a concept up by label (normalized the same way as on insert).
    pub fn concept_by_label(&self, label: &str) -> Option<&Concept> {
        let id = self.by_label.get(&normalize_term(label))?;
        self.concepts.get(id)
    }

    pub fn conception(&self, id: ConceptionId) -> Option<&Conception> {
        self.conceptions.get(&id)
    }

    pub fn find_conception(
        &self,
        source: ConceptId,
        kind: &RelationKind,
        target: ConceptId,
    ) -> Option<&Conception> {
        let id = self.by_triple.get(&(source, kind.clone(), target))?;
        self.conceptions.get(id)
    }

    /// Outgoing conceptions of a concept, ordered by id.
    pub fn edges_from(&self, id: ConceptId) -> Vec<&Conception> {
        self.edges_directed(id, Direction::Outgoing)
    }

    /// Incoming conceptions of a concept, ordered by id.
    pub fn edges_to(&self, id: ConceptId) -> Vec<&Conception> {
        self.edges_directed(id, Direction::Incoming)
    }

    fn edges_directed(&self, id: ConceptId, direction: Direction) -> Vec<&Conception> {
        let Some(&node) = self.node_index.get(&id) else {
            return vec![];
        };
        let mut ids: Vec<ConceptionId> = self
            .graph
            .edges_directed(node, direction)
            .map(|e| *e.weight())
            .collect();
        ids.sort_unstable();
        ids.iter().filter_map(|cid| self.conceptions.get(cid)).collect()
    }

    /// Targets of outgoing conceptions, optionally restricted to one kind.
    /// Each neighbor appears once, in conception-id order.
    pub fn neighbors(&self, id: ConceptId, kind: Option<&RelationKind>) -> Vec<&Concept> {
        self.collect_neighbors(self.edges_from(id), kind, |c| c.target)
    }

    /// Sources of incoming conceptions, optionally restricted to one kind.
    pub fn incoming_neighbors(&self, id: ConceptId, kind: Option<&RelationKind>) -> Vec<&Concept> {
        self.collect_neighbors(self.edges_to(id), kind, |c| c.source)
    }

    fn collect_neighbors(
        &self,
        edges: Vec<&Conception>,
        kind: Option<&RelationKind>,
        endpoint: impl Fn(&Conception) -> ConceptId,
    ) -> Vec<&Concept> {
        let mut seen = HashSet::new();
        edges
            .into_iter()
            .filter(|c| kind.is_none_or(|k| &c.kind == k))
            .map(endpoint)
            .filter(|other| seen.insert(*other))
            .filter_map(|other| self.concepts.get(&other))
            .collect()
    }

    /// Exact-term index lookup.
    pub fn lookup(&self, term: &str) -> BTreeSet<ConceptId> {
        self.index.lookup(term)
    }

    /// Concepts whose label is `term` or contains it as a word.
    pub fn lookup_word(&self, term: &str) -> BTreeSet<ConceptId> {
        self.index.lookup_word(term)
    }

    /// All concepts, ordered by id.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    /// All conceptions, ordered by id.
    pub fn conceptions(&self) -> impl Iterator<Item = &Conception> {
        self.conceptions.values()
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    pub fn conception_count(&self) -> usize {
        self.conceptions.len()
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    /// Incremented by every mutation; derived views compare against it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn merge_policy(&self) -> &dyn MergePolicy {
        self.merge.as_ref()
    }

    // -----------------------------------------------------------------------
    // Restore / sync hooks for the persistence binder
    // -----------------------------------------------------------------------

    /// Insert a stored concept without marking it dirty.
    pub(crate) fn restore_concept(&mut self, concept: Concept) -> GraphResult<()> {
        if let Some(&existing_id) = self.by_label.get(&concept.label) {
            return Err(GraphError::DuplicateLabel {
                label: concept.label,
                existing_id: existing_id.get(),
            });
        }
        let id = concept.id;
        let node = self.graph.add_node(id);
        self.node_index.insert(id, node);
        self.by_label.insert(concept.label.clone(), id);
        self.concept_ids.observe(id.get());
        self.concepts.insert(id, concept);
        self.touch();
        Ok(())
    }

    /// Insert a stored conception without marking it dirty. Endpoints must
    /// already be restored.
    pub(crate) fn restore_conception(&mut self, conception: Conception) -> GraphResult<()> {
        let source = *self
            .node_index
            .get(&conception.source)
            .ok_or(GraphError::DanglingReference {
                role: "source",
                id: conception.source.get(),
            })?;
        let target = *self
            .node_index
            .get(&conception.target)
            .ok_or(GraphError::DanglingReference {
                role: "target",
                id: conception.target.get(),
            })?;
        let id = conception.id;
        let edge = self.graph.add_edge(source, target, id);
        self.edge_index.insert(id, edge);
        self.by_triple.insert(conception.key(), id);
        self.conception_ids.observe(id.get());
        self.conceptions.insert(id, conception);
        self.touch();
        Ok(())
    }

    /// Rebuild the inverted index from the current concept set.
    pub fn rebuild_index(&mut self) {
        self.index
            .rebuild(self.concepts.values().map(|c| (c.id, c.label.as_str())));
    }

    pub(crate) fn mark_concept_clean(&mut self, id: ConceptId) {
        self.changes.concepts.remove(&id);
        self.changes.relabeled.remove(&id);
    }

    pub(crate) fn mark_conception_clean(&mut self, id: ConceptionId) {
        self.changes.conceptions.remove(&id);
    }

    pub(crate) fn forget_removed_concept(&mut self, id: ConceptId) {
        self.changes.removed_concepts.remove(&id);
    }

    pub(crate) fn forget_removed_conception(&mut self, id: ConceptionId) {
        self.changes.removed_conceptions.remove(&id);
    }
}

impl Default for MetaGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetaGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaGraph")
            .field("concepts", &self.concept_count())
            .field("conceptions", &self.conception_count())
            .field("terms", &self.index.term_count())
            .field("pending", &self.changes.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Overwrite;

    fn counted() -> PropertySet {
        PropertySet::new().with("occurrences", 1)
    }

    #[test]
    fn add_concept_dedups_by_normalized_label() {
        let mut g = MetaGraph::new();
        let a = g.add_concept("Cat", counted()).unwrap().id;
        let b = g.add_concept("  cat ", counted()).unwrap().id;
        assert_eq!(a, b);
        assert_eq!(g.concept_count(), 1);
        assert_eq!(g.concept(a).unwrap().label, "cat");
        assert_eq!(g.concept(a).unwrap().properties.int("occurrences").unwrap(), 2);
    }

    #[test]
    fn empty_label_rejected() {
        let mut g = MetaGraph::new();
        let err = g.add_concept("   ", PropertySet::new()).unwrap_err();
        assert!(matches!(err, GraphError::EmptyLabel { .. }));
    }

    #[test]
    fn add_relation_dedups_and_merges() {
        let mut g = MetaGraph::new();
        let cat = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let small = g.add_concept("small", PropertySet::new()).unwrap().id;

        let first = g.add_relation(cat, RelationKind::Is, small, counted()).unwrap().id;
        let second = g.add_relation(cat, RelationKind::Is, small, counted()).unwrap().id;
        assert_eq!(first, second);
        assert_eq!(g.conception_count(), 1);
        let edge = g.conception(first).unwrap();
        assert_eq!(edge.properties.int("occurrences").unwrap(), 2);

        // A different kind between the same endpoints is a distinct edge.
        let has = g
            .add_relation(cat, RelationKind::Has, small, PropertySet::new())
            .unwrap()
            .id;
        assert_eq!(g.conception_count(), 2);

        assert_eq!(g.find_conception(cat, &RelationKind::Is, small).unwrap().id, first);
        assert_eq!(g.find_conception(cat, &RelationKind::Has, small).unwrap().id, has);
        assert!(g.find_conception(small, &RelationKind::Is, cat).is_none());
    }

    #[test]
    fn add_relation_rejects_dangling_endpoint() {
        let mut g = MetaGraph::new();
        let cat = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let ghost = ConceptId::new(99).unwrap();
        let err = g
            .add_relation(cat, RelationKind::Is, ghost, PropertySet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::DanglingReference {
                role: "target",
                id: 99
            }
        ));
        assert_eq!(g.conception_count(), 0);
    }

    #[test]
    fn merge_policy_is_pluggable() {
        let mut g = MetaGraph::with_merge_policy(Arc::new(Overwrite));
        g.add_concept("cat", counted()).unwrap();
        let cat = g.add_concept("cat", counted()).unwrap();
        assert_eq!(cat.properties.int("occurrences").unwrap(), 1);
    }

    #[test]
    fn neighbors_filter_by_kind() {
        let mut g = MetaGraph::new();
        let cat = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let animal = g.add_concept("animal", PropertySet::new()).unwrap().id;
        let fur = g.add_concept("fur", PropertySet::new()).unwrap().id;
        g.add_relation(cat, RelationKind::IsA, animal, PropertySet::new())
            .unwrap();
        g.add_relation(cat, RelationKind::Has, fur, PropertySet::new())
            .unwrap();

        let all: Vec<_> = g.neighbors(cat, None).iter().map(|c| c.id).collect();
        assert_eq!(all, vec![animal, fur]);
        let has: Vec<_> = g
            .neighbors(cat, Some(&RelationKind::Has))
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(has, vec![fur]);
        let incoming: Vec<_> = g
            .incoming_neighbors(animal, None)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(incoming, vec![cat]);
        assert!(g.neighbors(ConceptId::new(77).unwrap(), None).is_empty());
    }

    #[test]
    fn remove_concept_cascades_edges_and_index() {
        let mut g = MetaGraph::new();
        let cat = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let small = g.add_concept("small", PropertySet::new()).unwrap().id;
        let dog = g.add_concept("dog", PropertySet::new()).unwrap().id;
        g.add_relation(cat, RelationKind::Is, small, PropertySet::new())
            .unwrap();
        g.add_relation(dog, RelationKind::Relates, cat, PropertySet::new())
            .unwrap();
        g.add_relation(cat, RelationKind::Relates, cat, PropertySet::new())
            .unwrap();

        let removed = g.remove_concept(cat).unwrap();
        assert_eq!(removed.label, "cat");
        assert_eq!(g.conception_count(), 0);
        assert!(g.lookup("cat").is_empty());
        assert!(g.concept_by_label("cat").is_none());
        assert!(g.neighbors(dog, None).is_empty());
        assert_eq!(g.changes().removed_conceptions.len(), 3);
        assert!(g.changes().removed_concepts.contains_key(&cat));

        // The label is free again and gets a fresh id.
        let again = g.add_concept("cat", PropertySet::new()).unwrap().id;
        assert_ne!(again, cat);
        assert_eq!(g.lookup("cat"), BTreeSet::from([again]));
    }

    #[test]
    fn remove_missing_concept_is_not_found() {
        let mut g = MetaGraph::new();
        let err = g.remove_concept(ConceptId::new(5).unwrap()).unwrap_err();
        assert!(matches!(err, GraphError::ConceptNotFound { id: 5 }));
    }

    #[test]
    fn rename_moves_index_postings() {
        let mut g = MetaGraph::new();
        let id = g.add_concept("kitty", PropertySet::new()).unwrap().id;
        g.add_concept("dog", PropertySet::new()).unwrap();

        g.rename_concept(id, "Cat").unwrap();
        assert!(g.lookup("kitty").is_empty());
        assert_eq!(g.lookup("cat"), BTreeSet::from([id]));
        assert_eq!(g.concept_by_label("CAT").unwrap().id, id);
        assert!(g.changes().relabeled_concepts().eq([id]));

        g.mark_concept_clean(id);
        assert_eq!(g.changes().relabeled_concepts().count(), 0);

        let err = g.rename_concept(id, "dog").unwrap_err();
        assert!(matches!(err, GraphError::DuplicateLabel { .. }));
    }

    #[test]
    fn generation_advances_on_mutation_only() {
        let mut g = MetaGraph::new();
        let before = g.generation();
        let id = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let after_add = g.generation();
        assert!(after_add > before);

        // Re-adding without properties is a pure lookup.
        g.add_concept("cat", PropertySet::new()).unwrap();
        assert_eq!(g.generation(), after_add);

        g.set_concept_property(id, "pos", "noun").unwrap();
        assert!(g.generation() > after_add);
    }

    #[test]
    fn change_set_tracks_dirty_and_clean() {
        let mut g = MetaGraph::new();
        let cat = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let small = g.add_concept("small", PropertySet::new()).unwrap().id;
        let edge = g
            .add_relation(cat, RelationKind::Is, small, PropertySet::new())
            .unwrap()
            .id;
        assert_eq!(g.changes().len(), 3);

        g.mark_concept_clean(cat);
        g.mark_concept_clean(small);
        g.mark_conception_clean(edge);
        assert!(g.changes().is_empty());

        g.set_conception_property(edge, "sentence", 3).unwrap();
        assert_eq!(g.changes().dirty_conceptions().collect::<Vec<_>>(), vec![edge]);
    }

    #[test]
    fn restore_does_not_mark_dirty_and_resumes_ids() {
        let mut g = MetaGraph::new();
        g.restore_concept(Concept {
            id: ConceptId::new(7).unwrap(),
            label: "cat".into(),
            properties: PropertySet::new(),
        })
        .unwrap();
        g.rebuild_index();
        assert!(g.changes().is_empty());
        assert_eq!(g.lookup("cat").len(), 1);

        let next = g.add_concept("dog", PropertySet::new()).unwrap().id;
        assert_eq!(next.get(), 8);
    }
}
