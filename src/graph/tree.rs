//! Read-only hierarchy projection over one relation kind.
//!
//! A conception `child --kind--> parent` places `child` under `parent`. The
//! projection is a DAG: a concept may have several parents. Parent and child
//! lists are cached per MetaGraph generation and rebuilt lazily the first time
//! a query runs after a mutation.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::RwLock;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::error::GraphError;

use super::meta::{GraphResult, MetaGraph};
use super::{Concept, ConceptId, RelationKind};

#[derive(Debug)]
struct Hierarchy {
    generation: u64,
    parents: HashMap<ConceptId, Vec<ConceptId>>,
    children: HashMap<ConceptId, Vec<ConceptId>>,
}

impl Hierarchy {
    fn build(graph: &MetaGraph, kind: &RelationKind) -> GraphResult<Self> {
        let mut projection: DiGraphMap<ConceptId, ()> = DiGraphMap::new();
        let mut parents: HashMap<ConceptId, Vec<ConceptId>> = HashMap::new();
        let mut children: HashMap<ConceptId, Vec<ConceptId>> = HashMap::new();

        for conception in graph.conceptions().filter(|c| &c.kind == kind) {
            projection.add_edge(conception.source, conception.target, ());
            parents
                .entry(conception.source)
                .or_default()
                .push(conception.target);
            children
                .entry(conception.target)
                .or_default()
                .push(conception.source);
        }

        if let Err(cycle) = toposort(&projection, None) {
            let id = cycle.node_id();
            let label = graph
                .concept(id)
                .map(|c| c.label.clone())
                .unwrap_or_default();
            return Err(GraphError::CycleDetected {
                relation: kind.to_string(),
                id: id.get(),
                label,
            });
        }

        for list in parents.values_mut().chain(children.values_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        Ok(Self {
            generation: graph.generation(),
            parents,
            children,
        })
    }

    fn parents_of(&self, id: ConceptId) -> &[ConceptId] {
        self.parents.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    fn children_of(&self, id: ConceptId) -> &[ConceptId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Breadth-first closure over `next`, excluding `start`, nearest first.
    fn closure<'a>(
        &'a self,
        start: ConceptId,
        next: impl Fn(&'a Self, ConceptId) -> &'a [ConceptId],
    ) -> Vec<ConceptId> {
        let mut seen = HashSet::from([start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &other in next(self, node) {
                if seen.insert(other) {
                    order.push(other);
                    queue.push_back(other);
                }
            }
        }
        order
    }

    fn depth(&self, id: ConceptId) -> usize {
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([(id, 0)]);
        while let Some((node, hops)) = queue.pop_front() {
            let up = self.parents_of(node);
            if up.is_empty() {
                return hops;
            }
            for &parent in up {
                if seen.insert(parent) {
                    queue.push_back((parent, hops + 1));
                }
            }
        }
        0
    }
}

/// Hierarchy view over conceptions of a single [`RelationKind`].
#[derive(Debug)]
pub struct TreeView {
    kind: RelationKind,
    cache: RwLock<Option<Hierarchy>>,
}

impl TreeView {
    pub fn new(kind: RelationKind) -> Self {
        Self {
            kind,
            cache: RwLock::new(None),
        }
    }

    /// The relation kind this view projects.
    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    /// Drop the cached hierarchy.
    pub fn invalidate(&self) {
        *self.cache.write().expect("tree cache lock poisoned") = None;
    }

    fn with_hierarchy<T>(
        &self,
        graph: &MetaGraph,
        id: Option<ConceptId>,
        f: impl FnOnce(&Hierarchy) -> T,
    ) -> GraphResult<T> {
        if let Some(id) = id {
            if graph.concept(id).is_none() {
                return Err(GraphError::ConceptNotFound { id: id.get() });
            }
        }

        {
            let cache = self.cache.read().expect("tree cache lock poisoned");
            if let Some(hierarchy) = cache.as_ref() {
                if hierarchy.generation == graph.generation() {
                    return Ok(f(hierarchy));
                }
            }
        }

        let hierarchy = Hierarchy::build(graph, &self.kind)?;
        tracing::debug!(
            relation = %self.kind,
            generation = hierarchy.generation,
            members = hierarchy.parents.len() + hierarchy.children.len(),
            "rebuilt hierarchy cache"
        );
        let result = f(&hierarchy);
        *self.cache.write().expect("tree cache lock poisoned") = Some(hierarchy);
        Ok(result)
    }

    fn resolve<'g>(graph: &'g MetaGraph, ids: impl IntoIterator<Item = ConceptId>) -> Vec<&'g Concept> {
        ids.into_iter().filter_map(|id| graph.concept(id)).collect()
    }

    /// Direct children of `id`, ordered by id.
    pub fn children<'g>(&self, graph: &'g MetaGraph, id: ConceptId) -> GraphResult<Vec<&'g Concept>> {
        let ids = self.with_hierarchy(graph, Some(id), |h| h.children_of(id).to_vec())?;
        Ok(Self::resolve(graph, ids))
    }

    /// Direct parents of `id`, ordered by id.
    pub fn parents<'g>(&self, graph: &'g MetaGraph, id: ConceptId) -> GraphResult<Vec<&'g Concept>> {
        let ids = self.with_hierarchy(graph, Some(id), |h| h.parents_of(id).to_vec())?;
        Ok(Self::resolve(graph, ids))
    }

    /// All ancestors of `id`, nearest first.
    pub fn ancestors<'g>(&self, graph: &'g MetaGraph, id: ConceptId) -> GraphResult<Vec<&'g Concept>> {
        let ids = self.with_hierarchy(graph, Some(id), |h| h.closure(id, Hierarchy::parents_of))?;
        Ok(Self::resolve(graph, ids))
    }

    /// All descendants of `id`, nearest first.
    pub fn descendants<'g>(
        &self,
        graph: &'g MetaGraph,
        id: ConceptId,
    ) -> GraphResult<Vec<&'g Concept>> {
        let ids = self.with_hierarchy(graph, Some(id), |h| h.closure(id, Hierarchy::children_of))?;
        Ok(Self::resolve(graph, ids))
    }

    /// Whether `a` sits strictly below `b`.
    pub fn is_descendant(&self, graph: &MetaGraph, a: ConceptId, b: ConceptId) -> GraphResult<bool> {
        if graph.concept(b).is_none() {
            return Err(GraphError::ConceptNotFound { id: b.get() });
        }
        self.with_hierarchy(graph, Some(a), |h| {
            a != b && h.closure(a, Hierarchy::parents_of).contains(&b)
        })
    }

    /// Concepts that have children but no parents, ordered by id.
    pub fn roots<'g>(&self, graph: &'g MetaGraph) -> GraphResult<Vec<&'g Concept>> {
        let ids = self.with_hierarchy(graph, None, |h| {
            h.children
                .keys()
                .filter(|id| h.parents_of(**id).is_empty())
                .copied()
                .collect::<BTreeSet<_>>()
        })?;
        Ok(Self::resolve(graph, ids))
    }

    /// Hops from `id` to its nearest root. Concepts outside the hierarchy
    /// have depth 0.
    pub fn depth(&self, graph: &MetaGraph, id: ConceptId) -> GraphResult<usize> {
        self.with_hierarchy(graph, Some(id), |h| h.depth(id))
    }

    /// Indented outline of `id` and everything below it, two spaces per
    /// level. A concept with several parents is printed under each.
    pub fn render(&self, graph: &MetaGraph, id: ConceptId) -> GraphResult<String> {
        let lines = self.with_hierarchy(graph, Some(id), |h| {
            let mut lines = Vec::new();
            let mut stack = vec![(id, 0usize)];
            while let Some((node, level)) = stack.pop() {
                lines.push((node, level));
                stack.extend(h.children_of(node).iter().rev().map(|&c| (c, level + 1)));
            }
            lines
        })?;

        let mut out = String::new();
        for (node, level) in lines {
            let label = graph.concept(node).map(|c| c.label.as_str()).unwrap_or("?");
            let _ = writeln!(out, "{:indent$}{label}", "", indent = level * 2);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertySet;

    fn add(g: &mut MetaGraph, label: &str) -> ConceptId {
        g.add_concept(label, PropertySet::new()).unwrap().id
    }

    fn labels(concepts: Vec<&Concept>) -> Vec<&str> {
        concepts.into_iter().map(|c| c.label.as_str()).collect()
    }

    /// cat -> feline -> animal; dog -> animal
    fn taxonomy() -> (MetaGraph, [ConceptId; 4]) {
        let mut g = MetaGraph::new();
        let animal = add(&mut g, "animal");
        let feline = add(&mut g, "feline");
        let cat = add(&mut g, "cat");
        let dog = add(&mut g, "dog");
        for (child, parent) in [(cat, feline), (feline, animal), (dog, animal)] {
            g.add_relation(child, RelationKind::IsA, parent, PropertySet::new())
                .unwrap();
        }
        (g, [animal, feline, cat, dog])
    }

    #[test]
    fn children_and_ancestors() {
        let (g, [animal, feline, cat, _]) = taxonomy();
        let tree = TreeView::new(RelationKind::IsA);

        assert_eq!(labels(tree.children(&g, animal).unwrap()), vec!["feline", "dog"]);
        assert_eq!(labels(tree.ancestors(&g, cat).unwrap()), vec!["feline", "animal"]);
        assert_eq!(labels(tree.parents(&g, feline).unwrap()), vec!["animal"]);
        assert!(tree.is_descendant(&g, cat, animal).unwrap());
        assert!(!tree.is_descendant(&g, animal, cat).unwrap());
        assert!(!tree.is_descendant(&g, cat, cat).unwrap());
    }

    #[test]
    fn roots_depth_descendants() {
        let (g, [animal, _, cat, dog]) = taxonomy();
        let tree = TreeView::new(RelationKind::IsA);

        assert_eq!(labels(tree.roots(&g).unwrap()), vec!["animal"]);
        assert_eq!(tree.depth(&g, cat).unwrap(), 2);
        assert_eq!(tree.depth(&g, dog).unwrap(), 1);
        assert_eq!(tree.depth(&g, animal).unwrap(), 0);
        assert_eq!(
            labels(tree.descendants(&g, animal).unwrap()),
            vec!["feline", "dog", "cat"]
        );
    }

    #[test]
    fn other_kinds_are_ignored() {
        let (mut g, [animal, _, cat, _]) = taxonomy();
        g.add_relation(animal, RelationKind::Has, cat, PropertySet::new())
            .unwrap();
        let tree = TreeView::new(RelationKind::IsA);
        // HAS would close a cycle if it were projected.
        assert_eq!(tree.depth(&g, cat).unwrap(), 2);

        let has_tree = TreeView::new(RelationKind::Has);
        assert_eq!(labels(has_tree.children(&g, cat).unwrap()), vec!["animal"]);
    }

    #[test]
    fn cache_follows_mutations() {
        let (mut g, [animal, ..]) = taxonomy();
        let tree = TreeView::new(RelationKind::IsA);
        assert_eq!(tree.children(&g, animal).unwrap().len(), 2);

        let bird = add(&mut g, "bird");
        g.add_relation(bird, RelationKind::IsA, animal, PropertySet::new())
            .unwrap();
        assert_eq!(tree.children(&g, animal).unwrap().len(), 3);

        g.remove_concept(bird).unwrap();
        assert_eq!(tree.children(&g, animal).unwrap().len(), 2);
    }

    #[test]
    fn cycle_is_reported_not_looped() {
        let (mut g, [animal, _, cat, _]) = taxonomy();
        g.add_relation(animal, RelationKind::IsA, cat, PropertySet::new())
            .unwrap();
        let tree = TreeView::new(RelationKind::IsA);
        let err = tree.ancestors(&g, cat).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn unknown_concept_is_not_found() {
        let (g, _) = taxonomy();
        let tree = TreeView::new(RelationKind::IsA);
        let err = tree.children(&g, ConceptId::new(42).unwrap()).unwrap_err();
        assert!(matches!(err, GraphError::ConceptNotFound { id: 42 }));
    }

    #[test]
    fn render_outline() {
        let (g, [animal, ..]) = taxonomy();
        let tree = TreeView::new(RelationKind::IsA);
        let text = tree.render(&g, animal).unwrap();
        assert_eq!(text, "animal\n  feline\n    cat\n  dog\n");
    }
}
