//! Serializable views of graph state.
//!
//! A [`GraphSnapshot`] is the crate's output shape: plain concepts and
//! conceptions with their properties, ordered by id, suitable for JSON.

use serde::{Deserialize, Serialize};

use crate::graph::meta::MetaGraph;
use crate::graph::traverse::TraversalResult;
use crate::graph::{Concept, Conception};

/// Concepts and conceptions of a graph or subgraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub concepts: Vec<Concept>,
    pub conceptions: Vec<Conception>,
}

impl GraphSnapshot {
    /// Snapshot of the whole graph.
    pub fn of(graph: &MetaGraph) -> Self {
        Self {
            concepts: graph.concepts().cloned().collect(),
            conceptions: graph.conceptions().cloned().collect(),
        }
    }

    /// Snapshot of the concepts a traversal visited and the conceptions it
    /// crossed.
    pub fn of_traversal(graph: &MetaGraph, walk: &TraversalResult) -> Self {
        let mut conceptions = walk.conceptions.clone();
        conceptions.sort_by_key(|c| c.id);
        Self {
            concepts: walk
                .visited
                .iter()
                .filter_map(|&id| graph.concept(id).cloned())
                .collect(),
            conceptions,
        }
    }

    pub fn concept_by_label(&self, label: &str) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty() && self.conceptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RelationKind;
    use crate::graph::traverse::extract_subgraph;
    use crate::property::PropertySet;

    fn sample() -> MetaGraph {
        let mut g = MetaGraph::new();
        let cat = g.add_concept("cat", PropertySet::new()).unwrap().id;
        let animal = g.add_concept("animal", PropertySet::new()).unwrap().id;
        g.add_concept("rock", PropertySet::new()).unwrap();
        g.add_relation(cat, RelationKind::IsA, animal, PropertySet::new().with("occurrences", 2))
            .unwrap();
        g
    }

    #[test]
    fn full_snapshot_serializes_properties() {
        let snapshot = GraphSnapshot::of(&sample());
        assert_eq!(snapshot.concepts.len(), 3);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["conceptions"][0]["kind"], "IS_A");
        assert_eq!(json["conceptions"][0]["properties"]["occurrences"], 2);
        let back: GraphSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn traversal_snapshot_excludes_unreached() {
        let g = sample();
        let cat = g.concept_by_label("cat").unwrap().id;
        let walk = extract_subgraph(&g, &[cat], 2).unwrap();
        let snapshot = GraphSnapshot::of_traversal(&g, &walk);
        assert!(snapshot.concept_by_label("animal").is_some());
        assert!(snapshot.concept_by_label("rock").is_none());
        assert_eq!(snapshot.conceptions.len(), 1);
    }
}
