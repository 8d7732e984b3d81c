//! Multi-hop graph traversal and subgraph extraction.
//!
//! Provides BFS traversal from seed concepts with depth limits and relation
//! filters, and a depth-first walk whose visitor can stop early.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::ops::ControlFlow;

use crate::error::GraphError;

use super::meta::MetaGraph;
use super::{Concept, ConceptId, Conception, ConceptionId, RelationKind};

/// Which edges a traversal follows from each concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Follow {
    /// source → target only.
    #[default]
    Outgoing,
    /// target → source only.
    Incoming,
    /// Both, treating the graph as undirected.
    Both,
}

/// Configuration for a graph traversal.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Maximum hop depth from seed concepts.
    pub max_depth: usize,
    /// Only follow conceptions of these kinds (empty = follow all).
    pub kinds: HashSet<RelationKind>,
    pub follow: Follow,
    /// Maximum number of conceptions to collect.
    pub max_results: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            kinds: HashSet::new(),
            follow: Follow::Outgoing,
            max_results: 10_000,
        }
    }
}

impl TraversalConfig {
    fn admits(&self, kind: &RelationKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(kind)
    }
}

/// Result of a multi-hop traversal.
#[derive(Debug, Clone, Default)]
pub struct TraversalResult {
    /// Conceptions discovered, in discovery order.
    pub conceptions: Vec<Conception>,
    /// Concepts visited, seeds included.
    pub visited: BTreeSet<ConceptId>,
    /// Maximum depth actually reached.
    pub depth_reached: usize,
}

/// Edges leaving `id` under `follow`, paired with the concept at the far end.
fn steps<'g>(
    graph: &'g MetaGraph,
    id: ConceptId,
    follow: Follow,
) -> Vec<(&'g Conception, ConceptId)> {
    let mut out = Vec::new();
    if matches!(follow, Follow::Outgoing | Follow::Both) {
        out.extend(graph.edges_from(id).into_iter().map(|c| (c, c.target)));
    }
    if matches!(follow, Follow::Incoming | Follow::Both) {
        out.extend(graph.edges_to(id).into_iter().map(|c| (c, c.source)));
    }
    out
}

fn require(graph: &MetaGraph, id: ConceptId) -> Result<(), GraphError> {
    graph
        .concept(id)
        .map(|_| ())
        .ok_or(GraphError::ConceptNotFound { id: id.get() })
}

/// Perform a BFS traversal from seed concepts.
///
/// Collects every conception crossed within `max_depth` hops. Each
/// conception is reported once even when both endpoints are reached.
pub fn traverse_bfs(
    graph: &MetaGraph,
    seeds: &[ConceptId],
    config: &TraversalConfig,
) -> Result<TraversalResult, GraphError> {
    let mut visited = BTreeSet::new();
    let mut crossed: HashSet<ConceptionId> = HashSet::new();
    let mut collected = Vec::new();
    let mut depth_reached = 0;

    // BFS queue: (concept, current_depth)
    let mut queue: VecDeque<(ConceptId, usize)> = VecDeque::new();

    for &seed in seeds {
        require(graph, seed)?;
        if visited.insert(seed) {
            queue.push_back((seed, 0));
        }
    }

    'walk: while let Some((node, depth)) = queue.pop_front() {
        if depth >= config.max_depth {
            continue;
        }

        for (conception, next) in steps(graph, node, config.follow) {
            if !config.admits(&conception.kind) || !crossed.insert(conception.id) {
                continue;
            }
            if collected.len() >= config.max_results {
                break 'walk;
            }
            collected.push(conception.clone());
            depth_reached = depth_reached.max(depth + 1);

            if visited.insert(next) {
                queue.push_back((next, depth + 1));
            }
        }
    }

    Ok(TraversalResult {
        conceptions: collected,
        visited,
        depth_reached,
    })
}

/// Depth-first preorder walk from `seed`.
///
/// `visit` receives each concept with its depth and may return
/// `ControlFlow::Break` to stop the walk. Returns whether the walk was
/// stopped early.
pub fn traverse_dfs<F>(
    graph: &MetaGraph,
    seed: ConceptId,
    config: &TraversalConfig,
    mut visit: F,
) -> Result<ControlFlow<()>, GraphError>
where
    F: FnMut(&Concept, usize) -> ControlFlow<()>,
{
    require(graph, seed)?;

    let mut visited: HashSet<ConceptId> = HashSet::new();
    let mut stack = vec![(seed, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        let Some(concept) = graph.concept(node) else {
            continue;
        };
        if visit(concept, depth).is_break() {
            return Ok(ControlFlow::Break(()));
        }

        if depth < config.max_depth {
            let next: Vec<ConceptId> = steps(graph, node, config.follow)
                .into_iter()
                .filter(|(c, _)| config.admits(&c.kind))
                .map(|(_, n)| n)
                .filter(|n| !visited.contains(n))
                .collect();
            // Reverse so the lowest conception id is explored first.
            stack.extend(next.into_iter().rev().map(|n| (n, depth + 1)));
        }
    }

    Ok(ControlFlow::Continue(()))
}

/// Extract the subgraph around `seeds` within `max_depth` hops, following
/// edges in both directions.
pub fn extract_subgraph(
    graph: &MetaGraph,
    seeds: &[ConceptId],
    max_depth: usize,
) -> Result<TraversalResult, GraphError> {
    traverse_bfs(
        graph,
        seeds,
        &TraversalConfig {
            max_depth,
            follow: Follow::Both,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertySet;

    /// a --r--> b --r--> c --r--> d, plus e --has--> b
    fn chain() -> (MetaGraph, Vec<ConceptId>) {
        let mut g = MetaGraph::new();
        let ids: Vec<ConceptId> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|l| g.add_concept(l, PropertySet::new()).unwrap().id)
            .collect();
        let r = RelationKind::Relates;
        g.add_relation(ids[0], r.clone(), ids[1], PropertySet::new()).unwrap();
        g.add_relation(ids[1], r.clone(), ids[2], PropertySet::new()).unwrap();
        g.add_relation(ids[2], r, ids[3], PropertySet::new()).unwrap();
        g.add_relation(ids[4], RelationKind::Has, ids[1], PropertySet::new())
            .unwrap();
        (g, ids)
    }

    #[test]
    fn bfs_depth_1() {
        let (g, ids) = chain();
        let result = traverse_bfs(
            &g,
            &[ids[0]],
            &TraversalConfig {
                max_depth: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(result.conceptions.len(), 1);
        assert_eq!(result.visited, BTreeSet::from([ids[0], ids[1]]));
        assert_eq!(result.depth_reached, 1);
    }

    #[test]
    fn bfs_full_chain() {
        let (g, ids) = chain();
        let result = traverse_bfs(&g, &[ids[0]], &TraversalConfig::default()).unwrap();
        assert_eq!(result.conceptions.len(), 3);
        assert!(result.visited.contains(&ids[3]));
        assert_eq!(result.depth_reached, 3);
    }

    #[test]
    fn bfs_kind_filter() {
        let (g, ids) = chain();
        let result = traverse_bfs(
            &g,
            &[ids[1]],
            &TraversalConfig {
                follow: Follow::Incoming,
                kinds: HashSet::from([RelationKind::Has]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(result.visited, BTreeSet::from([ids[1], ids[4]]));
    }

    #[test]
    fn bfs_max_results() {
        let (g, ids) = chain();
        let result = traverse_bfs(
            &g,
            &[ids[0]],
            &TraversalConfig {
                max_results: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(result.conceptions.len(), 2);
    }

    #[test]
    fn bfs_unknown_seed_fails() {
        let (g, _) = chain();
        let err = traverse_bfs(&g, &[ConceptId::new(99).unwrap()], &TraversalConfig::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::ConceptNotFound { id: 99 }));
    }

    #[test]
    fn subgraph_follows_both_directions() {
        let (g, ids) = chain();
        let result = extract_subgraph(&g, &[ids[1]], 1).unwrap();
        assert_eq!(result.visited, BTreeSet::from([ids[0], ids[1], ids[2], ids[4]]));
        assert_eq!(result.conceptions.len(), 3);
    }

    #[test]
    fn dfs_preorder_and_early_stop() {
        let (g, ids) = chain();
        let mut seen = Vec::new();
        let flow = traverse_dfs(&g, ids[0], &TraversalConfig::default(), |c, depth| {
            seen.push((c.label.clone(), depth));
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2),
                ("d".to_string(), 3)
            ]
        );

        let mut count = 0;
        let flow = traverse_dfs(&g, ids[0], &TraversalConfig::default(), |_, _| {
            count += 1;
            if count == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(count, 2);
    }
}
