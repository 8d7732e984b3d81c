//! Binds a [`MetaGraph`] to a [`GraphDatabase`].
//!
//! Opening loads every stored node and edge into a fresh graph and rebuilds
//! the inverted index. Flushing writes the graph's [`ChangeSet`] back in
//! dependency order:
//!
//! 1. delete removed conceptions
//! 2. delete removed concepts
//! 3. rewrite renamed concepts, all in one transaction
//! 4. upsert the other dirty concepts
//! 5. upsert dirty conceptions
//!
//! Renamed concepts go together so labels can move between them (a swap has
//! no valid one-at-a-time order). Every other entity is written in its own
//! transaction. Entities are marked clean only after their commit, so an
//! aborted flush can simply be run again.
//!
//! [`ChangeSet`]: crate::graph::meta::ChangeSet

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{KnowledgeConfig, RetryPolicy};
use crate::error::{FlushError, KbError, KbResult, SchemaError, StoreError};
use crate::graph::index::normalize_term;
use crate::graph::meta::MetaGraph;
use crate::graph::{Concept, ConceptId, Conception, ConceptionId, EntityRef};
use crate::property::{MergePolicy, PropertySet};

use super::graph_db::GraphDatabase;

/// Where a knowledge store comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSource {
    /// Open a store that already exists.
    Existing(PathBuf),
    /// Instantiate `target` from `template`.
    Template { template: PathBuf, target: PathBuf },
    /// Create a new store with the built-in schema.
    Fresh(PathBuf),
}

impl StoreSource {
    /// Open `target` if it exists, otherwise instantiate it from `template`.
    /// Fails when neither file exists.
    pub fn locate(target: &Path, template: &Path) -> Result<Self, SchemaError> {
        if target.exists() {
            Ok(StoreSource::Existing(target.to_path_buf()))
        } else if template.exists() {
            Ok(StoreSource::Template {
                template: template.to_path_buf(),
                target: target.to_path_buf(),
            })
        } else {
            Err(SchemaError::Missing {
                path: template.display().to_string(),
            })
        }
    }

    /// Path of the store this source ends up at.
    pub fn target(&self) -> &Path {
        match self {
            StoreSource::Existing(path) | StoreSource::Fresh(path) => path,
            StoreSource::Template { target, .. } => target,
        }
    }
}

/// Counts from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub concepts_written: usize,
    pub conceptions_written: usize,
    pub concepts_deleted: usize,
    pub conceptions_deleted: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.concepts_written
            + self.conceptions_written
            + self.concepts_deleted
            + self.conceptions_deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} concept(s) and {} conception(s) written, {} concept(s) and {} conception(s) deleted",
            self.concepts_written,
            self.conceptions_written,
            self.concepts_deleted,
            self.conceptions_deleted
        )
    }
}

#[derive(Debug, Clone)]
enum Step {
    DeleteConception(ConceptionId),
    DeleteConcept(ConceptId),
    Relabel(Vec<ConceptId>),
    PutConcept(ConceptId),
    PutConception(ConceptionId),
}

/// Persistence binder for one knowledge store.
pub struct MetaGraphDatabase {
    store: GraphDatabase,
    retry: RetryPolicy,
}

impl MetaGraphDatabase {
    /// Open the store named by `source` and load it into a new graph.
    pub fn open(source: &StoreSource, config: &KnowledgeConfig) -> KbResult<(Self, MetaGraph)> {
        let retry = config.retry;
        let store = retry.run("open store", KbError::is_transient, || match source {
            StoreSource::Existing(path) => GraphDatabase::open(path),
            StoreSource::Template { template, target } => {
                GraphDatabase::instantiate(template, target)
            }
            StoreSource::Fresh(path) => GraphDatabase::create(path),
        })?;
        let binder = Self { store, retry };
        let graph = binder.load(config.merge.policy())?;
        tracing::info!(
            path = %binder.store.path().display(),
            concepts = graph.concept_count(),
            conceptions = graph.conception_count(),
            terms = graph.index().term_count(),
            "opened knowledge store"
        );
        Ok((binder, graph))
    }

    /// Read every stored row into a new graph. Ids resume after the largest
    /// stored ones; the index is rebuilt from scratch.
    pub fn load(&self, merge: Arc<dyn MergePolicy>) -> KbResult<MetaGraph> {
        let nodes = self.retry.run("load nodes", StoreError::is_transient, || {
            self.store.load_all_nodes()
        })?;
        let edges = self.retry.run("load edges", StoreError::is_transient, || {
            self.store.load_all_edges()
        })?;

        let mut graph = MetaGraph::with_merge_policy(merge);
        for node in nodes {
            let id = ConceptId::new(node.id).ok_or(StoreError::Serialization {
                entity: "node",
                id: node.id,
                message: "zero id".into(),
            })?;
            graph.restore_concept(Concept {
                id,
                label: normalize_term(&node.label),
                properties: node.properties,
            })?;
        }
        for edge in edges {
            let missing = |role: &'static str, node_id: u64| StoreError::DanglingEdge {
                edge_id: edge.id,
                role,
                node_id,
            };
            let id = ConceptionId::new(edge.id).ok_or(StoreError::Serialization {
                entity: "edge",
                id: edge.id,
                message: "zero id".into(),
            })?;
            let source = ConceptId::new(edge.source).ok_or(missing("source", edge.source))?;
            let target = ConceptId::new(edge.target).ok_or(missing("target", edge.target))?;
            graph.restore_conception(Conception {
                id,
                source,
                kind: edge.kind,
                target,
                properties: edge.properties,
            })?;
        }
        graph.rebuild_index();
        tracing::debug!(
            concepts = graph.concept_count(),
            conceptions = graph.conception_count(),
            "loaded graph from store"
        );
        Ok(graph)
    }

    /// Write every pending change of `graph` to the store.
    pub fn flush(&self, graph: &mut MetaGraph) -> Result<FlushReport, FlushError> {
        let changes = graph.changes();
        if changes.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut steps: Vec<(Step, Vec<EntityRef>)> = Vec::with_capacity(changes.len());
        steps.extend(
            changes
                .removed_conceptions()
                .map(|(id, entity)| (Step::DeleteConception(id), vec![entity.clone()])),
        );
        steps.extend(
            changes
                .removed_concepts()
                .map(|(id, entity)| (Step::DeleteConcept(id), vec![entity.clone()])),
        );
        let relabeled: Vec<ConceptId> = changes
            .relabeled_concepts()
            .filter(|id| graph.concept(*id).is_some())
            .collect();
        if !relabeled.is_empty() {
            let entities = relabeled
                .iter()
                .filter_map(|id| graph.concept(*id).map(EntityRef::concept))
                .collect();
            steps.push((Step::Relabel(relabeled), entities));
        }
        steps.extend(
            changes
                .dirty_concepts()
                .filter(|id| !changes.relabeled.contains(id))
                .filter_map(|id| {
                    graph
                        .concept(id)
                        .map(|c| (Step::PutConcept(id), vec![EntityRef::concept(c)]))
                }),
        );
        steps.extend(changes.dirty_conceptions().filter_map(|id| {
            graph
                .conception(id)
                .map(|c| (Step::PutConception(id), vec![EntityRef::conception(c)]))
        }));

        let mut report = FlushReport::default();
        let mut completed = Vec::with_capacity(changes.len());
        for (position, (step, entities)) in steps.iter().enumerate() {
            if let Err(source) = self.apply(graph, step, &mut report) {
                let failed = entities[0].clone();
                let pending: Vec<EntityRef> = entities[1..]
                    .iter()
                    .chain(steps[position + 1..].iter().flat_map(|(_, e)| e))
                    .cloned()
                    .collect();
                tracing::warn!(
                    entity = %failed,
                    error = %source,
                    completed = completed.len(),
                    pending = pending.len(),
                    "flush aborted"
                );
                return Err(FlushError::Aborted {
                    failed,
                    source,
                    completed,
                    pending,
                });
            }
            for entity in entities {
                tracing::debug!(entity = %entity, "flushed");
            }
            completed.extend(entities.iter().cloned());
        }

        tracing::info!(
            written = report.concepts_written + report.conceptions_written,
            deleted = report.concepts_deleted + report.conceptions_deleted,
            "flushed knowledge graph"
        );
        Ok(report)
    }

    fn apply(&self, graph: &mut MetaGraph, step: &Step, report: &mut FlushReport) -> Result<(), StoreError> {
        match *step {
            Step::DeleteConception(id) => {
                let what = format!("delete {id}");
                tolerate_missing(self.retry.run(&what, StoreError::is_transient, || {
                    self.store.delete_edge(id.get())
                }))?;
                graph.forget_removed_conception(id);
                report.conceptions_deleted += 1;
            }
            Step::DeleteConcept(id) => {
                let what = format!("delete {id}");
                tolerate_missing(self.retry.run(&what, StoreError::is_transient, || {
                    self.store.delete_node(id.get())
                }))?;
                graph.forget_removed_concept(id);
                report.concepts_deleted += 1;
            }
            Step::Relabel(ref ids) => {
                let rows: Vec<(u64, &str, &PropertySet)> = ids
                    .iter()
                    .filter_map(|id| graph.concept(*id))
                    .map(|c| (c.id.get(), c.label.as_str(), &c.properties))
                    .collect();
                let what = format!("relabel {} concept(s)", rows.len());
                self.retry.run(&what, StoreError::is_transient, || {
                    self.store.relabel_nodes(&rows)
                })?;
                let written = rows.len();
                for &id in ids {
                    graph.mark_concept_clean(id);
                }
                report.concepts_written += written;
            }
            Step::PutConcept(id) => {
                let Some(concept) = graph.concept(id) else {
                    return Ok(());
                };
                let what = format!("write {id}");
                self.retry.run(&what, StoreError::is_transient, || {
                    self.store
                        .put_node(id.get(), &concept.label, &concept.properties)
                })?;
                graph.mark_concept_clean(id);
                report.concepts_written += 1;
            }
            Step::PutConception(id) => {
                let Some(conception) = graph.conception(id) else {
                    return Ok(());
                };
                let what = format!("write {id}");
                self.retry.run(&what, StoreError::is_transient, || {
                    self.store.put_edge(
                        id.get(),
                        conception.source.get(),
                        &conception.kind,
                        conception.target.get(),
                        &conception.properties,
                    )
                })?;
                graph.mark_conception_clean(id);
                report.conceptions_written += 1;
            }
        }
        Ok(())
    }

    /// Flush and release the store handle.
    pub fn close(self, graph: &mut MetaGraph) -> Result<FlushReport, FlushError> {
        let report = self.flush(graph)?;
        tracing::info!(path = %self.store.path().display(), %report, "closed knowledge store");
        Ok(report)
    }

    pub fn store(&self) -> &GraphDatabase {
        &self.store
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

impl fmt::Debug for MetaGraphDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaGraphDatabase")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A row that is already gone counts as deleted.
fn tolerate_missing(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(StoreError::NotFound { .. }) => Ok(()),
        other => other,
    }
}
