//! The knowledge store facade.
//!
//! [`Knowledge`] owns one [`MetaGraph`], its optional persistence binder, the
//! token [`Normalizer`], and a [`TreeView`] over the configured hierarchy
//! relation. Callers speak in raw tokens; the facade canonicalizes them,
//! creates concepts on demand, and keeps the store in sync according to
//! [`SyncMode`].
//!
//! Mutations take the graph's write lock for the whole call, including the
//! immediate-mode flush. Reads take the read lock and may run concurrently.

pub mod language;
pub mod normalize;

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{KnowledgeConfig, SyncMode};
use crate::error::{GraphError, KbResult};
use crate::export::GraphSnapshot;
use crate::graph::meta::MetaGraph;
use crate::graph::traverse::extract_subgraph;
use crate::graph::tree::TreeView;
use crate::graph::{Concept, ConceptId, Conception, RelationKind, Triple};
use crate::property::PropertySet;
use crate::store::{FlushReport, MetaGraphDatabase, StoreSource};

pub use language::Language;
pub use normalize::{IdentityLemmatizer, Lemmatizer, Normalizer, SuffixLemmatizer};

/// A knowledge store: graph, index, hierarchy view, and optional backing file.
pub struct Knowledge {
    config: KnowledgeConfig,
    graph: RwLock<MetaGraph>,
    binder: Option<MetaGraphDatabase>,
    normalizer: Normalizer,
    tree: TreeView,
}

impl Knowledge {
    /// Open a persistent store.
    pub fn open(source: StoreSource, config: KnowledgeConfig) -> KbResult<Self> {
        config.validate()?;
        let (binder, graph) = MetaGraphDatabase::open(&source, &config)?;
        Ok(Self::assemble(config, graph, Some(binder)))
    }

    /// Open `target` if it exists. Otherwise instantiate it from `template`
    /// when one is given, or create it with the built-in schema.
    pub fn create(target: &Path, template: Option<&Path>, config: KnowledgeConfig) -> KbResult<Self> {
        let source = match template {
            Some(template) => StoreSource::locate(target, template)?,
            None if target.exists() => StoreSource::Existing(target.to_path_buf()),
            None => StoreSource::Fresh(target.to_path_buf()),
        };
        Self::open(source, config)
    }

    /// A store that lives only in memory. Flushing is a no-op.
    pub fn in_memory(config: KnowledgeConfig) -> KbResult<Self> {
        config.validate()?;
        let graph = MetaGraph::with_merge_policy(config.merge.policy());
        Ok(Self::assemble(config, graph, None))
    }

    fn assemble(config: KnowledgeConfig, graph: MetaGraph, binder: Option<MetaGraphDatabase>) -> Self {
        Self {
            normalizer: Normalizer::from_config(&config),
            tree: TreeView::new(config.hierarchy_relation.clone()),
            graph: RwLock::new(graph),
            binder,
            config,
        }
    }

    /// Replace the token normalizer, e.g. with a custom [`Lemmatizer`].
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Path of the backing store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.binder.as_ref().map(MetaGraphDatabase::path)
    }

    /// The canonical label `token` maps to.
    pub fn canonicalize(&self, token: &str) -> String {
        self.normalizer.canonicalize(token)
    }

    /// Vocabulary view: `is`, `has`, `is_a`, and the other named relations.
    pub fn speak(&self) -> Language<'_> {
        Language::new(self)
    }

    /// Run `f` against the graph under the read lock.
    pub fn with_graph<T>(&self, f: impl FnOnce(&MetaGraph) -> T) -> T {
        let graph = self.read();
        f(&*graph)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// The concept for `token`, created if new. Counts one occurrence.
    pub fn resolve(&self, token: &str) -> KbResult<Concept> {
        let mut graph = self.write();
        let id = self.resolve_in(&mut graph, token)?;
        let concept = Self::concept_in(&graph, id)?;
        self.sync(&mut graph)?;
        Ok(concept)
    }

    /// Record `subject --kind--> object`, creating both concepts if needed.
    /// Re-asserting an existing triple merges `properties` into it and
    /// counts another occurrence.
    pub fn assert_triple(
        &self,
        subject: &str,
        kind: impl Into<RelationKind>,
        object: &str,
        properties: Option<PropertySet>,
    ) -> KbResult<Conception> {
        self.link(
            subject,
            kind.into(),
            object,
            properties.unwrap_or_default(),
            None,
            PropertySet::new(),
        )
    }

    /// Record a collaborator-supplied triple.
    pub fn assert(&self, triple: &Triple) -> KbResult<Conception> {
        self.assert_triple(
            &triple.subject,
            triple.relation.clone(),
            &triple.object,
            Some(triple.properties.clone()),
        )
    }

    /// Shared path of every relation-creating call. `merged` goes through
    /// the merge policy; `pinned` overwrites, as does the qualifier's
    /// `anchor`/`qualifier` pair.
    pub(crate) fn link(
        &self,
        subject: &str,
        kind: RelationKind,
        object: &str,
        mut merged: PropertySet,
        qualifier: Option<&str>,
        mut pinned: PropertySet,
    ) -> KbResult<Conception> {
        let mut graph = self.write();
        let source = self.resolve_in(&mut graph, subject)?;
        let target = self.resolve_in(&mut graph, object)?;
        if let Some(qualifier) = qualifier {
            let anchor = self.resolve_in(&mut graph, qualifier)?;
            let label = Self::concept_in(&graph, anchor)?.label;
            pinned.set(language::ANCHOR, anchor.get() as i64);
            pinned.set(language::QUALIFIER, label);
        }
        if !merged.contains_key(&self.config.occurrence_key) {
            merged.set(self.config.occurrence_key.clone(), 1);
        }

        let id = graph.add_relation(source, kind, target, merged)?.id;
        for (key, value) in pinned {
            graph.set_conception_property(id, key, value)?;
        }
        let conception = graph
            .conception(id)
            .cloned()
            .ok_or(GraphError::ConceptionNotFound { id: id.get() })?;
        self.sync(&mut graph)?;
        Ok(conception)
    }

    /// Remove the concept for `token` and every relation touching it.
    pub fn forget(&self, token: &str) -> KbResult<Concept> {
        let mut graph = self.write();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        let concept = graph.remove_concept(id)?;
        tracing::debug!(label = %concept.label, id = %concept.id, "forgot concept");
        self.sync(&mut graph)?;
        Ok(concept)
    }

    /// Give the concept for `token` the canonical form of `label`.
    pub fn rename(&self, token: &str, label: &str) -> KbResult<Concept> {
        let mut graph = self.write();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        let label = self.canonical(label)?;
        let concept = graph.rename_concept(id, &label)?.clone();
        tracing::debug!(label = %concept.label, id = %concept.id, "renamed concept");
        self.sync(&mut graph)?;
        Ok(concept)
    }

    /// Write pending changes to the store.
    pub fn flush(&self) -> KbResult<FlushReport> {
        let mut graph = self.write();
        match &self.binder {
            Some(binder) => Ok(binder.flush(&mut graph)?),
            None => Ok(FlushReport::default()),
        }
    }

    /// Delete every concept and relation, in memory and in the store.
    pub fn clear(&self) -> KbResult<()> {
        let mut graph = self.write();
        if let Some(binder) = &self.binder {
            binder.store().clear()?;
        }
        *graph = MetaGraph::with_merge_policy(self.config.merge.policy());
        self.tree.invalidate();
        tracing::info!("cleared knowledge store");
        Ok(())
    }

    /// Flush and release the store.
    pub fn close(mut self) -> KbResult<FlushReport> {
        let Some(binder) = self.binder.take() else {
            return Ok(FlushReport::default());
        };
        let graph = self.graph.get_mut().expect("graph lock poisoned");
        Ok(binder.close(graph)?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The concept for `token`, without creating it.
    pub fn concept(&self, token: &str) -> KbResult<Concept> {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        Self::concept_in(&graph, id)
    }

    /// Concepts whose label matches `term`, as typed or in canonical form.
    pub fn query(&self, term: &str) -> Vec<Concept> {
        let graph = self.read();
        let mut ids = graph.lookup(term);
        ids.extend(graph.lookup(&self.normalizer.canonicalize(term)));
        ids.into_iter()
            .filter_map(|id| graph.concept(id).cloned())
            .collect()
    }

    /// Like [`query`](Self::query), but also matches labels that contain
    /// `term` as one of their words.
    pub fn search(&self, term: &str) -> Vec<Concept> {
        let graph = self.read();
        let mut ids = graph.lookup_word(term);
        ids.extend(graph.lookup_word(&self.normalizer.canonicalize(term)));
        ids.into_iter()
            .filter_map(|id| graph.concept(id).cloned())
            .collect()
    }

    /// Concepts `token` points at, optionally through one relation kind.
    pub fn neighbors(&self, token: &str, kind: Option<&RelationKind>) -> KbResult<Vec<Concept>> {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        Ok(graph.neighbors(id, kind).into_iter().cloned().collect())
    }

    /// Relations leaving and entering `token`'s concept.
    pub fn relations(&self, token: &str) -> KbResult<(Vec<Conception>, Vec<Conception>)> {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        let outgoing = graph.edges_from(id).into_iter().cloned().collect();
        let incoming = graph.edges_to(id).into_iter().cloned().collect();
        Ok((outgoing, incoming))
    }

    /// Hierarchy children of `token`.
    pub fn children(&self, token: &str) -> KbResult<Vec<Concept>> {
        self.in_tree(token, |tree, graph, id| tree.children(graph, id))
    }

    /// Hierarchy parents of `token`.
    pub fn parents(&self, token: &str) -> KbResult<Vec<Concept>> {
        self.in_tree(token, |tree, graph, id| tree.parents(graph, id))
    }

    /// Every ancestor of `token`, nearest first.
    pub fn ancestors(&self, token: &str) -> KbResult<Vec<Concept>> {
        self.in_tree(token, |tree, graph, id| tree.ancestors(graph, id))
    }

    /// Every descendant of `token`.
    pub fn descendants(&self, token: &str) -> KbResult<Vec<Concept>> {
        self.in_tree(token, |tree, graph, id| tree.descendants(graph, id))
    }

    /// Concepts with no hierarchy parent.
    pub fn roots(&self) -> KbResult<Vec<Concept>> {
        let graph = self.read();
        Ok(self.tree.roots(&graph)?.into_iter().cloned().collect())
    }

    /// Whether `a` sits below `b` in the hierarchy.
    pub fn is_descendant(&self, a: &str, b: &str) -> KbResult<bool> {
        let graph = self.read();
        let a = Self::lookup_label(&graph, &self.canonical(a)?)?;
        let b = Self::lookup_label(&graph, &self.canonical(b)?)?;
        Ok(self.tree.is_descendant(&graph, a, b)?)
    }

    /// Hops from `token` to its nearest hierarchy root.
    pub fn depth(&self, token: &str) -> KbResult<usize> {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        Ok(self.tree.depth(&graph, id)?)
    }

    /// Indented outline of the hierarchy below `token`.
    pub fn outline(&self, token: &str) -> KbResult<String> {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        Ok(self.tree.render(&graph, id)?)
    }

    /// Everything within `depth` hops of `token`, in either direction.
    pub fn slice(&self, token: &str, depth: usize) -> KbResult<GraphSnapshot> {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        let walk = extract_subgraph(&graph, &[id], depth)?;
        Ok(GraphSnapshot::of_traversal(&graph, &walk))
    }

    /// The whole graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::of(&self.read())
    }

    pub fn info(&self) -> KnowledgeInfo {
        let graph = self.read();
        KnowledgeInfo {
            path: self.path().map(Path::to_path_buf),
            concepts: graph.concept_count(),
            conceptions: graph.conception_count(),
            terms: graph.index().term_count(),
            postings: graph.index().posting_count(),
            pending: graph.changes().len(),
            hierarchy: self.config.hierarchy_relation.clone(),
            sync: self.config.sync,
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, MetaGraph> {
        self.graph.read().expect("graph lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetaGraph> {
        self.graph.write().expect("graph lock poisoned")
    }

    fn canonical(&self, token: &str) -> Result<String, GraphError> {
        let label = self.normalizer.canonicalize(token);
        if label.is_empty() {
            return Err(GraphError::EmptyLabel {
                token: token.to_owned(),
            });
        }
        Ok(label)
    }

    fn resolve_in(&self, graph: &mut MetaGraph, token: &str) -> KbResult<ConceptId> {
        let label = self.canonical(token)?;
        let counted = PropertySet::new().with(self.config.occurrence_key.clone(), 1);
        Ok(graph.add_concept(&label, counted)?.id)
    }

    fn lookup_label(graph: &MetaGraph, label: &str) -> Result<ConceptId, GraphError> {
        graph
            .concept_by_label(label)
            .map(|c| c.id)
            .ok_or_else(|| GraphError::LabelNotFound {
                label: label.to_owned(),
            })
    }

    fn concept_in(graph: &MetaGraph, id: ConceptId) -> KbResult<Concept> {
        Ok(graph
            .concept(id)
            .cloned()
            .ok_or(GraphError::ConceptNotFound { id: id.get() })?)
    }

    fn in_tree<F>(&self, token: &str, f: F) -> KbResult<Vec<Concept>>
    where
        F: for<'g> FnOnce(&TreeView, &'g MetaGraph, ConceptId) -> Result<Vec<&'g Concept>, GraphError>,
    {
        let graph = self.read();
        let id = Self::lookup_label(&graph, &self.canonical(token)?)?;
        Ok(f(&self.tree, &*graph, id)?.into_iter().cloned().collect())
    }

    /// Apply the sync mode after a mutation. A failed flush leaves the
    /// changes pending for the next attempt.
    fn sync(&self, graph: &mut MetaGraph) -> KbResult<()> {
        let Some(binder) = &self.binder else {
            return Ok(());
        };
        let due = match self.config.sync {
            SyncMode::Immediate => true,
            SyncMode::Batched => graph.changes().len() >= self.config.batch_size,
        };
        if due {
            binder.flush(graph)?;
        }
        Ok(())
    }
}

impl Drop for Knowledge {
    fn drop(&mut self) {
        let Some(binder) = &self.binder else {
            return;
        };
        let Ok(graph) = self.graph.get_mut() else {
            return;
        };
        if graph.changes().is_empty() {
            return;
        }
        if let Err(e) = binder.flush(graph) {
            tracing::warn!(error = %e, "pending changes lost on drop");
        }
    }
}

impl std::fmt::Debug for Knowledge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Knowledge")
            .field("config", &self.config)
            .field("binder", &self.binder)
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}

/// Summary counters for a store.
#[derive(Debug, Clone)]
pub struct KnowledgeInfo {
    pub path: Option<PathBuf>,
    pub concepts: usize,
    pub conceptions: usize,
    pub terms: usize,
    pub postings: usize,
    pub pending: usize,
    pub hierarchy: RelationKind,
    pub sync: SyncMode,
}

impl std::fmt::Display for KnowledgeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "concept-graph store info")?;
        match &self.path {
            Some(path) => writeln!(f, "  path:         {}", path.display())?,
            None => writeln!(f, "  path:         (in memory)")?,
        }
        writeln!(f, "  concepts:     {}", self.concepts)?;
        writeln!(f, "  conceptions:  {}", self.conceptions)?;
        writeln!(f, "  terms:        {}", self.terms)?;
        writeln!(f, "  postings:     {}", self.postings)?;
        writeln!(f, "  pending:      {}", self.pending)?;
        writeln!(f, "  hierarchy:    {}", self.hierarchy)?;
        writeln!(f, "  sync:         {:?}", self.sync)?;
        Ok(())
    }
}
