//! Benchmarks for graph mutation, lookup and persistence.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use concept_graph::config::{KnowledgeConfig, SyncMode};
use concept_graph::graph::RelationKind;
use concept_graph::graph::meta::MetaGraph;
use concept_graph::graph::traverse::extract_subgraph;
use concept_graph::knowledge::Knowledge;
use concept_graph::property::PropertySet;

/// A chain of `n` concepts linked by IS_A plus a HAS edge per concept.
fn taxonomy(n: usize) -> MetaGraph {
    let mut graph = MetaGraph::new();
    let mut previous = None;
    for i in 0..n {
        let id = graph
            .add_concept(&format!("concept {i}"), PropertySet::new())
            .unwrap()
            .id;
        let part = graph
            .add_concept(&format!("part {i}"), PropertySet::new())
            .unwrap()
            .id;
        graph
            .add_relation(id, RelationKind::Has, part, PropertySet::new())
            .unwrap();
        if let Some(parent) = previous {
            graph
                .add_relation(id, RelationKind::IsA, parent, PropertySet::new())
                .unwrap();
        }
        previous = Some(id);
    }
    graph
}

fn bench_add_relation(c: &mut Criterion) {
    c.bench_function("add_relation_1k", |bench| {
        bench.iter(|| black_box(taxonomy(1_000)))
    });
}

fn bench_lookup(c: &mut Criterion) {
    let graph = taxonomy(1_000);
    c.bench_function("index_lookup", |bench| {
        bench.iter(|| black_box(graph.lookup("concept 500")))
    });
    c.bench_function("index_lookup_word", |bench| {
        bench.iter(|| black_box(graph.lookup_word("part").len()))
    });
}

fn bench_subgraph(c: &mut Criterion) {
    let graph = taxonomy(1_000);
    let seed = graph.concept_by_label("concept 500").unwrap().id;
    c.bench_function("extract_subgraph_depth3", |bench| {
        bench.iter(|| black_box(extract_subgraph(&graph, &[seed], 3).unwrap()))
    });
}

fn bench_hierarchy(c: &mut Criterion) {
    let kb = Knowledge::in_memory(KnowledgeConfig::default()).unwrap();
    for i in 1..200 {
        kb.assert_triple(&format!("level {i}"), RelationKind::IsA, &format!("level {}", i - 1), None)
            .unwrap();
    }
    c.bench_function("ancestors_cached", |bench| {
        bench.iter(|| black_box(kb.ancestors("level 199").unwrap().len()))
    });
}

fn bench_flush(c: &mut Criterion) {
    let config = KnowledgeConfig {
        sync: SyncMode::Batched,
        batch_size: usize::MAX,
        ..Default::default()
    };
    c.bench_function("flush_100_triples", |bench| {
        bench.iter_batched(
            || {
                let dir = tempfile::TempDir::new().unwrap();
                let kb = Knowledge::create(&dir.path().join("kb.redb"), None, config.clone()).unwrap();
                for i in 0..100 {
                    kb.assert_triple(&format!("item {i}"), RelationKind::IsA, "thing", None)
                        .unwrap();
                }
                (dir, kb)
            },
            |(dir, kb)| {
                black_box(kb.flush().unwrap());
                drop(kb);
                drop(dir);
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(
    benches,
    bench_add_relation,
    bench_lookup,
    bench_subgraph,
    bench_hierarchy,
    bench_flush
);
criterion_main!(benches);
