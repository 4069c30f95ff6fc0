//! Dependency graph benchmarks: construction, topological sort, SCC
//! detection, rebuild-set computation, and the binary serialize round trip.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use janus_core::cid::{empty_cid, DependencyCid, InterfaceCid, SemanticCid};
use janus_core::graph::{DependencyGraph, DependencyKind};
use janus_core::snapshot::NodeId as SnapshotNodeId;
use janus_core::unit::CompilationUnit;

fn chain_graph(n: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let unit = CompilationUnit::new(
            format!("file_{i}.rs"),
            SnapshotNodeId(0),
            InterfaceCid(empty_cid()),
            SemanticCid(empty_cid()),
            DependencyCid(empty_cid()),
            0,
        );
        ids.push(graph.add_node(unit));
    }
    for i in 1..n {
        graph
            .add_dependency(ids[i], ids[i - 1], DependencyKind::Import, true)
            .unwrap();
    }
    graph
}

fn bench_add_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_node");
    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(chain_graph(n)));
        });
    }
    group.finish();
}

fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || chain_graph(n),
                |mut graph| black_box(graph.topological_order().unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_detect_sccs(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_sccs");
    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || chain_graph(n),
                |mut graph| black_box(graph.detect_sccs()),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_rebuild_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild_set");
    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let graph = chain_graph(n);
            b.iter(|| black_box(graph.rebuild_set(janus_core::graph::NodeId(0))));
        });
    }
    group.finish();
}

fn bench_serialize_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize_round_trip");
    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let graph = chain_graph(n);
            b.iter(|| {
                let mut buf = Vec::new();
                graph.serialize(&mut buf).unwrap();
                black_box(DependencyGraph::deserialize(&mut &buf[..]).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_add_node,
    bench_topological_order,
    bench_detect_sccs,
    bench_rebuild_set,
    bench_serialize_round_trip,
);
criterion_main!(benches);
