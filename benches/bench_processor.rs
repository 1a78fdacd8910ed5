use std::collections::HashMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

use xflow::graph::{deserialize_project, serialize_project, ProjectMetadata};
use xflow::{Graph, GraphBuilder, GraphProcessor, ProcessContext, Project};

fn bench_runtime() -> Runtime {
    Runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

fn wrap(graph: Graph) -> Arc<Project> {
    Arc::new(
        Project::new(ProjectMetadata {
            id: "bench".into(),
            title: "Bench".into(),
            ..Default::default()
        })
        .with_graph(graph),
    )
}

/// `t0 -> t1 -> ... -> out`, each text node appending to its predecessor.
fn linear_graph(len: usize) -> Graph {
    let mut builder = GraphBuilder::new("g")
        .add("t0", "text", json!({"text": "x"}))
        .add("out", "graphOutput", json!({"id": "result", "dataType": "string"}));
    for i in 1..len {
        let id = format!("t{i}");
        let prev = format!("t{}", i - 1);
        builder = builder
            .add(&id, "text", json!({"text": "{{prev}}x"}))
            .connect(&prev, "output", &id, "prev");
    }
    builder
        .connect(&format!("t{}", len - 1), "output", "out", "value")
        .build()
        .expect("valid graph")
}

/// One source feeding `width` text nodes, each with its own output.
fn fanout_graph(width: usize) -> Graph {
    let mut builder = GraphBuilder::new("g").add("src", "text", json!({"text": "seed"}));
    for i in 0..width {
        let branch = format!("b{i}");
        let output = format!("o{i}");
        builder = builder
            .add(&branch, "text", json!({"text": "{{v}}!"}))
            .add(
                &output,
                "graphOutput",
                json!({"id": format!("r{i}"), "dataType": "string"}),
            )
            .connect("src", "output", &branch, "v")
            .connect(&branch, "output", &output, "value");
    }
    builder.build().expect("valid graph")
}

fn bench_graphs(c: &mut Criterion) {
    let rt = bench_runtime();

    let mut group = c.benchmark_group("processor/linear");
    for len in [5usize, 20, 100] {
        let processor = GraphProcessor::new(wrap(linear_graph(len)), "g").expect("processor");
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.to_async(&rt).iter(|| async {
                processor
                    .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
                    .await
                    .expect("run")
            });
        });
    }
    group.finish();

    let mut group = c.benchmark_group("processor/fanout");
    for width in [10usize, 50] {
        let processor = GraphProcessor::new(wrap(fanout_graph(width)), "g").expect("processor");
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.to_async(&rt).iter(|| async {
                processor
                    .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
                    .await
                    .expect("run")
            });
        });
    }
    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let project = wrap(fanout_graph(50));
    let text = serialize_project(&project).expect("serialize");

    c.bench_function("serialization/project_v3_write", |b| {
        b.iter(|| serialize_project(&project).expect("serialize"))
    });
    c.bench_function("serialization/project_v3_read", |b| {
        b.iter(|| deserialize_project(&text).expect("deserialize"))
    });
}

criterion_group!(benches, bench_graphs, bench_serialization);
criterion_main!(benches);
