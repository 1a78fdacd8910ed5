use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use xflow::graph::ProjectMetadata;
use xflow::{DataValue, EventKind, GraphBuilder, GraphRunner, ProcessEvent, Project};

fn demo_project() -> anyhow::Result<Project> {
    let graph = GraphBuilder::new("main")
        .name("Greeting")
        .add("name", "graphInput", json!({"id": "name", "dataType": "string"}))
        .add("greeting", "text", json!({"text": "Hello, {{name}}!"}))
        .add("shout", "externalCall", json!({"functionName": "shout"}))
        .add("greetingOut", "graphOutput", json!({"id": "greeting", "dataType": "string"}))
        .add("shoutOut", "graphOutput", json!({"id": "shouted", "dataType": "string"}))
        .connect("name", "data", "greeting", "name")
        .connect("greeting", "output", "shout", "arguments")
        .connect("greeting", "output", "greetingOut", "value")
        .connect("shout", "result", "shoutOut", "value")
        .build()
        .context("building demo graph")?;
    Ok(Project::new(ProjectMetadata {
        id: "demo".into(),
        title: "Demo".into(),
        main_graph_id: Some("main".into()),
        ..Default::default()
    })
    .with_graph(graph))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== xflow dataflow engine ===\n");

    let who = std::env::args().nth(1).unwrap_or_else(|| "world".to_string());
    let outputs = GraphRunner::builder(Arc::new(demo_project()?))
        .input("name", who)
        .external_function("shout", |args: Vec<DataValue>| async move {
            let text = args
                .first()
                .and_then(|v| v.as_str().map(str::to_uppercase))
                .unwrap_or_default();
            Ok::<_, xflow::NodeError>(DataValue::string(text))
        })
        .on_event(EventKind::NodeFinish, |event| {
            if let ProcessEvent::NodeFinish { node_id, .. } = event {
                tracing::info!(node_id = %node_id, "node finished");
            }
        })
        .run()
        .await
        .context("running demo graph")?;

    let printable: serde_json::Map<String, serde_json::Value> = outputs
        .iter()
        .map(|(id, value)| (id.clone(), value.value()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&printable)?);
    Ok(())
}
