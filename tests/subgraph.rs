mod common;

use std::collections::HashMap;

use serde_json::json;

use common::{processor, project, EventLog};
use xflow::{DataValue, GraphBuilder, ProcessContext, ProcessEvent};

fn inner_graph() -> xflow::Graph {
    GraphBuilder::new("inner")
        .add("x", "graphInput", json!({"id": "x", "dataType": "number"}))
        .add("inc", "increment", json!({}))
        .add("y", "graphOutput", json!({"id": "y", "dataType": "number"}))
        .connect("x", "data", "inc", "in")
        .connect("inc", "out", "y", "value")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_subgraph_runs_referenced_graph_with_mapped_inputs() {
    let outer = GraphBuilder::new("outer")
        .add("n", "number", json!({"value": 41.0}))
        .add("sub", "subGraph", json!({"graphId": "inner"}))
        .add("result", "graphOutput", json!({"id": "result", "dataType": "number"}))
        .add("took", "graphOutput", json!({"id": "took", "dataType": "number"}))
        .connect("n", "value", "sub", "x")
        .connect("sub", "y", "result", "value")
        .connect("sub", "duration", "took", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![inner_graph(), outer]), "outer");
    let log = EventLog::attach(&processor);

    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(outputs["result"], DataValue::number(42.0));
    assert!(outputs["took"].value().as_f64().unwrap() >= 0.0);

    assert_eq!(log.count("nodeFinish", "inc"), 1);
    let graph_starts: Vec<String> = log
        .events()
        .iter()
        .filter_map(|e| match e {
            ProcessEvent::GraphStart { graph_id, .. } => Some(graph_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(graph_starts, vec!["outer", "inner"]);

    let names = log.names();
    assert_eq!(names.iter().filter(|n| *n == "start").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "done").count(), 1);
}

#[tokio::test]
async fn test_subgraph_failure_reported_on_error_port() {
    let inner = GraphBuilder::new("inner")
        .add("bad", "fail", json!({}))
        .add("y", "graphOutput", json!({"id": "y", "dataType": "number"}))
        .connect("bad", "out", "y", "value")
        .build()
        .unwrap();
    let outer = GraphBuilder::new("outer")
        .add("sub", "subGraph", json!({"graphId": "inner", "useErrorOutput": true}))
        .add("err", "graphOutput", json!({"id": "err", "dataType": "string"}))
        .add("result", "graphOutput", json!({"id": "result", "dataType": "number"}))
        .connect("sub", "error", "err", "value")
        .connect("sub", "y", "result", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![inner, outer]), "outer");

    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();

    let error = outputs["err"].value();
    assert!(error.as_str().unwrap().contains("boom"));
    assert!(outputs.get("result").map_or(true, |v| v.is_excluded()));
}

#[tokio::test]
async fn test_subgraph_failure_without_error_port_fails_parent() {
    let inner = GraphBuilder::new("inner")
        .add("bad", "fail", json!({}))
        .build()
        .unwrap();
    let outer = GraphBuilder::new("outer")
        .add("sub", "subGraph", json!({"graphId": "inner"}))
        .build()
        .unwrap();
    let processor = processor(project(vec![inner, outer]), "outer");

    let err = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sub (sub)"));
}
