mod common;

use serde_json::json;

use xflow::graph::{deserialize_project, serialize_project_as, FormatVersion};
use xflow::{load_project_from_file, DataValue, GraphBuilder, GraphRunner, Project};

fn greeting_project() -> Project {
    let graph = GraphBuilder::new("greet")
        .name("Greeter")
        .add("name", "graphInput", json!({"id": "name", "dataType": "string"}))
        .add("t", "text", json!({"text": "Hi {{name}}"}))
        .add("o", "graphOutput", json!({"id": "greeting", "dataType": "string"}))
        .connect("name", "data", "t", "name")
        .connect("t", "output", "o", "value")
        .build()
        .unwrap();
    let project = common::project(vec![graph]);
    (*project).clone()
}

#[tokio::test]
async fn test_every_format_version_reloads_and_runs() {
    let original = greeting_project();
    for version in [FormatVersion::V1, FormatVersion::V2, FormatVersion::V3] {
        let text = serialize_project_as(&original, version).unwrap();
        let loaded = deserialize_project(&text).unwrap();

        let graph = &loaded.graphs["greet"];
        assert_eq!(graph.nodes.len(), 3, "version {}", version.number());
        assert_eq!(graph.connections.len(), 2, "version {}", version.number());

        let outputs = GraphRunner::builder(loaded)
            .graph("Greeter")
            .input("name", "Ada")
            .registry(common::registry())
            .run()
            .await
            .unwrap();
        assert_eq!(outputs["greeting"], DataValue::string("Hi Ada"));
    }
}

#[tokio::test]
async fn test_load_project_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    let text = serialize_project_as(&greeting_project(), FormatVersion::V3).unwrap();
    tokio::fs::write(&path, text).await.unwrap();

    let project = load_project_from_file(&path).await.unwrap();
    assert!(project.graphs.contains_key("greet"));

    let missing = load_project_from_file(dir.path().join("missing.json")).await;
    assert!(matches!(missing, Err(xflow::SerializationError::Io(_))));
}

#[test]
fn test_garbage_reports_every_attempt() {
    let err = deserialize_project(r#"{"version": 9, "data": 1}"#).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("v3"));
    assert!(message.contains("v1"));
}
