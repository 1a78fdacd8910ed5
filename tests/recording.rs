mod common;

use std::collections::HashMap;

use serde_json::json;

use common::{processor, project, EventLog};
use xflow::core::NodeState;
use xflow::{
    DataValue, ExecutionRecorder, GraphBuilder, ProcessContext, ProcessError, RecorderOptions,
};

fn adder() -> xflow::Graph {
    GraphBuilder::new("g")
        .add("n", "number", json!({"value": 1.0}))
        .add("inc", "increment", json!({}))
        .add("o", "graphOutput", json!({"id": "result", "dataType": "number"}))
        .connect("n", "value", "inc", "in")
        .connect("inc", "out", "o", "value")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_replay_reproduces_recorded_events_and_outputs() {
    let project = project(vec![adder()]);
    let live = processor(project.clone(), "g");
    let live_log = EventLog::attach(&live);
    let recorder = ExecutionRecorder::new(RecorderOptions::default());
    recorder.record(&live);

    let outputs = live
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert!(recorder.is_finished());

    let text = recorder.serialize().unwrap();
    let recording = ExecutionRecorder::deserialize(&text).unwrap();
    assert!(recording.finish_ts.is_some());

    let replayed = processor(project, "g");
    let replay_log = EventLog::attach(&replayed);
    let replay_outputs = replayed.replay_recording(&recording).await.unwrap();

    assert_eq!(replay_outputs, outputs);
    assert_eq!(replay_outputs["result"], DataValue::number(2.0));
    assert_eq!(replay_log.names(), live_log.names());

    let snapshot = replayed.last_run();
    assert!(snapshot.visited.contains("inc"));
    assert!(matches!(snapshot.results.get("inc"), Some(NodeState::Outputs(_))));
}

#[tokio::test]
async fn test_replay_rejects_recording_of_other_project() {
    let live = processor(project(vec![adder()]), "g");
    let recorder = ExecutionRecorder::new(RecorderOptions::default());
    recorder.record(&live);
    live.process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    let recording = recorder.wait_until_finished().await;

    let other = GraphBuilder::new("g")
        .add("o", "graphOutput", json!({"id": "result"}))
        .build()
        .unwrap();
    let replayed = processor(project(vec![other]), "g");
    let log = EventLog::attach(&replayed);

    let err = replayed.replay_recording(&recording).await.unwrap_err();
    assert!(matches!(err, ProcessError::RecordingMismatch(_)));
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn test_replay_of_failed_run_fails() {
    let graph = GraphBuilder::new("g")
        .add("bad", "fail", json!({}))
        .build()
        .unwrap();
    let project = project(vec![graph]);
    let live = processor(project.clone(), "g");
    let recorder = ExecutionRecorder::new(RecorderOptions::default());
    recorder.record(&live);
    assert!(live
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .is_err());

    let replayed = processor(project, "g");
    let err = replayed
        .replay_recording(&recorder.recording())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::ReplayFailed(_)));
    assert!(replayed.last_run().errored.contains_key("bad"));
}
