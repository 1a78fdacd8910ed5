mod common;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;

use common::{processor, project, EventLog};
use xflow::{
    DataValue, EventKind, GraphBuilder, GraphProcessor, NodeError, ProcessContext, ProcessError,
    ProcessEvent,
};

fn spawn_run(
    processor: &GraphProcessor,
) -> tokio::task::JoinHandle<Result<HashMap<String, DataValue>, ProcessError>> {
    let processor = processor.clone();
    tokio::spawn(async move {
        processor
            .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
            .await
    })
}

#[tokio::test]
async fn test_abort_mid_run_cancels_in_flight_nodes() {
    let graph = GraphBuilder::new("g")
        .add("slow", "slow", json!({"ms": 10_000.0}))
        .add("out", "graphOutput", json!({"id": "out", "dataType": "boolean"}))
        .connect("slow", "out", "out", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let log = EventLog::attach(&processor);

    let started = Instant::now();
    let handle = spawn_run(&processor);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(processor.abort(false, Some("stopped by test".to_string())));
    assert!(!processor.abort(false, None));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ProcessError::Aborted(ref m) if m == "stopped by test"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(log.count("nodeError", "slow"), 1);
    assert_eq!(log.count("nodeStart", "out"), 0);
    assert!(log.events().contains(&ProcessEvent::Abort {
        successful: false,
        error: Some("stopped by test".to_string()),
    }));
}

#[tokio::test]
async fn test_successful_abort_returns_outputs_so_far() {
    let graph = GraphBuilder::new("g")
        .add("fast", "number", json!({"value": 5.0}))
        .add("fastOut", "graphOutput", json!({"id": "fast", "dataType": "number"}))
        .add("slow", "slow", json!({"ms": 10_000.0}))
        .add("slowOut", "graphOutput", json!({"id": "slow", "dataType": "boolean"}))
        .connect("fast", "value", "fastOut", "value")
        .connect("slow", "out", "slowOut", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let log = EventLog::attach(&processor);

    let handle = spawn_run(&processor);
    tokio::time::sleep(Duration::from_millis(100)).await;
    processor.abort(true, None);

    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs["fast"], DataValue::number(5.0));
    assert!(!outputs.contains_key("slow"));
    assert_eq!(log.names().last().map(String::as_str), Some("done"));
    assert!(processor.last_run().visited.contains("fastOut"));
}

#[tokio::test]
async fn test_abort_when_idle_is_a_no_op() {
    let graph = GraphBuilder::new("g")
        .add("n", "number", json!({"value": 1.0}))
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    assert!(!processor.abort(false, None));
}

#[tokio::test]
async fn test_pause_holds_dispatch_until_resume() {
    let graph = GraphBuilder::new("g")
        .add("n", "number", json!({"value": 1.0}))
        .add("out", "graphOutput", json!({"id": "out", "dataType": "number"}))
        .connect("n", "value", "out", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let log = EventLog::attach(&processor);

    processor.pause();
    assert!(processor.is_paused());
    let handle = spawn_run(&processor);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.count("nodeFinish", "n"), 0);

    processor.resume();
    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs["out"], DataValue::number(1.0));
    let names = log.names();
    assert_eq!(names[0], "pause");
    assert!(names.contains(&"resume".to_string()));
}

#[tokio::test]
async fn test_user_input_resolves_waiting_node() {
    let graph = GraphBuilder::new("g")
        .add("ask", "userInput", json!({"prompt": "Continue?"}))
        .add("out", "graphOutput", json!({"id": "answers", "dataType": "string[]"}))
        .add("qa", "graphOutput", json!({"id": "qa", "dataType": "string[]"}))
        .connect("ask", "output", "out", "value")
        .connect("ask", "questionsAndAnswers", "qa", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let mut requests = processor.events().subscribe(EventKind::UserInput);

    let handle = spawn_run(&processor);
    let request = requests.recv().await.unwrap();
    assert_eq!(request.node_id(), Some("ask"));
    assert!(!processor.user_input("someone-else", vec!["no".into()]));
    assert!(processor.user_input("ask", vec!["yes".into()]));

    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs["answers"].value(), json!(["yes"]));
    assert_eq!(outputs["qa"].value(), json!(["Q: Continue?\nA: yes"]));
}

#[tokio::test]
async fn test_abort_rejects_pending_user_input() {
    let graph = GraphBuilder::new("g")
        .add("ask", "userInput", json!({"prompt": "?"}))
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let mut requests = processor.events().subscribe(EventKind::UserInput);

    let handle = spawn_run(&processor);
    requests.recv().await.unwrap();
    processor.abort(false, None);
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ProcessError::Aborted(ref m) if m == "run was cancelled"));
}

#[tokio::test]
async fn test_wait_for_global_resumes_when_set() {
    let graph = GraphBuilder::new("g")
        .add("get", "getGlobal", json!({"id": "token", "onDemand": false, "wait": true}))
        .add("out", "graphOutput", json!({"id": "token", "dataType": "string"}))
        .add("value", "text", json!({"text": "secret"}))
        .add("slow", "slow", json!({"ms": 50.0}))
        .add("set", "setGlobal", json!({"id": "token"}))
        .connect("get", "value", "out", "value")
        .connect("value", "output", "slow", "in")
        .connect("slow", "out", "set", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let log = EventLog::attach(&processor);

    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(outputs["token"], DataValue::string("secret"));
    assert_eq!(processor.get_global("token"), Some(DataValue::string("secret")));
    assert_eq!(log.count("nodeStart", "get"), 1);
}

#[tokio::test]
async fn test_on_demand_global_reads_latest_value() {
    let graph = GraphBuilder::new("g")
        .add("get", "getGlobal", json!({"id": "greeting"}))
        .add("out", "graphOutput", json!({"id": "greeting", "dataType": "fn<string>"}))
        .connect("get", "value", "out", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();

    let lazy = outputs["greeting"].clone();
    assert_eq!(lazy.value(), json!(""));
    processor.set_global("greeting", DataValue::string("hi"));
    assert_eq!(lazy.value(), json!("hi"));
}

#[tokio::test]
async fn test_wait_for_event_receives_raised_data() {
    let graph = GraphBuilder::new("g")
        .add("wait", "waitForEvent", json!({"eventName": "go"}))
        .add("out", "graphOutput", json!({"id": "payload", "dataType": "any"}))
        .connect("wait", "eventData", "out", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let mut starts = processor.events().subscribe(EventKind::NodeStart);

    let handle = spawn_run(&processor);
    starts.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    processor.raise_event("ignored", Some(DataValue::string("nope")));
    processor.raise_event("go", Some(DataValue::string("payload")));

    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs["payload"].value(), json!("payload"));
}

#[tokio::test]
async fn test_external_call_uses_registered_function() {
    let graph = GraphBuilder::new("g")
        .add("n", "number", json!({"value": 20.0}))
        .add("call", "externalCall", json!({"functionName": "double"}))
        .add("missing", "externalCall", json!({"functionName": "nope", "useErrorOutput": true}))
        .add("out", "graphOutput", json!({"id": "doubled", "dataType": "number"}))
        .add("err", "graphOutput", json!({"id": "error", "dataType": "string"}))
        .connect("n", "value", "call", "arguments")
        .connect("call", "result", "out", "value")
        .connect("missing", "error", "err", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    processor.set_external_function("double", |args: Vec<DataValue>| async move {
        match args.first().and_then(|v| v.value().as_f64()) {
            Some(n) => Ok(DataValue::number(n * 2.0)),
            None => Err(NodeError::ExecutionError("expected a number".into())),
        }
    });

    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(outputs["doubled"], DataValue::number(40.0));
    assert_eq!(outputs["error"], DataValue::string("Function nope not found"));
}

#[tokio::test]
async fn test_race_takes_first_branch_and_cancels_the_rest() {
    let graph = GraphBuilder::new("g")
        .add("quickText", "text", json!({"text": "quick"}))
        .add("lazyText", "text", json!({"text": "lazy"}))
        .add("quick", "slow", json!({"ms": 20.0}))
        .add("lazy", "slow", json!({"ms": 5_000.0}))
        .add("race", "raceInputs", json!({}))
        .add("out", "graphOutput", json!({"id": "winner", "dataType": "string"}))
        .connect("quickText", "output", "quick", "in")
        .connect("lazyText", "output", "lazy", "in")
        .connect("lazy", "out", "race", "input1")
        .connect("quick", "out", "race", "input2")
        .connect("race", "result", "out", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let log = EventLog::attach(&processor);

    let started = Instant::now();
    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(outputs["winner"], DataValue::string("quick"));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(log.count("nodeError", "lazy"), 1);
    assert_eq!(log.count("nodeFinish", "lazy"), 0);
    assert!(processor.last_run().errored.contains_key("lazy"));
}

#[tokio::test]
async fn test_race_waits_past_failed_branch() {
    let graph = GraphBuilder::new("g")
        .add("broken", "fail", json!({}))
        .add("text", "text", json!({"text": "late"}))
        .add("late", "slow", json!({"ms": 30.0}))
        .add("race", "raceInputs", json!({}))
        .add("out", "graphOutput", json!({"id": "winner", "dataType": "string"}))
        .connect("broken", "out", "race", "input1")
        .connect("text", "output", "late", "in")
        .connect("late", "out", "race", "input2")
        .connect("race", "result", "out", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");

    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(outputs["winner"], DataValue::string("late"));
}

#[tokio::test]
async fn test_abort_graph_node_exits_early_with_outputs_so_far() {
    let graph = GraphBuilder::new("g")
        .add("fast", "number", json!({"value": 3.0}))
        .add("fastOut", "graphOutput", json!({"id": "fast", "dataType": "number"}))
        .add("stop", "abortGraph", json!({}))
        .add("slow", "slow", json!({"ms": 10_000.0}))
        .add("slowOut", "graphOutput", json!({"id": "slow", "dataType": "boolean"}))
        .connect("fast", "value", "fastOut", "value")
        .connect("fastOut", "valueOutput", "stop", "data")
        .connect("slow", "out", "slowOut", "value")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");
    let log = EventLog::attach(&processor);

    let started = Instant::now();
    let outputs = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(outputs["fast"], DataValue::number(3.0));
    assert!(!outputs.contains_key("slow"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(log.events().contains(&ProcessEvent::Abort {
        successful: true,
        error: None,
    }));
}

#[tokio::test]
async fn test_abort_graph_node_fails_run_with_its_data() {
    let graph = GraphBuilder::new("g")
        .add("reason", "text", json!({"text": "  bad things  "}))
        .add("stop", "abortGraph", json!({"successfully": false, "errorMessage": "unused"}))
        .connect("reason", "output", "stop", "data")
        .build()
        .unwrap();
    let processor = processor(project(vec![graph]), "g");

    let err = processor
        .process_graph(ProcessContext::default(), HashMap::new(), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Aborted(ref m) if m == "bad things"));
}
