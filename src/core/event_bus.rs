//! Lifecycle event bus.
//!
//! Subscribers register either for one [`EventKind`] or for every event, and
//! receive events through a callback or an unbounded channel. Delivery is
//! immediate: events emitted while nobody listens are gone. A [`Subscription`]
//! unsubscribes itself when dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::stream::{self, Stream};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::value::{DataValue, GraphInputs, GraphOutputs, Inputs, Outputs};

/// Processor lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ProcessEvent {
    /// Root run started
    #[serde(rename_all = "camelCase")]
    Start {
        project_id: String,
        graph_id: String,
        inputs: GraphInputs,
        context_values: HashMap<String, DataValue>,
    },
    #[serde(rename_all = "camelCase")]
    GraphStart { graph_id: String, inputs: GraphInputs },
    #[serde(rename_all = "camelCase")]
    GraphFinish {
        graph_id: String,
        outputs: GraphOutputs,
    },
    #[serde(rename_all = "camelCase")]
    GraphError { graph_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    NodeStart {
        node_id: String,
        inputs: Inputs,
        process_id: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeFinish {
        node_id: String,
        outputs: Outputs,
        process_id: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: String,
        error: String,
        process_id: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeExcluded { node_id: String, process_id: String },
    /// Streaming output emitted before a node finishes
    #[serde(rename_all = "camelCase")]
    PartialOutput {
        node_id: String,
        outputs: Outputs,
        index: usize,
        process_id: String,
    },
    /// A user-input node is waiting for answers
    #[serde(rename_all = "camelCase")]
    UserInput {
        node_id: String,
        inputs: Inputs,
        process_id: String,
    },
    #[serde(rename_all = "camelCase")]
    GlobalSet {
        id: String,
        value: DataValue,
        process_id: String,
    },
    UserEvent {
        name: String,
        data: Option<DataValue>,
    },
    Pause,
    Resume,
    Abort {
        successful: bool,
        error: Option<String>,
    },
    Trace {
        message: String,
    },
    Error {
        error: String,
    },
    Done {
        results: GraphOutputs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    GraphStart,
    GraphFinish,
    GraphError,
    NodeStart,
    NodeFinish,
    NodeError,
    NodeExcluded,
    PartialOutput,
    UserInput,
    GlobalSet,
    UserEvent,
    Pause,
    Resume,
    Abort,
    Trace,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::GraphStart => "graphStart",
            EventKind::GraphFinish => "graphFinish",
            EventKind::GraphError => "graphError",
            EventKind::NodeStart => "nodeStart",
            EventKind::NodeFinish => "nodeFinish",
            EventKind::NodeError => "nodeError",
            EventKind::NodeExcluded => "nodeExcluded",
            EventKind::PartialOutput => "partialOutput",
            EventKind::UserInput => "userInput",
            EventKind::GlobalSet => "globalSet",
            EventKind::UserEvent => "userEvent",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Abort => "abort",
            EventKind::Trace => "trace",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }

    /// Events that describe the root run and are not forwarded from a child.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            EventKind::Start
                | EventKind::Done
                | EventKind::Error
                | EventKind::Abort
                | EventKind::Pause
                | EventKind::Resume
        )
    }
}

impl ProcessEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProcessEvent::Start { .. } => EventKind::Start,
            ProcessEvent::GraphStart { .. } => EventKind::GraphStart,
            ProcessEvent::GraphFinish { .. } => EventKind::GraphFinish,
            ProcessEvent::GraphError { .. } => EventKind::GraphError,
            ProcessEvent::NodeStart { .. } => EventKind::NodeStart,
            ProcessEvent::NodeFinish { .. } => EventKind::NodeFinish,
            ProcessEvent::NodeError { .. } => EventKind::NodeError,
            ProcessEvent::NodeExcluded { .. } => EventKind::NodeExcluded,
            ProcessEvent::PartialOutput { .. } => EventKind::PartialOutput,
            ProcessEvent::UserInput { .. } => EventKind::UserInput,
            ProcessEvent::GlobalSet { .. } => EventKind::GlobalSet,
            ProcessEvent::UserEvent { .. } => EventKind::UserEvent,
            ProcessEvent::Pause => EventKind::Pause,
            ProcessEvent::Resume => EventKind::Resume,
            ProcessEvent::Abort { .. } => EventKind::Abort,
            ProcessEvent::Trace { .. } => EventKind::Trace,
            ProcessEvent::Error { .. } => EventKind::Error,
            ProcessEvent::Done { .. } => EventKind::Done,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Node id for node-scoped events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ProcessEvent::NodeStart { node_id, .. }
            | ProcessEvent::NodeFinish { node_id, .. }
            | ProcessEvent::NodeError { node_id, .. }
            | ProcessEvent::NodeExcluded { node_id, .. }
            | ProcessEvent::PartialOutput { node_id, .. }
            | ProcessEvent::UserInput { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Splits the event into its name and JSON payload (`null` for unit events).
    pub fn to_parts(&self) -> (String, serde_json::Value) {
        let payload = serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        (self.name().to_string(), payload)
    }

    /// Rebuilds an event from its name and payload.
    pub fn from_parts(name: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut object = serde_json::Map::new();
        object.insert("type".to_string(), serde_json::Value::String(name.to_string()));
        if !data.is_null() {
            object.insert("data".to_string(), data);
        }
        serde_json::from_value(serde_json::Value::Object(object))
    }
}

pub type EventCallback = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Sink {
    Callback(EventCallback),
    Channel(mpsc::UnboundedSender<ProcessEvent>),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    sink: Sink,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Typed publish/subscribe channel for [`ProcessEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, filter: Option<EventKind>, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .push(Subscriber { id, filter, sink });
        id
    }

    pub fn emit(&self, event: ProcessEvent) {
        let kind = event.kind();
        if kind == EventKind::Trace {
            if let ProcessEvent::Trace { message } = &event {
                tracing::trace!(target: "xflow::trace", "{}", message);
            }
        }

        let targets: Vec<Subscriber> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.map_or(true, |k| k == kind))
            .cloned()
            .collect();

        let mut closed = Vec::new();
        for subscriber in targets {
            match &subscriber.sink {
                Sink::Callback(cb) => cb(&event),
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(subscriber.id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.inner
                .subscribers
                .write()
                .retain(|s| !closed.contains(&s.id));
        }
    }

    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&ProcessEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(Some(kind), Sink::Callback(Arc::new(callback)))
    }

    pub fn on_any(&self, callback: impl Fn(&ProcessEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.add(None, Sink::Callback(Arc::new(callback)))
    }

    pub fn off(&self, id: SubscriptionId) {
        self.inner.subscribers.write().retain(|s| s.id != id);
    }

    /// Buffered subscription to one event kind.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.channel(Some(kind))
    }

    /// Buffered subscription to every event.
    pub fn subscribe_all(&self) -> Subscription {
        self.channel(None)
    }

    fn channel(&self, filter: Option<EventKind>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add(filter, Sink::Channel(tx));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Re-emits every event accepted by `filter` on `target`.
    pub fn forward_to(
        &self,
        target: &EventBus,
        filter: impl Fn(&ProcessEvent) -> bool + Send + Sync + 'static,
    ) -> SubscriptionId {
        let target = target.clone();
        self.on_any(move |event| {
            if filter(event) {
                target.emit(event.clone());
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// Channel-backed subscription, removed from the bus on drop.
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<BusInner>,
    rx: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProcessEvent> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = ProcessEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let id = self.id;
            inner.subscribers.write().retain(|s| s.id != id);
        }
    }
}
