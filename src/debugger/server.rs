use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::protocol::{decode_project, ClientMessage, ServerFrame};
use crate::core::event_bus::{ProcessEvent, SubscriptionId};
use crate::core::process_context::{ProcessContext, Settings};
use crate::core::processor::{GraphProcessor, ProcessorOptions};
use crate::error::{ProcessError, SerializationError};
use crate::graph::Project;
use crate::value::{GraphInputs, GraphOutputs};

pub const DEFAULT_PORT: u16 = 21888;

pub type ClientId = u64;

/// Picks which connected clients receive the events of a processor, by processor id.
pub type RouteFn = Arc<dyn Fn(&str, &[ClientId]) -> Vec<ClientId> + Send + Sync>;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("Invalid message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("Invalid project: {0}")]
    Project(#[from] SerializationError),
    #[error("Dynamic runs are disabled")]
    DynamicRunsDisabled,
    #[error("No project has been uploaded")]
    NoProject,
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Default)]
pub struct DebuggerOptions {
    /// Let clients start runs of an uploaded project
    pub dynamic_graph_run: bool,
    /// Let clients upload a project with `set-dynamic-data`
    pub allow_graph_upload: bool,
    /// Used to build processors for dynamic runs
    pub processor: ProcessorOptions,
    pub route: Option<RouteFn>,
}

struct Attached {
    processor: GraphProcessor,
    subscription: SubscriptionId,
}

struct DynamicData {
    project: Arc<Project>,
    settings: Settings,
}

struct ServerInner {
    options: DebuggerOptions,
    clients: RwLock<HashMap<ClientId, mpsc::UnboundedSender<String>>>,
    next_client: AtomicU64,
    processors: Mutex<Vec<Attached>>,
    dynamic: Mutex<Option<DynamicData>>,
}

impl ServerInner {
    fn send_to(&self, ids: &[ClientId], frame: &ServerFrame) {
        let text = frame.to_json();
        let mut closed = Vec::new();
        {
            let clients = self.clients.read();
            for id in ids {
                if let Some(tx) = clients.get(id) {
                    if tx.send(text.clone()).is_err() {
                        closed.push(*id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in closed {
                clients.remove(&id);
            }
        }
    }

    fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn forward(&self, processor_id: &str, event: &ProcessEvent) {
        let all = self.client_ids();
        let targets = match &self.options.route {
            Some(route) => route(processor_id, &all),
            None => all,
        };
        self.send_to(&targets, &ServerFrame::from_event(event));
    }
}

/// Transport-agnostic debugger. Each client is a sink of JSON text frames;
/// [`DebuggerServer::serve_websocket`] carries one frame per WebSocket text message.
#[derive(Clone)]
pub struct DebuggerServer {
    inner: Arc<ServerInner>,
}

impl DebuggerServer {
    pub fn new(options: DebuggerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                options,
                clients: RwLock::new(HashMap::new()),
                next_client: AtomicU64::new(1),
                processors: Mutex::new(Vec::new()),
                dynamic: Mutex::new(None),
            }),
        }
    }

    /// Registers a client and returns the receiving end of its frame channel.
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.clients.write().insert(id, tx);
        debug!(client = id, "debugger client connected");
        if self.inner.options.allow_graph_upload {
            self.inner.send_to(
                &[id],
                &ServerFrame::new("graph-upload-allowed", serde_json::Value::Null),
            );
        }
        (id, rx)
    }

    pub fn disconnect(&self, client: ClientId) {
        self.inner.clients.write().remove(&client);
        debug!(client, "debugger client disconnected");
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// Mirrors every event of `processor` to the connected clients.
    pub fn attach(&self, processor: &GraphProcessor) {
        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let processor_id = processor.id().to_string();
        let subscription = processor.on_any(move |event| {
            if let Some(server) = weak.upgrade() {
                server.forward(&processor_id, event);
            }
        });
        self.inner.processors.lock().push(Attached {
            processor: processor.clone(),
            subscription,
        });
    }

    pub fn detach(&self, processor_id: &str) {
        let mut processors = self.inner.processors.lock();
        processors.retain(|attached| {
            if attached.processor.id() == processor_id {
                attached.processor.events().off(attached.subscription);
                false
            } else {
                true
            }
        });
    }

    pub fn attached_count(&self) -> usize {
        self.inner.processors.lock().len()
    }

    fn attached(&self) -> Vec<GraphProcessor> {
        self.inner
            .processors
            .lock()
            .iter()
            .map(|a| a.processor.clone())
            .collect()
    }

    /// Handles one text message from `client`.
    pub fn handle_message(&self, client: ClientId, text: &str) -> Result<(), DebuggerError> {
        let message = ClientMessage::parse(text)?;
        debug!(client, ?message, "debugger message");
        match message {
            ClientMessage::Run { graph_id, inputs } => {
                self.run_dynamic(graph_id, inputs)?;
            }
            ClientMessage::Abort => {
                for processor in self.attached() {
                    processor.abort(false, Some("aborted from debugger".to_string()));
                }
            }
            ClientMessage::Pause => self.attached().iter().for_each(GraphProcessor::pause),
            ClientMessage::Resume => self.attached().iter().for_each(GraphProcessor::resume),
            ClientMessage::SetDynamicData { project, settings } => {
                if !self.inner.options.allow_graph_upload {
                    warn!(client, "ignoring project upload, uploads are disabled");
                    return Ok(());
                }
                let project = decode_project(&project)?;
                *self.inner.dynamic.lock() = Some(DynamicData {
                    project: Arc::new(project),
                    settings,
                });
            }
            ClientMessage::UserInput { node_id, answers } => {
                let answered = self
                    .attached()
                    .iter()
                    .any(|p| p.user_input(&node_id, answers.clone()));
                if !answered {
                    warn!(client, node_id = %node_id, "no node is waiting for this user input");
                }
            }
        }
        Ok(())
    }

    /// Runs a graph of the uploaded project on a fresh, attached processor.
    pub fn run_dynamic(
        &self,
        graph_id: String,
        inputs: GraphInputs,
    ) -> Result<JoinHandle<Result<GraphOutputs, ProcessError>>, DebuggerError> {
        if !self.inner.options.dynamic_graph_run {
            return Err(DebuggerError::DynamicRunsDisabled);
        }
        let (project, settings) = {
            let dynamic = self.inner.dynamic.lock();
            let data = dynamic.as_ref().ok_or(DebuggerError::NoProject)?;
            (data.project.clone(), data.settings.clone())
        };
        let processor = GraphProcessor::with_options(
            project,
            &graph_id,
            self.inner.options.processor.clone(),
        )?;
        self.attach(&processor);

        let server = self.clone();
        Ok(tokio::spawn(async move {
            let result = processor
                .process_graph(ProcessContext::new(settings), inputs, HashMap::new())
                .await;
            server.detach(processor.id());
            result
        }))
    }

    /// Binds `addr` and serves WebSocket clients until the listener fails.
    pub async fn serve_websocket(&self, addr: SocketAddr) -> Result<(), DebuggerError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "debugger listening");
        self.serve(listener).await
    }

    /// Accepts WebSocket clients on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DebuggerError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        debug!(%peer, "websocket debugger client");
                        server.handle_socket(ws).await;
                    }
                    Err(e) => warn!(%peer, error = %e, "websocket handshake failed"),
                }
            });
        }
    }

    async fn handle_socket(&self, ws: WebSocketStream<TcpStream>) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (client, mut frames) = self.connect();

        let writer = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(message) = ws_rx.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(client, error = %e, "websocket read failed");
                    break;
                }
            };
            if let Err(e) = self.handle_message(client, text.as_str()) {
                warn!(client, error = %e, "debugger message failed");
                self.inner.send_to(
                    &[client],
                    &ServerFrame::new("error", serde_json::json!({"error": e.to_string()})),
                );
            }
        }
        self.disconnect(client);
        writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{serialize_project, GraphBuilder, ProjectMetadata};
    use crate::value::DataValue;
    use serde_json::json;

    fn project() -> Project {
        let graph = GraphBuilder::new("g")
            .add("t", "text", json!({"text": "hi"}))
            .add("o", "graphOutput", json!({"id": "out", "dataType": "string"}))
            .connect("t", "output", "o", "value")
            .build()
            .unwrap();
        Project::new(ProjectMetadata::default()).with_graph(graph)
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<ServerFrame> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[test]
    fn test_upload_allowed_frame_on_connect() {
        let server = DebuggerServer::new(DebuggerOptions {
            allow_graph_upload: true,
            ..Default::default()
        });
        let (_, mut rx) = server.connect();
        let received = frames(&mut rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, "graph-upload-allowed");
    }

    #[tokio::test]
    async fn test_attached_processor_events_reach_clients() {
        let server = DebuggerServer::new(DebuggerOptions::default());
        let (_, mut rx) = server.connect();
        let processor = GraphProcessor::new(Arc::new(project()), "g").unwrap();
        server.attach(&processor);

        processor
            .process_graph(ProcessContext::default(), Default::default(), HashMap::new())
            .await
            .unwrap();
        let names: Vec<String> = frames(&mut rx).into_iter().map(|f| f.message).collect();
        assert_eq!(names.first().map(String::as_str), Some("start"));
        assert_eq!(names.last().map(String::as_str), Some("done"));

        server.detach(processor.id());
        assert_eq!(server.attached_count(), 0);
        processor.events().emit(ProcessEvent::Pause);
        assert!(frames(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_route_filters_clients() {
        let server = DebuggerServer::new(DebuggerOptions {
            route: Some(Arc::new(|_: &str, clients: &[ClientId]| {
                clients.iter().copied().take(1).collect()
            })),
            ..Default::default()
        });
        let (_, mut first) = server.connect();
        let (_, mut second) = server.connect();
        let processor = GraphProcessor::new(Arc::new(project()), "g").unwrap();
        server.attach(&processor);
        processor.events().emit(ProcessEvent::Resume);
        assert_eq!(frames(&mut first).len(), 1);
        assert!(frames(&mut second).is_empty());
    }

    #[tokio::test]
    async fn test_dynamic_run_from_uploaded_project() {
        let server = DebuggerServer::new(DebuggerOptions {
            dynamic_graph_run: true,
            allow_graph_upload: true,
            ..Default::default()
        });
        let (client, _rx) = server.connect();
        assert!(matches!(
            server.run_dynamic("g".into(), Default::default()),
            Err(DebuggerError::NoProject)
        ));

        let upload = json!({
            "type": "set-dynamic-data",
            "project": serialize_project(&project()).unwrap(),
            "settings": {},
        });
        server.handle_message(client, &upload.to_string()).unwrap();
        let outputs = server
            .run_dynamic("g".into(), Default::default())
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outputs["out"], DataValue::string("hi"));
        assert_eq!(server.attached_count(), 0);
    }

    async fn next_frame(
        ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) -> ServerFrame {
        let message = ws.next().await.unwrap().unwrap();
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_websocket_client_exchanges_frames() {
        let server = DebuggerServer::new(DebuggerOptions {
            allow_graph_upload: true,
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        assert_eq!(next_frame(&mut ws).await.message, "graph-upload-allowed");

        let processor = GraphProcessor::new(Arc::new(project()), "g").unwrap();
        server.attach(&processor);
        ws.send(Message::Text(r#"{"type":"pause"}"#.into()))
            .await
            .unwrap();
        assert_eq!(next_frame(&mut ws).await.message, "pause");
        assert!(processor.is_paused());

        ws.send(Message::Text("not json".into())).await.unwrap();
        assert_eq!(next_frame(&mut ws).await.message, "error");

        ws.close(None).await.unwrap();
        for _ in 0..50 {
            if server.client_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn test_run_rejected_when_dynamic_runs_disabled() {
        let server = DebuggerServer::new(DebuggerOptions::default());
        let (client, _rx) = server.connect();
        let err = server
            .handle_message(client, r#"{"type":"run","graphId":"g"}"#)
            .unwrap_err();
        assert!(matches!(err, DebuggerError::DynamicRunsDisabled));
    }
}
