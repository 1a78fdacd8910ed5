use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::core::event_bus::{EventBus, EventKind, ProcessEvent, SubscriptionId};
use crate::core::processor::GraphProcessor;
use crate::core::runtime_context::TimeProvider;
use crate::error::SerializationError;

pub const RECORDING_VERSION: u64 = 1;

/// One bus event as captured by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub ts: i64,
}

impl RecordedEvent {
    pub fn to_event(&self) -> Result<ProcessEvent, SerializationError> {
        Ok(ProcessEvent::from_parts(&self.event_type, self.data.clone())?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub recording_id: String,
    pub events: Vec<RecordedEvent>,
    pub start_ts: i64,
    #[serde(default)]
    pub finish_ts: Option<i64>,
}

/// Versioned envelope written by [`ExecutionRecorder::serialize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedRecording {
    pub version: u64,
    pub recording: Recording,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderOptions {
    pub include_partial_outputs: bool,
    pub include_trace: bool,
}

struct Attachment {
    bus: EventBus,
    subscription: SubscriptionId,
}

/// Captures every event of a processor's runs into an ordered log.
pub struct ExecutionRecorder {
    options: RecorderOptions,
    recording: Arc<Mutex<Recording>>,
    finished: watch::Sender<bool>,
    attachment: Mutex<Option<Attachment>>,
}

impl ExecutionRecorder {
    pub fn new(options: RecorderOptions) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            options,
            recording: Arc::new(Mutex::new(Recording::default())),
            finished,
            attachment: Mutex::new(None),
        }
    }

    /// Starts a fresh recording of `processor`'s events, replacing any earlier one.
    pub fn record(&self, processor: &GraphProcessor) {
        self.detach();
        let runtime = &processor.inner.runtime;
        let clock: Arc<dyn TimeProvider> = runtime.time_provider.clone();
        *self.recording.lock() = Recording {
            recording_id: runtime.id_generator.next_id(),
            events: Vec::new(),
            start_ts: clock.now_millis(),
            finish_ts: None,
        };
        self.finished.send_replace(false);

        let options = self.options;
        let recording = self.recording.clone();
        let finished = self.finished.clone();
        let bus = processor.events().clone();
        let subscription = bus.on_any(move |event| {
            let kind = event.kind();
            if (kind == EventKind::PartialOutput && !options.include_partial_outputs)
                || (kind == EventKind::Trace && !options.include_trace)
            {
                return;
            }
            let (event_type, data) = event.to_parts();
            let ts = clock.now_millis();
            let mut recording = recording.lock();
            recording.events.push(RecordedEvent {
                event_type,
                data,
                ts,
            });
            if matches!(kind, EventKind::Done | EventKind::Abort | EventKind::Error)
                && recording.finish_ts.is_none()
            {
                recording.finish_ts = Some(ts);
                finished.send_replace(true);
            }
        });
        *self.attachment.lock() = Some(Attachment { bus, subscription });
    }

    /// Stops listening; the captured events stay available.
    pub fn detach(&self) {
        if let Some(attachment) = self.attachment.lock().take() {
            attachment.bus.off(attachment.subscription);
        }
    }

    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves once a done, abort or error event has been captured.
    pub async fn wait_until_finished(&self) -> Recording {
        let mut rx = self.finished.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
        self.recording()
    }

    pub fn serialize(&self) -> Result<String, SerializationError> {
        let envelope = SerializedRecording {
            version: RECORDING_VERSION,
            recording: self.recording(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn deserialize(text: &str) -> Result<Recording, SerializationError> {
        let envelope: SerializedRecording = serde_json::from_str(text)?;
        if envelope.version != RECORDING_VERSION {
            return Err(SerializationError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope.recording)
    }
}

impl Drop for ExecutionRecorder {
    fn drop(&mut self) {
        self.detach();
    }
}
