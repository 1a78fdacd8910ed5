use std::collections::HashMap;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::event_bus::{EventBus, EventKind, ProcessEvent};
use crate::error::{NodeError, NodeResult};
use crate::value::DataValue;

/// Cross-branch, cross-subgraph variables. Owned by the root processor and
/// shared by reference with every sub-processor; survives across runs.
#[derive(Debug, Default)]
pub struct GlobalVariables {
    values: RwLock<HashMap<String, DataValue>>,
}

impl GlobalVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<DataValue> {
        self.values.read().get(id).cloned()
    }

    /// Stores `value`, returning the previous one. Emitting the matching
    /// `globalSet` event is the caller's job.
    pub fn insert(&self, id: &str, value: DataValue) -> Option<DataValue> {
        self.values.write().insert(id.to_string(), value)
    }

    pub fn snapshot(&self) -> HashMap<String, DataValue> {
        self.values.read().clone()
    }

    /// Resolves with the value of `id`, waiting for the first `globalSet` of
    /// that id on `bus` when it is not set yet.
    pub async fn wait(
        &self,
        id: &str,
        bus: &EventBus,
        signal: &CancellationToken,
    ) -> NodeResult<DataValue> {
        // Subscribe before the read so a concurrent set cannot slip between them.
        let mut sub = bus.subscribe(EventKind::GlobalSet);
        if let Some(value) = self.get(id) {
            return Ok(value);
        }
        loop {
            tokio::select! {
                event = sub.recv() => match event {
                    Some(ProcessEvent::GlobalSet { id: set_id, value, .. }) if set_id == id => {
                        return Ok(value);
                    }
                    Some(_) => continue,
                    None => return Err(NodeError::Aborted),
                },
                _ = signal.cancelled() => return Err(NodeError::Aborted),
            }
        }
    }
}
