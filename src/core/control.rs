use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How a run was aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct AbortOutcome {
    pub successful: bool,
    pub error: Option<String>,
}

/// Abort signal of the current run.
#[derive(Debug, Default)]
pub(crate) struct AbortState {
    token: CancellationToken,
    outcome: Option<AbortOutcome>,
}

impl AbortState {
    /// Starts a fresh signal for a new run, chained to `parent` when given.
    pub(crate) fn begin_run(&mut self, parent: Option<&CancellationToken>) -> CancellationToken {
        self.token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        self.outcome = None;
        self.token.clone()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns false when the run was already aborted.
    pub(crate) fn abort(&mut self, successful: bool, error: Option<String>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(AbortOutcome { successful, error });
        self.token.cancel();
        true
    }

    pub(crate) fn outcome(&self) -> Option<AbortOutcome> {
        self.outcome.clone()
    }
}

/// Resolvers for user-input nodes waiting on an external answer, keyed by node id.
#[derive(Debug, Default)]
pub struct PendingUserInputs {
    pending: Mutex<HashMap<String, oneshot::Sender<Vec<String>>>>,
}

impl PendingUserInputs {
    pub fn register(&self, node_id: &str) -> oneshot::Receiver<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(node_id.to_string(), tx);
        rx
    }

    /// Delivers answers; false when nobody waits on `node_id`.
    pub fn resolve(&self, node_id: &str, answers: Vec<String>) -> bool {
        match self.pending.lock().remove(node_id) {
            Some(tx) => tx.send(answers).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, node_id: &str) {
        self.pending.lock().remove(node_id);
    }

    /// Drops every resolver so the waiting nodes observe a rejection.
    pub fn reject_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn is_pending(&self, node_id: &str) -> bool {
        self.pending.lock().contains_key(node_id)
    }
}
