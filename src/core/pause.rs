use tokio::sync::watch;

/// Cooperative pause gate checked before every node dispatch.
#[derive(Debug)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns false when already paused.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Returns false when not paused.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait_until_unpaused(&self) {
        let mut rx = self.tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
