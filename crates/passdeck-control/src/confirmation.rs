//! Delete confirmation hub
//!
//! Delete-and-wait registers a waiter keyed by `(endpoint_id, instance_id)`
//! before it sends the delete; the event ingestor fires it when the agent
//! reports the instance gone.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Key = (i32, String);

/// Tracks pending delete confirmations
#[derive(Clone)]
pub struct ConfirmationHub {
    /// Maps (endpoint, instance) -> (registration token, sender)
    waiters: Arc<DashMap<Key, (u64, oneshot::Sender<()>)>>,
    next_token: Arc<AtomicU64>,
}

impl ConfirmationHub {
    pub fn new() -> Self {
        Self {
            waiters: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a waiter for one instance
    ///
    /// A second registration for the same key replaces the first, whose
    /// wait then resolves as [`WaitOutcome::Superseded`].
    pub fn register(&self, endpoint_id: i32, instance_id: &str) -> DeleteWaiter {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let key = (endpoint_id, instance_id.to_string());
        self.waiters.insert(key.clone(), (token, tx));
        debug!(
            "Registered delete waiter for instance {} on endpoint {}",
            instance_id, endpoint_id
        );
        DeleteWaiter {
            hub: self.clone(),
            key,
            token,
            rx: Some(rx),
        }
    }

    /// Signal that an instance is gone
    /// Returns true if a waiter was notified
    pub fn confirm(&self, endpoint_id: i32, instance_id: &str) -> bool {
        let key = (endpoint_id, instance_id.to_string());
        if let Some((_, (_, tx))) = self.waiters.remove(&key) {
            if tx.send(()).is_err() {
                warn!(
                    "Delete confirmation for instance {} arrived after its waiter gave up",
                    instance_id
                );
                return false;
            }
            debug!("Confirmed deletion of instance {}", instance_id);
            return true;
        }
        false
    }

    pub fn count(&self) -> usize {
        self.waiters.len()
    }

    fn release(&self, key: &Key, token: u64) {
        self.waiters.remove_if(key, |_, (t, _)| *t == token);
    }
}

impl Default for ConfirmationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// How a [`DeleteWaiter`] finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The agent reported the instance gone
    Confirmed,
    /// No confirmation within the timeout
    Expired,
    /// A newer registration for the same instance took over
    Superseded,
}

/// Handle for one registered waiter; deregisters itself when dropped
pub struct DeleteWaiter {
    hub: ConfirmationHub,
    key: Key,
    token: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl DeleteWaiter {
    /// Wait up to `timeout` for the confirmation
    pub async fn wait(mut self, timeout: Duration) -> WaitOutcome {
        let Some(rx) = self.rx.take() else {
            return WaitOutcome::Superseded;
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => WaitOutcome::Confirmed,
            // sender dropped: replaced by a newer registration
            Ok(Err(_)) => WaitOutcome::Superseded,
            Err(_) => WaitOutcome::Expired,
        }
    }
}

impl Drop for DeleteWaiter {
    fn drop(&mut self) {
        self.hub.release(&self.key, self.token);
    }
}
