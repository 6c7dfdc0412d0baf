//! Correlation of host-originated control requests with their responses.
//!
//! When the host sends a `control_request`, it parks a oneshot sender here
//! under the request id. The inbound worker completes the slot when the
//! matching `control_response` arrives. Entries leave the map on completion,
//! on per-request timeout, or when the session closes - whichever fires
//! first - so long-lived sessions do not accumulate dead slots.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};

use crate::control::messages::ControlResponsePayload;

/// Tracks in-flight host-originated control requests
///
/// Cloning is cheap; all clones share the same map.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<ControlResponsePayload>>>>,
}

impl PendingRequests {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a completion slot for `id`.
    pub async fn insert(&self, id: String, sender: oneshot::Sender<ControlResponsePayload>) {
        self.inner.lock().await.insert(id, sender);
    }

    /// Complete the slot for `id` with a response.
    ///
    /// Returns `false` if no slot exists or the waiting caller is gone.
    pub async fn complete(&self, id: &str, response: ControlResponsePayload) -> bool {
        match self.inner.lock().await.remove(id) {
            Some(sender) => sender.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop the slot for `id` without completing it (request timed out).
    pub async fn cancel(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    /// Drop every outstanding slot (session closed).
    ///
    /// The dropped senders close their channels, so every waiting caller
    /// observes the closure rather than hanging.
    pub async fn drain(&self) {
        self.inner.lock().await.clear();
    }

    /// Number of in-flight requests.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether no request is in flight.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
