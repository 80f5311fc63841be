//! Per-broker registry of active tunnels
//!
//! Tracks one handle per session id. Registering a second tunnel for the same
//! session supersedes (tears down) the first. Teardown is signalled through a
//! cancellation token; the bridge task watching the token shuts both TLS legs
//! down, so no registry operation ever blocks on network I/O while holding
//! the map lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

/// Handle to one established tunnel
///
/// The handle does not own the TLS streams; it owns the cancellation token
/// that the bridge task selects on. Cancelling the token is what destroys the
/// streams.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    session_id: String,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
}

impl TunnelHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            cancel: CancellationToken::new(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token the bridge task watches; cancelled on teardown
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Mark inactive and cancel the carrier task. Idempotent.
    pub fn tear_down(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Snapshot row for introspection
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    pub session_id: String,
    pub active: bool,
}

/// Registry mapping session ids to active tunnel handles
#[derive(Debug, Clone, Default)]
pub struct TunnelRegistry {
    tunnels: Arc<RwLock<HashMap<String, TunnelHandle>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a handle for its session, superseding any prior tunnel.
    ///
    /// The prior handle, if any, is torn down before the new one is inserted
    /// and returned for observability.
    pub fn register(&self, handle: TunnelHandle) -> Option<TunnelHandle> {
        let mut tunnels = self.tunnels.write().unwrap();
        let prior = tunnels.insert(handle.session_id().to_string(), handle.clone());

        if let Some(ref superseded) = prior {
            superseded.tear_down();
            tracing::info!(
                session_id = %handle.session_id(),
                "Superseded existing tunnel for session"
            );
        } else {
            tracing::debug!(session_id = %handle.session_id(), "Registered tunnel");
        }

        prior
    }

    /// Tear down and remove the tunnel for one session. Idempotent.
    pub fn close_one(&self, session_id: &str) -> bool {
        let removed = self.tunnels.write().unwrap().remove(session_id);

        match removed {
            Some(handle) => {
                handle.tear_down();
                tracing::info!(session_id = %session_id, "Closed tunnel");
                true
            }
            None => false,
        }
    }

    /// Tear down every registered tunnel. Safe to call repeatedly.
    pub fn close_all(&self) {
        let drained: Vec<TunnelHandle> = {
            let mut tunnels = self.tunnels.write().unwrap();
            tunnels.drain().map(|(_, handle)| handle).collect()
        };

        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        for handle in drained {
            handle.tear_down();
        }
        tracing::info!(count = count, "Closed all tunnels");
    }

    /// Snapshot of registered tunnels
    pub fn list(&self) -> Vec<TunnelInfo> {
        let tunnels = self.tunnels.read().unwrap();
        tunnels
            .values()
            .map(|handle| TunnelInfo {
                session_id: handle.session_id().to_string(),
                active: handle.is_active(),
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tunnels.read().unwrap().len()
    }
}
