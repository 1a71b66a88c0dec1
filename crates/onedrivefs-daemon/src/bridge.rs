//! Host ↔ Dispatcher bridge
//!
//! Hosts deliver requests from their own context: async code, or a plain
//! thread that must block until the outcome is known. Both go through a
//! bounded channel into the runtime.
//!
//! ```text
//! Host                            Tokio Runtime
//! ────                            ─────────────
//!   │  HostRequest + oneshot::Sender  │
//!   ├────────────────────────────────►│ BridgeHandler::run
//!   │        (mpsc, bounded)          │   └─ spawn per request
//!   │                                 │        Dispatcher::dispatch
//!   │◄────────────────────────────────┤
//!   │     oneshot::Receiver           │
//! ```
//!
//! Each request gets its own task, so a slow read never holds up a
//! metadata request queued behind it. The oneshot sender is consumed by
//! the reply, so every request is answered at most once; a request that
//! is dropped unanswered (shutdown) surfaces as `AdapterError::Shutdown`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use onedrivefs_core::AdapterError;

use crate::dispatcher::Dispatcher;
use crate::request::{HostRequest, Reply};

type ReplySender = oneshot::Sender<Result<Reply, AdapterError>>;

/// Message from the host side to the runtime
#[derive(Debug)]
pub enum BridgeMessage {
    Request {
        request: HostRequest,
        reply: ReplySender,
    },

    /// Stop accepting requests; in-flight requests still complete
    Shutdown,
}

/// Host side of the bridge
#[derive(Clone)]
pub struct ProviderBridge {
    request_tx: mpsc::Sender<BridgeMessage>,
}

impl ProviderBridge {
    /// Create a bridge with room for `capacity` queued requests
    pub fn new(capacity: usize) -> (Self, BridgeHandler) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { request_tx: tx }, BridgeHandler { request_rx: rx })
    }

    /// Submit a request and wait for its outcome
    pub async fn call(&self, request: HostRequest) -> Result<Reply, AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let kind = request.kind();

        self.request_tx
            .send(BridgeMessage::Request {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| {
                debug!("bridge: {} submitted after shutdown", kind);
                AdapterError::Shutdown
            })?;

        reply_rx.await.map_err(|_| {
            error!("bridge: reply channel closed for {}", kind);
            AdapterError::Shutdown
        })?
    }

    /// Submit a request from a thread outside the runtime and block until
    /// it is answered.
    ///
    /// Must not be called from an async context.
    pub fn call_blocking(&self, request: HostRequest) -> Result<Reply, AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let kind = request.kind();

        self.request_tx
            .blocking_send(BridgeMessage::Request {
                request,
                reply: reply_tx,
            })
            .map_err(|_| AdapterError::Shutdown)?;

        reply_rx.blocking_recv().map_err(|_| {
            error!("bridge: reply channel closed for {}", kind);
            AdapterError::Shutdown
        })?
    }

    /// Ask the handler to stop
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(BridgeMessage::Shutdown).await;
    }
}

/// Runtime side of the bridge
pub struct BridgeHandler {
    request_rx: mpsc::Receiver<BridgeMessage>,
}

impl BridgeHandler {
    /// Serve requests until shutdown or until every [`ProviderBridge`] is
    /// dropped. Call this from a tokio task.
    pub async fn run(mut self, dispatcher: Arc<Dispatcher>) {
        while let Some(message) = self.request_rx.recv().await {
            match message {
                BridgeMessage::Request { request, reply } => {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let kind = request.kind();
                        let outcome = dispatcher.dispatch(request).await;
                        if reply.send(outcome).is_err() {
                            trace!("bridge: caller went away before {} completed", kind);
                        }
                    });
                }
                BridgeMessage::Shutdown => {
                    debug!("bridge handler received shutdown");
                    break;
                }
            }
        }
        debug!("bridge handler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use onedrivefs_core::ProviderConfig;

    use crate::loopback::LoopbackConnector;
    use crate::request::ListDirectoryOptions;
    use crate::session::SessionManager;
    use crate::storage::StateStore;

    async fn dispatcher(root: &std::path::Path) -> Arc<Dispatcher> {
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = Arc::new(SessionManager::new(
            Arc::new(LoopbackConnector::new(root)),
            store.clone(),
            store,
            ProviderConfig::default(),
        ));
        session.mount().await.unwrap();
        Arc::new(Dispatcher::new(session))
    }

    fn list_root() -> HostRequest {
        HostRequest::ListDirectory(ListDirectoryOptions {
            directory_path: "/".into(),
        })
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();

        let (bridge, handler) = ProviderBridge::new(4);
        tokio::spawn(handler.run(dispatcher(root.path()).await));

        let reply = bridge.call(list_root()).await.unwrap();
        assert!(matches!(reply, Reply::Entries { ref entries, .. } if entries.len() == 1));
    }

    #[tokio::test]
    async fn test_call_after_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let (bridge, handler) = ProviderBridge::new(4);
        let task = tokio::spawn(handler.run(dispatcher(root.path()).await));

        bridge.shutdown().await;
        task.await.unwrap();

        assert!(matches!(
            bridge.call(list_root()).await,
            Err(AdapterError::Shutdown)
        ));
    }

    #[test]
    fn test_call_blocking_from_host_thread() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (bridge, handler) = ProviderBridge::new(4);
        let dispatcher = runtime.block_on(dispatcher(root.path()));
        runtime.spawn(handler.run(dispatcher));

        let host = std::thread::spawn(move || bridge.call_blocking(list_root()));
        let reply = host.join().unwrap().unwrap();
        assert!(matches!(reply, Reply::Entries { has_more: false, .. }));
    }
}
