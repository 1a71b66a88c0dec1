//! Session lifecycle
//!
//! One [`SessionManager`] exists per process. It owns the only remote
//! client and moves it through the mount lifecycle:
//!
//! ```text
//!              mount                        unmount
//! Unmounted ───────────► (Authorizing) ─► Mounted ───────────► Unmounted
//!     │                                    ▲   │
//!     │ resume (token stored)              │   │ suspend
//!     └────────────────────────────────────┤   ▼
//!                                          └ Suspended
//!                                   resume
//! ```
//!
//! Transitions are serialised by an async mutex, so concurrent requests
//! that all find no client coalesce into a single credential load. The
//! client itself sits behind a short-lived `RwLock` that is never held
//! across an await point.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use onedrivefs_core::{AccessToken, AdapterError, MountOptions, ProviderConfig, ACCESS_TOKEN_KEY};

use crate::client::{RemoteClient, RemoteConnector};
use crate::host::HostRegistry;
use crate::storage::CredentialStore;

/// Where the session is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Unmounted,
    /// Interactive authorization in progress (transient, inside `mount`)
    Authorizing,
    Mounted,
    /// Client dropped, credential still stored
    Suspended,
}

struct SessionState {
    client: Option<Arc<dyn RemoteClient>>,
    phase: SessionPhase,
}

/// Owner of the remote client and the mount/credential lifecycle
pub struct SessionManager {
    connector: Arc<dyn RemoteConnector>,
    host: Arc<dyn HostRegistry>,
    store: Arc<dyn CredentialStore>,
    provider: ProviderConfig,
    state: RwLock<SessionState>,
    transition: Mutex<()>,
}

impl SessionManager {
    /// Create an unmounted session
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        host: Arc<dyn HostRegistry>,
        store: Arc<dyn CredentialStore>,
        provider: ProviderConfig,
    ) -> Self {
        Self {
            connector,
            host,
            store,
            provider,
            state: RwLock::new(SessionState {
                client: None,
                phase: SessionPhase::Unmounted,
            }),
            transition: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    /// The active client, if any
    pub fn client(&self) -> Option<Arc<dyn RemoteClient>> {
        self.state.read().client.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().client.is_some()
    }

    pub fn file_system_id(&self) -> &str {
        &self.provider.file_system_id
    }

    /// Authorize against the remote service and register the mount.
    ///
    /// Fails with `AlreadyMounted` if the host already lists this file
    /// system. If the host refuses the mount after authorization
    /// succeeded, the new client is discarded.
    pub async fn mount(&self) -> Result<(), AdapterError> {
        let _transition = self.transition.lock().await;

        let mounted = self
            .host
            .mounted_file_systems()
            .await
            .map_err(|e| AdapterError::HostMountFailed(e.to_string()))?;
        if mounted.iter().any(|id| *id == self.provider.file_system_id) {
            return Err(AdapterError::AlreadyMounted);
        }

        let previous = self.set_phase(SessionPhase::Authorizing);
        let client = self.connector.new_client();

        if let Err(e) = client.authorize().await {
            warn!("session: authorization failed: {}", e);
            self.set_phase(previous);
            return Err(AdapterError::AuthorizationFailed(e.message));
        }

        let token = match client.credential() {
            Some(token) if !token.is_empty() => token,
            _ => {
                self.set_phase(previous);
                return Err(AdapterError::AuthorizationFailed(
                    "no access token issued".into(),
                ));
            }
        };

        let options = MountOptions {
            file_system_id: self.provider.file_system_id.clone(),
            display_name: self.provider.display_name.clone(),
            writable: self.provider.writable,
        };
        if let Err(e) = self.host.mount(&options).await {
            warn!("session: host refused mount: {}", e);
            self.discard_client(SessionPhase::Unmounted);
            return Err(AdapterError::HostMountFailed(e.to_string()));
        }

        // The mount is live even if the token cannot be persisted; only
        // resume after a restart is lost.
        if let Err(e) = self.store.set(ACCESS_TOKEN_KEY, token.as_str()).await {
            warn!("session: failed to persist access token: {}", e);
        }

        {
            let mut state = self.state.write();
            state.client = Some(client);
            state.phase = SessionPhase::Mounted;
        }
        info!("session: mounted {}", self.provider.file_system_id);
        Ok(())
    }

    /// Rebuild the client from the stored credential.
    ///
    /// Succeeds immediately if a client already exists.
    pub async fn resume(&self) -> Result<(), AdapterError> {
        self.resume_client().await.map(|_| ())
    }

    /// The active client, resuming from the stored credential if needed.
    ///
    /// This is the readiness guard every request passes through.
    pub async fn ensure_client(&self) -> Result<Arc<dyn RemoteClient>, AdapterError> {
        match self.client() {
            Some(client) => Ok(client),
            None => self.resume_client().await,
        }
    }

    async fn resume_client(&self) -> Result<Arc<dyn RemoteClient>, AdapterError> {
        let _transition = self.transition.lock().await;

        // Another request may have resumed while we waited
        if let Some(client) = self.client() {
            return Ok(client);
        }

        let stored = self
            .store
            .get(ACCESS_TOKEN_KEY)
            .await
            .map_err(|e| AdapterError::Storage(e.to_string()))?;

        let token = match stored {
            Some(token) if !token.is_empty() => AccessToken::new(token),
            _ => {
                debug!("session: no stored access token");
                self.set_phase(SessionPhase::Unmounted);
                return Err(AdapterError::CredentialNotFound);
            }
        };

        let client = self.connector.new_client();
        client.set_credential(token);

        {
            let mut state = self.state.write();
            state.client = Some(client.clone());
            state.phase = SessionPhase::Mounted;
        }
        info!("session: resumed {} from stored credential", self.provider.file_system_id);
        Ok(client)
    }

    /// Drop the in-memory client but keep the stored credential
    pub async fn suspend(&self) {
        let _transition = self.transition.lock().await;
        if self.is_active() {
            self.discard_client(SessionPhase::Suspended);
            debug!("session: suspended");
        }
    }

    /// Tear the session down.
    ///
    /// Revocation is best effort. Unregistering the mount and removing the
    /// credential always happen, and this never fails.
    pub async fn unmount(&self) -> Result<(), AdapterError> {
        let _transition = self.transition.lock().await;

        let client = {
            let mut state = self.state.write();
            state.client.take()
        };

        if let Some(client) = client {
            if let Err(e) = client.unauthorize().await {
                warn!("session: revoking authorization failed: {}", e);
            }
        }

        if let Err(e) = self.host.unmount(&self.provider.file_system_id).await {
            warn!("session: host unmount failed: {}", e);
        }

        if let Err(e) = self.store.remove(ACCESS_TOKEN_KEY).await {
            warn!("session: removing stored access token failed: {}", e);
        }

        self.set_phase(SessionPhase::Unmounted);
        info!("session: unmounted {}", self.provider.file_system_id);
        Ok(())
    }

    fn set_phase(&self, phase: SessionPhase) -> SessionPhase {
        std::mem::replace(&mut self.state.write().phase, phase)
    }

    fn discard_client(&self, phase: SessionPhase) {
        let mut state = self.state.write();
        state.client = None;
        state.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::loopback::LoopbackConnector;
    use crate::storage::StateStore;

    fn session_with(store: Arc<StateStore>, root: &std::path::Path) -> SessionManager {
        SessionManager::new(
            Arc::new(LoopbackConnector::new(root)),
            store.clone(),
            store,
            ProviderConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_mount_persists_token() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = session_with(store.clone(), root.path());

        assert_eq!(session.phase(), SessionPhase::Unmounted);
        session.mount().await.unwrap();

        assert_eq!(session.phase(), SessionPhase::Mounted);
        assert!(session.is_active());
        assert!(store.get_value(ACCESS_TOKEN_KEY).unwrap().is_some());
        assert_eq!(store.mounted_ids().unwrap(), vec!["onedrivefs".to_string()]);
    }

    #[tokio::test]
    async fn test_mount_twice_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = session_with(store, root.path());

        session.mount().await.unwrap();
        assert!(matches!(
            session.mount().await,
            Err(AdapterError::AlreadyMounted)
        ));
        // Still mounted after the rejected attempt
        assert_eq!(session.phase(), SessionPhase::Mounted);
    }

    #[tokio::test]
    async fn test_resume_without_token() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = session_with(store, root.path());

        assert!(matches!(
            session.resume().await,
            Err(AdapterError::CredentialNotFound)
        ));
        assert_eq!(session.phase(), SessionPhase::Unmounted);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_resume_in_fresh_session() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());

        let first = session_with(store.clone(), root.path());
        first.mount().await.unwrap();
        let token = first.client().unwrap().credential();

        // A new process sees the same store
        let second = session_with(store, root.path());
        second.resume().await.unwrap();
        assert_eq!(second.phase(), SessionPhase::Mounted);
        assert_eq!(second.client().unwrap().credential(), token);

        // Idempotent
        second.resume().await.unwrap();
    }

    #[tokio::test]
    async fn test_suspend_then_ensure_client() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = session_with(store, root.path());

        session.mount().await.unwrap();
        session.suspend().await;
        assert_eq!(session.phase(), SessionPhase::Suspended);
        assert!(session.client().is_none());

        let client = session.ensure_client().await.unwrap();
        assert!(client.credential().is_some());
        assert_eq!(session.phase(), SessionPhase::Mounted);
    }

    #[tokio::test]
    async fn test_unmount_clears_everything() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = session_with(store.clone(), root.path());

        session.mount().await.unwrap();
        session.unmount().await.unwrap();

        assert_eq!(session.phase(), SessionPhase::Unmounted);
        assert!(!session.is_active());
        assert!(store.get_value(ACCESS_TOKEN_KEY).unwrap().is_none());
        assert!(store.mounted_ids().unwrap().is_empty());

        // Mount works again afterwards
        session.mount().await.unwrap();
    }

    #[tokio::test]
    async fn test_unmount_when_never_mounted() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::in_memory().unwrap());
        let session = session_with(store, root.path());

        session.unmount().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Unmounted);
    }
}
