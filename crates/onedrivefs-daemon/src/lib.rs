//! onedrivefs daemon - cloud drive provider for a host virtual file system
//!
//! This crate provides:
//! - Request dispatch for every host file system operation
//! - Session lifecycle (mount, resume from a stored credential, unmount)
//! - Open-file handle tracking and a path-keyed metadata cache
//! - A loopback drive and SQLite state store for running standalone
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Host (async code or threads)                │
//! │  delivers HostRequest, expects exactly one outcome          │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ ProviderBridge
//!                               │ (tokio mpsc, bounded)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tokio Runtime (async)                      │
//! │  Dispatcher ─ readiness guard ─ SessionManager              │
//! │      │                               │                      │
//! │  MetadataCache, HandleTable     RemoteClient                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The remote service, the host's mount registry and credential storage
//! are traits ([`RemoteClient`], [`HostRegistry`], [`CredentialStore`]).

pub mod bridge;
pub mod cache;
pub mod client;
pub mod dispatcher;
pub mod handles;
pub mod host;
pub mod loopback;
pub mod request;
pub mod session;
pub mod storage;

pub use bridge::{BridgeHandler, BridgeMessage, ProviderBridge};
pub use cache::{CacheEntry, MetadataCache};
pub use client::{ReadChunk, RemoteClient, RemoteConnector};
pub use dispatcher::Dispatcher;
pub use handles::{HandleTable, OpenHandle};
pub use host::{HostError, HostRegistry};
pub use loopback::{LoopbackConnector, LoopbackDrive};
pub use request::*;
pub use session::{SessionManager, SessionPhase};
pub use storage::{CredentialStore, StateStore, StoreError};
