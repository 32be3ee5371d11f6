//! # veil-sync — Local-first document sync engine
//!
//! Keeps each open document's replica in sync with a remote replicated
//! store while mirroring every change into an on-device store, so documents
//! open and edit offline.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐ user delta  ┌─────────────────────────────────────┐
//!  │  Editor  │ ──────────► │ DocumentSession                     │
//!  │          │ ◄────────── │   Document (ChangeQueue + replica)  │
//!  └──────────┘   render    │     │ outbound          ▲ inbound   │
//!                           │     ▼                   │           │
//!                           │ PushWorker (retry)   subscriptions  │
//!                           └─────┬───────────────────┬───────────┘
//!                                 │                   │
//!                  ┌──────────────▼───────────────────┴──┐   ┌────────────┐
//!                  │ RemoteStore (Hub │ RemoteClient)    │   │ LocalStore │
//!                  └─────────────────────────────────────┘   │ (RocksDB)  │
//!                                                             └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`] — Open documents, background tasks, editor binding
//! - [`document`] — Shared per-document state
//! - [`queue`] — FIFO change queue serializing replica mutations
//! - [`inbound`] / [`metadata`] — Remote stream handlers
//! - [`outbound`] / [`retry`] — Push planning and the retrying push worker
//! - [`library`] — Local document catalogue
//! - [`share`] — Share tokens
//! - [`remote`] — Remote store trait, in-process hub, WebSocket transport
//! - [`storage`] — Local store trait, memory and RocksDB backends
//! - [`compression`] — LZ4 framing of change bytes
//! - [`editor`] — Editor capability and a headless buffer

pub mod compression;
pub mod config;
pub mod document;
pub mod editor;
pub mod inbound;
pub mod library;
pub mod metadata;
pub mod outbound;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod scope;
pub mod session;
pub mod share;
pub mod storage;

// Re-exports for convenience
pub use config::SyncConfig;
pub use editor::{BufferEditor, Editor, Origin, Selection};
pub use library::{DocumentSummary, LoadedDocument};
pub use remote::client::RemoteClient;
pub use remote::hub::{Hub, HubRemote, HubStats};
pub use remote::server::{RemoteServer, ServerConfig, ServerStats};
pub use remote::{RemoteError, RemoteErrorKind, RemoteItem, RemoteStore, Scope};
pub use retry::{PushStats, PushWorker};
pub use session::{DocumentSession, DocumentSource, SessionError};
pub use share::{share_link, ShareError};
pub use storage::{LocalStore, MemoryStore, RocksStore, StoreConfig, StoreError};
