//! # Stockpile Client
//!
//! Offline-first sync client built on `stockpile-engine`.
//!
//! The client owns everything with side effects: the local key-value store,
//! the REST remote, the WebSocket live channel and the task that serializes
//! all of them.
//!
//! ## Layers
//!
//! - [`storage`] - whole-value blob persistence ([`MemoryStorage`], [`FileStorage`])
//! - [`store`] - the record collection on top of a blob backend
//! - [`remote`] - authoritative item API over HTTP
//! - [`live`] - server-pushed changes over WebSocket
//! - [`engine`] - reconciliation, saves, deletes and live-push handling
//! - [`runtime`] - single-writer task and the [`SyncHandle`] callers use
//!
//! ## Example
//!
//! ```no_run
//! use stockpile_client::{runtime, FileStorage, HttpRemote, SyncEngine, WsConnector};
//! use stockpile_engine::Record;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new(
//!     HttpRemote::new("http://localhost:3000"),
//!     FileStorage::open("./stockpile-data")?,
//! );
//! let handle = runtime::spawn(engine, WsConnector::new("ws://localhost:3000"));
//!
//! handle.set_token(Some("token".into())).await?;
//! handle.set_connected(true).await?;
//!
//! let saved = handle.save(Record::draft("Apples", "Poland", 10.0, 2.5)).await?;
//! println!("saved offline: {}", saved.is_offline());
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod live;
pub mod remote;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod store;

pub use config::{Config, ConfigError};
pub use engine::{LiveOutcome, RemapPolicy, SaveOutcome, SyncEngine};
pub use live::{LiveConnection, LiveConnector, WsConnector};
pub use remote::{FetchOutcome, HttpRemote, RemoteApi};
pub use runtime::{Command, SyncHandle};
pub use session::Session;
pub use storage::{BlobStorage, FileStorage, MemoryStorage};
pub use store::ItemStore;
