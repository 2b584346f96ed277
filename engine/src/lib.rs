//! # Stockpile Engine
//!
//! The deterministic core of an offline-first inventory sync client.
//!
//! This crate holds everything about synchronization that can be decided
//! without touching a disk or a socket: the record model, the version-based
//! conflict policy, the reconciliation planner and the state projector that
//! turns sync events into an observable state value.
//!
//! ## Design Principles
//!
//! - **No IO**: storage, HTTP and WebSocket live in `stockpile-client`
//! - **Deterministic**: the same local and remote sets always yield the same plan
//! - **Testable**: pure functions, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is one inventory entry. Its `version` increases by exactly one
//! on every authoritative mutation and is the only tie-breaker used during
//! reconciliation. Field contents are compared only when versions are equal.
//!
//! ### Reconciliation
//!
//! [`reconcile::plan`] compares the local collection with the remote one and
//! produces an ordered list of [`ReconcileStep`]s:
//! - [`ReconcileStep::Pull`] - remote record unknown locally
//! - [`ReconcileStep::PushLocal`] - local version is ahead
//! - [`ReconcileStep::AcceptRemote`] - remote version is ahead
//! - [`ReconcileStep::RecordConflict`] - same version, different fields
//! - [`ReconcileStep::Remap`] - created offline, needs a server id
//! - [`ReconcileStep::MarkSynced`] - pending locally, but the server already has it
//!
//! Conflicts are never merged automatically. They are stored on the local
//! record until someone resolves them explicitly.
//!
//! ### Projection
//!
//! [`projector::project`] is a pure reducer from `(SyncState, SyncEvent)` to a
//! new [`SyncState`]. Observers compare states by value.
//!
//! ## Quick Start
//!
//! ```rust
//! use stockpile_engine::{reconcile, ReconcileStep, Record};
//!
//! let local = vec![Record::new("Apples", "Poland", 10.0, 2.5).with_id("a").with_version(2)];
//! let remote = vec![
//!     Record::new("Apples", "Spain", 10.0, 2.5).with_id("a").with_version(2),
//!     Record::new("Pears", "Italy", 4.0, 3.0).with_id("b"),
//! ];
//!
//! let plan = reconcile::plan(&local, &remote).unwrap();
//! assert!(matches!(plan.steps[0], ReconcileStep::RecordConflict { .. }));
//! assert!(matches!(plan.steps[1], ReconcileStep::Pull(_)));
//! ```

pub mod error;
pub mod policy;
pub mod projector;
pub mod protocol;
pub mod reconcile;
pub mod record;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use policy::{LiveVerdict, Verdict};
pub use projector::{project, EnginePhase, LoadStatus, PhaseStatus, SyncEvent, SyncState};
pub use protocol::{ClientMessage, LiveMessage};
pub use reconcile::{ReconcilePlan, ReconcileResult, ReconcileStep};
pub use record::{Location, Record};

/// Type aliases for clarity
pub type RecordId = String;
pub type Version = u64;
