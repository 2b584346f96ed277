//! State projection from sync events.
//!
//! [`project`] is a pure, total reducer. It never performs I/O and always
//! returns a fresh [`SyncState`] value, so observers can detect changes by
//! comparing successive states.

use crate::{Error, Record, RecordId};

/// Progress of the initial load from the local store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStatus {
    pub loading: bool,
    pub loaded: bool,
    pub error: Option<Error>,
}

/// In-flight flag and last error of one sync phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseStatus {
    pub in_flight: bool,
    pub error: Option<Error>,
}

impl PhaseStatus {
    fn started(&mut self) {
        self.in_flight = true;
        self.error = None;
    }

    fn succeeded(&mut self) {
        self.in_flight = false;
    }

    fn failed(&mut self, error: &Error) {
        self.in_flight = false;
        self.error = Some(error.clone());
    }
}

/// Position on the load/reconcile axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    OfflineLoading,
    Reconciling,
}

/// Observer-visible sync state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    /// Records in display order
    pub items: Vec<Record>,
    pub offline_load: LoadStatus,
    pub reconcile: PhaseStatus,
    pub save: PhaseStatus,
    pub delete: PhaseStatus,
    pub conflict_resolution: PhaseStatus,
}

impl SyncState {
    /// Create the empty state an engine starts with.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position on the load/reconcile axis.
    ///
    /// Save, delete and conflict resolution are tracked independently.
    pub fn phase(&self) -> EnginePhase {
        if self.offline_load.loading {
            EnginePhase::OfflineLoading
        } else if self.reconcile.in_flight {
            EnginePhase::Reconciling
        } else {
            EnginePhase::Idle
        }
    }

    /// Look up a record by id.
    pub fn item(&self, id: &str) -> Option<&Record> {
        self.items.iter().find(|r| r.id() == Some(id))
    }

    /// Records carrying an unresolved conflict.
    pub fn conflicts(&self) -> impl Iterator<Item = &Record> {
        self.items.iter().filter(|r| r.is_conflicted())
    }

    /// Records not yet confirmed by the server.
    pub fn pending(&self) -> impl Iterator<Item = &Record> {
        self.items.iter().filter(|r| r.offline)
    }

    fn position(&self, id: Option<&str>) -> Option<usize> {
        let id = id?;
        self.items.iter().position(|r| r.id() == Some(id))
    }

    /// Replace in place, or insert new records at the front.
    fn upsert_front(&mut self, item: &Record) {
        match self.position(item.id()) {
            Some(index) => self.items[index] = item.clone(),
            None => self.items.insert(0, item.clone()),
        }
    }

    /// Replace in place, or append.
    fn upsert_back(&mut self, item: &Record) {
        match self.position(item.id()) {
            Some(index) => self.items[index] = item.clone(),
            None => self.items.push(item.clone()),
        }
    }

    fn remove(&mut self, id: &str) {
        self.items.retain(|r| r.id() != Some(id));
    }
}

/// Events dispatched by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    OfflineLoadStarted,
    OfflineLoadSucceeded { items: Vec<Record> },
    OfflineLoadFailed { error: Error },

    SyncStarted,
    SyncSucceeded,
    SyncFailed { error: Error },

    /// A remote record was persisted locally for the first time.
    ItemPulled { item: Record },
    /// A newer local copy was sent to the server and is no longer pending.
    ItemPushed { id: RecordId },
    /// A newer remote copy replaced the local one.
    RemoteAccepted { item: Record },
    /// A provisional local entry was dropped in favour of a server id.
    ItemRemapped { old_id: RecordId },
    ConflictRecorded { id: RecordId, remote: Record },

    SaveStarted,
    SaveSucceeded { item: Record },
    SaveFailed { error: Error },

    DeleteStarted,
    DeleteSucceeded { id: RecordId },
    DeleteFailed { error: Error },

    ConflictResolutionStarted,
    ConflictResolutionFinished { error: Option<Error> },
}

impl SyncEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::OfflineLoadStarted => "offline_load_started",
            SyncEvent::OfflineLoadSucceeded { .. } => "offline_load_succeeded",
            SyncEvent::OfflineLoadFailed { .. } => "offline_load_failed",
            SyncEvent::SyncStarted => "sync_started",
            SyncEvent::SyncSucceeded => "sync_succeeded",
            SyncEvent::SyncFailed { .. } => "sync_failed",
            SyncEvent::ItemPulled { .. } => "item_pulled",
            SyncEvent::ItemPushed { .. } => "item_pushed",
            SyncEvent::RemoteAccepted { .. } => "remote_accepted",
            SyncEvent::ItemRemapped { .. } => "item_remapped",
            SyncEvent::ConflictRecorded { .. } => "conflict_recorded",
            SyncEvent::SaveStarted => "save_started",
            SyncEvent::SaveSucceeded { .. } => "save_succeeded",
            SyncEvent::SaveFailed { .. } => "save_failed",
            SyncEvent::DeleteStarted => "delete_started",
            SyncEvent::DeleteSucceeded { .. } => "delete_succeeded",
            SyncEvent::DeleteFailed { .. } => "delete_failed",
            SyncEvent::ConflictResolutionStarted => "conflict_resolution_started",
            SyncEvent::ConflictResolutionFinished { .. } => "conflict_resolution_finished",
        }
    }
}

/// Compute the state that follows `event`.
pub fn project(state: &SyncState, event: &SyncEvent) -> SyncState {
    let mut next = state.clone();

    match event {
        SyncEvent::OfflineLoadStarted => {
            next.offline_load = LoadStatus {
                loading: true,
                loaded: false,
                error: None,
            };
        }
        SyncEvent::OfflineLoadSucceeded { items } => {
            next.offline_load.loading = false;
            next.offline_load.loaded = true;
            next.items = items.clone();
        }
        SyncEvent::OfflineLoadFailed { error } => {
            next.offline_load.loading = false;
            next.offline_load.error = Some(error.clone());
        }

        SyncEvent::SyncStarted => next.reconcile.started(),
        SyncEvent::SyncSucceeded => next.reconcile.succeeded(),
        SyncEvent::SyncFailed { error } => next.reconcile.failed(error),

        SyncEvent::ItemPulled { item } => next.upsert_back(item),
        SyncEvent::ItemPushed { id } => {
            if let Some(index) = next.position(Some(id)) {
                next.items[index].offline = false;
            }
        }
        SyncEvent::RemoteAccepted { item } => next.upsert_front(item),
        SyncEvent::ItemRemapped { old_id } => next.remove(old_id),
        SyncEvent::ConflictRecorded { id, remote } => {
            if let Some(index) = next.position(Some(id)) {
                let item = &mut next.items[index];
                item.offline = false;
                item.mark_conflicted(remote.clone());
            }
        }

        SyncEvent::SaveStarted => next.save.started(),
        SyncEvent::SaveSucceeded { item } => {
            next.upsert_front(item);
            next.save.succeeded();
        }
        SyncEvent::SaveFailed { error } => next.save.failed(error),

        SyncEvent::DeleteStarted => next.delete.started(),
        SyncEvent::DeleteSucceeded { id } => {
            next.remove(id);
            next.delete.succeeded();
        }
        SyncEvent::DeleteFailed { error } => next.delete.failed(error),

        SyncEvent::ConflictResolutionStarted => next.conflict_resolution.started(),
        SyncEvent::ConflictResolutionFinished { error } => match error {
            Some(error) => next.conflict_resolution.failed(error),
            None => next.conflict_resolution.succeeded(),
        },
    }

    next
}
