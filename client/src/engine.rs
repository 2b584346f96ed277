//! Sync engine: the only writer of the local store.
//!
//! Every operation takes `&mut self`, so two reconciliation passes (or a pass
//! and a live message) can never interleave their read-modify-write cycles on
//! the store. [`crate::runtime`] wraps the engine in a task to serialize
//! callers that live on different tasks.
//!
//! Each state transition goes through [`SyncEngine::dispatch`], which projects
//! the event onto the observable [`SyncState`] and republishes it only when the
//! projection changed.

use std::future::Future;

use stockpile_engine::policy::{self, LiveVerdict};
use stockpile_engine::{
    project, reconcile, Error, LiveMessage, ReconcileResult, ReconcileStep, Record, RecordId,
    Result, SyncEvent, SyncState,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::remote::{FetchOutcome, RemoteApi};
use crate::session::Session;
use crate::storage::BlobStorage;
use crate::store::ItemStore;

const EVENT_BUFFER: usize = 256;

/// Order of the two halves of an identity remap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemapPolicy {
    /// Create remotely first and drop the provisional entry only on success.
    /// A failed create leaves the record in place for the next pass.
    #[default]
    DeferRemoval,
    /// Drop the provisional entry, then create remotely. A failed create
    /// loses the record.
    RemoveFirst,
}

/// How a save was persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The server accepted the change; holds the server's copy.
    Online(Record),
    /// Kept locally with `offline = true`, either because there was no
    /// connection or because the server call failed.
    Offline(Record),
}

impl SaveOutcome {
    pub fn record(&self) -> &Record {
        match self {
            SaveOutcome::Online(record) | SaveOutcome::Offline(record) => record,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, SaveOutcome::Offline(_))
    }
}

/// What a live message did to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveOutcome {
    /// Unknown locally, stored as new.
    Inserted(Record),
    /// Replaced the local copy.
    Accepted(Record),
    /// Disagreed with the local copy at the same or a lower version.
    Conflicted(RecordId),
    /// Older than the local copy with the same fields.
    Ignored,
    /// Message kind the engine does not act on.
    Unhandled,
}

/// Offline-first synchronization engine.
pub struct SyncEngine<R, S> {
    remote: R,
    store: ItemStore<S>,
    remap_policy: RemapPolicy,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl<R: RemoteApi, S: BlobStorage> SyncEngine<R, S> {
    /// Create an engine over a remote and a storage backend.
    pub fn new(remote: R, storage: S) -> Self {
        let (state, _) = watch::channel(SyncState::new());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            remote,
            store: ItemStore::new(storage),
            remap_policy: RemapPolicy::default(),
            state,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_remap_policy(mut self, policy: RemapPolicy) -> Self {
        self.remap_policy = policy;
        self
    }

    pub fn store(&self) -> &ItemStore<S> {
        &self.store
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watch projected state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Receive every dispatched event.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.events.clone()
    }

    /// Token checked between reconcile steps and raced against every remote
    /// call. Once cancelled, operations stop with [`Error::Cancelled`].
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether a reconciliation pass may run for this session.
    pub fn is_ready(&self, session: &Session) -> bool {
        session.online_token().is_some() && self.state.borrow().offline_load.loaded
    }

    /// Load the local collection into the observable state.
    pub fn initialize(&mut self) -> Result<()> {
        self.dispatch(SyncEvent::OfflineLoadStarted);

        match self.store.get_all() {
            Ok(items) => {
                tracing::info!(count = items.len(), "Loaded local items");
                self.dispatch(SyncEvent::OfflineLoadSucceeded { items });
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load local items: {}", e);
                self.dispatch(SyncEvent::OfflineLoadFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Requires a token, connectivity and a completed offline load. Failures
    /// of individual records are collected in the result and do not fail the
    /// pass.
    pub async fn reconcile(&mut self, session: &Session) -> Result<ReconcileResult> {
        let Some(token) = session.online_token() else {
            return Err(Error::NotReady("no token or no connectivity".into()));
        };
        if !self.state.borrow().offline_load.loaded {
            return Err(Error::NotReady("local items not loaded".into()));
        }

        tracing::info!("Reconciliation started");
        self.dispatch(SyncEvent::SyncStarted);

        match self.run_pass(token).await {
            Ok(result) => {
                tracing::info!(
                    pulled = result.pulled.len(),
                    pushed = result.pushed.len(),
                    accepted = result.accepted.len(),
                    conflicts = result.conflicts.len(),
                    remapped = result.remapped.len(),
                    failures = result.failures.len(),
                    not_modified = result.not_modified,
                    "Reconciliation finished"
                );
                self.dispatch(SyncEvent::SyncSucceeded);
                Ok(result)
            }
            Err(e) => {
                tracing::warn!("Reconciliation failed: {}", e);
                self.dispatch(SyncEvent::SyncFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    async fn run_pass(&mut self, token: &str) -> Result<ReconcileResult> {
        let local = self.store.get_all()?;

        // A pending local change must be compared against the full remote set.
        let validator = if local.iter().any(|record| record.offline) {
            None
        } else {
            self.store.last_modified()?
        };

        let (remote, last_modified) = match self
            .cancellable(self.remote.fetch_all(token, validator.as_deref()))
            .await?
        {
            FetchOutcome::NotModified => return Ok(ReconcileResult::not_modified()),
            FetchOutcome::Fetched {
                records,
                last_modified,
            } => (records, last_modified),
        };

        let plan = reconcile::plan(&local, &remote)?;
        let mut result = ReconcileResult {
            unchanged: plan.unchanged,
            ..ReconcileResult::default()
        };

        for step in plan.steps {
            self.check_cancelled()?;

            let id = step.record_id().unwrap_or_default().to_string();
            match self.apply_step(token, step, &mut result).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(record_id = %id, "Reconcile step failed: {}", e);
                    result.failures.push((id, e));
                }
            }
        }

        if result.failures.is_empty() {
            if let Err(e) = self.store.set_last_modified(last_modified.as_deref()) {
                tracing::warn!("Failed to store fetch validator: {}", e);
            }
        }

        Ok(result)
    }

    async fn apply_step(
        &mut self,
        token: &str,
        step: ReconcileStep,
        result: &mut ReconcileResult,
    ) -> Result<()> {
        match step {
            ReconcileStep::Pull(mut record) => {
                record.offline = false;
                record.validate()?;
                if self.store.create(record.clone())?.is_none() {
                    self.store.update(&record)?;
                }
                result.pulled.push(record.id.clone().unwrap_or_default());
                self.dispatch(SyncEvent::ItemPulled { item: record });
            }
            ReconcileStep::PushLocal(local) => {
                self.cancellable(self.remote.update(token, &local)).await?;
                let id = local.id.clone().unwrap_or_default();
                if local.offline {
                    let mut pushed = local;
                    pushed.offline = false;
                    self.store.update(&pushed)?;
                }
                tracing::debug!(record_id = %id, "Pushed local item");
                result.pushed.push(id.clone());
                self.dispatch(SyncEvent::ItemPushed { id });
            }
            ReconcileStep::AcceptRemote(remote) => {
                let record = remote.for_remote();
                record.validate()?;
                if !self.store.update(&record)? {
                    self.store.create(record.clone())?;
                }
                result.accepted.push(record.id.clone().unwrap_or_default());
                self.dispatch(SyncEvent::RemoteAccepted { item: record });
            }
            ReconcileStep::RecordConflict { local, remote } => {
                let id = local.id.clone().unwrap_or_default();
                self.store.update(&policy::conflicted_copy(&local, &remote))?;
                tracing::info!(record_id = %id, version = local.version, "Conflict recorded");
                result.conflicts.push(id.clone());
                self.dispatch(SyncEvent::ConflictRecorded {
                    id,
                    remote: remote.for_remote(),
                });
            }
            ReconcileStep::MarkSynced(mut local) => {
                let id = local.id.clone().unwrap_or_default();
                local.offline = false;
                self.store.update(&local)?;
                tracing::debug!(record_id = %id, "Pending item already on server");
                result.synced.push(id.clone());
                self.dispatch(SyncEvent::ItemPushed { id });
            }
            ReconcileStep::Remap(local) => self.remap(token, local, result).await?,
        }

        Ok(())
    }

    /// Hand an offline-created record to the server for a permanent id.
    ///
    /// The record reappears under the server id through the live channel or
    /// the next pass.
    async fn remap(
        &mut self,
        token: &str,
        local: Record,
        result: &mut ReconcileResult,
    ) -> Result<()> {
        let old_id = local.id.clone().unwrap_or_default();
        let payload = local.without_id();

        let created = match self.remap_policy {
            RemapPolicy::DeferRemoval => {
                let created = self.cancellable(self.remote.create(token, &payload)).await?;
                self.drop_provisional(&old_id, result)?;
                created
            }
            RemapPolicy::RemoveFirst => {
                self.drop_provisional(&old_id, result)?;
                self.cancellable(self.remote.create(token, &payload))
                    .await
                    .map_err(|e| {
                        tracing::error!(record_id = %old_id, "Remote create failed after local removal: {}", e);
                        e
                    })?
            }
        };

        tracing::debug!(old_id = %old_id, new_id = ?created.id, "Remapped item");
        Ok(())
    }

    fn drop_provisional(&mut self, old_id: &str, result: &mut ReconcileResult) -> Result<()> {
        self.store.remove(old_id)?;
        result.remapped.push(old_id.to_string());
        self.dispatch(SyncEvent::ItemRemapped {
            old_id: old_id.to_string(),
        });
        Ok(())
    }

    /// Save a new or edited record.
    ///
    /// The version becomes `record.version + 1`, so a draft (version 0) is
    /// saved as version 1. When online the server is tried first; any failure
    /// there falls back to the local store and still succeeds, reported as
    /// [`SaveOutcome::Offline`]. A server reply without an id is a
    /// [`Error::Protocol`] failure.
    pub async fn save(&mut self, session: &Session, record: Record) -> Result<SaveOutcome> {
        self.dispatch(SyncEvent::SaveStarted);

        match self.save_record(session, record).await {
            Ok(outcome) => {
                self.dispatch(SyncEvent::SaveSucceeded {
                    item: outcome.record().clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!("Save failed: {}", e);
                self.dispatch(SyncEvent::SaveFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    async fn save_record(&mut self, session: &Session, mut record: Record) -> Result<SaveOutcome> {
        record.version = record
            .version
            .checked_add(1)
            .ok_or_else(|| Error::Validation("version overflow".into()))?;
        record.offline = false;
        record.validate()?;

        if let Some(token) = session.online_token() {
            let attempt = match record.id() {
                Some(_) => self.cancellable(self.remote.update(token, &record)).await,
                None => {
                    self.cancellable(self.remote.create(token, &record.without_id()))
                        .await
                }
            };

            match attempt {
                Ok(saved) if saved.id().is_none() => {
                    return Err(Error::Protocol("saved record returned without id".into()));
                }
                Ok(mut saved) => {
                    saved.offline = false;
                    let saved = self.persist(saved)?;
                    tracing::info!(record_id = ?saved.id, version = saved.version, "Saved online");
                    return Ok(SaveOutcome::Online(saved));
                }
                Err(e) => {
                    tracing::warn!(record_id = ?record.id, "Online save failed, keeping it offline: {}", e);
                }
            }
        }

        record.offline = true;
        let saved = self.persist(record)?;
        tracing::info!(record_id = ?saved.id, version = saved.version, "Saved offline");
        Ok(SaveOutcome::Offline(saved))
    }

    /// Update in place, or append under the record's id (a provisional one if
    /// it has none).
    fn persist(&self, record: Record) -> Result<Record> {
        if record.id().is_some() && self.store.update(&record)? {
            return Ok(record);
        }
        self.store
            .create(record)?
            .ok_or_else(|| Error::Persistence("record id already taken".into()))
    }

    /// Delete a record on the server, then locally.
    ///
    /// Deletes are never queued: without a connection this fails with
    /// [`Error::Disconnected`] and nothing changes.
    pub async fn delete(&mut self, session: &Session, id: &str) -> Result<()> {
        self.dispatch(SyncEvent::DeleteStarted);

        match self.delete_record(session, id).await {
            Ok(()) => {
                tracing::info!(record_id = %id, "Deleted item");
                self.dispatch(SyncEvent::DeleteSucceeded { id: id.to_string() });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(record_id = %id, "Delete failed: {}", e);
                self.dispatch(SyncEvent::DeleteFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    async fn delete_record(&self, session: &Session, id: &str) -> Result<()> {
        let token = session.online_token().ok_or(Error::Disconnected)?;
        self.cancellable(self.remote.delete(token, id)).await?;
        self.store.remove(id)?;
        Ok(())
    }

    /// Apply a message pushed by the server.
    pub fn handle_live_message(&mut self, message: LiveMessage) -> Result<LiveOutcome> {
        match message {
            LiveMessage::Created(record) | LiveMessage::Updated(record) => {
                self.apply_live_record(record)
            }
            LiveMessage::Deleted(record) => {
                tracing::debug!(record_id = ?record.and_then(|r| r.id), "Ignoring live delete");
                Ok(LiveOutcome::Unhandled)
            }
        }
    }

    fn apply_live_record(&mut self, remote: Record) -> Result<LiveOutcome> {
        let remote = remote.for_remote();
        let Some(id) = remote.id.clone() else {
            return Err(Error::Protocol("live record without id".into()));
        };
        remote.validate()?;

        let Some(local) = self.store.get(&id)? else {
            if self.store.create(remote.clone())?.is_none() {
                return Err(Error::Persistence(format!("record id {} already taken", id)));
            }
            tracing::debug!(record_id = %id, "Inserted live item");
            self.dispatch(SyncEvent::RemoteAccepted {
                item: remote.clone(),
            });
            return Ok(LiveOutcome::Inserted(remote));
        };

        match policy::live_verdict(&local, &remote) {
            LiveVerdict::Accept => {
                self.store.update(&remote)?;
                tracing::debug!(record_id = %id, version = remote.version, "Accepted live item");
                self.dispatch(SyncEvent::RemoteAccepted {
                    item: remote.clone(),
                });
                Ok(LiveOutcome::Accepted(remote))
            }
            LiveVerdict::Conflict => {
                self.store.update(&policy::conflicted_copy(&local, &remote))?;
                tracing::info!(record_id = %id, "Conflict recorded from live message");
                self.dispatch(SyncEvent::ConflictRecorded {
                    id: id.clone(),
                    remote,
                });
                Ok(LiveOutcome::Conflicted(id))
            }
            LiveVerdict::Ignore => Ok(LiveOutcome::Ignored),
        }
    }

    /// Resolve a recorded conflict.
    ///
    /// Resolution is not available yet: every call reports a failure, so no
    /// conflict is ever cleared silently.
    pub async fn resolve_conflict(
        &mut self,
        session: &Session,
        id: &str,
        resolved: Option<Record>,
    ) -> Result<Record> {
        self.dispatch(SyncEvent::ConflictResolutionStarted);

        let error = if !session.connected {
            Error::Disconnected
        } else {
            match self.store.get(id) {
                Ok(Some(_)) => Error::NotImplemented("conflict resolution".into()),
                Ok(None) => Error::RecordNotFound(id.to_string()),
                Err(e) => e,
            }
        };

        tracing::warn!(
            record_id = %id,
            with_replacement = resolved.is_some(),
            "Conflict resolution unavailable: {}",
            error
        );
        self.dispatch(SyncEvent::ConflictResolutionFinished {
            error: Some(error.clone()),
        });
        Err(error)
    }

    /// Await a remote call unless the engine is cancelled first.
    async fn cancellable<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = call => result,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn dispatch(&self, event: SyncEvent) {
        tracing::trace!(event = event.kind(), "Dispatch");

        self.state.send_if_modified(|state| {
            let next = project(state, &event);
            if next == *state {
                return false;
            }
            *state = next;
            true
        });

        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
