//! Reconciliation planning for syncing local and remote state.
//!
//! Planning is pure. The client executes the resulting steps against its
//! local store and the remote API, in order.
//!
//! # Algorithm
//!
//! 1. Walk remote records in fetch order
//! 2. Unknown locally: pull it
//! 3. Known locally: compare versions (see [`crate::policy::compare`]). A
//!    pending local copy that already matches the server is only marked synced
//! 4. Walk local records in store order; any id the server did not return
//!    was created offline and needs a server id (remap)

use crate::{
    error::Result,
    policy::{self, Verdict},
    Error, Record, RecordId,
};
use std::collections::{HashMap, HashSet};

/// A single action of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileStep {
    /// Persist a remote record that has no local counterpart.
    Pull(Record),
    /// Send the local copy to the server as an update.
    PushLocal(Record),
    /// Overwrite the local copy with the remote record.
    AcceptRemote(Record),
    /// Persist the local copy flagged with the disagreeing remote snapshot.
    RecordConflict { local: Record, remote: Record },
    /// Replace a provisional local id with a server-assigned one.
    Remap(Record),
    /// Clear the pending flag of a local copy the server already holds.
    MarkSynced(Record),
}

impl ReconcileStep {
    /// Id of the record this step touches.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            ReconcileStep::Pull(record)
            | ReconcileStep::PushLocal(record)
            | ReconcileStep::AcceptRemote(record)
            | ReconcileStep::Remap(record)
            | ReconcileStep::MarkSynced(record) => record.id(),
            ReconcileStep::RecordConflict { local, .. } => local.id(),
        }
    }
}

/// Ordered steps for one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub steps: Vec<ReconcileStep>,
    /// Ids that need no action
    pub unchanged: Vec<RecordId>,
}

impl ReconcilePlan {
    /// Check whether the pass has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build the plan for a pass.
///
/// Fails with [`Error::Protocol`] when the server returned a record without
/// an id. Only the first occurrence of a duplicated remote id is considered.
pub fn plan(local: &[Record], remote: &[Record]) -> Result<ReconcilePlan> {
    let local_by_id: HashMap<&str, &Record> = local
        .iter()
        .filter_map(|record| record.id().map(|id| (id, record)))
        .collect();

    let mut seen: HashSet<&str> = HashSet::with_capacity(remote.len());
    let mut plan = ReconcilePlan::default();

    for remote_record in remote {
        let id = remote_record
            .id()
            .ok_or_else(|| Error::Protocol("fetched record without id".into()))?;
        if !seen.insert(id) {
            continue;
        }

        let Some(local_record) = local_by_id.get(id) else {
            plan.steps.push(ReconcileStep::Pull(remote_record.clone()));
            continue;
        };

        match policy::compare(local_record, remote_record) {
            Verdict::LocalNewer => plan
                .steps
                .push(ReconcileStep::PushLocal((*local_record).clone())),
            Verdict::RemoteNewer => plan
                .steps
                .push(ReconcileStep::AcceptRemote(remote_record.clone())),
            Verdict::Conflict => plan.steps.push(ReconcileStep::RecordConflict {
                local: (*local_record).clone(),
                remote: remote_record.clone(),
            }),
            Verdict::InSync if local_record.offline => plan
                .steps
                .push(ReconcileStep::MarkSynced((*local_record).clone())),
            Verdict::InSync | Verdict::AlreadyConflicted => plan.unchanged.push(id.to_string()),
        }
    }

    for local_record in local {
        let known = local_record.id().is_some_and(|id| seen.contains(id));
        if !known {
            plan.steps.push(ReconcileStep::Remap(local_record.clone()));
        }
    }

    Ok(plan)
}

/// Summary of an executed reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileResult {
    /// Ids pulled from the server
    pub pulled: Vec<RecordId>,
    /// Ids pushed to the server as updates
    pub pushed: Vec<RecordId>,
    /// Ids overwritten by a newer remote version
    pub accepted: Vec<RecordId>,
    /// Ids flagged as conflicted
    pub conflicts: Vec<RecordId>,
    /// Provisional ids handed to the server for creation
    pub remapped: Vec<RecordId>,
    /// Pending ids the server already held
    pub synced: Vec<RecordId>,
    /// Ids that needed no action
    pub unchanged: Vec<RecordId>,
    /// Per-record failures; they do not fail the pass
    pub failures: Vec<(RecordId, Error)>,
    /// The server reported no change since the last fetch
    pub not_modified: bool,
}

impl ReconcileResult {
    /// A pass that was short-circuited by `304 Not Modified`.
    pub fn not_modified() -> Self {
        Self {
            not_modified: true,
            ..Self::default()
        }
    }

    /// Number of actions taken.
    pub fn changes(&self) -> usize {
        self.pulled.len()
            + self.pushed.len()
            + self.accepted.len()
            + self.conflicts.len()
            + self.remapped.len()
            + self.synced.len()
    }
}
