//! Version-based conflict policy.
//!
//! The version number is the only tie-breaker. Field contents are consulted
//! only when both sides claim the same version, and a disagreement at equal
//! versions is a conflict that is never merged automatically.

use crate::Record;

/// Outcome of comparing a local record with its remote counterpart during
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Local is ahead and must be pushed.
    LocalNewer,
    /// Remote is ahead and overwrites the local copy.
    RemoteNewer,
    /// Same version, same fields.
    InSync,
    /// Same version, different fields.
    Conflict,
    /// Conflict already recorded against this exact remote snapshot.
    AlreadyConflicted,
}

/// Outcome of comparing a live-pushed record with the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveVerdict {
    /// Adopt the remote record.
    Accept,
    /// Flag a conflict on the local copy.
    Conflict,
    /// Remote is older but carries the same fields.
    Ignore,
}

/// Compare a local record with the remote record of the same id.
pub fn compare(local: &Record, remote: &Record) -> Verdict {
    if local.version > remote.version {
        return Verdict::LocalNewer;
    }
    if local.version < remote.version {
        return Verdict::RemoteNewer;
    }
    if local.same_fields(remote) {
        return Verdict::InSync;
    }
    match local.conflicted_remote.as_deref() {
        Some(known) if known.version == remote.version && known.same_fields(remote) => {
            Verdict::AlreadyConflicted
        }
        _ => Verdict::Conflict,
    }
}

/// Decide what to do with a `created`/`updated` live message for a record
/// that already exists locally.
pub fn live_verdict(local: &Record, remote: &Record) -> LiveVerdict {
    let same = local.same_fields(remote);
    if remote.version > local.version || (remote.version == local.version && same) {
        LiveVerdict::Accept
    } else if !same {
        LiveVerdict::Conflict
    } else {
        LiveVerdict::Ignore
    }
}

/// Build the copy that is persisted when a conflict is recorded.
///
/// Local fields and version are kept as they are.
pub fn conflicted_copy(local: &Record, remote: &Record) -> Record {
    let mut copy = local.clone();
    copy.offline = false;
    copy.mark_conflicted(remote.for_remote());
    copy
}
