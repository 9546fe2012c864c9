use crate::models::UserRecord;

/// Which side has to issue a write after reconciling two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Remote was strictly older: push the merged record to the remote store.
    PushRemote,
    /// Remote was strictly newer: write the merged record to local cache only.
    WriteLocal,
    /// Timestamps were equal: both sides already convergent, no write at all.
    Noop,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub record: UserRecord,
    pub decision: MergeDecision,
}

/// Reconcile a local and a remote snapshot of the same logical record.
///
/// Append-only set fields are unioned, so no element is ever dropped and
/// the operation is commutative and idempotent. Settings are per-device
/// preferences and stay local unconditionally. `last_updated` takes the
/// greater of the two timestamps.
pub fn merge(local: &UserRecord, remote: &UserRecord) -> MergeResult {
    let mut record = local.clone();

    record.mistakes = local.mistakes.union(&remote.mistakes).copied().collect();
    record.archive = local.archive.union(&remote.archive).copied().collect();
    record.fav = local.fav.union(&remote.fav).copied().collect();

    // settings stay exactly as the local side had them
    record.owner = local.owner.or(remote.owner);
    record.user_name = local.user_name.clone().or_else(|| remote.user_name.clone());
    record.last_updated = local.last_updated.max(remote.last_updated);

    let decision = if remote.last_updated < local.last_updated {
        MergeDecision::PushRemote
    } else if remote.last_updated > local.last_updated {
        MergeDecision::WriteLocal
    } else {
        MergeDecision::Noop
    };

    MergeResult { record, decision }
}
