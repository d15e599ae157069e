//! Per-object synchronization state.
//!
//! `SyncState` is a value: every transition produces a new state that
//! replaces the old one on the owning object. The payload of each variant is
//! the last-known remote record, which only `Local` lacks.

use std::fmt;
use zonesync_protocol::{Record, RecordId};

/// Phase of an object's synchronization, without the record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Only exists locally, never sent to the store.
    Local,
    /// Sent to the store in a push batch, waiting for the outcome.
    Pending,
    /// Marked for deletion on the store.
    PendingDelete,
    /// Matches the last-known remote record.
    Synced,
    /// Edited locally since the last sync.
    Modified,
    /// The store rejected the last push of this object.
    Failed,
}

impl SyncPhase {
    /// Returns the phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Local => "Local",
            SyncPhase::Pending => "Pending",
            SyncPhase::PendingDelete => "PendingDelete",
            SyncPhase::Synced => "Synced",
            SyncPhase::Modified => "Modified",
            SyncPhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronization state of one object.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// Never sent to the store; no remote record exists.
    Local,
    /// Locked in an in-flight push; holds the record as it was sent.
    Pending(Record),
    /// Marked for deletion.
    ///
    /// `in_flight` is set while a push batch carries the deletion; only then
    /// is the object locked by that operation.
    PendingDelete {
        /// Last-known remote record.
        record: Record,
        /// Whether a push batch currently carries this deletion.
        in_flight: bool,
    },
    /// In sync with the held record.
    Synced(Record),
    /// Locally edited; holds the last-known remote record.
    Modified(Record),
    /// Rejected by the store; holds the last-known remote record.
    Failed(Record),
}

impl SyncState {
    /// Returns the phase of this state.
    pub fn phase(&self) -> SyncPhase {
        match self {
            SyncState::Local => SyncPhase::Local,
            SyncState::Pending(_) => SyncPhase::Pending,
            SyncState::PendingDelete { .. } => SyncPhase::PendingDelete,
            SyncState::Synced(_) => SyncPhase::Synced,
            SyncState::Modified(_) => SyncPhase::Modified,
            SyncState::Failed(_) => SyncPhase::Failed,
        }
    }

    /// Returns the last-known remote record.
    pub fn remote_snapshot(&self) -> Option<&Record> {
        match self {
            SyncState::Local => None,
            SyncState::Pending(record)
            | SyncState::PendingDelete { record, .. }
            | SyncState::Synced(record)
            | SyncState::Modified(record)
            | SyncState::Failed(record) => Some(record),
        }
    }

    /// Returns the ID of the last-known remote record.
    pub fn remote_id(&self) -> Option<&RecordId> {
        self.remote_snapshot().map(Record::id)
    }

    /// Returns true while a push operation owns this object.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            SyncState::Pending(_) | SyncState::PendingDelete { in_flight: true, .. }
        )
    }

    /// Returns true if the object's fields must be pushed.
    pub fn needs_push(&self) -> bool {
        matches!(
            self,
            SyncState::Local | SyncState::Modified(_) | SyncState::Failed(_)
        )
    }

    /// Returns true if a deletion must be pushed.
    pub fn needs_delete_push(&self) -> bool {
        matches!(self, SyncState::PendingDelete { in_flight: false, .. })
    }

    /// Returns true if the object is marked for deletion (in flight or not).
    pub fn is_deleted(&self) -> bool {
        matches!(self, SyncState::PendingDelete { .. })
    }

    /// Returns true if the object has never been sent to the store.
    pub fn is_local_only(&self) -> bool {
        matches!(self, SyncState::Local)
    }

    /// State after a user edit, or `None` when the edit changes nothing.
    pub fn after_edit(&self) -> Option<SyncState> {
        match self {
            SyncState::Synced(record) => Some(SyncState::Modified(record.clone())),
            _ => None,
        }
    }

    /// State after the user deletes the object.
    pub fn after_delete_mark(&self) -> DeleteMark {
        match self {
            SyncState::Local => DeleteMark::RemoveLocally,
            SyncState::Pending(_) | SyncState::PendingDelete { in_flight: true, .. } => {
                DeleteMark::Locked
            }
            SyncState::PendingDelete {
                in_flight: false, ..
            } => DeleteMark::AlreadyMarked,
            SyncState::Synced(record) | SyncState::Modified(record) | SyncState::Failed(record) => {
                DeleteMark::Marked(SyncState::PendingDelete {
                    record: record.clone(),
                    in_flight: false,
                })
            }
        }
    }

    /// State after a push that did not confirm this object.
    ///
    /// `rejected` selects `Failed` over `Modified` for saves the store
    /// explicitly refused. Returns `None` if the object is not locked.
    pub fn after_push_released(&self, rejected: bool) -> Option<SyncState> {
        match self {
            SyncState::Pending(record) if rejected => Some(SyncState::Failed(record.clone())),
            SyncState::Pending(record) => Some(SyncState::Modified(record.clone())),
            SyncState::PendingDelete {
                record,
                in_flight: true,
            } => Some(SyncState::PendingDelete {
                record: record.clone(),
                in_flight: false,
            }),
            _ => None,
        }
    }
}

/// Outcome of marking an object deleted.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteMark {
    /// Never synced: the owner removes it, nothing is pushed.
    RemoveLocally,
    /// Now waiting for a delete push.
    Marked(SyncState),
    /// Was already waiting for a delete push.
    AlreadyMarked,
    /// Locked by an in-flight push.
    Locked,
}
