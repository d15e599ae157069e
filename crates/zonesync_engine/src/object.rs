//! Syncable objects.
//!
//! An entity type opts into sync by implementing [`SyncEntity`]: a type name
//! and a typed serialize/deserialize pair against the record field bag.
//! [`SyncObject`] wraps one entity instance with its [`SyncState`] and fires a
//! notification on every transition.

use crate::error::{SyncError, SyncResult};
use crate::notify::ChangeNotifier;
use crate::state::{DeleteMark, SyncPhase, SyncState};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use zonesync_protocol::{Record, RecordId};

/// An application entity that can be synchronized.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Note {
///     title: String,
/// }
///
/// impl SyncEntity for Note {
///     const ENTITY_TYPE: &'static str = "Note";
///
///     fn serialize(&self, record: &mut Record) {
///         record.set("title", self.title.as_str());
///     }
///
///     fn deserialize(&mut self, record: &Record) {
///         self.title = record.get_text("title").unwrap_or_default().to_owned();
///     }
/// }
/// ```
pub trait SyncEntity: Default + Send + 'static {
    /// Record type name used on the remote store.
    const ENTITY_TYPE: &'static str;

    /// Writes the entity's fields into a record.
    fn serialize(&self, record: &mut Record);

    /// Replaces the entity's fields with the record's.
    fn deserialize(&mut self, record: &Record);
}

/// Collection-local handle of an object.
///
/// Keys are assigned on insertion and never reused within a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(pub(crate) u64);

impl ObjectKey {
    /// Returns the numeric value of the key.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a locked object contributes to a push batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PushItem {
    /// Save this record.
    Save(Record),
    /// Delete the record with this ID.
    Delete(RecordId),
}

/// Result of deleting an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object was never synced and has been removed.
    RemovedLocally,
    /// The object stays in its collection until a push confirms the deletion.
    AwaitingPush,
}

/// An entity instance together with its sync state.
pub struct SyncObject<E: SyncEntity> {
    key: ObjectKey,
    entity: E,
    state: SyncState,
    notifier: Arc<ChangeNotifier>,
}

impl<E: SyncEntity> SyncObject<E> {
    pub(crate) fn new_local(key: ObjectKey, entity: E, notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            key,
            entity,
            state: SyncState::Local,
            notifier,
        }
    }

    pub(crate) fn from_remote(key: ObjectKey, record: Record, notifier: Arc<ChangeNotifier>) -> Self {
        let mut entity = E::default();
        entity.deserialize(&record);
        Self {
            key,
            entity,
            state: SyncState::Synced(record),
            notifier,
        }
    }

    /// Returns the object's key.
    pub fn key(&self) -> ObjectKey {
        self.key
    }

    /// Returns the entity.
    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Returns the sync state.
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Returns the sync phase.
    pub fn phase(&self) -> SyncPhase {
        self.state.phase()
    }

    /// Returns the ID of the last-known remote record.
    pub fn remote_id(&self) -> Option<&RecordId> {
        self.state.remote_id()
    }

    /// Returns true while an in-flight push owns this object.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Applies a user edit to the entity.
    ///
    /// Locked objects and objects marked for deletion refuse the edit and are
    /// left untouched.
    pub fn edit<F>(&mut self, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut E),
    {
        if self.state.is_locked() {
            tracing::warn!(key = %self.key, "edit refused: object is locked");
            return Err(SyncError::ObjectLocked { key: self.key });
        }
        if self.state.is_deleted() {
            return Err(SyncError::ObjectDeleted { key: self.key });
        }

        f(&mut self.entity);
        self.mark_modified();
        Ok(())
    }

    /// Moves a synced object to `Modified`. Returns whether the state changed.
    pub(crate) fn mark_modified(&mut self) -> bool {
        match self.state.after_edit() {
            Some(next) => {
                self.replace_state(next);
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_deleted(&mut self) -> SyncResult<DeleteOutcome> {
        match self.state.after_delete_mark() {
            DeleteMark::RemoveLocally => Ok(DeleteOutcome::RemovedLocally),
            DeleteMark::AlreadyMarked => Ok(DeleteOutcome::AwaitingPush),
            DeleteMark::Locked => Err(SyncError::ObjectLocked { key: self.key }),
            DeleteMark::Marked(next) => {
                self.replace_state(next);
                Ok(DeleteOutcome::AwaitingPush)
            }
        }
    }

    /// Locks the object for a push and returns what it contributes.
    ///
    /// `mint` is only called for objects that have no remote record yet.
    /// Returns `None` for objects that need no push.
    pub(crate) fn prepare_for_push<F>(&mut self, mint: F) -> SyncResult<Option<PushItem>>
    where
        F: FnOnce() -> RecordId,
    {
        let (next, item) = match &self.state {
            SyncState::PendingDelete {
                record,
                in_flight: false,
            } => (
                SyncState::PendingDelete {
                    record: record.clone(),
                    in_flight: true,
                },
                PushItem::Delete(record.id().clone()),
            ),
            SyncState::Pending(_) | SyncState::PendingDelete { .. } => {
                return Err(SyncError::ObjectLocked { key: self.key });
            }
            SyncState::Synced(_) => return Ok(None),
            SyncState::Local => {
                let mut record = Record::new(E::ENTITY_TYPE, mint());
                self.entity.serialize(&mut record);
                (SyncState::Pending(record.clone()), PushItem::Save(record))
            }
            SyncState::Modified(snapshot) | SyncState::Failed(snapshot) => {
                let mut record = snapshot.clone();
                self.entity.serialize(&mut record);
                (SyncState::Pending(record.clone()), PushItem::Save(record))
            }
        };

        self.replace_state(next);
        Ok(Some(item))
    }

    pub(crate) fn on_push_accepted(&mut self, record: Record) -> SyncResult<()> {
        if !matches!(self.state, SyncState::Pending(_)) {
            return Err(SyncError::InvalidTransition {
                from: self.phase(),
                action: "confirm a save of",
            });
        }
        self.replace_state(SyncState::Synced(record));
        Ok(())
    }

    pub(crate) fn on_delete_accepted(&mut self) -> SyncResult<()> {
        if !matches!(self.state, SyncState::PendingDelete { in_flight: true, .. }) {
            return Err(SyncError::InvalidTransition {
                from: self.phase(),
                action: "confirm a deletion of",
            });
        }
        self.replace_state(SyncState::Local);
        Ok(())
    }

    /// Releases the push lock without a confirmation.
    ///
    /// `rejected` marks saves the store explicitly refused as `Failed`.
    pub(crate) fn on_push_rejected_or_timed_out(&mut self, rejected: bool) -> SyncResult<()> {
        match self.state.after_push_released(rejected) {
            Some(next) => {
                self.replace_state(next);
                Ok(())
            }
            None => Err(SyncError::InvalidTransition {
                from: self.phase(),
                action: "unlock",
            }),
        }
    }

    /// Applies a remote update if the record belongs to this object.
    ///
    /// Matching ignores the lock: the store's state wins over an in-flight push.
    /// A record carrying the change tag of the held snapshot is a version the
    /// object already reflects; it matches but leaves local changes alone.
    pub(crate) fn on_incoming_remote_update(&mut self, record: &Record) -> bool {
        let Some(snapshot) = self.state.remote_snapshot() else {
            return false;
        };
        if snapshot.id() != record.id() {
            return false;
        }
        if record.change_tag().is_some() && snapshot.change_tag() == record.change_tag() {
            debug!(key = %self.key, id = %record.id(), "remote version already known");
            return true;
        }
        self.entity.deserialize(record);
        self.replace_state(SyncState::Synced(record.clone()));
        true
    }

    fn replace_state(&mut self, next: SyncState) {
        debug!(
            entity_type = E::ENTITY_TYPE,
            key = %self.key,
            from = %self.state.phase(),
            to = %next.phase(),
            "sync state transition"
        );
        self.state = next;
        self.notifier
            .object_changed(E::ENTITY_TYPE, self.key, self.state.phase());
    }
}

impl<E: SyncEntity + fmt::Debug> fmt::Debug for SyncObject<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncObject")
            .field("key", &self.key)
            .field("entity", &self.entity)
            .field("state", &self.state)
            .finish()
    }
}
