//! Per-entity-type object collections.
//!
//! An [`ObjectCollection`] owns every object of one entity type. It derives
//! push work-lists from the objects' states and applies push and pull results
//! back onto them. All state changes go through the object's state-machine
//! methods.

use crate::error::{SyncError, SyncResult};
use crate::notify::ChangeNotifier;
use crate::object::{DeleteOutcome, ObjectKey, SyncEntity, SyncObject};
use crate::pull::{PullApplied, PullResult};
use crate::push::{PushApplied, PushBatch, PushReconciliation};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};
use zonesync_protocol::{Record, RecordId};

/// All objects of one entity type.
pub struct ObjectCollection<E: SyncEntity> {
    /// Objects in insertion order; keys are strictly increasing.
    objects: Vec<SyncObject<E>>,
    next_key: u64,
    notifier: Arc<ChangeNotifier>,
}

impl<E: SyncEntity> ObjectCollection<E> {
    /// Creates an empty collection that reports to `notifier`.
    pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            objects: Vec::new(),
            next_key: 1,
            notifier,
        }
    }

    /// Returns the entity type of this collection.
    pub fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    /// Returns the number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates over the objects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncObject<E>> {
        self.objects.iter()
    }

    /// Returns the object with this key.
    pub fn get(&self, key: ObjectKey) -> Option<&SyncObject<E>> {
        self.position(key).map(|i| &self.objects[i])
    }

    /// Applies a user edit to an object.
    pub fn edit<F>(&mut self, key: ObjectKey, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut E),
    {
        let index = self.position(key).ok_or(SyncError::UnknownObject { key })?;
        self.objects[index].edit(f)
    }

    /// Objects whose fields need to be pushed, in insertion order.
    pub fn eligible_for_push(&self) -> Vec<ObjectKey> {
        self.objects
            .iter()
            .filter(|o| o.state().needs_push())
            .map(SyncObject::key)
            .collect()
    }

    /// Objects whose deletion needs to be pushed, in insertion order.
    pub fn eligible_for_delete(&self) -> Vec<ObjectKey> {
        self.objects
            .iter()
            .filter(|o| o.state().needs_delete_push())
            .map(SyncObject::key)
            .collect()
    }

    /// Adds a new, never-synced object with default fields.
    pub fn create_local(&mut self) -> ObjectKey {
        self.create_local_with(E::default())
    }

    /// Adds a new, never-synced object.
    pub fn create_local_with(&mut self, entity: E) -> ObjectKey {
        let key = self.allocate_key();
        self.objects
            .push(SyncObject::new_local(key, entity, Arc::clone(&self.notifier)));
        self.notifier.collection_changed(E::ENTITY_TYPE);
        key
    }

    /// Adds a `Synced` object built from a remote record.
    pub fn create_from_remote(&mut self, record: Record) -> ObjectKey {
        let key = self.allocate_key();
        self.objects
            .push(SyncObject::from_remote(key, record, Arc::clone(&self.notifier)));
        self.notifier.collection_changed(E::ENTITY_TYPE);
        key
    }

    /// Finds the object whose last-known remote record has this ID.
    pub fn find_by_remote_id(&self, id: &RecordId) -> Option<&SyncObject<E>> {
        self.objects.iter().find(|o| o.remote_id() == Some(id))
    }

    /// Deletes an object.
    ///
    /// Objects that were never pushed are removed at once. Everything else
    /// stays as `PendingDelete` until a push confirms the deletion.
    pub fn delete(&mut self, key: ObjectKey) -> SyncResult<DeleteOutcome> {
        let index = self.position(key).ok_or(SyncError::UnknownObject { key })?;
        let outcome = self.objects[index].mark_deleted().inspect_err(|e| {
            warn!(entity_type = E::ENTITY_TYPE, key = %key, error = %e, "delete refused");
        })?;

        if outcome == DeleteOutcome::RemovedLocally {
            self.objects.remove(index);
            self.notifier.collection_changed(E::ENTITY_TYPE);
        }
        Ok(outcome)
    }

    /// Locks eligible objects and adds them to `batch` until it is full.
    ///
    /// Saves are staged before deletions. Objects that refuse to lock are
    /// skipped. Returns the number staged.
    pub fn stage_push(&mut self, batch: &mut PushBatch<'_>) -> usize {
        let mut staged = 0;
        let candidates = self
            .eligible_for_push()
            .into_iter()
            .chain(self.eligible_for_delete());

        for key in candidates {
            if batch.is_full() {
                break;
            }
            let Some(index) = self.position(key) else {
                continue;
            };
            match self.objects[index].prepare_for_push(|| batch.mint_id()) {
                Ok(Some(item)) => {
                    batch.stage(E::ENTITY_TYPE, key, item);
                    staged += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(entity_type = E::ENTITY_TYPE, key = %key, error = %e, "not staged"),
            }
        }
        staged
    }

    /// Applies this collection's part of a push result.
    ///
    /// Objects a concurrent pull already released or removed are skipped. A
    /// confirmation that does not fit the object's state unlocks it for the
    /// next push instead, so no object stays locked afterwards.
    pub fn apply_push_result(&mut self, result: &PushReconciliation) -> PushApplied {
        let mut applied = PushApplied::default();

        for (key, record) in &result.saved {
            let Some(index) = self.position(*key) else {
                debug!(key = %key, "saved object no longer exists");
                continue;
            };
            match self.objects[index].on_push_accepted(record.clone()) {
                Ok(()) => applied.saved += 1,
                Err(e) => {
                    debug!(key = %key, error = %e, "skipping save confirmation");
                    applied.requeued += self.requeue_if_locked(index);
                }
            }
        }

        let mut removed = false;
        for key in &result.deleted {
            let Some(index) = self.position(*key) else {
                debug!(key = %key, "deleted object no longer exists");
                continue;
            };
            match self.objects[index].on_delete_accepted() {
                Ok(()) => {
                    self.objects.remove(index);
                    applied.deleted += 1;
                    removed = true;
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "skipping delete confirmation");
                    applied.requeued += self.requeue_if_locked(index);
                }
            }
        }

        for (key, rejected) in &result.unconfirmed {
            let Some(index) = self.position(*key) else {
                continue;
            };
            let object = &mut self.objects[index];
            let was_save = !object.state().is_deleted();
            match object.on_push_rejected_or_timed_out(*rejected) {
                Ok(()) if *rejected && was_save => applied.failed += 1,
                Ok(()) => applied.requeued += 1,
                Err(e) => debug!(key = %key, error = %e, "object already unlocked"),
            }
        }

        if removed {
            self.notifier.collection_changed(E::ENTITY_TYPE);
        }
        applied
    }

    /// Applies the entries of a pull result that belong to this entity type.
    ///
    /// Remote deletions remove objects even while a push holds them, and
    /// remote updates overwrite locked objects. An update carrying the change
    /// tag the object already holds counts as updated but keeps pending local
    /// edits and deletions.
    pub fn apply_pull_result(&mut self, result: &PullResult) -> PullApplied {
        let mut applied = PullApplied::default();

        for id in result.deleted_of_type(E::ENTITY_TYPE) {
            let before = self.objects.len();
            self.objects.retain(|o| o.remote_id() != Some(id));
            applied.removed += before - self.objects.len();
        }
        if applied.removed > 0 {
            self.notifier.collection_changed(E::ENTITY_TYPE);
        }

        for record in result.updated_of_type(E::ENTITY_TYPE) {
            let existing = self
                .objects
                .iter_mut()
                .find(|o| o.remote_id() == Some(record.id()));
            match existing {
                Some(object) => {
                    object.on_incoming_remote_update(record);
                    applied.updated += 1;
                }
                None => {
                    self.create_from_remote(record.clone());
                    applied.inserted += 1;
                }
            }
        }

        applied
    }

    /// Returns the number of objects locked by an in-flight push.
    pub fn locked_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_locked()).count()
    }

    /// Unlocks every locked object without a confirmation.
    ///
    /// Used when a push is abandoned. Returns the number unlocked.
    pub fn requeue_locked(&mut self) -> usize {
        (0..self.objects.len())
            .map(|index| self.requeue_if_locked(index))
            .sum()
    }

    fn requeue_if_locked(&mut self, index: usize) -> usize {
        let object = &mut self.objects[index];
        if !object.is_locked() {
            return 0;
        }
        match object.on_push_rejected_or_timed_out(false) {
            Ok(()) => 1,
            Err(e) => {
                warn!(key = %object.key(), error = %e, "could not unlock object");
                0
            }
        }
    }

    fn allocate_key(&mut self) -> ObjectKey {
        let key = ObjectKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn position(&self, key: ObjectKey) -> Option<usize> {
        self.objects.binary_search_by_key(&key, SyncObject::key).ok()
    }
}

/// Type-erased view of a collection, as held by the coordinator.
pub trait ManagedCollection: Send {
    /// Returns the entity type of the collection.
    fn entity_type(&self) -> &'static str;

    /// Locks eligible objects into `batch`.
    fn stage_push(&mut self, batch: &mut PushBatch<'_>) -> usize;

    /// Applies this collection's part of a push result.
    fn apply_push_result(&mut self, result: &PushReconciliation) -> PushApplied;

    /// Applies a pull result.
    fn apply_pull_result(&mut self, result: &PullResult) -> PullApplied;

    /// Returns true if anything waits to be pushed.
    fn has_pending_work(&self) -> bool;

    /// Returns the number of locked objects.
    fn locked_count(&self) -> usize;

    /// Unlocks every locked object without a confirmation.
    fn requeue_locked(&mut self) -> usize;

    /// Upcast for downcasting to the concrete collection.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete collection.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: SyncEntity> ManagedCollection for ObjectCollection<E> {
    fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    fn stage_push(&mut self, batch: &mut PushBatch<'_>) -> usize {
        ObjectCollection::stage_push(self, batch)
    }

    fn apply_push_result(&mut self, result: &PushReconciliation) -> PushApplied {
        ObjectCollection::apply_push_result(self, result)
    }

    fn apply_pull_result(&mut self, result: &PullResult) -> PullApplied {
        ObjectCollection::apply_pull_result(self, result)
    }

    fn has_pending_work(&self) -> bool {
        self.objects
            .iter()
            .any(|o| o.state().needs_push() || o.state().needs_delete_push())
    }

    fn locked_count(&self) -> usize {
        ObjectCollection::locked_count(self)
    }

    fn requeue_locked(&mut self) -> usize {
        ObjectCollection::requeue_locked(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
