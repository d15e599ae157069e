//! Batched push of local changes.
//!
//! A push happens in three steps:
//! 1. Collections stage their eligible objects into a [`PushBatch`]. Staging
//!    calls `prepare_for_push` on each object, which locks it. This is the
//!    only point at which objects enter a batch.
//! 2. The finished [`PushOperation`] submits everything in one
//!    `modify_records` call.
//! 3. The result is split per collection by the operation's reverse index and
//!    applied there, releasing every lock the operation took.

use crate::error::StoreError;
use crate::object::{ObjectKey, PushItem};
use crate::store::{ModifyResult, RemoteStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use zonesync_protocol::{Record, RecordId, ZoneId};

/// The object a staged record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StagedObject {
    entity_type: &'static str,
    key: ObjectKey,
}

/// A push batch under construction.
pub struct PushBatch<'a> {
    zone: ZoneId,
    mint: Box<dyn Fn(&ZoneId) -> RecordId + 'a>,
    limit: usize,
    to_save: Vec<Record>,
    to_delete: Vec<RecordId>,
    index: HashMap<RecordId, StagedObject>,
}

impl<'a> PushBatch<'a> {
    /// Creates an empty batch for the zone.
    ///
    /// `mint` creates identities for objects that were never pushed.
    pub fn new<F>(zone: ZoneId, limit: usize, mint: F) -> Self
    where
        F: Fn(&ZoneId) -> RecordId + 'a,
    {
        Self {
            zone,
            mint: Box::new(mint),
            limit: limit.max(1),
            to_save: Vec::new(),
            to_delete: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Creates a batch that mints IDs through the store.
    pub fn for_store<S: RemoteStore>(zone: ZoneId, limit: usize, store: &'a S) -> Self {
        Self::new(zone, limit, move |zone| store.create_unique_id(zone))
    }

    /// Returns the number of staged entries.
    pub fn len(&self) -> usize {
        self.to_save.len() + self.to_delete.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the batch cannot take more entries.
    pub fn is_full(&self) -> bool {
        self.len() >= self.limit
    }

    /// Mints a fresh record ID in the batch's zone.
    pub(crate) fn mint_id(&self) -> RecordId {
        (self.mint)(&self.zone)
    }

    /// Adds a locked object's contribution.
    pub(crate) fn stage(&mut self, entity_type: &'static str, key: ObjectKey, item: PushItem) {
        let origin = StagedObject { entity_type, key };
        match item {
            PushItem::Save(record) => {
                self.index.insert(record.id().clone(), origin);
                self.to_save.push(record);
            }
            PushItem::Delete(id) => {
                self.index.insert(id.clone(), origin);
                self.to_delete.push(id);
            }
        }
    }

    /// Finishes construction. Returns `None` for an empty batch.
    pub fn into_operation(self, id: u64) -> Option<PushOperation> {
        if self.is_empty() {
            return None;
        }
        Some(PushOperation {
            id,
            to_save: self.to_save,
            to_delete: self.to_delete,
            index: self.index,
        })
    }
}

/// A built push batch whose objects are locked.
#[derive(Debug)]
pub struct PushOperation {
    id: u64,
    to_save: Vec<Record>,
    to_delete: Vec<RecordId>,
    index: HashMap<RecordId, StagedObject>,
}

impl PushOperation {
    /// Returns the operation ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the records to save.
    pub fn records_to_save(&self) -> &[Record] {
        &self.to_save
    }

    /// Returns the record IDs to delete.
    pub fn records_to_delete(&self) -> &[RecordId] {
        &self.to_delete
    }

    /// Returns the number of records to save.
    pub fn save_count(&self) -> usize {
        self.to_save.len()
    }

    /// Returns the number of records to delete.
    pub fn delete_count(&self) -> usize {
        self.to_delete.len()
    }

    /// Sends the batch to the store.
    pub async fn submit<S: RemoteStore>(&self, store: &S) -> ModifyResult {
        debug!(
            operation = self.id,
            saves = self.to_save.len(),
            deletes = self.to_delete.len(),
            "submitting push batch"
        );
        store
            .modify_records(self.to_save.clone(), self.to_delete.clone())
            .await
    }

    /// Splits a store result per originating collection.
    ///
    /// Every staged object ends up in exactly one of the returned lists.
    pub(crate) fn reconcile(self, result: ModifyResult) -> PushOutcome {
        if let Some(error) = &result.error {
            warn!(operation = self.id, error = %error, "push batch reported an error");
        }

        let mut index = self.index;
        let mut per_type: BTreeMap<&'static str, PushReconciliation> = BTreeMap::new();

        for record in result.saved {
            match index.remove(record.id()) {
                Some(origin) => per_type
                    .entry(origin.entity_type)
                    .or_default()
                    .saved
                    .push((origin.key, record)),
                None => debug!(id = %record.id(), "ignoring confirmation for unknown record"),
            }
        }

        for id in result.deleted {
            match index.remove(&id) {
                Some(origin) => per_type
                    .entry(origin.entity_type)
                    .or_default()
                    .deleted
                    .push(origin.key),
                None => debug!(id = %id, "ignoring deletion for unknown record"),
            }
        }

        let rejected: HashSet<RecordId> = result.rejected.into_iter().collect();
        let mut unconfirmed: Vec<(RecordId, StagedObject)> = index.into_iter().collect();
        unconfirmed.sort_by_key(|(_, origin)| (origin.entity_type, origin.key));
        for (id, origin) in unconfirmed {
            per_type
                .entry(origin.entity_type)
                .or_default()
                .unconfirmed
                .push((origin.key, rejected.contains(&id)));
        }

        PushOutcome {
            operation_id: self.id,
            per_type,
            error: result.error,
        }
    }
}

/// The part of a push result that concerns one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReconciliation {
    /// Confirmed saves with the record as stored.
    pub saved: Vec<(ObjectKey, Record)>,
    /// Confirmed deletions.
    pub deleted: Vec<ObjectKey>,
    /// Objects the store did not confirm, and whether it explicitly rejected them.
    pub unconfirmed: Vec<(ObjectKey, bool)>,
}

/// A reconciled push result.
#[derive(Debug, Clone)]
pub(crate) struct PushOutcome {
    pub(crate) operation_id: u64,
    pub(crate) per_type: BTreeMap<&'static str, PushReconciliation>,
    pub(crate) error: Option<StoreError>,
}

/// What a collection did with its part of a push result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushApplied {
    /// Objects now `Synced`.
    pub saved: usize,
    /// Objects removed after a confirmed deletion.
    pub deleted: usize,
    /// Objects unlocked for the next push.
    pub requeued: usize,
    /// Objects moved to `Failed` by an explicit rejection.
    pub failed: usize,
}

impl PushApplied {
    pub(crate) fn merge(&mut self, other: PushApplied) {
        self.saved += other.saved;
        self.deleted += other.deleted;
        self.requeued += other.requeued;
        self.failed += other.failed;
    }
}

/// Summary of a finished push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushSummary {
    /// ID of the push operation.
    pub operation_id: u64,
    /// Per-object outcome counts across all collections.
    pub applied: PushApplied,
    /// Batch-level error reported by the store.
    pub error: Option<StoreError>,
}

impl PushSummary {
    /// Returns true if every staged object was confirmed.
    pub fn is_complete(&self) -> bool {
        self.applied.requeued == 0 && self.applied.failed == 0
    }
}
