//! Remote record store abstraction.
//!
//! The store is an external collaborator. This trait captures the three
//! operations the engine needs from it; [`MemoryRemoteStore`] implements them
//! in memory with a sequence-numbered change log and fault injection for
//! tests and demos.

use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::ops::Bound;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use zonesync_protocol::{ChangeToken, Record, RecordId, ZoneId};

/// Outcome of one batched modify call.
///
/// Entries that appear in neither `saved` nor `deleted` did not take effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyResult {
    /// Records the store accepted, as stored (with fresh change tags).
    pub saved: Vec<Record>,
    /// IDs the store confirmed deleted.
    pub deleted: Vec<RecordId>,
    /// IDs the store explicitly refused.
    pub rejected: Vec<RecordId>,
    /// Batch-level error, if any.
    pub error: Option<StoreError>,
}

impl ModifyResult {
    /// A result in which nothing was confirmed.
    pub fn failed(error: StoreError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// One item streamed by a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A record was created or updated.
    Changed(Record),
    /// A record of the given type was deleted.
    Deleted(RecordId, String),
    /// The store emitted an interim continuation token.
    TokenUpdated(ChangeToken),
}

/// Producer side of a change feed.
///
/// Stores may call this from any thread; the events are queued for the pull
/// operation that owns the receiving end.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    tx: UnboundedSender<FeedEvent>,
}

impl ChangeSink {
    /// Creates a sink and the receiver it feeds.
    pub fn channel() -> (Self, UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports a created or updated record.
    pub fn record_changed(&self, record: Record) {
        let _ = self.tx.send(FeedEvent::Changed(record));
    }

    /// Reports a deleted record.
    pub fn record_deleted(&self, id: RecordId, record_type: impl Into<String>) {
        let _ = self.tx.send(FeedEvent::Deleted(id, record_type.into()));
    }

    /// Reports an interim continuation token.
    pub fn token_updated(&self, token: ChangeToken) {
        let _ = self.tx.send(FeedEvent::TokenUpdated(token));
    }
}

/// A remote record store.
pub trait RemoteStore: Send + Sync {
    /// Mints a new, unused record ID in the zone.
    fn create_unique_id(&self, zone: &ZoneId) -> RecordId {
        RecordId::unique(zone)
    }

    /// Makes sure the zone exists.
    fn ensure_zone(&self, zone: &ZoneId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Saves and deletes records in one batch.
    fn modify_records(
        &self,
        save: Vec<Record>,
        delete: Vec<RecordId>,
    ) -> impl Future<Output = ModifyResult> + Send;

    /// Streams the zone's changes since `cursor` into `sink`.
    ///
    /// Resolves with the final continuation token once the feed is exhausted.
    fn fetch_changes(
        &self,
        zone: &ZoneId,
        cursor: Option<ChangeToken>,
        sink: ChangeSink,
    ) -> impl Future<Output = Result<Option<ChangeToken>, StoreError>> + Send;
}

/// One entry of the memory store's change log.
#[derive(Debug, Clone)]
enum LogEntry {
    Saved(RecordId),
    Deleted(RecordId, String),
}

/// Fault injection knobs of [`MemoryRemoteStore`].
#[derive(Debug, Default)]
struct Faults {
    zone_error: Option<StoreError>,
    modify_error: Option<StoreError>,
    unconfirmed: HashSet<RecordId>,
    rejected: HashSet<RecordId>,
    fetch_error: Option<(usize, StoreError)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    zones: HashSet<ZoneId>,
    /// Live records, stored CBOR-encoded like a real backend would.
    records: HashMap<RecordId, Vec<u8>>,
    /// Sequence number → change.
    log: BTreeMap<u64, LogEntry>,
    next_sequence: u64,
    /// Bumped by `expire_tokens`; tokens from older epochs are refused.
    token_epoch: u64,
    faults: Faults,
    modify_calls: usize,
    fetch_calls: usize,
}

/// An in-memory remote store.
///
/// Every accepted write gets the next sequence number, which doubles as the
/// record's change tag. Change tokens encode a token epoch and a sequence
/// number; the client treats them as opaque.
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    page_size: usize,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    /// Creates a store that emits an interim token every `page_size` changes.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_sequence: 1,
                ..MemoryState::default()
            }),
            page_size: page_size.max(1),
        }
    }

    /// Creates a zone directly, bypassing `ensure_zone`.
    pub fn create_zone(&self, zone: &ZoneId) {
        self.state.lock().zones.insert(zone.clone());
    }

    /// Returns true if the zone exists.
    pub fn has_zone(&self, zone: &ZoneId) -> bool {
        self.state.lock().zones.contains(zone)
    }

    /// Returns the stored record with this ID.
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        let state = self.state.lock();
        state
            .records
            .get(id)
            .and_then(|bytes| Record::decode(bytes).ok())
    }

    /// Returns the number of live records.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns how many modify batches were received.
    pub fn modify_calls(&self) -> usize {
        self.state.lock().modify_calls
    }

    /// Returns how many change fetches were received.
    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    /// Writes a record as if another device saved it.
    pub fn put_remote(&self, record: Record) -> Record {
        let mut state = self.state.lock();
        Self::apply_save(&mut state, record)
    }

    /// Deletes a record as if another device deleted it.
    pub fn delete_remote(&self, id: &RecordId) -> bool {
        let mut state = self.state.lock();
        Self::apply_delete(&mut state, id)
    }

    /// Makes the next `ensure_zone` call fail.
    pub fn fail_next_zone_creation(&self, error: StoreError) {
        self.state.lock().faults.zone_error = Some(error);
    }

    /// Makes the next modify batch fail as a whole.
    pub fn fail_next_modify(&self, error: StoreError) {
        self.state.lock().faults.modify_error = Some(error);
    }

    /// Silently drops writes to this record: neither applied nor confirmed.
    pub fn drop_confirmation(&self, id: RecordId) {
        self.state.lock().faults.unconfirmed.insert(id);
    }

    /// Refuses writes to this record and reports it as rejected.
    pub fn reject_record(&self, id: RecordId) {
        self.state.lock().faults.rejected.insert(id);
    }

    /// Clears per-record faults.
    pub fn clear_record_faults(&self) {
        let mut state = self.state.lock();
        state.faults.unconfirmed.clear();
        state.faults.rejected.clear();
    }

    /// Makes the next fetch fail after streaming `after` changes.
    pub fn fail_next_fetch(&self, after: usize, error: StoreError) {
        self.state.lock().faults.fetch_error = Some((after, error));
    }

    /// Invalidates every change token issued so far.
    pub fn expire_tokens(&self) {
        let mut state = self.state.lock();
        state.token_epoch += 1;
    }

    fn apply_save(state: &mut MemoryState, mut record: Record) -> Record {
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        record.set_change_tag(sequence.to_string());

        match record.encode() {
            Ok(bytes) => {
                state.records.insert(record.id().clone(), bytes);
                state.log.insert(sequence, LogEntry::Saved(record.id().clone()));
            }
            Err(e) => tracing::error!(id = %record.id(), error = %e, "failed to encode record"),
        }
        record
    }

    fn apply_delete(state: &mut MemoryState, id: &RecordId) -> bool {
        let Some(bytes) = state.records.remove(id) else {
            return false;
        };
        let record_type = Record::decode_system_fields(&bytes)
            .map(|shell| shell.record_type().to_owned())
            .unwrap_or_default();

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state
            .log
            .insert(sequence, LogEntry::Deleted(id.clone(), record_type));
        true
    }

    fn encode_token(epoch: u64, sequence: u64) -> ChangeToken {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&epoch.to_be_bytes());
        bytes.extend_from_slice(&sequence.to_be_bytes());
        ChangeToken::from_bytes(bytes)
    }

    /// Returns `(epoch, sequence)`.
    fn decode_token(token: &ChangeToken) -> Result<(u64, u64), StoreError> {
        let bytes: [u8; 16] = token
            .as_bytes()
            .try_into()
            .map_err(|_| StoreError::Rejected("malformed change token".into()))?;
        let (epoch, sequence) = bytes.split_at(8);
        let read = |half: &[u8]| {
            let mut word = [0u8; 8];
            word.copy_from_slice(half);
            u64::from_be_bytes(word)
        };
        Ok((read(epoch), read(sequence)))
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn ensure_zone(&self, zone: &ZoneId) -> Result<(), StoreError> {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        if let Some(error) = state.faults.zone_error.take() {
            return Err(error);
        }
        state.zones.insert(zone.clone());
        Ok(())
    }

    async fn modify_records(&self, save: Vec<Record>, delete: Vec<RecordId>) -> ModifyResult {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.modify_calls += 1;

        if let Some(error) = state.faults.modify_error.take() {
            return ModifyResult::failed(error);
        }

        let mut result = ModifyResult::default();
        for record in save {
            let id = record.id().clone();
            if state.faults.unconfirmed.contains(&id) {
                continue;
            }
            if state.faults.rejected.contains(&id) || !state.zones.contains(id.zone()) {
                result.rejected.push(id);
                continue;
            }
            let stored = Self::apply_save(&mut state, record);
            result.saved.push(stored);
        }

        for id in delete {
            if state.faults.unconfirmed.contains(&id) {
                continue;
            }
            if state.faults.rejected.contains(&id) {
                result.rejected.push(id);
                continue;
            }
            // Deleting a record that is already gone is confirmed as well.
            Self::apply_delete(&mut state, &id);
            result.deleted.push(id);
        }

        if !result.rejected.is_empty() {
            result.error = Some(StoreError::PartialFailure(format!(
                "{} record(s) rejected",
                result.rejected.len()
            )));
        }
        result
    }

    async fn fetch_changes(
        &self,
        zone: &ZoneId,
        cursor: Option<ChangeToken>,
        sink: ChangeSink,
    ) -> Result<Option<ChangeToken>, StoreError> {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.fetch_calls += 1;

        if !state.zones.contains(zone) {
            return Err(StoreError::ZoneNotFound(zone.to_string()));
        }

        let since = match &cursor {
            Some(token) => {
                let (epoch, sequence) = Self::decode_token(token)?;
                if epoch != state.token_epoch {
                    return Err(StoreError::ChangeTokenExpired);
                }
                sequence
            }
            None => 0,
        };

        // Only the latest change per record is reported.
        let mut latest: BTreeMap<RecordId, (u64, LogEntry)> = BTreeMap::new();
        for (sequence, entry) in state.log.range((Bound::Excluded(since), Bound::Unbounded)) {
            let id = match entry {
                LogEntry::Saved(id) | LogEntry::Deleted(id, _) => id.clone(),
            };
            if id.zone() == zone {
                latest.insert(id, (*sequence, entry.clone()));
            }
        }
        let mut changes: Vec<(u64, LogEntry)> = latest.into_values().collect();
        changes.sort_by_key(|(sequence, _)| *sequence);

        let mut fault = state.faults.fetch_error.take();
        let last_sequence = state.next_sequence.saturating_sub(1);
        let epoch = state.token_epoch;

        for (index, (sequence, entry)) in changes.iter().enumerate() {
            if let Some((after, _)) = &fault {
                if index >= *after {
                    if let Some((_, error)) = fault.take() {
                        return Err(error);
                    }
                }
            }

            match entry {
                LogEntry::Saved(id) => {
                    let Some(record) = state.records.get(id).and_then(|b| Record::decode(b).ok())
                    else {
                        continue;
                    };
                    sink.record_changed(record);
                }
                LogEntry::Deleted(id, record_type) => sink.record_deleted(id.clone(), record_type),
            }

            if (index + 1) % self.page_size == 0 {
                sink.token_updated(Self::encode_token(epoch, *sequence));
            }
        }

        if let Some((_, error)) = fault {
            return Err(error);
        }

        Ok(Some(Self::encode_token(epoch, last_sequence)))
    }
}
