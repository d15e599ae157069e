//! Incremental pull of remote changes.
//!
//! A [`PullOperation`] runs one change-feed request from the last saved
//! cursor. Streamed events land in the operation's private channel and are
//! folded into a [`PullResult`] once the store signals completion. The
//! coordinator hands that result to every collection and decides whether the
//! cursor may advance.

use crate::error::StoreError;
use crate::store::{ChangeSink, FeedEvent, RemoteStore};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use zonesync_protocol::{ChangeToken, Record, RecordId, ZoneId};

/// One change-feed request.
#[derive(Debug, Clone)]
pub struct PullOperation {
    id: u64,
    zone: ZoneId,
    cursor: Option<ChangeToken>,
}

impl PullOperation {
    /// Creates a pull over `zone` starting after `cursor`.
    ///
    /// A missing cursor fetches the whole zone.
    pub fn new(id: u64, zone: ZoneId, cursor: Option<ChangeToken>) -> Self {
        Self { id, zone, cursor }
    }

    /// Returns the operation ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the cursor the pull starts from.
    pub fn cursor(&self) -> Option<&ChangeToken> {
        self.cursor.as_ref()
    }

    /// Runs the request to completion.
    pub async fn run<S: RemoteStore>(&self, store: &S) -> PullResult {
        let (sink, mut rx) = ChangeSink::channel();
        let outcome = store
            .fetch_changes(&self.zone, self.cursor.clone(), sink)
            .await;

        // The store is done producing; take whatever it queued.
        rx.close();
        let mut accumulator = Accumulator::default();
        while let Ok(event) = rx.try_recv() {
            accumulator.push(event);
        }

        let mut result = accumulator.finish(self.id);
        match outcome {
            Ok(token) => result.new_cursor = token.or_else(|| result.interim_cursor.clone()),
            Err(error) => result.error = Some(error),
        }

        debug!(
            operation = self.id,
            updated = result.updated.len(),
            deleted = result.deleted.len(),
            success = result.is_success(),
            "pull finished"
        );
        result
    }
}

#[derive(Default)]
struct Accumulator {
    updated: Vec<Record>,
    positions: HashMap<RecordId, usize>,
    deleted: Vec<(RecordId, String)>,
    deleted_ids: HashSet<RecordId>,
    interim_cursor: Option<ChangeToken>,
}

impl Accumulator {
    fn push(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Changed(record) => {
                if self.deleted_ids.contains(record.id()) {
                    return;
                }
                match self.positions.get(record.id()) {
                    Some(&position) => self.updated[position] = record,
                    None => {
                        self.positions.insert(record.id().clone(), self.updated.len());
                        self.updated.push(record);
                    }
                }
            }
            FeedEvent::Deleted(id, record_type) => {
                if self.deleted_ids.insert(id.clone()) {
                    self.deleted.push((id, record_type));
                }
            }
            FeedEvent::TokenUpdated(token) => self.interim_cursor = Some(token),
        }
    }

    fn finish(self, operation_id: u64) -> PullResult {
        let deleted_ids = self.deleted_ids;
        let updated = self
            .updated
            .into_iter()
            .filter(|record| !deleted_ids.contains(record.id()))
            .collect();

        PullResult {
            operation_id,
            updated,
            deleted: self.deleted,
            new_cursor: None,
            interim_cursor: self.interim_cursor,
            error: None,
        }
    }
}

/// Everything one pull received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResult {
    /// ID of the pull operation.
    pub operation_id: u64,
    /// Created or updated records of every type, latest version per ID.
    pub updated: Vec<Record>,
    /// Deleted records as `(id, record type)`.
    pub deleted: Vec<(RecordId, String)>,
    /// Cursor to store after a successful pull.
    pub new_cursor: Option<ChangeToken>,
    /// Last interim token the store emitted.
    pub interim_cursor: Option<ChangeToken>,
    /// Terminal error, if the feed did not complete.
    pub error: Option<StoreError>,
}

impl PullResult {
    /// Returns true if the feed completed without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns the updated records of one type.
    pub fn updated_of_type<'a>(&'a self, record_type: &'a str) -> impl Iterator<Item = &'a Record> {
        self.updated
            .iter()
            .filter(move |record| record.record_type() == record_type)
    }

    /// Returns the deleted record IDs of one type.
    pub fn deleted_of_type<'a>(&'a self, record_type: &'a str) -> impl Iterator<Item = &'a RecordId> {
        self.deleted
            .iter()
            .filter(move |(_, t)| t == record_type)
            .map(|(id, _)| id)
    }

    /// Returns true if nothing changed remotely.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// What a collection did with a pull result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullApplied {
    /// Existing objects overwritten by a remote update.
    pub updated: usize,
    /// Objects created from unknown remote records.
    pub inserted: usize,
    /// Objects removed by a remote deletion.
    pub removed: usize,
}

impl PullApplied {
    pub(crate) fn merge(&mut self, other: PullApplied) {
        self.updated += other.updated;
        self.inserted += other.inserted;
        self.removed += other.removed;
    }
}

/// Summary of a finished pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullSummary {
    /// ID of the pull operation.
    pub operation_id: u64,
    /// Per-object outcome counts across all collections.
    pub applied: PullApplied,
    /// Whether the stored cursor moved.
    pub cursor_advanced: bool,
    /// Terminal error reported by the store.
    pub error: Option<StoreError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRemoteStore;

    fn zone() -> ZoneId {
        ZoneId::new("z")
    }

    fn note(name: &str, title: &str) -> Record {
        let mut record = Record::new("Note", RecordId::new(zone(), name));
        record.set("title", title);
        record
    }

    #[test]
    fn later_update_replaces_earlier() {
        let mut acc = Accumulator::default();
        acc.push(FeedEvent::Changed(note("A", "v1")));
        acc.push(FeedEvent::Changed(note("B", "b")));
        acc.push(FeedEvent::Changed(note("A", "v2")));

        let result = acc.finish(1);
        assert_eq!(result.updated.len(), 2);
        assert_eq!(result.updated[0].get_text("title"), Some("v2"));
    }

    #[test]
    fn delete_wins_over_update() {
        let mut acc = Accumulator::default();
        acc.push(FeedEvent::Changed(note("A", "v1")));
        acc.push(FeedEvent::Deleted(RecordId::new(zone(), "A"), "Note".into()));
        acc.push(FeedEvent::Changed(note("A", "v2")));

        let result = acc.finish(1);
        assert!(result.updated.is_empty());
        assert_eq!(result.deleted.len(), 1);
    }

    #[test]
    fn filters_by_type() {
        let mut acc = Accumulator::default();
        acc.push(FeedEvent::Changed(note("A", "a")));
        acc.push(FeedEvent::Changed(Record::new("Tag", RecordId::new(zone(), "T"))));
        acc.push(FeedEvent::Deleted(RecordId::new(zone(), "X"), "Tag".into()));

        let result = acc.finish(1);
        assert_eq!(result.updated_of_type("Note").count(), 1);
        assert_eq!(result.updated_of_type("Tag").count(), 1);
        assert_eq!(result.deleted_of_type("Note").count(), 0);
        assert_eq!(result.deleted_of_type("Tag").count(), 1);
    }

    #[tokio::test]
    async fn run_against_memory_store() {
        let store = MemoryRemoteStore::new();
        store.create_zone(&zone());
        store.put_remote(note("A", "a"));

        let result = PullOperation::new(1, zone(), None).run(&store).await;
        assert!(result.is_success());
        assert_eq!(result.updated.len(), 1);
        assert!(result.new_cursor.is_some());

        let again = PullOperation::new(2, zone(), result.new_cursor.clone())
            .run(&store)
            .await;
        assert!(again.is_success());
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn failed_run_keeps_partial_data_and_no_cursor() {
        let store = MemoryRemoteStore::with_page_size(1);
        store.create_zone(&zone());
        store.put_remote(note("A", "a"));
        store.put_remote(note("B", "b"));
        store.fail_next_fetch(1, StoreError::network_retryable("reset"));

        let result = PullOperation::new(1, zone(), None).run(&store).await;
        assert!(!result.is_success());
        assert_eq!(result.updated.len(), 1);
        assert!(result.new_cursor.is_none());
        assert!(result.interim_cursor.is_some());
    }

    #[tokio::test]
    async fn missing_zone_fails() {
        let store = MemoryRemoteStore::new();
        let result = PullOperation::new(1, zone(), None).run(&store).await;
        assert!(matches!(result.error, Some(StoreError::ZoneNotFound(_))));
    }
}
