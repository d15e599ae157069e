//! The sync coordinator.
//!
//! A [`Coordinator`] owns the registered collections, the remote store handle
//! and the persisted settings. It admits at most one operation at a time:
//! while a push or a pull is in flight, further requests are dropped and
//! return `Ok(None)`. Nothing syncs until [`Coordinator::start_up`] has
//! confirmed that the zone exists.
//!
//! Each operation can be driven in one call (`push`, `pull`, `sync`) or in
//! steps (`begin_*`, submit, `finish_*`) when the caller wants to interleave
//! local edits with an in-flight request. Dropping a `push` or `pull` future
//! before it completes abandons the operation: the gate reopens and locked
//! objects are requeued. Step-API callers that lose an operation recover the
//! same way with [`Coordinator::abort_running`].

use crate::collection::{ManagedCollection, ObjectCollection};
use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError, SyncResult};
use crate::notify::{ChangeNotifier, SyncEvent};
use crate::object::SyncEntity;
use crate::pull::{PullApplied, PullOperation, PullResult, PullSummary};
use crate::push::{PushApplied, PushBatch, PushOperation, PushSummary};
use crate::settings::SettingsStore;
use crate::store::{ModifyResult, RemoteStore};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use zonesync_protocol::{ChangeToken, ZoneId};

/// The operation currently holding the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningOperation {
    /// A push with this ID.
    Push(u64),
    /// A pull with this ID.
    Pull(u64),
}

impl RunningOperation {
    /// Returns the operation ID.
    pub fn id(&self) -> u64 {
        match self {
            RunningOperation::Push(id) | RunningOperation::Pull(id) => *id,
        }
    }
}

/// Counters over the coordinator's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Pushes that reached reconciliation.
    pub pushes_completed: u64,
    /// Pulls that reached completion, successful or not.
    pub pulls_completed: u64,
    /// Objects confirmed saved.
    pub records_saved: u64,
    /// Objects confirmed deleted.
    pub records_deleted: u64,
    /// Objects unlocked without confirmation.
    pub records_requeued: u64,
    /// Objects explicitly rejected by the store.
    pub records_failed: u64,
    /// Objects updated, inserted or removed by pulls.
    pub records_pulled: u64,
    /// Last error reported by the store.
    pub last_error: Option<String>,
    /// Time of the last completed operation.
    pub last_sync_time: Option<Instant>,
}

/// Result of a pull-then-push cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycle {
    /// The pull, if one ran.
    pub pull: Option<PullSummary>,
    /// The push, if one ran.
    pub push: Option<PushSummary>,
}

/// Coordinates push and pull operations over a set of collections.
pub struct Coordinator<S: RemoteStore> {
    config: SyncConfig,
    store: Arc<S>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<ChangeNotifier>,
    collections: Vec<Box<dyn ManagedCollection>>,
    /// Set once the zone is confirmed to exist.
    zone: Option<ZoneId>,
    running: Option<RunningOperation>,
    next_operation_id: u64,
    stats: SyncStats,
}

impl<S: RemoteStore> Coordinator<S> {
    /// Creates a coordinator. Call [`start_up`](Self::start_up) before syncing.
    pub fn new(config: SyncConfig, store: Arc<S>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            config,
            store,
            settings,
            notifier: Arc::new(ChangeNotifier::new()),
            collections: Vec::new(),
            zone: None,
            running: None,
            next_operation_id: 1,
            stats: SyncStats::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the remote store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the notifier shared by all collections.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.notifier.subscribe()
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Returns the zone, once it is confirmed.
    pub fn zone(&self) -> Option<&ZoneId> {
        self.zone.as_ref()
    }

    /// Returns true once the zone is confirmed.
    pub fn is_ready(&self) -> bool {
        self.zone.is_some()
    }

    /// Returns true while an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the operation in flight.
    pub fn running(&self) -> Option<RunningOperation> {
        self.running
    }

    /// Returns true if a new operation would be admitted.
    pub fn operation_available(&self) -> bool {
        self.is_ready() && !self.is_busy()
    }

    /// Registers a collection for entity type `E`.
    pub fn register<E: SyncEntity>(&mut self) -> SyncResult<()> {
        if self.find(E::ENTITY_TYPE).is_some() {
            return Err(SyncError::DuplicateCollection(E::ENTITY_TYPE));
        }
        let collection = ObjectCollection::<E>::new(Arc::clone(&self.notifier));
        self.collections.push(Box::new(collection));
        debug!(entity_type = E::ENTITY_TYPE, "collection registered");
        Ok(())
    }

    /// Returns the collection for entity type `E`.
    pub fn collection<E: SyncEntity>(&self) -> Option<&ObjectCollection<E>> {
        self.find(E::ENTITY_TYPE)
            .and_then(|i| self.collections[i].as_any().downcast_ref())
    }

    /// Returns the collection for entity type `E` mutably.
    pub fn collection_mut<E: SyncEntity>(&mut self) -> Option<&mut ObjectCollection<E>> {
        let index = self.find(E::ENTITY_TYPE)?;
        self.collections[index].as_any_mut().downcast_mut()
    }

    /// Returns the entity types of all registered collections.
    pub fn entity_types(&self) -> Vec<&'static str> {
        self.collections.iter().map(|c| c.entity_type()).collect()
    }

    /// Returns true if any collection has objects waiting to be pushed.
    pub fn has_pending_work(&self) -> bool {
        self.collections.iter().any(|c| c.has_pending_work())
    }

    /// Confirms that the zone exists, creating it if needed.
    ///
    /// A zone the settings already mark as provisioned is trusted without a
    /// round trip. A store reporting that the zone already exists counts as
    /// success.
    pub async fn start_up(&mut self) -> SyncResult<()> {
        if self.is_ready() {
            return Ok(());
        }

        let zone = self.config.zone_id();
        zone.validate()?;

        if !self.settings.zone_provisioned() {
            let store = Arc::clone(&self.store);
            match store.ensure_zone(&zone).await {
                Ok(()) | Err(StoreError::ZoneAlreadyExists(_)) => {}
                Err(e) => {
                    warn!(zone = %zone, error = %e, "zone provisioning failed");
                    self.stats.last_error = Some(e.to_string());
                    return Err(e.into());
                }
            }
            self.settings.set_zone_provisioned(true)?;
        }

        info!(zone = %zone, "zone ready");
        let was_available = self.operation_available();
        self.zone = Some(zone);
        self.availability_changed(was_available);
        Ok(())
    }

    /// Builds and locks a push batch.
    ///
    /// Returns `Ok(None)` if another operation is running or nothing needs to
    /// be pushed.
    pub fn begin_push(&mut self) -> SyncResult<Option<PushOperation>> {
        let zone = self.ready_zone()?;
        if let Some(running) = self.running {
            debug!(?running, "push request dropped: operation in flight");
            return Ok(None);
        }

        let mut batch = PushBatch::for_store(zone, self.config.push_batch_size, &*self.store);
        for collection in &mut self.collections {
            if batch.is_full() {
                break;
            }
            collection.stage_push(&mut batch);
        }

        let Some(operation) = batch.into_operation(self.next_operation_id) else {
            return Ok(None);
        };
        self.next_operation_id += 1;

        debug!(
            operation = operation.id(),
            saves = operation.save_count(),
            deletes = operation.delete_count(),
            "push started"
        );
        self.acquire(RunningOperation::Push(operation.id()));
        Ok(Some(operation))
    }

    /// Applies a push result and releases the gate.
    ///
    /// Every object the operation locked is unlocked, whatever the result.
    pub fn finish_push(
        &mut self,
        operation: PushOperation,
        result: ModifyResult,
    ) -> SyncResult<PushSummary> {
        self.check_running(RunningOperation::Push(operation.id()))?;

        let outcome = operation.reconcile(result);
        let mut applied = PushApplied::default();
        for collection in &mut self.collections {
            if let Some(part) = outcome.per_type.get(collection.entity_type()) {
                applied.merge(collection.apply_push_result(part));
            }
        }

        self.stats.pushes_completed += 1;
        self.stats.records_saved += applied.saved as u64;
        self.stats.records_deleted += applied.deleted as u64;
        self.stats.records_requeued += applied.requeued as u64;
        self.stats.records_failed += applied.failed as u64;
        self.stats.last_sync_time = Some(Instant::now());
        if let Some(error) = &outcome.error {
            self.stats.last_error = Some(error.to_string());
        }

        info!(
            operation = outcome.operation_id,
            saved = applied.saved,
            deleted = applied.deleted,
            requeued = applied.requeued,
            failed = applied.failed,
            "push finished"
        );
        self.release();

        Ok(PushSummary {
            operation_id: outcome.operation_id,
            applied,
            error: outcome.error,
        })
    }

    /// Pushes all eligible objects in one batch.
    pub async fn push(&mut self) -> SyncResult<Option<PushSummary>> {
        let Some(operation) = self.begin_push()? else {
            return Ok(None);
        };
        let store = Arc::clone(&self.store);
        let mut guard = InFlight {
            operation: RunningOperation::Push(operation.id()),
            coordinator: self,
        };
        let result = operation.submit(&*store).await;
        let summary = guard.coordinator.finish_push(operation, result);
        summary.map(Some)
    }

    /// Starts a pull from the collections' common cursor.
    ///
    /// Returns `Ok(None)` if another operation is running or no collection is
    /// registered.
    pub fn begin_pull(&mut self) -> SyncResult<Option<PullOperation>> {
        let zone = self.ready_zone()?;
        if let Some(running) = self.running {
            debug!(?running, "pull request dropped: operation in flight");
            return Ok(None);
        }
        if self.collections.is_empty() {
            return Ok(None);
        }

        let id = self.next_operation_id;
        self.next_operation_id += 1;
        let cursor = self.common_cursor();
        debug!(operation = id, full = cursor.is_none(), "pull started");

        self.acquire(RunningOperation::Pull(id));
        Ok(Some(PullOperation::new(id, zone, cursor)))
    }

    /// Applies a pull result, stores the new cursor, and releases the gate.
    ///
    /// A failed pull changes nothing unless partial pulls are enabled, and
    /// never moves the cursor.
    pub fn finish_pull(&mut self, result: PullResult) -> SyncResult<PullSummary> {
        self.check_running(RunningOperation::Pull(result.operation_id))?;

        let mut applied = PullApplied::default();
        if result.is_success() || self.config.apply_partial_pulls {
            for collection in &mut self.collections {
                applied.merge(collection.apply_pull_result(&result));
            }
        }

        self.stats.pulls_completed += 1;
        self.stats.records_pulled += (applied.updated + applied.inserted + applied.removed) as u64;
        self.stats.last_sync_time = Some(Instant::now());
        if let Some(error) = &result.error {
            warn!(operation = result.operation_id, error = %error, "pull failed");
            self.stats.last_error = Some(error.to_string());
        }
        self.release();

        let cursor_advanced = match (&result.error, &result.new_cursor) {
            (None, Some(cursor)) => {
                self.store_cursor(cursor)?;
                true
            }
            (Some(StoreError::ChangeTokenExpired), _) => {
                self.clear_cursors()?;
                false
            }
            _ => false,
        };

        info!(
            operation = result.operation_id,
            updated = applied.updated,
            inserted = applied.inserted,
            removed = applied.removed,
            cursor_advanced,
            "pull finished"
        );

        Ok(PullSummary {
            operation_id: result.operation_id,
            applied,
            cursor_advanced,
            error: result.error,
        })
    }

    /// Pulls all remote changes since the stored cursor.
    pub async fn pull(&mut self) -> SyncResult<Option<PullSummary>> {
        let Some(operation) = self.begin_pull()? else {
            return Ok(None);
        };
        let store = Arc::clone(&self.store);
        let mut guard = InFlight {
            operation: RunningOperation::Pull(operation.id()),
            coordinator: self,
        };
        let result = operation.run(&*store).await;
        let summary = guard.coordinator.finish_pull(result);
        summary.map(Some)
    }

    /// Pulls, then pushes if the pull succeeded.
    pub async fn sync(&mut self) -> SyncResult<SyncCycle> {
        let pull = self.pull().await?;
        if pull.as_ref().is_some_and(|p| p.error.is_some()) {
            return Ok(SyncCycle { pull, push: None });
        }
        let push = self.push().await?;
        Ok(SyncCycle { pull, push })
    }

    /// Abandons the operation in flight.
    ///
    /// The gate is released and every object a push locked is unlocked for the
    /// next push. An abandoned pull leaves the cursor where it was. A later
    /// `finish_*` for the abandoned operation is refused. Returns the abandoned
    /// operation, or `None` if nothing was running.
    pub fn abort_running(&mut self) -> Option<RunningOperation> {
        let running = self.running?;
        let requeued: usize = self
            .collections
            .iter_mut()
            .map(|c| c.requeue_locked())
            .sum();
        self.stats.records_requeued += requeued as u64;
        warn!(operation = ?running, requeued, "operation abandoned");
        self.release();
        Some(running)
    }

    fn find(&self, entity_type: &str) -> Option<usize> {
        self.collections
            .iter()
            .position(|c| c.entity_type() == entity_type)
    }

    fn ready_zone(&self) -> SyncResult<ZoneId> {
        match &self.zone {
            Some(zone) => Ok(zone.clone()),
            None => {
                warn!("sync requested before the zone is ready");
                Err(SyncError::ZoneNotReady)
            }
        }
    }

    fn check_running(&self, operation: RunningOperation) -> SyncResult<()> {
        if self.running == Some(operation) {
            return Ok(());
        }
        warn!(?operation, running = ?self.running, "completion for an operation that is not running");
        Err(SyncError::UnexpectedOperation {
            expected: self.running.map(|r| r.id()),
            actual: operation.id(),
        })
    }

    /// The cursor shared by all collections, or `None` to resync everything.
    fn common_cursor(&self) -> Option<ChangeToken> {
        let mut cursors = self
            .collections
            .iter()
            .map(|c| self.settings.cursor(c.entity_type()));
        let first = cursors.next()??;
        cursors.all(|c| c.as_ref() == Some(&first)).then_some(first)
    }

    fn store_cursor(&self, cursor: &ChangeToken) -> SyncResult<()> {
        for collection in &self.collections {
            self.settings.set_cursor(collection.entity_type(), cursor)?;
        }
        Ok(())
    }

    fn clear_cursors(&self) -> SyncResult<()> {
        info!("change token expired, next pull is a full resync");
        for collection in &self.collections {
            self.settings.clear_cursor(collection.entity_type())?;
        }
        Ok(())
    }

    fn acquire(&mut self, operation: RunningOperation) {
        let was_available = self.operation_available();
        self.running = Some(operation);
        self.availability_changed(was_available);
    }

    fn release(&mut self) {
        let was_available = self.operation_available();
        self.running = None;
        self.availability_changed(was_available);
    }

    fn availability_changed(&self, was_available: bool) {
        let available = self.operation_available();
        if available != was_available {
            debug!(available, "availability changed");
            self.notifier
                .emit(SyncEvent::AvailabilityChanged { available });
        }
    }
}

/// Holds the gate for an operation driven by `push` or `pull`.
///
/// If the driving future is dropped while the operation is still running,
/// the operation is abandoned.
struct InFlight<'a, S: RemoteStore> {
    operation: RunningOperation,
    coordinator: &'a mut Coordinator<S>,
}

impl<S: RemoteStore> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if self.coordinator.running == Some(self.operation) {
            self.coordinator.abort_running();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use crate::state::SyncPhase;
    use crate::store::MemoryRemoteStore;
    use zonesync_protocol::Record;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Note {
        title: String,
    }

    impl SyncEntity for Note {
        const ENTITY_TYPE: &'static str = "Note";

        fn serialize(&self, record: &mut Record) {
            record.set("title", self.title.as_str());
        }

        fn deserialize(&mut self, record: &Record) {
            self.title = record.get_text("title").unwrap_or_default().to_owned();
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Tag {
        label: String,
    }

    impl SyncEntity for Tag {
        const ENTITY_TYPE: &'static str = "Tag";

        fn serialize(&self, record: &mut Record) {
            record.set("label", self.label.as_str());
        }

        fn deserialize(&mut self, record: &Record) {
            self.label = record.get_text("label").unwrap_or_default().to_owned();
        }
    }

    fn coordinator() -> (Coordinator<MemoryRemoteStore>, Arc<MemorySettings>) {
        let settings = Arc::new(MemorySettings::new());
        let mut coordinator = Coordinator::new(
            SyncConfig::default(),
            Arc::new(MemoryRemoteStore::new()),
            settings.clone(),
        );
        coordinator.register::<Note>().unwrap();
        (coordinator, settings)
    }

    #[tokio::test]
    async fn requests_before_start_up_are_refused() {
        let (mut coordinator, _) = coordinator();
        assert!(!coordinator.is_ready());
        assert!(matches!(coordinator.begin_push(), Err(SyncError::ZoneNotReady)));
        assert!(matches!(coordinator.pull().await, Err(SyncError::ZoneNotReady)));
    }

    #[tokio::test]
    async fn start_up_provisions_zone_once() {
        let (mut coordinator, settings) = coordinator();
        let events = coordinator.subscribe();

        coordinator.start_up().await.unwrap();
        assert!(coordinator.is_ready());
        assert!(coordinator.store().has_zone(&SyncConfig::default().zone_id()));
        assert!(settings.zone_provisioned());
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![SyncEvent::AvailabilityChanged { available: true }]
        );

        coordinator.start_up().await.unwrap();
        assert_eq!(events.try_iter().count(), 0);
    }

    #[tokio::test]
    async fn zone_already_exists_counts_as_success() {
        let (mut coordinator, _) = coordinator();
        coordinator
            .store()
            .fail_next_zone_creation(StoreError::ZoneAlreadyExists("mainPrivateZone".into()));
        coordinator.start_up().await.unwrap();
        assert!(coordinator.is_ready());
    }

    #[tokio::test]
    async fn provisioning_failure_keeps_gate_closed() {
        let (mut coordinator, settings) = coordinator();
        coordinator
            .store()
            .fail_next_zone_creation(StoreError::network_retryable("offline"));

        assert!(coordinator.start_up().await.is_err());
        assert!(!coordinator.is_ready());
        assert!(!settings.zone_provisioned());

        coordinator.start_up().await.unwrap();
        assert!(coordinator.is_ready());
    }

    #[tokio::test]
    async fn provisioned_flag_skips_round_trip() {
        let (mut coordinator, settings) = coordinator();
        settings.set_zone_provisioned(true).unwrap();
        coordinator.start_up().await.unwrap();
        assert!(coordinator.is_ready());
        assert!(!coordinator.store().has_zone(&SyncConfig::default().zone_id()));
    }

    #[test]
    fn duplicate_registration() {
        let (mut coordinator, _) = coordinator();
        assert!(matches!(
            coordinator.register::<Note>(),
            Err(SyncError::DuplicateCollection("Note"))
        ));
        coordinator.register::<Tag>().unwrap();
        assert_eq!(coordinator.entity_types(), vec!["Note", "Tag"]);
        assert!(coordinator.collection::<Tag>().is_some());
    }

    #[tokio::test]
    async fn gate_admits_one_operation() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        coordinator.collection_mut::<Note>().unwrap().create_local();

        let push = coordinator.begin_push().unwrap().unwrap();
        assert_eq!(coordinator.running(), Some(RunningOperation::Push(push.id())));
        assert!(!coordinator.operation_available());

        assert!(coordinator.begin_push().unwrap().is_none());
        assert!(coordinator.begin_pull().unwrap().is_none());
        assert_eq!(coordinator.running(), Some(RunningOperation::Push(push.id())));

        let result = push.submit(&**coordinator.store()).await;
        coordinator.finish_push(push, result).unwrap();
        assert!(coordinator.operation_available());
    }

    #[tokio::test]
    async fn nothing_to_push() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        assert!(coordinator.push().await.unwrap().is_none());
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn stale_completion_is_rejected() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        let pull = coordinator.begin_pull().unwrap().unwrap();

        let stray = PullResult {
            operation_id: pull.id() + 100,
            ..PullResult::default()
        };
        assert!(matches!(
            coordinator.finish_pull(stray),
            Err(SyncError::UnexpectedOperation { .. })
        ));
        assert!(coordinator.is_busy());

        let result = pull.run(&**coordinator.store()).await;
        coordinator.finish_pull(result).unwrap();
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn push_then_pull_round_trip() {
        let (mut coordinator, settings) = coordinator();
        coordinator.start_up().await.unwrap();
        let key = coordinator
            .collection_mut::<Note>()
            .unwrap()
            .create_local_with(Note {
                title: "hello".into(),
            });

        let summary = coordinator.push().await.unwrap().unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.applied.saved, 1);
        let notes = coordinator.collection::<Note>().unwrap();
        assert_eq!(notes.get(key).unwrap().phase(), SyncPhase::Synced);

        let pulled = coordinator.pull().await.unwrap().unwrap();
        assert!(pulled.cursor_advanced);
        assert_eq!(pulled.applied.updated, 1);
        assert!(settings.cursor("Note").is_some());
        assert_eq!(coordinator.collection::<Note>().unwrap().len(), 1);
        assert_eq!(coordinator.stats().pushes_completed, 1);
        assert_eq!(coordinator.stats().pulls_completed, 1);
    }

    #[tokio::test]
    async fn divergent_cursors_force_full_resync() {
        let (mut coordinator, settings) = coordinator();
        coordinator.register::<Tag>().unwrap();
        coordinator.start_up().await.unwrap();

        settings
            .set_cursor("Note", &ChangeToken::from_bytes(vec![1]))
            .unwrap();
        let pull = coordinator.begin_pull().unwrap().unwrap();
        assert!(pull.cursor().is_none());
        let result = pull.run(&**coordinator.store()).await;
        coordinator.finish_pull(result).unwrap();

        assert_eq!(settings.cursor("Note"), settings.cursor("Tag"));
        let pull = coordinator.begin_pull().unwrap().unwrap();
        assert!(pull.cursor().is_some());
    }

    #[tokio::test]
    async fn availability_events_around_operations() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        coordinator.collection_mut::<Note>().unwrap().create_local();
        let events = coordinator.subscribe();

        coordinator.push().await.unwrap();

        let availability: Vec<bool> = events
            .try_iter()
            .filter_map(|e| match e {
                SyncEvent::AvailabilityChanged { available } => Some(available),
                _ => None,
            })
            .collect();
        assert_eq!(availability, vec![false, true]);
    }

    #[tokio::test]
    async fn dropped_push_future_requeues() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        let key = coordinator.collection_mut::<Note>().unwrap().create_local();

        tokio::select! {
            biased;
            _ = coordinator.push() => panic!("push completed without suspending"),
            _ = std::future::ready(()) => {}
        }

        assert!(coordinator.operation_available());
        let notes = coordinator.collection::<Note>().unwrap();
        assert_eq!(notes.locked_count(), 0);
        assert_eq!(notes.get(key).unwrap().phase(), SyncPhase::Modified);
        assert_eq!(coordinator.stats().records_requeued, 1);
        assert_eq!(coordinator.store().modify_calls(), 0);

        let summary = coordinator.push().await.unwrap().unwrap();
        assert_eq!(summary.applied.saved, 1);
        let notes = coordinator.collection::<Note>().unwrap();
        assert_eq!(notes.get(key).unwrap().phase(), SyncPhase::Synced);
    }

    #[tokio::test]
    async fn dropped_pull_future_keeps_cursor() {
        let (mut coordinator, settings) = coordinator();
        coordinator.start_up().await.unwrap();

        tokio::select! {
            biased;
            _ = coordinator.pull() => panic!("pull completed without suspending"),
            _ = std::future::ready(()) => {}
        }

        assert!(!coordinator.is_busy());
        assert!(settings.cursor("Note").is_none());
        assert!(coordinator.pull().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn abort_recovers_lost_push() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        let key = coordinator.collection_mut::<Note>().unwrap().create_local();

        let push = coordinator.begin_push().unwrap().unwrap();
        let id = push.id();
        let stale = push.submit(&**coordinator.store()).await;
        assert!(coordinator.begin_pull().unwrap().is_none());

        assert_eq!(coordinator.abort_running(), Some(RunningOperation::Push(id)));
        assert_eq!(coordinator.abort_running(), None);
        assert!(coordinator.operation_available());
        let notes = coordinator.collection::<Note>().unwrap();
        assert_eq!(notes.locked_count(), 0);
        assert_eq!(notes.eligible_for_push(), vec![key]);

        assert!(matches!(
            coordinator.finish_push(push, stale),
            Err(SyncError::UnexpectedOperation { expected: None, .. })
        ));
        assert_eq!(
            coordinator.collection::<Note>().unwrap().get(key).unwrap().phase(),
            SyncPhase::Modified
        );
    }

    #[tokio::test]
    async fn misreported_confirmation_requeues() {
        let (mut coordinator, _) = coordinator();
        coordinator.start_up().await.unwrap();
        let key = coordinator.collection_mut::<Note>().unwrap().create_local();

        let push = coordinator.begin_push().unwrap().unwrap();
        let id = push.records_to_save()[0].id().clone();
        let summary = coordinator
            .finish_push(
                push,
                ModifyResult {
                    deleted: vec![id],
                    ..ModifyResult::default()
                },
            )
            .unwrap();

        assert_eq!(summary.applied.requeued, 1);
        assert!(!summary.is_complete());
        let notes = coordinator.collection::<Note>().unwrap();
        assert_eq!(notes.locked_count(), 0);
        assert_eq!(notes.get(key).unwrap().phase(), SyncPhase::Modified);
        assert_eq!(notes.eligible_for_push(), vec![key]);
    }
}
