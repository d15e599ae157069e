//! Change notifications for presentation layers.
//!
//! Every state transition of an object and every membership change of a
//! collection is published here. Subscribers get their own channel and can
//! drain it from any thread.
//!
//! ```rust,ignore
//! let events = coordinator.subscribe();
//!
//! coordinator.push().await?;
//!
//! for event in events.try_iter() {
//!     if let SyncEvent::ObjectChanged { key, phase, .. } = event {
//!         println!("{key} is now {phase}");
//!     }
//! }
//! ```

use crate::object::ObjectKey;
use crate::state::SyncPhase;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A notification about a sync-visible change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An object's sync state changed.
    ObjectChanged {
        /// Entity type of the owning collection.
        entity_type: &'static str,
        /// The object that changed.
        key: ObjectKey,
        /// The object's new phase.
        phase: SyncPhase,
    },
    /// Objects were added to or removed from a collection.
    CollectionChanged {
        /// Entity type of the collection.
        entity_type: &'static str,
    },
    /// Whether a new sync operation may be started flipped.
    AvailabilityChanged {
        /// True when no operation runs and the zone is ready.
        available: bool,
    },
}

/// Distributes `SyncEvent`s to subscribers.
///
/// Disconnected subscribers are dropped on the next emit.
pub struct ChangeNotifier {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl ChangeNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn object_changed(&self, entity_type: &'static str, key: ObjectKey, phase: SyncPhase) {
        self.emit(SyncEvent::ObjectChanged {
            entity_type,
            key,
            phase,
        });
    }

    pub(crate) fn collection_changed(&self, entity_type: &'static str) {
        self.emit(SyncEvent::CollectionChanged { entity_type });
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
