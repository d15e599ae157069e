//! # zonesync engine
//!
//! Client-side synchronization of local objects with a remote record store
//! that is only reachable intermittently.
//!
//! This crate provides:
//! - A per-object sync state machine (`Local`, `Pending`, `PendingDelete`,
//!   `Synced`, `Modified`, `Failed`)
//! - Collections that derive push work-lists and apply results
//! - Batched push with a per-operation reverse index
//! - Incremental pull over an opaque change-feed cursor
//! - A coordinator that gates operations and persists cursors
//! - An in-memory remote store for tests and demos
//!
//! ## Architecture
//!
//! The store is authoritative:
//! 1. Pull remote changes from the last saved cursor
//! 2. Apply them to the collections, overwriting local state
//! 3. Push local changes in one batch
//!
//! All object state is mutated on the task that drives the coordinator. The
//! only suspending calls are the store requests; their results are applied
//! after they resolve.
//!
//! ## Key Invariants
//!
//! - A locked object is never changed by local edits
//! - Only the operation that locked an object unlocks it, on every path,
//!   including an abandoned operation whose future was dropped
//! - At most one operation is in flight
//! - The cursor advances only after a successful pull
//! - An object keeps its record ID across pushes
//!
//! ## Example
//!
//! ```rust,ignore
//! let store = Arc::new(MemoryRemoteStore::new());
//! let mut coordinator = Coordinator::new(
//!     SyncConfig::default(),
//!     store,
//!     Arc::new(MemorySettings::new()),
//! );
//! coordinator.register::<Note>()?;
//! coordinator.start_up().await?;
//!
//! let notes = coordinator.collection_mut::<Note>().unwrap();
//! notes.create_local_with(Note { title: "groceries".into() });
//!
//! coordinator.sync().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod coordinator;
mod error;
mod notify;
mod object;
mod pull;
mod push;
mod settings;
mod state;
mod store;

pub use collection::{ManagedCollection, ObjectCollection};
pub use config::{SyncConfig, DEFAULT_PUSH_BATCH_SIZE, DEFAULT_ZONE_NAME};
pub use coordinator::{Coordinator, RunningOperation, SyncCycle, SyncStats};
pub use error::{StoreError, SyncError, SyncResult};
pub use notify::{ChangeNotifier, SyncEvent};
pub use object::{DeleteOutcome, ObjectKey, PushItem, SyncEntity, SyncObject};
pub use pull::{PullApplied, PullOperation, PullResult, PullSummary};
pub use push::{PushApplied, PushBatch, PushOperation, PushReconciliation, PushSummary};
pub use settings::{FileSettings, MemorySettings, SettingsSnapshot, SettingsStore};
pub use state::{DeleteMark, SyncPhase, SyncState};
pub use store::{ChangeSink, FeedEvent, MemoryRemoteStore, ModifyResult, RemoteStore};

pub use zonesync_protocol::{ChangeToken, FieldValue, Record, RecordId, ZoneId};
