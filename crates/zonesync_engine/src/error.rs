//! Error types for the sync engine.

use crate::object::ObjectKey;
use crate::state::SyncPhase;
use thiserror::Error;
use zonesync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by a remote record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or transport failure.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// The zone does not exist on the store.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// The zone already exists (returned by stores whose zone creation is not idempotent).
    #[error("zone already exists: {0}")]
    ZoneAlreadyExists(String),

    /// The change token is no longer valid; a full fetch is required.
    #[error("change token expired")]
    ChangeTokenExpired,

    /// The store refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Some entries of a batch failed.
    #[error("partial failure: {0}")]
    PartialFailure(String),
}

impl StoreError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network { retryable, .. } => *retryable,
            StoreError::PartialFailure(_) => true,
            StoreError::ChangeTokenExpired => true,
            _ => false,
        }
    }
}

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The zone has not been confirmed as provisioned yet.
    #[error("record zone is not ready")]
    ZoneNotReady,

    /// The object is locked by an in-flight push.
    #[error("object {key} is locked by an in-flight push")]
    ObjectLocked {
        /// The locked object.
        key: ObjectKey,
    },

    /// The object is marked for deletion and no longer accepts edits.
    #[error("object {key} is marked for deletion")]
    ObjectDeleted {
        /// The deleted object.
        key: ObjectKey,
    },

    /// No object with this key exists in the collection.
    #[error("unknown object {key}")]
    UnknownObject {
        /// The missing key.
        key: ObjectKey,
    },

    /// A state-machine method was called in a phase that does not allow it.
    #[error("cannot {action} an object in phase {from}")]
    InvalidTransition {
        /// Phase the object was in.
        from: SyncPhase,
        /// Attempted transition.
        action: &'static str,
    },

    /// A collection for this entity type is already registered.
    #[error("collection for entity type {0} is already registered")]
    DuplicateCollection(&'static str),

    /// An operation was completed on a coordinator that did not start it.
    #[error("operation {actual} is not the running operation (running: {expected:?})")]
    UnexpectedOperation {
        /// Running operation ID, if any.
        expected: Option<u64>,
        /// ID of the operation being completed.
        actual: u64,
    },

    /// Remote store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Settings could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_retryable(),
            SyncError::ZoneNotReady => true,
            _ => false,
        }
    }
}
