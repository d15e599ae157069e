//! # zonesync protocol
//!
//! Value types shared between the sync engine and remote record stores.
//!
//! This crate provides:
//! - `ZoneId` / `RecordId` for record identity
//! - `Record`, an opaque field bag with store-maintained system fields
//! - `ChangeToken`, the opaque change-feed continuation token
//! - CBOR encoding/decoding of records
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::{ChangeToken, RecordId, ZoneId};
pub use record::{FieldValue, Record, SystemFields};
