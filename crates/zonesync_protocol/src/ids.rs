//! Record identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};

/// Owner name used when a zone belongs to the current user.
pub const DEFAULT_OWNER: &str = "__defaultOwner__";

/// Identifies a named partition ("zone") of the remote record store.
///
/// Incremental change feeds only exist for explicitly created zones, so every
/// record the engine writes lives in one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId {
    name: String,
    owner: String,
}

impl ZoneId {
    /// Creates a zone ID owned by the current user.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_owner(name, DEFAULT_OWNER)
    }

    /// Creates a zone ID with an explicit owner.
    pub fn with_owner(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// Returns the zone name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the zone owner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Checks that neither component is empty.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.name.is_empty() {
            return Err(ProtocolError::InvalidIdentity("empty zone name".into()));
        }
        if self.owner.is_empty() {
            return Err(ProtocolError::InvalidIdentity("empty zone owner".into()));
        }
        Ok(())
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.name)
    }
}

/// Stable identity of a record: its zone plus a name unique within that zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    zone: ZoneId,
    name: String,
}

impl RecordId {
    /// Creates a record ID from a zone and record name.
    pub fn new(zone: ZoneId, name: impl Into<String>) -> Self {
        Self {
            zone,
            name: name.into(),
        }
    }

    /// Mints a fresh, random record ID in the given zone.
    #[must_use]
    pub fn unique(zone: &ZoneId) -> Self {
        Self::new(zone.clone(), Uuid::new_v4().hyphenated().to_string().to_uppercase())
    }

    /// Returns the zone this record lives in.
    pub fn zone(&self) -> &ZoneId {
        &self.zone
    }

    /// Returns the record name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.name)
    }
}

/// Opaque continuation token of a zone change feed.
///
/// The client never interprets the bytes; it only stores the latest token it
/// received and hands it back on the next fetch.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}
