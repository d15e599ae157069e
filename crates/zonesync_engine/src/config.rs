//! Configuration for the sync engine.

use zonesync_protocol::ZoneId;

/// Default zone all records are written to.
pub const DEFAULT_ZONE_NAME: &str = "mainPrivateZone";

/// Default maximum number of entries in one push batch.
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 400;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name of the zone records live in.
    pub zone_name: String,
    /// Zone owner; `None` means the current user.
    pub zone_owner: Option<String>,
    /// Maximum number of saves plus deletes in one push batch.
    pub push_batch_size: usize,
    /// Whether a pull that ends in an error still applies what it received.
    pub apply_partial_pulls: bool,
}

impl SyncConfig {
    /// Creates a configuration for the given zone.
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            zone_owner: None,
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            apply_partial_pulls: false,
        }
    }

    /// Sets the zone owner.
    pub fn with_zone_owner(mut self, owner: impl Into<String>) -> Self {
        self.zone_owner = Some(owner.into());
        self
    }

    /// Sets the push batch size. Zero is treated as one.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets whether failed pulls still apply their partial results.
    pub fn with_apply_partial_pulls(mut self, apply: bool) -> Self {
        self.apply_partial_pulls = apply;
        self
    }

    /// Returns the zone ID described by this configuration.
    pub fn zone_id(&self) -> ZoneId {
        match &self.zone_owner {
            Some(owner) => ZoneId::with_owner(&self.zone_name, owner),
            None => ZoneId::new(&self.zone_name),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("notes")
            .with_zone_owner("alice")
            .with_push_batch_size(25)
            .with_apply_partial_pulls(true);

        assert_eq!(config.zone_id(), ZoneId::with_owner("notes", "alice"));
        assert_eq!(config.push_batch_size, 25);
        assert!(config.apply_partial_pulls);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.zone_id(), ZoneId::new(DEFAULT_ZONE_NAME));
        assert_eq!(config.push_batch_size, DEFAULT_PUSH_BATCH_SIZE);
        assert!(!config.apply_partial_pulls);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let config = SyncConfig::default().with_push_batch_size(0);
        assert_eq!(config.push_batch_size, 1);
    }
}
