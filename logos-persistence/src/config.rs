//! Provider configuration.

use serde::Deserialize;

/// Settings shared by a root provider and every provider it spawns for
/// sub-documents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Stored-record count of one scope that triggers compaction (default: 500)
    pub update_limit: usize,
    /// Capacity of each `Provider::subscribe` receiver (default: 256)
    pub event_capacity: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            update_limit: 500,
            event_capacity: 256,
        }
    }
}

impl ProviderConfig {
    /// Config for testing (compacts early, roomy event channel).
    pub fn for_testing() -> Self {
        Self {
            update_limit: 10,
            event_capacity: 1024,
        }
    }

    /// Override the compaction threshold. Values below 1 are clamped to 1.
    pub fn with_update_limit(mut self, update_limit: usize) -> Self {
        self.update_limit = update_limit.max(1);
        self
    }
}
