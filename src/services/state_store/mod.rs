//! StateStore: persisted per-window user attributes (custom name, initiative,
//! class override, shortcut, enabled flag), their validation and the change
//! notification channel. Canonical window records live in the Detector.

mod persistence;
mod store;
mod validator;

pub use persistence::{JsonFileStore, KeyValueStore, MemoryStore};
pub use store::{AttributeKind, AttributeMaps, AttributeUpdate, StateSnapshot, StateStore, SNAPSHOT_VERSION};
pub use validator::{AttributeValidator, MAX_INITIATIVE, MAX_NAME_LEN};

use crate::config::Config;
use std::sync::Arc;

/// Factory function to create the persistence backend from configuration
pub fn create_key_value_store(config: &Config, dry_run: bool) -> Arc<dyn KeyValueStore> {
    if dry_run || config.storage.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::new(config.storage_path()))
    }
}
