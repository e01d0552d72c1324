pub mod environment;
pub mod manager;
pub mod registry;
pub mod workflows;

pub use manager::{SyncConfig, SyncError, SyncManager};
pub use registry::SyncRegistry;

use crate::constants::{
    ENVIRONMENT_SYNC_DELAY_MS, ENVIRONMENT_SYNC_MAX_WAIT_MS, SYNC_INTERVAL_MS, WORKFLOW_SYNC_DELAY_MS,
    WORKFLOW_SYNC_MAX_WAIT_MS,
};
use crate::scheduling::DebouncePolicy;

/// Timing of the built-in sync managers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    pub workflow_debounce: DebouncePolicy,
    pub environment_debounce: DebouncePolicy,
    /// Background workflow sync period; `None` disables it.
    pub interval_ms: Option<u32>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            workflow_debounce: DebouncePolicy::new(WORKFLOW_SYNC_DELAY_MS, WORKFLOW_SYNC_MAX_WAIT_MS),
            environment_debounce: DebouncePolicy::new(ENVIRONMENT_SYNC_DELAY_MS, ENVIRONMENT_SYNC_MAX_WAIT_MS),
            interval_ms: Some(SYNC_INTERVAL_MS),
        }
    }
}
