use std::cell::RefCell;
use std::rc::Weak;

use crate::constants::ENVIRONMENT_SYNC_NAME;
use crate::network::{ApiConfig, EnvironmentPayload};
use crate::state::AppState;

use super::{SyncConfig, SyncSettings};

/// `POST /api/environment` with `{ variables }`.  An empty set is never sent,
/// so a sync racing the initial load cannot wipe the server's variables.
pub fn environment_sync_config(state: Weak<RefCell<AppState>>, api: &ApiConfig, settings: &SyncSettings) -> SyncConfig {
    let guard_state = state.clone();
    SyncConfig::new(ENVIRONMENT_SYNC_NAME, api.environment_url(), move || {
        let handle = state.upgrade()?;
        let variables = handle.try_borrow().ok()?.environment.variables().clone();
        serde_json::to_value(EnvironmentPayload { variables }).ok()
    })
    .debounce(settings.environment_debounce)
    .sync_on_exit(true)
    .should_sync(move || {
        let Some(handle) = guard_state.upgrade() else {
            return false;
        };
        let has_variables = handle.try_borrow().map(|state| !state.environment.is_empty()).unwrap_or(false);
        has_variables
    })
}
