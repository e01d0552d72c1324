use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Weak;

use crate::constants::WORKFLOW_SYNC_NAME;
use crate::network::{ApiConfig, SyncedWorkflowState, WorkflowRecord, WorkflowSyncPayload};
use crate::state::AppState;
use crate::storage::PersistenceAdapter;
use crate::stores::merge_subblock_state;

use super::{SyncConfig, SyncSettings};

/// Every workflow of the registry with values folded into its blocks.
///
/// The active workflow is read from the live stores, the others from the
/// local cache.  A workflow whose graph is missing from the cache is left
/// out rather than sent as an empty graph.
pub fn workflow_sync_payload(state: &AppState, persistence: &PersistenceAdapter) -> Option<WorkflowSyncPayload> {
    let active_id = state.registry.active_workflow_id();
    let mut workflows = BTreeMap::new();

    for (id, metadata) in state.registry.workflows() {
        let is_active = active_id == Some(id.as_str());
        let graph = if is_active {
            state.workflow.state().clone()
        } else {
            match persistence.load_workflow_state(id) {
                Some(graph) => graph,
                None => {
                    log::debug!("Workflow {} has no cached graph, not syncing it", id);
                    continue;
                }
            }
        };

        let cached_values;
        let values = match state.subblocks.workflow_values(id) {
            Some(values) => Some(values),
            None => {
                cached_values = persistence.load_subblock_values(id);
                cached_values.as_ref()
            }
        };

        let record = WorkflowRecord {
            id: id.clone(),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            color: metadata.color.clone(),
            last_modified: Some(metadata.last_modified),
            state: SyncedWorkflowState {
                blocks: merge_subblock_state(&graph.blocks, values),
                edges: graph.edges,
                loops: graph.loops,
                last_saved: graph.last_saved,
                is_deployed: graph.is_deployed,
                deployed_at: graph.deployed_at,
            },
        };
        workflows.insert(id.clone(), record);
    }

    if workflows.is_empty() {
        return None;
    }
    Some(WorkflowSyncPayload { workflows })
}

/// `POST /api/workflows/sync` with the batched payload.  Skipped while the
/// registry is still hydrating so a half-loaded registry never overwrites the
/// server.
pub fn workflow_sync_config(
    state: Weak<RefCell<AppState>>,
    persistence: PersistenceAdapter,
    api: &ApiConfig,
    settings: &SyncSettings,
) -> SyncConfig {
    let guard_state = state.clone();
    let config = SyncConfig::new(WORKFLOW_SYNC_NAME, api.workflows_sync_url(), move || {
        let handle = state.upgrade()?;
        let Ok(state) = handle.try_borrow() else {
            log::debug!("Workflow state busy, skipping payload");
            return None;
        };
        let payload = workflow_sync_payload(&state, &persistence)?;
        match serde_json::to_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Failed to serialize workflow sync payload: {}", e);
                None
            }
        }
    })
    .debounce(settings.workflow_debounce)
    .sync_on_exit(true)
    .should_sync(move || {
        let Some(handle) = guard_state.upgrade() else {
            return false;
        };
        let ready = handle.try_borrow().map(|state| !state.registry.is_loading()).unwrap_or(false);
        ready
    })
    .on_sync_success(|_| log::debug!("Workflows synced"));

    match settings.interval_ms {
        Some(period) => config.sync_on_interval(period),
        None => config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowMetadataUpdate;
    use crate::storage::MemoryStorage;
    use crate::stores::CreateWorkflowOptions;
    use serde_json::json;
    use std::rc::Rc;

    fn setup() -> (AppState, PersistenceAdapter) {
        (
            AppState::new(),
            PersistenceAdapter::new(Rc::new(MemoryStorage::new())),
        )
    }

    #[test]
    fn empty_registry_has_nothing_to_sync() {
        let (state, persistence) = setup();
        assert!(workflow_sync_payload(&state, &persistence).is_none());
    }

    #[test]
    fn payload_batches_all_workflows_with_merged_values() {
        let (mut state, persistence) = setup();
        let (a, b) = {
            let (registry, mut linked) = state.linked(&persistence);
            let a = registry.create_workflow(&mut linked, CreateWorkflowOptions::default());
            let b = registry.create_workflow(&mut linked, CreateWorkflowOptions::default());
            (a, b)
        };
        state
            .registry
            .update_workflow(&persistence, &a, WorkflowMetadataUpdate::rename("Live"));
        let starter_id = state.workflow.blocks().keys().next().cloned().unwrap();
        state
            .subblocks
            .set_value(&a, &starter_id, "webhookPath", json!("/hooks/live"));

        let payload = workflow_sync_payload(&state, &persistence).unwrap();
        assert_eq!(payload.workflows.len(), 2);

        let live = &payload.workflows[&a];
        assert_eq!(live.name, "Live");
        assert_eq!(
            live.state.blocks[&starter_id].sub_blocks["webhookPath"].value,
            json!("/hooks/live")
        );
        let other = &payload.workflows[&b];
        assert_eq!(other.state.blocks.len(), 1);

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value["workflows"][&a]["state"]["blocks"].is_object());
    }

    #[test]
    fn workflows_missing_from_cache_are_left_out() {
        let (mut state, persistence) = setup();
        let b = {
            let (registry, mut linked) = state.linked(&persistence);
            registry.create_workflow(&mut linked, CreateWorkflowOptions::default());
            registry.create_workflow(&mut linked, CreateWorkflowOptions::default())
        };
        persistence.purge_workflow(&b);

        let payload = workflow_sync_payload(&state, &persistence).unwrap();
        assert_eq!(payload.workflows.len(), 1);
        assert!(!payload.workflows.contains_key(&b));
    }
}
