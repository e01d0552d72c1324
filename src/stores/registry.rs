//! Workflow registry: metadata of every workflow plus the active-workflow
//! state machine.
//!
//! The graph of the active workflow lives in the [`WorkflowStore`], a single
//! slot.  Switching is an explicit two-phase transition:
//!
//! 1. **flush** – the live graph and subblock values of the current workflow
//!    are written to the local cache (skipped when idle);
//! 2. **load** – the target's cached graph (or an empty graph) is hydrated into
//!    the workflow store and its values re-seeded into the subblock store.
//!
//! `Idle → Loading(id) → Active(id)`.  Both phases are synchronous, so no other
//! transition can observe a half-flushed state.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_WORKFLOW_DESCRIPTION, DEFAULT_WORKFLOW_NAME_PREFIX, WORKFLOW_COLORS};
use crate::models::{WorkflowGraphState, WorkflowMetadata, WorkflowMetadataUpdate};
use crate::storage::PersistenceAdapter;

use super::subblock::SubBlockStore;
use super::workflow::WorkflowStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Workflow {0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActiveWorkflow {
    #[default]
    Idle,
    Loading {
        target: String,
    },
    Active(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    /// Activate the new workflow even when others exist.
    #[serde(default)]
    pub is_initial: bool,
}

/// The stores a transition reads and writes besides the registry itself.
pub struct LinkedStores<'a> {
    pub workflow: &'a mut WorkflowStore,
    pub subblocks: &'a mut SubBlockStore,
    pub persistence: &'a PersistenceAdapter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStore {
    workflows: HashMap<String, WorkflowMetadata>,
    active: ActiveWorkflow,
    error: Option<RegistryError>,
    is_loading: bool,
    pending_deletions: BTreeSet<String>,
    deletions_in_flight: BTreeSet<String>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflows(&self) -> &HashMap<String, WorkflowMetadata> {
        &self.workflows
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowMetadata> {
        self.workflows.get(workflow_id)
    }

    pub fn active(&self) -> &ActiveWorkflow {
        &self.active
    }

    pub fn active_workflow_id(&self) -> Option<&str> {
        match &self.active {
            ActiveWorkflow::Active(id) => Some(id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RegistryError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    /// Replace all metadata, e.g. from the server or the cache.  Leaves the
    /// registry idle; the caller activates a workflow afterwards.
    pub fn hydrate(&mut self, workflows: HashMap<String, WorkflowMetadata>) {
        self.workflows = workflows;
        self.active = ActiveWorkflow::Idle;
        self.error = None;
    }

    /// The most recently modified workflow, ties broken by id.
    pub fn most_recent_workflow_id(&self) -> Option<String> {
        self.workflows
            .values()
            .max_by(|a, b| a.last_modified.cmp(&b.last_modified).then_with(|| b.id.cmp(&a.id)))
            .map(|w| w.id.clone())
    }

    fn next_default_name(&self) -> String {
        let taken: BTreeSet<&str> = self.workflows.values().map(|w| w.name.as_str()).collect();
        let mut n = self.workflows.len() + 1;
        loop {
            let candidate = format!("{} {}", DEFAULT_WORKFLOW_NAME_PREFIX, n);
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn next_color(&self) -> String {
        WORKFLOW_COLORS[self.workflows.len() % WORKFLOW_COLORS.len()].to_string()
    }

    /// Create a workflow with a starter graph and persist it right away.
    /// The first workflow, or one flagged `is_initial`, becomes active.
    pub fn create_workflow(&mut self, linked: &mut LinkedStores<'_>, options: CreateWorkflowOptions) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let first = self.workflows.is_empty();
        let metadata = WorkflowMetadata {
            id: id.clone(),
            name: options.name.unwrap_or_else(|| self.next_default_name()),
            description: Some(
                options
                    .description
                    .unwrap_or_else(|| DEFAULT_WORKFLOW_DESCRIPTION.to_string()),
            ),
            color: options.color.unwrap_or_else(|| self.next_color()),
            last_modified: Utc::now(),
        };

        let graph = WorkflowGraphState::starter();
        let values = graph.default_block_values();
        linked.persistence.save_workflow_state(&id, &graph);
        linked.persistence.save_subblock_values(&id, &values);
        linked.subblocks.set_workflow_values(&id, values);

        log::info!("Created workflow {} ({})", metadata.name, id);
        self.workflows.insert(id.clone(), metadata);
        linked.persistence.save_registry(&self.workflows);

        if first || options.is_initial {
            // Just inserted, so the switch cannot miss.
            let _ = self.set_active_workflow(linked, &id);
        }
        id
    }

    /// Switch the single-slot workflow store to `workflow_id`.  An unknown id
    /// is recorded in `error` and returned; the current workflow stays active.
    pub fn set_active_workflow(&mut self, linked: &mut LinkedStores<'_>, workflow_id: &str) -> Result<(), RegistryError> {
        if !self.workflows.contains_key(workflow_id) {
            let error = RegistryError::NotFound(workflow_id.to_string());
            log::warn!("{}", error);
            self.error = Some(error.clone());
            return Err(error);
        }
        self.error = None;
        if self.active_workflow_id() == Some(workflow_id) {
            return Ok(());
        }

        self.flush_active(linked);
        self.active = ActiveWorkflow::Loading {
            target: workflow_id.to_string(),
        };
        self.load_workflow(linked, workflow_id);
        self.active = ActiveWorkflow::Active(workflow_id.to_string());
        linked.persistence.save_active_workflow_id(Some(workflow_id));
        log::debug!("Active workflow is now {}", workflow_id);
        Ok(())
    }

    /// Phase one: write the live graph and values of the active workflow to
    /// the local cache.  Returns false when no workflow is active.
    pub fn flush_active(&self, linked: &LinkedStores<'_>) -> bool {
        let Some(active_id) = self.active_workflow_id() else {
            return false;
        };
        let saved_graph = linked.persistence.save_workflow_state(active_id, linked.workflow.state());
        let values = linked.subblocks.workflow_values(active_id).cloned().unwrap_or_default();
        let saved_values = linked.persistence.save_subblock_values(active_id, &values);
        saved_graph && saved_values
    }

    /// Phase two: hydrate the stores from the cache.  Values fall back to
    /// whatever is loaded in memory, then to the slots' defaults.
    fn load_workflow(&self, linked: &mut LinkedStores<'_>, workflow_id: &str) {
        let graph = linked.persistence.load_workflow_state(workflow_id).unwrap_or_else(|| {
            log::debug!("No cached graph for {}, starting empty", workflow_id);
            WorkflowGraphState::empty()
        });
        if let Some(values) = linked.persistence.load_subblock_values(workflow_id) {
            linked.subblocks.set_workflow_values(workflow_id, values);
        }
        linked.subblocks.initialize_from_workflow(workflow_id, &graph.blocks);
        linked.workflow.hydrate(graph);
    }

    /// Delete a workflow locally and queue its server-side deletion.  When it
    /// was active, the most recently modified remaining workflow takes over.
    pub fn remove_workflow(&mut self, linked: &mut LinkedStores<'_>, workflow_id: &str) -> bool {
        if self.workflows.remove(workflow_id).is_none() {
            return false;
        }
        self.pending_deletions.insert(workflow_id.to_string());
        self.persist_tombstones(linked.persistence);
        linked.persistence.purge_workflow(workflow_id);
        linked.subblocks.remove_workflow(workflow_id);
        linked.persistence.save_registry(&self.workflows);
        log::info!("Removed workflow {}", workflow_id);

        let was_active = match &self.active {
            ActiveWorkflow::Active(id) => id == workflow_id,
            ActiveWorkflow::Loading { target } => target == workflow_id,
            ActiveWorkflow::Idle => false,
        };
        if !was_active {
            return true;
        }

        match self.most_recent_workflow_id() {
            Some(next) => {
                self.active = ActiveWorkflow::Loading { target: next.clone() };
                self.load_workflow(linked, &next);
                linked.persistence.save_active_workflow_id(Some(&next));
                self.active = ActiveWorkflow::Active(next);
            }
            None => {
                self.active = ActiveWorkflow::Idle;
                linked.workflow.clear();
                linked.persistence.save_active_workflow_id(None);
            }
        }
        true
    }

    /// Merge metadata fields.  Unknown ids leave the registry unchanged.
    pub fn update_workflow(
        &mut self,
        persistence: &PersistenceAdapter,
        workflow_id: &str,
        update: WorkflowMetadataUpdate,
    ) -> bool {
        let Some(metadata) = self.workflows.get_mut(workflow_id) else {
            return false;
        };
        update.apply_to(metadata);
        metadata.last_modified = Utc::now();
        persistence.save_registry(&self.workflows);
        true
    }

    /// Bump `lastModified` after an edit of the workflow's graph or values.
    pub fn touch(&mut self, workflow_id: &str) {
        if let Some(metadata) = self.workflows.get_mut(workflow_id) {
            metadata.last_modified = Utc::now();
        }
    }

    // -----------------------------------------------------------------------
    // Deletion tombstones
    // -----------------------------------------------------------------------

    /// Ids deleted locally whose server-side deletion has not succeeded yet.
    pub fn tombstones(&self) -> BTreeSet<String> {
        self.pending_deletions
            .union(&self.deletions_in_flight)
            .cloned()
            .collect()
    }

    pub fn is_tombstoned(&self, workflow_id: &str) -> bool {
        self.pending_deletions.contains(workflow_id) || self.deletions_in_flight.contains(workflow_id)
    }

    /// Re-queue tombstones left over from a previous session.
    pub fn restore_tombstones(&mut self, ids: BTreeSet<String>) {
        self.pending_deletions.extend(ids);
    }

    /// Take every pending tombstone for a `DELETE` request.
    pub fn begin_deletion_sync(&mut self) -> Vec<String> {
        let ids: Vec<String> = std::mem::take(&mut self.pending_deletions).into_iter().collect();
        self.deletions_in_flight.extend(ids.iter().cloned());
        ids
    }

    /// A failed deletion goes back to pending for the next sync.
    pub fn finish_deletion_sync(&mut self, persistence: &PersistenceAdapter, workflow_id: &str, deleted: bool) {
        if !self.deletions_in_flight.remove(workflow_id) {
            return;
        }
        if !deleted {
            self.pending_deletions.insert(workflow_id.to_string());
        }
        self.persist_tombstones(persistence);
    }

    fn persist_tombstones(&self, persistence: &PersistenceAdapter) {
        persistence.save_deleted_workflow_ids(&self.tombstones());
    }

    /// Drop everything, including tombstones.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
