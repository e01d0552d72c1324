// src/messages.rs
//
// Everything the editor can ask of the stores.  The view layer dispatches
// these, either directly or as JSON through the bindings.
//
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{BlockState, Edge, Position, SubBlockValue, WorkflowMetadataUpdate};
use crate::stores::CreateWorkflowOptions;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    // Workflow registry
    CreateWorkflow(CreateWorkflowOptions),
    #[serde(rename_all = "camelCase")]
    SetActiveWorkflow {
        workflow_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveWorkflow {
        workflow_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateWorkflow {
        workflow_id: String,
        update: WorkflowMetadataUpdate,
    },

    // Graph of the active workflow
    AddBlock {
        block: BlockState,
    },
    #[serde(rename_all = "camelCase")]
    RemoveBlock {
        block_id: String,
    },
    #[serde(rename_all = "camelCase")]
    DuplicateBlock {
        block_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateBlockPosition {
        block_id: String,
        position: Position,
    },
    #[serde(rename_all = "camelCase")]
    UpdateBlockName {
        block_id: String,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    ToggleBlockEnabled {
        block_id: String,
    },
    AddEdge {
        edge: Edge,
    },
    #[serde(rename_all = "camelCase")]
    RemoveEdge {
        edge_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateLoopIterations {
        loop_id: String,
        iterations: u32,
    },
    #[serde(rename_all = "camelCase")]
    SetDeploymentStatus {
        is_deployed: bool,
        #[serde(default)]
        deployed_at: Option<DateTime<Utc>>,
    },
    Undo,
    Redo,

    // Field values of the active workflow
    #[serde(rename_all = "camelCase")]
    SetSubBlockValue {
        block_id: String,
        sub_block_id: String,
        value: SubBlockValue,
    },

    // Environment
    SetEnvironmentVariable {
        key: String,
        value: String,
    },
    RemoveEnvironmentVariable {
        key: String,
    },
    SetEnvironmentVariables {
        variables: BTreeMap<String, String>,
    },

    // Logout / account switch
    ResetAllStores,
}

/// Side effects requested by `update`, run in order once the state borrow
/// has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write the active graph, its values and the registry to the cache.
    PersistActiveWorkflow,
    PersistRegistry,
    PersistEnvironment,
    SyncWorkflows,
    SyncEnvironment,
    /// Send `DELETE` for every pending tombstone.
    SyncDeletedWorkflows,
    /// Dispose every sync manager; they are rebuilt on next use.
    ResetSync,
}
