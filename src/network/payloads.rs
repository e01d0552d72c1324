//! Wire shapes exchanged with the workflow and environment endpoints.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    BlockValues, Edge, History, LoopConfig, MergedBlock, WorkflowGraphState, WorkflowMetadata,
};

/// Graph state as the server stores it: blocks already carry their values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedWorkflowState {
    #[serde(default)]
    pub blocks: HashMap<String, MergedBlock>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub loops: HashMap<String, LoopConfig>,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deployed: bool,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl SyncedWorkflowState {
    /// Split into the workflow store's graph and the subblock store's values.
    pub fn into_graph(self) -> (WorkflowGraphState, BlockValues) {
        let mut values = BlockValues::with_capacity(self.blocks.len());
        let mut graph = WorkflowGraphState {
            edges: self.edges,
            loops: self.loops,
            is_deployed: self.is_deployed,
            deployed_at: self.deployed_at,
            last_saved: self.last_saved,
            ..WorkflowGraphState::empty()
        };
        for (id, merged) in self.blocks {
            let (block, block_values) = merged.split();
            values.insert(id.clone(), block_values);
            graph.blocks.insert(id, block);
        }
        graph.history = History::starting_at(graph.snapshot());
        (graph, values)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub state: SyncedWorkflowState,
}

impl WorkflowRecord {
    pub fn metadata(&self) -> WorkflowMetadata {
        WorkflowMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            last_modified: self
                .last_modified
                .or(self.state.last_saved)
                .unwrap_or_else(Utc::now),
        }
    }
}

/// `POST /api/workflows/sync` – every workflow in one batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSyncPayload {
    pub workflows: BTreeMap<String, WorkflowRecord>,
}

/// `DELETE /api/workflows/sync`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteWorkflowPayload {
    pub id: String,
}

/// `GET /api/workflows/sync`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowListResponse {
    #[serde(default)]
    pub data: Vec<WorkflowRecord>,
}

/// `POST /api/environment` and the `data` of its `GET`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentPayload {
    pub variables: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentResponse {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}
