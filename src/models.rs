use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::constants::{STARTER_BLOCK_NAME, STARTER_BLOCK_TYPE, STARTER_BLOCK_X, STARTER_BLOCK_Y};

/// Live value of a single subblock field: primitive or structured JSON.
pub type SubBlockValue = Value;

/// `blockId -> subBlockId -> value` for one workflow.
pub type BlockValues = HashMap<String, HashMap<String, SubBlockValue>>;

/// WorkflowMetadata is the registry's view of a workflow (not its graph)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub color: String,
    pub last_modified: DateTime<Utc>,
}

/// Partial update applied by `update_workflow`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl WorkflowMetadataUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn apply_to(self, metadata: &mut WorkflowMetadata) {
        if let Some(name) = self.name {
            metadata.name = name;
        }
        if let Some(description) = self.description {
            metadata.description = Some(description);
        }
        if let Some(color) = self.color {
            metadata.color = color;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A declared field slot on a block. The live value lives in the subblock
/// store, only the static default is carried here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubBlockSlot {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<SubBlockValue>,
}

impl SubBlockSlot {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: SubBlockValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Static default, `null` when the slot declares none.
    pub fn default_or_null(&self) -> SubBlockValue {
        self.default_value.clone().unwrap_or(Value::Null)
    }
}

fn enabled_by_default() -> bool {
    true
}

/// BlockState represents one node of the workflow graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub position: Position,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub sub_blocks: Vec<SubBlockSlot>,
}

impl BlockState {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        position: Position,
        sub_blocks: Vec<SubBlockSlot>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            position,
            enabled: true,
            sub_blocks,
        }
    }

    /// Default value for every declared slot of this block.
    pub fn default_values(&self) -> HashMap<String, SubBlockValue> {
        self.sub_blocks
            .iter()
            .map(|slot| (slot.id.clone(), slot.default_or_null()))
            .collect()
    }

    pub fn slot(&self, sub_block_id: &str) -> Option<&SubBlockSlot> {
        self.sub_blocks.iter().find(|slot| slot.id == sub_block_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Two edges are duplicates when they join the same handles.
    pub fn same_connection(&self, other: &Edge) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.source_handle == other.source_handle
            && self.target_handle == other.target_handle
    }

    pub fn touches(&self, block_id: &str) -> bool {
        self.source == block_id || self.target == block_id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub id: String,
    pub nodes: Vec<String>,
    pub iterations: u32,
}

/// The part of the graph tracked by undo/redo
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub blocks: HashMap<String, BlockState>,
    pub edges: Vec<Edge>,
    pub loops: HashMap<String, LoopConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: GraphSnapshot,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    /// Subblock values as they stood at this entry.  Lets undo bring back
    /// the fields of a block it re-adds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BlockValues>,
}

impl HistoryEntry {
    pub fn new(state: GraphSnapshot, action: impl Into<String>) -> Self {
        Self {
            state,
            action: action.into(),
            timestamp: Utc::now(),
            values: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub past: Vec<HistoryEntry>,
    pub present: HistoryEntry,
    pub future: Vec<HistoryEntry>,
}

impl History {
    pub fn starting_at(snapshot: GraphSnapshot) -> Self {
        Self {
            past: Vec::new(),
            present: HistoryEntry::new(snapshot, "Initial state"),
            future: Vec::new(),
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::starting_at(GraphSnapshot::default())
    }
}

/// The editable graph of one workflow
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraphState {
    #[serde(default)]
    pub blocks: HashMap<String, BlockState>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub loops: HashMap<String, LoopConfig>,
    #[serde(default)]
    pub is_deployed: bool,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: History,
}

impl WorkflowGraphState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Minimal graph for a new workflow: a single trigger block.
    pub fn starter() -> Self {
        let starter = starter_block(uuid::Uuid::new_v4().to_string());
        let mut state = Self::empty();
        state.blocks.insert(starter.id.clone(), starter);
        state.history = History::starting_at(state.snapshot());
        state
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            blocks: self.blocks.clone(),
            edges: self.edges.clone(),
            loops: self.loops.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        self.blocks = snapshot.blocks;
        self.edges = snapshot.edges;
        self.loops = snapshot.loops;
    }

    pub fn block_ids(&self) -> BTreeSet<String> {
        self.blocks.keys().cloned().collect()
    }

    /// Default subblock values for every block of the graph.
    pub fn default_block_values(&self) -> BlockValues {
        self.blocks
            .values()
            .map(|block| (block.id.clone(), block.default_values()))
            .collect()
    }
}

/// A subblock with its live value, as sent to the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSubBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: SubBlockValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<SubBlockValue>,
}

/// A block with subblock values folded in, as sent to the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub position: Position,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub sub_blocks: HashMap<String, MergedSubBlock>,
}

impl MergedBlock {
    /// Separate a server block back into its declaration and its values.
    /// Slot order is not carried on the wire, so slots come back sorted by id.
    pub fn split(self) -> (BlockState, HashMap<String, SubBlockValue>) {
        let mut sub_blocks: Vec<MergedSubBlock> = self.sub_blocks.into_values().collect();
        sub_blocks.sort_by(|a, b| a.id.cmp(&b.id));

        let mut values = HashMap::with_capacity(sub_blocks.len());
        let mut slots = Vec::with_capacity(sub_blocks.len());
        for sub_block in sub_blocks {
            values.insert(sub_block.id.clone(), sub_block.value);
            slots.push(SubBlockSlot {
                id: sub_block.id,
                kind: sub_block.kind,
                default_value: sub_block.default_value,
            });
        }

        let block = BlockState {
            id: self.id,
            kind: self.kind,
            name: self.name,
            position: self.position,
            enabled: self.enabled,
            sub_blocks: slots,
        };
        (block, values)
    }
}

pub fn starter_block(id: String) -> BlockState {
    BlockState::new(
        id,
        STARTER_BLOCK_TYPE,
        STARTER_BLOCK_NAME,
        Position::new(STARTER_BLOCK_X, STARTER_BLOCK_Y),
        vec![
            SubBlockSlot::new("startWorkflow", "dropdown").with_default(Value::from("manual")),
            SubBlockSlot::new("webhookPath", "short-input").with_default(Value::from("")),
            SubBlockSlot::new("scheduleType", "dropdown").with_default(Value::from("daily")),
        ],
    )
}
