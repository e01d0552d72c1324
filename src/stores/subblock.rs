use std::collections::{BTreeSet, HashMap};

use crate::models::{BlockState, BlockValues, MergedBlock, MergedSubBlock, SubBlockValue};

/// Live field values of every loaded workflow:
/// `workflowId -> blockId -> subBlockId -> value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubBlockStore {
    workflow_values: HashMap<String, BlockValues>,
}

impl SubBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile one workflow's values with its graph.  Slots that already
    /// hold a value keep it, new slots get their static default, and blocks
    /// or slots that left the graph are dropped.
    pub fn initialize_from_workflow(&mut self, workflow_id: &str, blocks: &HashMap<String, BlockState>) {
        let existing = self.workflow_values.remove(workflow_id).unwrap_or_default();
        let mut reconciled = BlockValues::with_capacity(blocks.len());
        for (block_id, block) in blocks {
            let current = existing.get(block_id);
            let values = block
                .sub_blocks
                .iter()
                .map(|slot| {
                    let value = current
                        .and_then(|values| values.get(&slot.id))
                        .cloned()
                        .unwrap_or_else(|| slot.default_or_null());
                    (slot.id.clone(), value)
                })
                .collect();
            reconciled.insert(block_id.clone(), values);
        }
        self.workflow_values.insert(workflow_id.to_string(), reconciled);
    }

    /// Put back the remembered values of blocks that are in the graph again
    /// but no longer in the store.  Blocks still present keep what they have.
    pub fn restore_missing_blocks(
        &mut self,
        workflow_id: &str,
        blocks: &HashMap<String, BlockState>,
        remembered: &BlockValues,
    ) {
        let values = self.workflow_values.entry(workflow_id.to_string()).or_default();
        for block_id in blocks.keys() {
            if values.contains_key(block_id) {
                continue;
            }
            if let Some(saved) = remembered.get(block_id) {
                values.insert(block_id.clone(), saved.clone());
            }
        }
    }

    pub fn get_value(&self, workflow_id: &str, block_id: &str, sub_block_id: &str) -> Option<&SubBlockValue> {
        self.workflow_values.get(workflow_id)?.get(block_id)?.get(sub_block_id)
    }

    pub fn set_value(&mut self, workflow_id: &str, block_id: &str, sub_block_id: &str, value: SubBlockValue) {
        self.workflow_values
            .entry(workflow_id.to_string())
            .or_default()
            .entry(block_id.to_string())
            .or_default()
            .insert(sub_block_id.to_string(), value);
    }

    /// Copy every value of one block onto another block of the same workflow.
    pub fn copy_block_values(&mut self, workflow_id: &str, from_block: &str, to_block: &str) {
        let Some(values) = self.workflow_values.get_mut(workflow_id) else {
            return;
        };
        if let Some(copied) = values.get(from_block).cloned() {
            values.insert(to_block.to_string(), copied);
        }
    }

    pub fn set_workflow_values(&mut self, workflow_id: &str, values: BlockValues) {
        self.workflow_values.insert(workflow_id.to_string(), values);
    }

    pub fn workflow_values(&self, workflow_id: &str) -> Option<&BlockValues> {
        self.workflow_values.get(workflow_id)
    }

    pub fn block_ids(&self, workflow_id: &str) -> BTreeSet<String> {
        self.workflow_values
            .get(workflow_id)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_workflow(&mut self, workflow_id: &str) -> Option<BlockValues> {
        self.workflow_values.remove(workflow_id)
    }

    pub fn clear(&mut self) {
        self.workflow_values.clear();
    }
}

/// Fold live values into block declarations for the wire.  For every
/// declared slot the stored value wins, otherwise the static default.
pub fn merge_subblock_state(
    blocks: &HashMap<String, BlockState>,
    values: Option<&BlockValues>,
) -> HashMap<String, MergedBlock> {
    blocks
        .iter()
        .map(|(block_id, block)| {
            let block_values = values.and_then(|v| v.get(block_id));
            let sub_blocks = block
                .sub_blocks
                .iter()
                .map(|slot| {
                    let value = block_values
                        .and_then(|v| v.get(&slot.id))
                        .cloned()
                        .unwrap_or_else(|| slot.default_or_null());
                    let merged = MergedSubBlock {
                        id: slot.id.clone(),
                        kind: slot.kind.clone(),
                        value,
                        default_value: slot.default_value.clone(),
                    };
                    (slot.id.clone(), merged)
                })
                .collect();
            let merged = MergedBlock {
                id: block.id.clone(),
                kind: block.kind.clone(),
                name: block.name.clone(),
                position: block.position,
                enabled: block.enabled,
                sub_blocks,
            };
            (block_id.clone(), merged)
        })
        .collect()
}
