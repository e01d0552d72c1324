use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::constants::{
    DEFAULT_LOOP_ITERATIONS, MAX_HISTORY_LENGTH, MAX_LOOP_ITERATIONS, MIN_LOOP_ITERATIONS,
};
use crate::models::{BlockState, BlockValues, Edge, HistoryEntry, LoopConfig, Position, WorkflowGraphState};

/// Offset applied to a duplicated block so it does not sit on its source.
const DUPLICATE_OFFSET: f64 = 20.0;

/// The graph of the active workflow, and nothing else.
///
/// Every structural edit pushes an undo entry.  Position changes do not;
/// dragging a block would otherwise flood the history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowStore {
    state: WorkflowGraphState,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WorkflowGraphState {
        &self.state
    }

    pub fn blocks(&self) -> &HashMap<String, BlockState> {
        &self.state.blocks
    }

    pub fn block(&self, block_id: &str) -> Option<&BlockState> {
        self.state.blocks.get(block_id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.state.edges
    }

    pub fn loops(&self) -> &HashMap<String, LoopConfig> {
        &self.state.loops
    }

    pub fn block_ids(&self) -> BTreeSet<String> {
        self.state.block_ids()
    }

    pub fn is_empty(&self) -> bool {
        self.state.blocks.is_empty()
    }

    /// Reset to an empty graph with fresh history.
    pub fn clear(&mut self) {
        self.state = WorkflowGraphState::empty();
    }

    /// Replace the whole graph, e.g. after a workflow switch.
    pub fn hydrate(&mut self, state: WorkflowGraphState) {
        self.state = state;
    }

    fn record(&mut self, action: impl Into<String>) {
        let entry = HistoryEntry::new(self.state.snapshot(), action);
        let history = &mut self.state.history;
        let previous = std::mem::replace(&mut history.present, entry);
        history.past.push(previous);
        if history.past.len() > MAX_HISTORY_LENGTH {
            let overflow = history.past.len() - MAX_HISTORY_LENGTH;
            history.past.drain(..overflow);
        }
        history.future.clear();
    }

    pub fn add_block(&mut self, block: BlockState) -> bool {
        if self.state.blocks.contains_key(&block.id) {
            log::warn!("Block {} already exists", block.id);
            return false;
        }
        let action = format!("Add {} block", block.kind);
        self.state.blocks.insert(block.id.clone(), block);
        self.record(action);
        true
    }

    /// Remove a block together with its edges and loop membership.
    pub fn remove_block(&mut self, block_id: &str) -> Option<BlockState> {
        let removed = self.state.blocks.remove(block_id)?;
        self.state.edges.retain(|edge| !edge.touches(block_id));
        self.detect_loops();
        self.record(format!("Remove {}", removed.name));
        Some(removed)
    }

    /// Copy a block (not its edges) under a fresh id.
    pub fn duplicate_block(&mut self, block_id: &str) -> Option<BlockState> {
        let source = self.state.blocks.get(block_id)?;
        let action = format!("Duplicate {}", source.name);
        let mut copy = source.clone();
        copy.id = uuid::Uuid::new_v4().to_string();
        copy.name = format!("{} (copy)", source.name);
        copy.position = Position::new(
            source.position.x + DUPLICATE_OFFSET,
            source.position.y + DUPLICATE_OFFSET,
        );
        self.state.blocks.insert(copy.id.clone(), copy.clone());
        self.record(action);
        Some(copy)
    }

    pub fn update_block_position(&mut self, block_id: &str, position: Position) -> bool {
        match self.state.blocks.get_mut(block_id) {
            Some(block) => {
                block.position = position;
                true
            }
            None => false,
        }
    }

    pub fn update_block_name(&mut self, block_id: &str, name: &str) -> bool {
        let Some(block) = self.state.blocks.get_mut(block_id) else {
            return false;
        };
        if block.name == name {
            return false;
        }
        block.name = name.to_string();
        self.record(format!("Rename block to {}", name));
        true
    }

    pub fn toggle_block_enabled(&mut self, block_id: &str) -> bool {
        let Some(block) = self.state.blocks.get_mut(block_id) else {
            return false;
        };
        block.enabled = !block.enabled;
        let action = if block.enabled { "Enable block" } else { "Disable block" };
        self.record(action);
        true
    }

    /// Both endpoints must exist; an edge joining the same handles as an
    /// existing one is ignored.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if !self.state.blocks.contains_key(&edge.source) || !self.state.blocks.contains_key(&edge.target) {
            log::warn!("Edge {} references an unknown block", edge.id);
            return false;
        }
        if self
            .state
            .edges
            .iter()
            .any(|existing| existing.id == edge.id || existing.same_connection(&edge))
        {
            return false;
        }
        self.state.edges.push(edge);
        self.detect_loops();
        self.record("Add edge");
        true
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> bool {
        let before = self.state.edges.len();
        self.state.edges.retain(|edge| edge.id != edge_id);
        if self.state.edges.len() == before {
            return false;
        }
        self.detect_loops();
        self.record("Remove edge");
        true
    }

    /// Clamped to the supported range.  Returns false for an unknown loop.
    pub fn update_loop_iterations(&mut self, loop_id: &str, iterations: u32) -> bool {
        let Some(config) = self.state.loops.get_mut(loop_id) else {
            return false;
        };
        config.iterations = iterations.clamp(MIN_LOOP_ITERATIONS, MAX_LOOP_ITERATIONS);
        self.record("Update loop iterations");
        true
    }

    pub fn set_deployment_status(&mut self, is_deployed: bool, deployed_at: Option<DateTime<Utc>>) {
        self.state.is_deployed = is_deployed;
        self.state.deployed_at = if is_deployed {
            deployed_at.or_else(|| Some(Utc::now()))
        } else {
            None
        };
    }

    pub fn can_undo(&self) -> bool {
        !self.state.history.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.history.future.is_empty()
    }

    /// Attach the live subblock values to the current history entry.
    pub fn remember_values(&mut self, values: BlockValues) {
        self.state.history.present.values = Some(values);
    }

    pub fn remembered_values(&self) -> Option<&BlockValues> {
        self.state.history.present.values.as_ref()
    }

    pub fn undo(&mut self) -> bool {
        let history = &mut self.state.history;
        let Some(previous) = history.past.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut history.present, previous);
        history.future.insert(0, current);
        let snapshot = history.present.state.clone();
        self.state.restore(snapshot);
        true
    }

    pub fn redo(&mut self) -> bool {
        let history = &mut self.state.history;
        if history.future.is_empty() {
            return false;
        }
        let next = history.future.remove(0);
        let current = std::mem::replace(&mut history.present, next);
        history.past.push(current);
        let snapshot = history.present.state.clone();
        self.state.restore(snapshot);
        true
    }

    /// Rebuild `loops` from the edges: every strongly connected component
    /// with a cycle is a loop.  Iteration counts of loops that keep their id
    /// survive.
    fn detect_loops(&mut self) {
        let previous = std::mem::take(&mut self.state.loops);
        for mut nodes in cycles(&self.state.edges) {
            nodes.sort();
            let id = format!("loop-{}", nodes[0]);
            let iterations = previous
                .get(&id)
                .map(|l| l.iterations)
                .unwrap_or(DEFAULT_LOOP_ITERATIONS);
            self.state.loops.insert(id.clone(), LoopConfig { id, nodes, iterations });
        }
    }
}

/// Strongly connected components of the edge graph, keeping only those
/// that contain a cycle (more than one node, or a self edge).
fn cycles(edges: &[Edge]) -> Vec<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for edge in edges {
        graph.add_edge(edge.source.as_str(), edge.target.as_str(), ());
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|c| c.len() > 1 || graph.contains_edge(c[0], c[0]))
        .map(|c| c.into_iter().map(str::to_string).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubBlockSlot;

    fn block(id: &str) -> BlockState {
        BlockState::new(
            id,
            "agent",
            format!("Agent {}", id),
            Position::new(0.0, 0.0),
            vec![SubBlockSlot::new("prompt", "long-input")],
        )
    }

    fn store_with(ids: &[&str]) -> WorkflowStore {
        let mut store = WorkflowStore::new();
        for id in ids {
            store.add_block(block(id));
        }
        store
    }

    #[test]
    fn removing_a_block_drops_its_edges() {
        let mut store = store_with(&["a", "b", "c"]);
        store.add_edge(Edge::new("e1", "a", "b"));
        store.add_edge(Edge::new("e2", "b", "c"));

        let removed = store.remove_block("b").unwrap();
        assert_eq!(removed.id, "b");
        assert!(store.edges().is_empty());
        assert!(store.remove_block("b").is_none());
    }

    #[test]
    fn duplicate_edges_and_dangling_edges_are_rejected() {
        let mut store = store_with(&["a", "b"]);
        assert!(store.add_edge(Edge::new("e1", "a", "b")));
        assert!(!store.add_edge(Edge::new("e2", "a", "b")));
        assert!(!store.add_edge(Edge::new("e3", "a", "missing")));
        assert_eq!(store.edges().len(), 1);
    }

    #[test]
    fn cycles_become_loops_with_clamped_iterations() {
        let mut store = store_with(&["a", "b", "c"]);
        store.add_edge(Edge::new("e1", "a", "b"));
        store.add_edge(Edge::new("e2", "b", "c"));
        assert!(store.loops().is_empty());

        store.add_edge(Edge::new("e3", "c", "a"));
        let config = &store.loops()["loop-a"];
        assert_eq!(config.nodes, vec!["a", "b", "c"]);
        assert_eq!(config.iterations, DEFAULT_LOOP_ITERATIONS);

        assert!(store.update_loop_iterations("loop-a", 500));
        assert_eq!(store.loops()["loop-a"].iterations, MAX_LOOP_ITERATIONS);
        assert!(store.update_loop_iterations("loop-a", 0));
        assert_eq!(store.loops()["loop-a"].iterations, MIN_LOOP_ITERATIONS);

        store.remove_edge("e2");
        assert!(store.loops().is_empty());
        assert!(!store.update_loop_iterations("loop-a", 3));
    }

    #[test]
    fn self_edges_and_long_rings_are_cycles() {
        let ids: Vec<String> = (0..20_000).map(|n| format!("n{:05}", n)).collect();
        let mut edges: Vec<Edge> = ids
            .iter()
            .zip(ids.iter().cycle().skip(1))
            .enumerate()
            .map(|(n, (from, to))| Edge::new(format!("e{}", n), from.as_str(), to.as_str()))
            .collect();
        edges.push(Edge::new("self", "solo", "solo"));
        edges.push(Edge::new("tail", "solo", "leaf"));

        let mut found = cycles(&edges);
        found.iter_mut().for_each(|c| c.sort());
        found.sort_by_key(|c| c.len());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], vec!["solo".to_string()]);
        assert_eq!(found[1], ids);
    }

    #[test]
    fn undo_and_redo_walk_the_history() {
        let mut store = store_with(&["a"]);
        store.add_block(block("b"));
        assert_eq!(store.blocks().len(), 2);

        assert!(store.undo());
        assert_eq!(store.block_ids(), BTreeSet::from(["a".to_string()]));
        assert!(store.redo());
        assert_eq!(store.blocks().len(), 2);
        assert!(!store.redo());

        store.undo();
        store.add_block(block("c"));
        assert!(!store.can_redo());
    }

    #[test]
    fn history_is_bounded() {
        let mut store = WorkflowStore::new();
        for i in 0..(MAX_HISTORY_LENGTH + 10) {
            store.add_block(block(&format!("b{}", i)));
        }
        assert_eq!(store.state().history.past.len(), MAX_HISTORY_LENGTH);

        let mut undone = 0;
        while store.undo() {
            undone += 1;
        }
        assert_eq!(undone, MAX_HISTORY_LENGTH);
        assert_eq!(store.blocks().len(), 10);
    }

    #[test]
    fn duplicate_gets_fresh_id_and_offset() {
        let mut store = store_with(&["a"]);
        let copy = store.duplicate_block("a").unwrap();
        assert_ne!(copy.id, "a");
        assert_eq!(copy.name, "Agent a (copy)");
        assert_eq!(copy.position, Position::new(DUPLICATE_OFFSET, DUPLICATE_OFFSET));
        assert_eq!(copy.sub_blocks, store.block("a").unwrap().sub_blocks);
        assert!(store.duplicate_block("missing").is_none());
    }

    #[test]
    fn deployment_stamps_time_and_clear_resets() {
        let mut store = store_with(&["a"]);
        store.set_deployment_status(true, None);
        assert!(store.state().is_deployed);
        assert!(store.state().deployed_at.is_some());
        store.set_deployment_status(false, None);
        assert!(store.state().deployed_at.is_none());

        store.clear();
        assert!(store.is_empty());
        assert!(!store.can_undo());
    }
}
