// src/update.rs
//
// The reducer.  All local mutation happens here, synchronously, while the
// caller holds the state borrow.  Anything touching the cache after the fact
// or the network is returned as a `Command`.
//
use crate::messages::{Command, Message};
use crate::state::AppState;
use crate::storage::PersistenceAdapter;

pub fn update(state: &mut AppState, persistence: &PersistenceAdapter, msg: Message) -> Vec<Command> {
    match msg {
        Message::CreateWorkflow(options) => {
            let (registry, mut linked) = state.linked(persistence);
            registry.create_workflow(&mut linked, options);
            vec![Command::SyncWorkflows]
        }
        Message::SetActiveWorkflow { workflow_id } => {
            let (registry, mut linked) = state.linked(persistence);
            match registry.set_active_workflow(&mut linked, &workflow_id) {
                Ok(()) => vec![Command::SyncWorkflows],
                Err(_) => Vec::new(),
            }
        }
        Message::RemoveWorkflow { workflow_id } => {
            let (registry, mut linked) = state.linked(persistence);
            if registry.remove_workflow(&mut linked, &workflow_id) {
                vec![Command::SyncDeletedWorkflows, Command::SyncWorkflows]
            } else {
                Vec::new()
            }
        }
        Message::UpdateWorkflow { workflow_id, update } => {
            if state.registry.update_workflow(persistence, &workflow_id, update) {
                vec![Command::SyncWorkflows]
            } else {
                Vec::new()
            }
        }

        Message::AddBlock { block } => {
            let changed = state.workflow.add_block(block);
            graph_changed(state, changed)
        }
        Message::RemoveBlock { block_id } => {
            let changed = state.workflow.remove_block(&block_id).is_some();
            graph_changed(state, changed)
        }
        Message::DuplicateBlock { block_id } => {
            let Some(copy) = state.workflow.duplicate_block(&block_id) else {
                return Vec::new();
            };
            if let Some(active_id) = state.registry.active_workflow_id() {
                state.subblocks.copy_block_values(active_id, &block_id, &copy.id);
            }
            graph_changed(state, true)
        }
        Message::UpdateBlockPosition { block_id, position } => {
            let changed = state.workflow.update_block_position(&block_id, position);
            graph_changed(state, changed)
        }
        Message::UpdateBlockName { block_id, name } => {
            let changed = state.workflow.update_block_name(&block_id, &name);
            graph_changed(state, changed)
        }
        Message::ToggleBlockEnabled { block_id } => {
            let changed = state.workflow.toggle_block_enabled(&block_id);
            graph_changed(state, changed)
        }
        Message::AddEdge { edge } => {
            let changed = state.workflow.add_edge(edge);
            graph_changed(state, changed)
        }
        Message::RemoveEdge { edge_id } => {
            let changed = state.workflow.remove_edge(&edge_id);
            graph_changed(state, changed)
        }
        Message::UpdateLoopIterations { loop_id, iterations } => {
            let changed = state.workflow.update_loop_iterations(&loop_id, iterations);
            graph_changed(state, changed)
        }
        Message::SetDeploymentStatus { is_deployed, deployed_at } => {
            state.workflow.set_deployment_status(is_deployed, deployed_at);
            graph_changed(state, true)
        }
        Message::Undo => {
            let changed = state.workflow.undo();
            history_moved(state, changed)
        }
        Message::Redo => {
            let changed = state.workflow.redo();
            history_moved(state, changed)
        }

        Message::SetSubBlockValue {
            block_id,
            sub_block_id,
            value,
        } => {
            let Some(active_id) = state.registry.active_workflow_id().map(str::to_string) else {
                log::warn!("SetSubBlockValue without an active workflow");
                return Vec::new();
            };
            if state.workflow.block(&block_id).is_none() {
                log::warn!("SetSubBlockValue for unknown block {}", block_id);
                return Vec::new();
            }
            state.subblocks.set_value(&active_id, &block_id, &sub_block_id, value);
            remember_values(state, &active_id);
            state.registry.touch(&active_id);
            vec![Command::PersistActiveWorkflow, Command::SyncWorkflows]
        }

        Message::SetEnvironmentVariable { key, value } => {
            let changed = state.environment.set_variable(&key, &value);
            environment_changed(changed)
        }
        Message::RemoveEnvironmentVariable { key } => {
            let changed = state.environment.remove_variable(&key);
            environment_changed(changed)
        }
        Message::SetEnvironmentVariables { variables } => {
            state.environment.set_variables(variables);
            environment_changed(true)
        }

        Message::ResetAllStores => {
            state.reset();
            persistence.clear_workflow_data();
            log::info!("All stores reset");
            vec![Command::ResetSync]
        }
    }
}

/// Keep the subblock values of the active workflow in step with its graph,
/// then persist locally before syncing.
fn graph_changed(state: &mut AppState, changed: bool) -> Vec<Command> {
    if !changed {
        return Vec::new();
    }
    let Some(active_id) = state.registry.active_workflow_id().map(str::to_string) else {
        log::debug!("Graph edited with no active workflow; not persisting");
        return Vec::new();
    };
    state
        .subblocks
        .initialize_from_workflow(&active_id, state.workflow.blocks());
    remember_values(state, &active_id);
    state.registry.touch(&active_id);
    vec![Command::PersistActiveWorkflow, Command::SyncWorkflows]
}

/// After undo or redo, blocks that come back get the values they had at
/// the restored entry.
fn history_moved(state: &mut AppState, changed: bool) -> Vec<Command> {
    if changed {
        if let (Some(active_id), Some(remembered)) = (
            state.registry.active_workflow_id(),
            state.workflow.remembered_values(),
        ) {
            state
                .subblocks
                .restore_missing_blocks(active_id, state.workflow.blocks(), remembered);
        }
    }
    graph_changed(state, changed)
}

fn remember_values(state: &mut AppState, workflow_id: &str) {
    if let Some(values) = state.subblocks.workflow_values(workflow_id) {
        state.workflow.remember_values(values.clone());
    }
}

fn environment_changed(changed: bool) -> Vec<Command> {
    if changed {
        vec![Command::PersistEnvironment, Command::SyncEnvironment]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockState, Edge, Position, SubBlockSlot};
    use crate::storage::MemoryStorage;
    use crate::stores::CreateWorkflowOptions;
    use serde_json::json;
    use std::rc::Rc;

    fn setup() -> (AppState, PersistenceAdapter, String) {
        let mut state = AppState::new();
        let persistence = PersistenceAdapter::new(Rc::new(MemoryStorage::new()));
        update(
            &mut state,
            &persistence,
            Message::CreateWorkflow(CreateWorkflowOptions::default()),
        );
        let id = state.registry.active_workflow_id().unwrap().to_string();
        (state, persistence, id)
    }

    fn slack_block(id: &str) -> BlockState {
        BlockState::new(
            id,
            "slack",
            "Slack",
            Position::new(400.0, 100.0),
            vec![
                SubBlockSlot::new("channel", "short-input"),
                SubBlockSlot::new("text", "long-input").with_default(json!("hi")),
            ],
        )
    }

    #[test]
    fn block_edits_keep_subblock_values_consistent() {
        let (mut state, persistence, id) = setup();

        let cmds = update(&mut state, &persistence, Message::AddBlock { block: slack_block("s1") });
        assert_eq!(cmds, vec![Command::PersistActiveWorkflow, Command::SyncWorkflows]);
        assert_eq!(state.subblocks.block_ids(&id), state.workflow.block_ids());
        assert_eq!(state.subblocks.get_value(&id, "s1", "text"), Some(&json!("hi")));

        update(&mut state, &persistence, Message::DuplicateBlock { block_id: "s1".into() });
        assert_eq!(state.workflow.blocks().len(), 3);
        assert_eq!(state.subblocks.block_ids(&id), state.workflow.block_ids());

        update(&mut state, &persistence, Message::RemoveBlock { block_id: "s1".into() });
        assert_eq!(state.subblocks.block_ids(&id), state.workflow.block_ids());

        update(&mut state, &persistence, Message::Undo);
        assert!(state.workflow.block("s1").is_some());
        assert_eq!(state.subblocks.block_ids(&id), state.workflow.block_ids());
    }

    #[test]
    fn undo_brings_back_the_values_of_a_removed_block() {
        let (mut state, persistence, id) = setup();
        update(&mut state, &persistence, Message::AddBlock { block: slack_block("s1") });
        update(
            &mut state,
            &persistence,
            Message::SetSubBlockValue {
                block_id: "s1".into(),
                sub_block_id: "channel".into(),
                value: json!("#general"),
            },
        );

        update(&mut state, &persistence, Message::RemoveBlock { block_id: "s1".into() });
        assert!(state.subblocks.get_value(&id, "s1", "channel").is_none());

        update(&mut state, &persistence, Message::Undo);
        assert_eq!(state.subblocks.get_value(&id, "s1", "channel"), Some(&json!("#general")));
        assert_eq!(state.subblocks.get_value(&id, "s1", "text"), Some(&json!("hi")));

        // Undo the add, then redo it: the edited value comes back too.
        update(&mut state, &persistence, Message::Undo);
        assert!(state.workflow.block("s1").is_none());
        update(&mut state, &persistence, Message::Redo);
        assert_eq!(state.subblocks.get_value(&id, "s1", "channel"), Some(&json!("#general")));
    }

    #[test]
    fn no_op_edits_produce_no_commands() {
        let (mut state, persistence, _) = setup();
        assert!(update(&mut state, &persistence, Message::RemoveBlock { block_id: "missing".into() }).is_empty());
        assert!(update(&mut state, &persistence, Message::Redo).is_empty());
        assert!(update(
            &mut state,
            &persistence,
            Message::AddEdge {
                edge: Edge::new("e1", "missing", "also-missing")
            }
        )
        .is_empty());
    }

    #[test]
    fn subblock_value_requires_known_block() {
        let (mut state, persistence, id) = setup();
        update(&mut state, &persistence, Message::AddBlock { block: slack_block("s1") });

        let cmds = update(
            &mut state,
            &persistence,
            Message::SetSubBlockValue {
                block_id: "s1".into(),
                sub_block_id: "channel".into(),
                value: json!("#general"),
            },
        );
        assert_eq!(cmds, vec![Command::PersistActiveWorkflow, Command::SyncWorkflows]);
        assert_eq!(state.subblocks.get_value(&id, "s1", "channel"), Some(&json!("#general")));

        let cmds = update(
            &mut state,
            &persistence,
            Message::SetSubBlockValue {
                block_id: "ghost".into(),
                sub_block_id: "channel".into(),
                value: json!("x"),
            },
        );
        assert!(cmds.is_empty());
        assert!(state.subblocks.get_value(&id, "ghost", "channel").is_none());
    }

    #[test]
    fn unknown_switch_target_yields_no_sync() {
        let (mut state, persistence, _) = setup();
        let cmds = update(
            &mut state,
            &persistence,
            Message::SetActiveWorkflow {
                workflow_id: "missing".into(),
            },
        );
        assert!(cmds.is_empty());
        assert!(state.registry.error().is_some());
    }

    #[test]
    fn environment_changes_persist_before_sync() {
        let (mut state, persistence, _) = setup();
        let cmds = update(
            &mut state,
            &persistence,
            Message::SetEnvironmentVariable {
                key: "API_KEY".into(),
                value: "123".into(),
            },
        );
        assert_eq!(cmds, vec![Command::PersistEnvironment, Command::SyncEnvironment]);
        let cmds = update(
            &mut state,
            &persistence,
            Message::SetEnvironmentVariable {
                key: "API_KEY".into(),
                value: "123".into(),
            },
        );
        assert!(cmds.is_empty());
    }

    #[test]
    fn reset_clears_stores_and_cache() {
        let (mut state, persistence, id) = setup();
        let cmds = update(&mut state, &persistence, Message::ResetAllStores);
        assert_eq!(cmds, vec![Command::ResetSync]);
        assert!(state.registry.workflows().is_empty());
        assert!(state.workflow.is_empty());
        assert!(persistence.load_workflow_state(&id).is_none());
        assert!(persistence.load_registry().is_none());
    }
}
