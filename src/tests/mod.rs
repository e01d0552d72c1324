//! End-to-end scenarios on in-memory storage, a recording transport and a
//! virtual clock.


use serde_json::{json, Value};

use crate::messages::Message;
use crate::state::AppContext;
use crate::stores::CreateWorkflowOptions;

pub(crate) fn create_workflow(ctx: &AppContext) -> String {
    let before: Vec<String> = ctx.state().registry.workflows().keys().cloned().collect();
    ctx.dispatch(Message::CreateWorkflow(CreateWorkflowOptions::default()));
    let state = ctx.state();
    let created = state
        .registry
        .workflows()
        .keys()
        .find(|id| !before.contains(id))
        .cloned();
    created.expect("workflow was created")
}

pub(crate) fn active_id(ctx: &AppContext) -> String {
    ctx.state()
        .registry
        .active_workflow_id()
        .map(str::to_string)
        .expect("a workflow is active")
}

pub(crate) fn starter_block_id(ctx: &AppContext) -> String {
    let state = ctx.state();
    let id = state
        .workflow
        .blocks()
        .values()
        .find(|b| b.kind == crate::constants::STARTER_BLOCK_TYPE)
        .map(|b| b.id.clone());
    id.expect("starter block present")
}

pub(crate) fn server_workflow(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "description": "From the server",
        "color": "#F639DD",
        "lastModified": "2024-03-01T10:00:00Z",
        "state": {
            "blocks": {
                "trigger": {
                    "id": "trigger",
                    "type": "starter",
                    "name": "Start",
                    "position": { "x": 100.0, "y": 100.0 },
                    "subBlocks": {
                        "startWorkflow": { "id": "startWorkflow", "type": "dropdown", "value": "webhook" }
                    }
                }
            },
            "edges": [],
            "loops": {},
            "isDeployed": false
        }
    })
}
