//! JS-facing API for the view layer.  Messages come in as plain objects
//! (`{ type: "SetSubBlockValue", blockId, subBlockId, value }`), state goes
//! out as JSON-compatible objects.

use std::collections::HashMap;

use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::constants::WORKFLOW_SYNC_NAME;
use crate::messages::Message;
use crate::models::WorkflowMetadata;
use crate::state::with_context;

fn no_context() -> JsValue {
    JsValue::from_str("application context is not initialized")
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistryView<'a> {
    workflows: &'a HashMap<String, WorkflowMetadata>,
    active_workflow_id: Option<&'a str>,
    is_loading: bool,
    error: Option<String>,
}

#[wasm_bindgen]
pub fn dispatch_message(message: JsValue) -> Result<(), JsValue> {
    let msg: Message =
        serde_wasm_bindgen::from_value(message).map_err(|e| JsValue::from_str(&format!("Invalid message: {}", e)))?;
    with_context(|ctx| ctx.dispatch(msg)).ok_or_else(no_context)
}

#[wasm_bindgen]
pub fn get_registry() -> Result<JsValue, JsValue> {
    with_context(|ctx| {
        let state = ctx.try_state().ok_or_else(|| JsValue::from_str("state is busy"))?;
        let view = RegistryView {
            workflows: state.registry.workflows(),
            active_workflow_id: state.registry.active_workflow_id(),
            is_loading: state.registry.is_loading(),
            error: state.registry.error().map(|e| e.to_string()),
        };
        to_js(&view)
    })
    .ok_or_else(no_context)?
}

#[wasm_bindgen]
pub fn get_active_workflow() -> Result<JsValue, JsValue> {
    with_context(|ctx| {
        let state = ctx.try_state().ok_or_else(|| JsValue::from_str("state is busy"))?;
        to_js(state.workflow.state())
    })
    .ok_or_else(no_context)?
}

/// `undefined` when the active workflow has no such field.
#[wasm_bindgen]
pub fn get_subblock_value(block_id: &str, sub_block_id: &str) -> Result<JsValue, JsValue> {
    with_context(|ctx| {
        let state = ctx.try_state().ok_or_else(|| JsValue::from_str("state is busy"))?;
        let value = state
            .registry
            .active_workflow_id()
            .and_then(|id| state.subblocks.get_value(id, block_id, sub_block_id));
        match value {
            Some(value) => to_js(value),
            None => Ok(JsValue::UNDEFINED),
        }
    })
    .ok_or_else(no_context)?
}

#[wasm_bindgen]
pub fn get_environment_variables() -> Result<JsValue, JsValue> {
    with_context(|ctx| {
        let state = ctx.try_state().ok_or_else(|| JsValue::from_str("state is busy"))?;
        to_js(state.environment.variables())
    })
    .ok_or_else(no_context)?
}

/// Sync workflows immediately; resolves to `true` on success.
#[wasm_bindgen]
pub fn sync_workflows_now() -> js_sys::Promise {
    let manager = with_context(|ctx| ctx.sync().get(WORKFLOW_SYNC_NAME)).flatten();
    future_to_promise(async move {
        match manager {
            Some(manager) => Ok(JsValue::from_bool(manager.sync().await)),
            None => Err(no_context()),
        }
    })
}

#[wasm_bindgen]
pub fn reset_all_stores() -> Result<(), JsValue> {
    with_context(|ctx| ctx.reset()).ok_or_else(no_context)
}
