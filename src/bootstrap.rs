//! Application startup and the before-unload flush.
//!
//! Startup order: build the sync managers, hydrate workflows (server, then
//! local cache, then a fresh initial workflow), hydrate environment variables
//! (server, then cache), and finally push anything the server is missing.
//! The page-unload handler writes every store to the cache before the last
//! network flush, so a lost request never loses an edit.

use std::collections::HashMap;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::command_executors::execute_command;
use crate::constants::UNSAVED_CHANGES_PROMPT;
use crate::messages::Command;
use crate::network::WorkflowRecord;
use crate::state::{AppContext, AppState};
use crate::storage::PersistenceAdapter;
use crate::stores::CreateWorkflowOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    Initializing,
    Done,
}

/// Where the workflows of this session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationSource {
    Server,
    LocalCache,
    Fresh,
}

/// Runs once per context; later calls return `None` immediately.
pub async fn initialize_application(ctx: Rc<AppContext>) -> Option<HydrationSource> {
    if ctx.bootstrap_phase() != BootstrapPhase::NotStarted {
        log::debug!("Application already {:?}", ctx.bootstrap_phase());
        return None;
    }
    ctx.set_bootstrap_phase(BootstrapPhase::Initializing);
    ctx.sync().initialize_sync_managers();

    match ctx.try_state_mut() {
        Some(mut state) => {
            state.registry.set_loading(true);
            let tombstones = ctx.persistence().load_deleted_workflow_ids();
            state.registry.restore_tombstones(tombstones);
        }
        None => {
            log::error!("Cannot initialize: state is borrowed");
            ctx.set_bootstrap_phase(BootstrapPhase::NotStarted);
            return None;
        }
    }

    let remote_workflows = match ctx.api().fetch_workflows().await {
        Ok(records) => records,
        Err(e) => {
            log::warn!("Could not load workflows from server, using local cache: {}", e);
            Vec::new()
        }
    };
    let remote_environment = match ctx.api().fetch_environment().await {
        Ok(variables) => variables,
        Err(e) => {
            log::warn!("Could not load environment from server, using local cache: {}", e);
            Default::default()
        }
    };

    let (source, push_environment, has_tombstones) = {
        let Some(mut state) = ctx.try_state_mut() else {
            log::error!("Cannot finish initialization: state is borrowed");
            ctx.set_bootstrap_phase(BootstrapPhase::NotStarted);
            return None;
        };
        let persistence = ctx.persistence();

        let source = hydrate_workflows(&mut state, persistence, remote_workflows);
        state.registry.set_loading(false);

        let push_environment = if !remote_environment.is_empty() {
            state.environment.set_variables(remote_environment);
            persistence.save_environment(state.environment.variables());
            false
        } else if let Some(cached) = persistence.load_environment() {
            state.environment.set_variables(cached);
            !state.environment.is_empty()
        } else {
            false
        };

        (source, push_environment, !state.registry.tombstones().is_empty())
    };

    log::info!("Workflows hydrated from {:?}", source);
    if source == HydrationSource::Server {
        execute_command(&ctx, Command::PersistRegistry);
    } else {
        execute_command(&ctx, Command::SyncWorkflows);
    }
    if push_environment {
        execute_command(&ctx, Command::SyncEnvironment);
    }
    if has_tombstones {
        execute_command(&ctx, Command::SyncDeletedWorkflows);
    }

    ctx.set_bootstrap_phase(BootstrapPhase::Done);
    Some(source)
}

/// Non-empty server state wins and is mirrored into the cache; otherwise
/// the cached registry is used; otherwise an initial workflow is created.
/// Workflows deleted locally but not yet on the server are skipped.
fn hydrate_workflows(
    state: &mut AppState,
    persistence: &PersistenceAdapter,
    records: Vec<WorkflowRecord>,
) -> HydrationSource {
    let records: Vec<WorkflowRecord> = records
        .into_iter()
        .filter(|record| !state.registry.is_tombstoned(&record.id))
        .collect();

    let source = if !records.is_empty() {
        let mut workflows = HashMap::with_capacity(records.len());
        for record in records {
            let metadata = record.metadata();
            let (graph, values) = record.state.into_graph();
            persistence.save_workflow_state(&metadata.id, &graph);
            persistence.save_subblock_values(&metadata.id, &values);
            state.subblocks.set_workflow_values(&metadata.id, values);
            workflows.insert(metadata.id.clone(), metadata);
        }
        state.registry.hydrate(workflows);
        HydrationSource::Server
    } else {
        let cached: HashMap<_, _> = persistence
            .load_registry()
            .unwrap_or_default()
            .into_iter()
            .filter(|(id, _)| !state.registry.is_tombstoned(id))
            .collect();
        if cached.is_empty() {
            let (registry, mut linked) = state.linked(persistence);
            registry.create_workflow(
                &mut linked,
                CreateWorkflowOptions {
                    is_initial: true,
                    ..Default::default()
                },
            );
            return HydrationSource::Fresh;
        }
        state.registry.hydrate(cached);
        HydrationSource::LocalCache
    };

    let target = persistence
        .load_active_workflow_id()
        .filter(|id| state.registry.workflow(id).is_some())
        .or_else(|| state.registry.most_recent_workflow_id());
    if let Some(target) = target {
        let (registry, mut linked) = state.linked(persistence);
        if let Err(e) = registry.set_active_workflow(&mut linked, &target) {
            log::warn!("Could not restore active workflow: {}", e);
        }
    }
    source
}

/// Persist every store, then send the final keep-alive syncs.  The flushed
/// managers are replaced with fresh ones, so a cancelled unload keeps its
/// background interval sync.
pub fn handle_before_unload(ctx: &AppContext) {
    match ctx.try_state_mut() {
        Some(mut state) => state.persist_all(ctx.persistence()),
        None => log::error!("Could not persist state before unload: state is borrowed"),
    }
    let flushed = ctx.sync().flush_on_exit();
    ctx.sync().dispose_all();
    ctx.sync().initialize_sync_managers();
    log::debug!("Flushed {} sync manager(s) before unload", flushed);
}

/// Hook `handle_before_unload` to the window and ask the browser to show
/// its leave-page prompt.
pub fn register_before_unload(ctx: Rc<AppContext>) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window exists"))?;
    let closure = Closure::wrap(Box::new(move |event: web_sys::BeforeUnloadEvent| {
        handle_before_unload(&ctx);
        event.prevent_default();
        event.set_return_value(UNSAVED_CHANGES_PROMPT);
    }) as Box<dyn FnMut(_)>);
    window.add_event_listener_with_callback("beforeunload", closure.as_ref().unchecked_ref())?;
    closure.forget();
    Ok(())
}
