use futures::FutureExt;

use crate::constants::{ENVIRONMENT_SYNC_NAME, WORKFLOW_SYNC_NAME};
use crate::messages::Command;
use crate::state::AppContext;

pub fn execute_command(ctx: &AppContext, cmd: Command) {
    match cmd {
        Command::PersistActiveWorkflow => match ctx.try_state_mut() {
            Some(mut state) => state.persist_active_workflow(ctx.persistence()),
            None => log::error!("Failed to persist active workflow: state is borrowed"),
        },
        Command::PersistRegistry => match ctx.try_state() {
            Some(state) => {
                ctx.persistence().save_registry(state.registry.workflows());
            }
            None => log::error!("Failed to persist registry: state is borrowed"),
        },
        Command::PersistEnvironment => match ctx.try_state() {
            Some(state) => {
                ctx.persistence().save_environment(state.environment.variables());
            }
            None => log::error!("Failed to persist environment: state is borrowed"),
        },
        Command::SyncWorkflows => schedule_sync(ctx, WORKFLOW_SYNC_NAME),
        Command::SyncEnvironment => schedule_sync(ctx, ENVIRONMENT_SYNC_NAME),
        Command::SyncDeletedWorkflows => sync_deleted_workflows(ctx),
        Command::ResetSync => ctx.sync().dispose_all(),
    }
}

fn schedule_sync(ctx: &AppContext, name: &str) {
    match ctx.sync().get(name) {
        Some(manager) => {
            let pending = manager.debounced_sync();
            ctx.spawner().spawn(pending.map(|_| ()).boxed_local());
        }
        None => log::warn!("No sync manager named {}", name),
    }
}

/// One `DELETE` per tombstone.  Failures stay queued for the next call.
fn sync_deleted_workflows(ctx: &AppContext) {
    let state = ctx.state_handle();
    let ids = match state.try_borrow_mut() {
        Ok(mut state) => state.registry.begin_deletion_sync(),
        Err(_) => {
            log::error!("Failed to start deletion sync: state is borrowed");
            return;
        }
    };

    for id in ids {
        let api = ctx.api().clone();
        let persistence = ctx.persistence().clone();
        let state = state.clone();
        ctx.spawner().spawn(
            async move {
                let deleted = match api.delete_workflow(&id).await {
                    Ok(()) => {
                        log::info!("Deleted workflow {} on the server", id);
                        true
                    }
                    Err(e) => {
                        log::warn!("Failed to delete workflow {} on the server: {}", id, e);
                        false
                    }
                };
                match state.try_borrow_mut() {
                    Ok(mut state) => state.registry.finish_deletion_sync(&persistence, &id, deleted),
                    Err(_) => log::error!("Failed to record deletion of {}: state is borrowed", id),
                }
            }
            .boxed_local(),
        );
    }
}
