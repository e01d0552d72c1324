use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

pub mod bindings;
pub mod bootstrap;
pub mod command_executors;
pub mod constants; // Keys, palette and sync timing
pub mod logging;
pub mod messages;
pub mod models;
pub mod network;
pub mod scheduling;
pub mod state;
pub mod storage;
pub mod stores;
pub mod sync;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

// Main entry point for the WASM application
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    // Initialize better panic messages
    console_error_panic_hook::set_once();
    logging::init(logging::default_level());

    let ctx = state::AppContext::create(state::PlatformServices::browser());
    state::install_context(ctx.clone());

    // Flush to the local cache (then the server) when the tab closes
    bootstrap::register_before_unload(ctx.clone())?;

    spawn_local(async move {
        if bootstrap::initialize_application(ctx).await.is_none() {
            log::warn!("Application bootstrap did not run");
        }
    });

    Ok(())
}
