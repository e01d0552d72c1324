use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use crate::bootstrap::BootstrapPhase;
use crate::command_executors::execute_command;
use crate::messages::Message;
use crate::network::{ApiClient, ApiConfig, FetchTransport, HttpTransport};
use crate::scheduling::{BrowserSpawner, BrowserTimers, TaskSpawner, TimerService};
use crate::storage::{browser_backend, KeyValueStore, PersistenceAdapter};
use crate::stores::{EnvironmentStore, LinkedStores, RegistryStore, SubBlockStore, WorkflowStore};
use crate::sync::environment::environment_sync_config;
use crate::sync::workflows::workflow_sync_config;
use crate::sync::{SyncManager, SyncRegistry, SyncSettings};
use crate::update::update;

/// Every store of one application context.
#[derive(Debug, Default)]
pub struct AppState {
    pub registry: RegistryStore,
    pub workflow: WorkflowStore,
    pub subblocks: SubBlockStore,
    pub environment: EnvironmentStore,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split into the registry and the stores its transitions drive.
    pub fn linked<'a>(&'a mut self, persistence: &'a PersistenceAdapter) -> (&'a mut RegistryStore, LinkedStores<'a>) {
        (
            &mut self.registry,
            LinkedStores {
                workflow: &mut self.workflow,
                subblocks: &mut self.subblocks,
                persistence,
            },
        )
    }

    /// Write the active workflow and the registry to the cache.
    pub fn persist_active_workflow(&mut self, persistence: &PersistenceAdapter) {
        let (registry, linked) = self.linked(persistence);
        registry.flush_active(&linked);
        persistence.save_registry(registry.workflows());
    }

    /// Everything the next session needs to recover without the server.
    pub fn persist_all(&mut self, persistence: &PersistenceAdapter) {
        self.persist_active_workflow(persistence);
        persistence.save_active_workflow_id(self.registry.active_workflow_id());
        persistence.save_deleted_workflow_ids(&self.registry.tombstones());
        persistence.save_environment(self.environment.variables());
    }

    pub fn reset(&mut self) {
        self.registry.reset();
        self.workflow.clear();
        self.subblocks.clear();
        self.environment.clear();
    }
}

/// The platform an application context runs on.
pub struct PlatformServices {
    pub storage: Rc<dyn KeyValueStore>,
    pub transport: Rc<dyn HttpTransport>,
    pub timers: Rc<dyn TimerService>,
    pub spawner: Rc<dyn TaskSpawner>,
    pub api_config: ApiConfig,
    pub settings: SyncSettings,
}

impl PlatformServices {
    pub fn browser() -> Self {
        Self {
            storage: browser_backend(),
            transport: Rc::new(FetchTransport),
            timers: Rc::new(BrowserTimers::new()),
            spawner: Rc::new(BrowserSpawner),
            api_config: ApiConfig::resolve(),
            settings: SyncSettings::default(),
        }
    }
}

/// Stores, cache, API client and sync managers of one session.
pub struct AppContext {
    state: Rc<RefCell<AppState>>,
    persistence: PersistenceAdapter,
    api: ApiClient,
    sync: SyncRegistry,
    spawner: Rc<dyn TaskSpawner>,
    phase: Cell<BootstrapPhase>,
}

impl AppContext {
    /// Build a context.  No request is made and no manager is built until
    /// bootstrap or the first sync.
    pub fn create(services: PlatformServices) -> Rc<Self> {
        let PlatformServices {
            storage,
            transport,
            timers,
            spawner,
            api_config,
            settings,
        } = services;

        let state = Rc::new(RefCell::new(AppState::new()));
        let persistence = PersistenceAdapter::new(storage);
        let api = ApiClient::new(api_config.clone(), transport.clone());

        let sync = {
            let state = Rc::downgrade(&state);
            let persistence = persistence.clone();
            let spawner = spawner.clone();
            SyncRegistry::new(move || {
                vec![
                    SyncManager::new(
                        workflow_sync_config(state.clone(), persistence.clone(), &api_config, &settings),
                        transport.clone(),
                        timers.clone(),
                        spawner.clone(),
                    ),
                    SyncManager::new(
                        environment_sync_config(state.clone(), &api_config, &settings),
                        transport.clone(),
                        timers.clone(),
                        spawner.clone(),
                    ),
                ]
            })
        };

        Rc::new(Self {
            state,
            persistence,
            api,
            sync,
            spawner,
            phase: Cell::new(BootstrapPhase::NotStarted),
        })
    }

    pub fn state(&self) -> std::cell::Ref<'_, AppState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, AppState> {
        self.state.borrow_mut()
    }

    pub fn try_state(&self) -> Option<std::cell::Ref<'_, AppState>> {
        self.state.try_borrow().ok()
    }

    pub fn try_state_mut(&self) -> Option<RefMut<'_, AppState>> {
        self.state.try_borrow_mut().ok()
    }

    pub fn state_handle(&self) -> Rc<RefCell<AppState>> {
        self.state.clone()
    }

    pub fn persistence(&self) -> &PersistenceAdapter {
        &self.persistence
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn sync(&self) -> &SyncRegistry {
        &self.sync
    }

    pub fn spawner(&self) -> Rc<dyn TaskSpawner> {
        self.spawner.clone()
    }

    pub fn bootstrap_phase(&self) -> BootstrapPhase {
        self.phase.get()
    }

    pub(crate) fn set_bootstrap_phase(&self, phase: BootstrapPhase) {
        self.phase.set(phase);
    }

    /// Apply a message, then run its commands with the state released.
    pub fn dispatch(&self, msg: Message) {
        let commands = match self.state.try_borrow_mut() {
            Ok(mut state) => update(&mut state, &self.persistence, msg),
            Err(_) => {
                log::error!("Dropped {:?}: state is already borrowed", msg);
                return;
            }
        };
        for cmd in commands {
            execute_command(self, cmd);
        }
    }

    /// Logout / account switch: empty every store and purge the cache.
    pub fn reset(&self) {
        self.dispatch(Message::ResetAllStores);
    }

    /// Stop all sync timers.  Safe to call more than once.
    pub fn dispose(&self) {
        self.sync.dispose_all();
    }
}

thread_local! {
    static APP_CONTEXT: RefCell<Option<Rc<AppContext>>> = RefCell::new(None);
}

/// Make `ctx` the context the JS bindings talk to.
pub fn install_context(ctx: Rc<AppContext>) {
    APP_CONTEXT.with(|slot| *slot.borrow_mut() = Some(ctx));
}

pub fn with_context<R>(f: impl FnOnce(&Rc<AppContext>) -> R) -> Option<R> {
    let ctx = APP_CONTEXT.with(|slot| slot.borrow().clone())?;
    Some(f(&ctx))
}
