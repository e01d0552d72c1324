use std::cell::{Cell, RefCell};
use std::fmt;

use super::manager::SyncManager;

type ManagerFactory = Box<dyn Fn() -> Vec<SyncManager>>;

/// Owns every `SyncManager` of an application context so that bootstrap and
/// teardown never need to know them by name.
pub struct SyncRegistry {
    factory: ManagerFactory,
    managers: RefCell<Vec<SyncManager>>,
    initialized: Cell<bool>,
}

impl SyncRegistry {
    pub fn new(factory: impl Fn() -> Vec<SyncManager> + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            managers: RefCell::new(Vec::new()),
            initialized: Cell::new(false),
        }
    }

    /// Build the managers once; later calls are no-ops until `dispose_all`.
    pub fn initialize_sync_managers(&self) {
        if self.initialized.replace(true) {
            return;
        }
        let managers = (self.factory)();
        log::info!(
            "Initialized {} sync manager(s): {}",
            managers.len(),
            managers.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
        );
        *self.managers.borrow_mut() = managers;
    }

    pub fn get_sync_managers(&self) -> Vec<SyncManager> {
        self.initialize_sync_managers();
        self.managers.borrow().clone()
    }

    pub fn get(&self, name: &str) -> Option<SyncManager> {
        self.initialize_sync_managers();
        self.managers.borrow().iter().find(|m| m.name() == name).cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Send the final keep-alive request of every exit-flagged manager.
    /// Does not build managers that were never initialized.
    pub fn flush_on_exit(&self) -> usize {
        let managers = self.managers.borrow().clone();
        managers.iter().filter(|m| m.flush_on_exit()).count()
    }

    /// Dispose every manager and forget them; the next lookup rebuilds.
    pub fn dispose_all(&self) {
        let managers = std::mem::take(&mut *self.managers.borrow_mut());
        for manager in &managers {
            manager.dispose();
        }
        self.initialized.set(false);
    }
}

impl fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("managers", &self.managers.borrow().len())
            .field("initialized", &self.initialized.get())
            .finish()
    }
}
