//! Local cache for workflow state.
//!
//! `PersistenceAdapter` reads and writes the registry, each workflow's graph
//! and each workflow's subblock values to a key-value backend.  Every call is
//! synchronous and best-effort: a full quota, a missing backend or a corrupt
//! entry is logged at debug level and reported as "nothing saved".

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::constants::{
    ACTIVE_WORKFLOW_KEY, DELETED_WORKFLOWS_KEY, ENVIRONMENT_STORAGE_KEY, REGISTRY_STORAGE_KEY,
    SUBBLOCK_VALUES_KEY_PREFIX, WORKFLOW_STATE_KEY_PREFIX,
};
use crate::models::{BlockValues, WorkflowGraphState, WorkflowMetadata};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage backend unavailable")]
    Unavailable,
    #[error("storage quota exceeded while writing `{0}`")]
    QuotaExceeded(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Minimal `localStorage`-shaped key-value interface.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

// ---------------------------------------------------------------------------
// Browser backend
// ---------------------------------------------------------------------------

/// `window.localStorage`, looked up on every call so a storage that becomes
/// unavailable (private mode, cleared site data) degrades to cache misses.
#[derive(Default)]
pub struct LocalStorageBackend;

impl LocalStorageBackend {
    fn storage(&self) -> Result<web_sys::Storage, StorageError> {
        let window = web_sys::window().ok_or(StorageError::Unavailable)?;
        window
            .local_storage()
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))?
            .ok_or(StorageError::Unavailable)
    }

    /// True when `localStorage` can be reached from this context.
    pub fn is_available() -> bool {
        LocalStorageBackend.storage().is_ok()
    }
}

impl KeyValueStore for LocalStorageBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage()?
            .get_item(key)
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // Browsers throw a QuotaExceededError DOMException; anything thrown by
        // setItem is treated as a quota problem.
        self.storage()?
            .set_item(key, value)
            .map_err(|_| StorageError::QuotaExceeded(key.to_string()))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let storage = self.storage()?;
        let len = storage
            .length()
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))?;
        let mut keys = Vec::with_capacity(len as usize);
        for index in 0..len {
            if let Ok(Some(key)) = storage.key(index) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-process map used natively and as fallback when `localStorage` is
/// missing.  Clones share the same entries.  An optional byte quota makes it
/// possible to reproduce `QuotaExceededError`.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Rc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            if self.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded(key.to_string()));
            }
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Persistence adapter
// ---------------------------------------------------------------------------

pub fn workflow_state_key(workflow_id: &str) -> String {
    format!("{}{}", WORKFLOW_STATE_KEY_PREFIX, workflow_id)
}

pub fn subblock_values_key(workflow_id: &str) -> String {
    format!("{}{}", SUBBLOCK_VALUES_KEY_PREFIX, workflow_id)
}

/// `localStorage` when reachable, otherwise an in-memory map.
pub fn browser_backend() -> Rc<dyn KeyValueStore> {
    if LocalStorageBackend::is_available() {
        Rc::new(LocalStorageBackend)
    } else {
        log::warn!("localStorage unavailable, falling back to in-memory cache");
        Rc::new(MemoryStorage::new())
    }
}

#[derive(Clone)]
pub struct PersistenceAdapter {
    backend: Rc<dyn KeyValueStore>,
}

impl PersistenceAdapter {
    pub fn new(backend: Rc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }


    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                log::debug!("Failed to serialize `{}` for local cache: {}", key, e);
                return false;
            }
        };
        match self.backend.set_item(key, &json) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Failed to write `{}` to local cache: {}", key, e);
                false
            }
        }
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::debug!("Failed to read `{}` from local cache: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("Ignoring corrupt local cache entry `{}`: {}", key, e);
                None
            }
        }
    }

    pub fn save_registry(&self, workflows: &HashMap<String, WorkflowMetadata>) -> bool {
        self.save(REGISTRY_STORAGE_KEY, workflows)
    }

    pub fn load_registry(&self) -> Option<HashMap<String, WorkflowMetadata>> {
        self.load(REGISTRY_STORAGE_KEY)
    }

    /// Writes the graph and stamps `lastSaved` on the stored copy.
    pub fn save_workflow_state(&self, workflow_id: &str, state: &WorkflowGraphState) -> bool {
        let mut stored = state.clone();
        stored.last_saved = Some(Utc::now());
        self.save(&workflow_state_key(workflow_id), &stored)
    }

    pub fn load_workflow_state(&self, workflow_id: &str) -> Option<WorkflowGraphState> {
        self.load(&workflow_state_key(workflow_id))
    }

    pub fn save_subblock_values(&self, workflow_id: &str, values: &BlockValues) -> bool {
        self.save(&subblock_values_key(workflow_id), values)
    }

    pub fn load_subblock_values(&self, workflow_id: &str) -> Option<BlockValues> {
        self.load(&subblock_values_key(workflow_id))
    }

    pub fn save_active_workflow_id(&self, workflow_id: Option<&str>) -> bool {
        match workflow_id {
            Some(id) => self.save(ACTIVE_WORKFLOW_KEY, id),
            None => {
                self.remove_from_storage(ACTIVE_WORKFLOW_KEY);
                true
            }
        }
    }

    pub fn load_active_workflow_id(&self) -> Option<String> {
        self.load(ACTIVE_WORKFLOW_KEY)
    }

    pub fn save_deleted_workflow_ids(&self, ids: &BTreeSet<String>) -> bool {
        if ids.is_empty() {
            self.remove_from_storage(DELETED_WORKFLOWS_KEY);
            return true;
        }
        self.save(DELETED_WORKFLOWS_KEY, ids)
    }

    pub fn load_deleted_workflow_ids(&self) -> BTreeSet<String> {
        self.load(DELETED_WORKFLOWS_KEY).unwrap_or_default()
    }

    pub fn save_environment(&self, variables: &BTreeMap<String, String>) -> bool {
        self.save(ENVIRONMENT_STORAGE_KEY, variables)
    }

    pub fn load_environment(&self) -> Option<BTreeMap<String, String>> {
        self.load(ENVIRONMENT_STORAGE_KEY)
    }

    pub fn remove_from_storage(&self, key: &str) {
        if let Err(e) = self.backend.remove_item(key) {
            log::debug!("Failed to remove `{}` from local cache: {}", key, e);
        }
    }

    /// Drop both per-workflow entries.
    pub fn purge_workflow(&self, workflow_id: &str) {
        self.remove_from_storage(&workflow_state_key(workflow_id));
        self.remove_from_storage(&subblock_values_key(workflow_id));
    }

    /// Remove everything this adapter owns, leaving unrelated keys alone.
    pub fn clear_workflow_data(&self) {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                log::debug!("Failed to enumerate local cache keys: {}", e);
                Vec::new()
            }
        };
        for key in keys {
            if key.starts_with(WORKFLOW_STATE_KEY_PREFIX) || key.starts_with(SUBBLOCK_VALUES_KEY_PREFIX) {
                self.remove_from_storage(&key);
            }
        }
        for key in [
            REGISTRY_STORAGE_KEY,
            ACTIVE_WORKFLOW_KEY,
            DELETED_WORKFLOWS_KEY,
            ENVIRONMENT_STORAGE_KEY,
        ] {
            self.remove_from_storage(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockState, Edge, Position, SubBlockSlot};
    use serde_json::json;

    fn adapter() -> (MemoryStorage, PersistenceAdapter) {
        let storage = MemoryStorage::new();
        let adapter = PersistenceAdapter::new(Rc::new(storage.clone()));
        (storage, adapter)
    }

    fn sample_state() -> WorkflowGraphState {
        let mut state = WorkflowGraphState::starter();
        let block = BlockState::new(
            "api-1",
            "api",
            "API 1",
            Position::new(300.0, 120.0),
            vec![SubBlockSlot::new("url", "short-input")],
        );
        state.blocks.insert(block.id.clone(), block);
        let starter_id = state.blocks.keys().find(|id| id.as_str() != "api-1").cloned().unwrap();
        state.edges.push(Edge::new("e1", starter_id, "api-1"));
        state
    }

    #[test]
    fn workflow_state_round_trips_except_last_saved() {
        let (_, adapter) = adapter();
        let state = sample_state();
        assert!(adapter.save_workflow_state("w1", &state));

        let mut loaded = adapter.load_workflow_state("w1").unwrap();
        assert!(loaded.last_saved.is_some());
        loaded.last_saved = state.last_saved;
        assert_eq!(loaded, state);
    }

    #[test]
    fn corrupt_entries_read_as_missing() {
        let (storage, adapter) = adapter();
        storage.set_item(&workflow_state_key("w1"), "{not json").unwrap();
        storage.set_item(REGISTRY_STORAGE_KEY, "[1,2,3]").unwrap();

        assert!(adapter.load_workflow_state("w1").is_none());
        assert!(adapter.load_registry().is_none());
        assert!(adapter.load_subblock_values("never-saved").is_none());
    }

    #[test]
    fn quota_exceeded_is_reported_as_not_saved() {
        let storage = MemoryStorage::with_quota(64);
        let adapter = PersistenceAdapter::new(Rc::new(storage.clone()));

        assert!(!adapter.save_workflow_state("w1", &sample_state()));
        assert!(adapter.load_workflow_state("w1").is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn purge_removes_both_workflow_entries() {
        let (storage, adapter) = adapter();
        let mut values = BlockValues::new();
        values.insert("api-1".into(), HashMap::from([("url".to_string(), json!("https://x"))]));

        adapter.save_workflow_state("w1", &sample_state());
        adapter.save_subblock_values("w1", &values);
        adapter.save_workflow_state("w2", &sample_state());
        assert_eq!(adapter.load_subblock_values("w1"), Some(values));

        adapter.purge_workflow("w1");
        assert!(adapter.load_workflow_state("w1").is_none());
        assert!(adapter.load_subblock_values("w1").is_none());
        assert!(adapter.load_workflow_state("w2").is_some());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn clear_workflow_data_keeps_unrelated_keys() {
        let (storage, adapter) = adapter();
        storage.set_item("theme", "dark").unwrap();
        adapter.save_workflow_state("w1", &sample_state());
        adapter.save_subblock_values("w1", &BlockValues::new());
        adapter.save_registry(&HashMap::new());
        adapter.save_active_workflow_id(Some("w1"));
        adapter.save_environment(&BTreeMap::from([("A".to_string(), "1".to_string())]));

        adapter.clear_workflow_data();

        assert_eq!(storage.keys().unwrap(), vec!["theme".to_string()]);
    }

    #[test]
    fn empty_tombstone_set_removes_key() {
        let (storage, adapter) = adapter();
        let ids = BTreeSet::from(["w1".to_string()]);
        adapter.save_deleted_workflow_ids(&ids);
        assert_eq!(adapter.load_deleted_workflow_ids(), ids);

        adapter.save_deleted_workflow_ids(&BTreeSet::new());
        assert!(storage.raw(DELETED_WORKFLOWS_KEY).is_none());
        assert!(adapter.load_deleted_workflow_ids().is_empty());
    }
}
