use std::collections::BTreeMap;

/// Environment variables shared by every workflow of the account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentStore {
    variables: BTreeMap<String, String>,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Returns false when the key already held this value.
    pub fn set_variable(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            log::warn!("Ignoring environment variable with an empty name");
            return false;
        }
        self.variables.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
    }

    /// Keys are matched the way `set_variable` stores them, trimmed.
    pub fn remove_variable(&mut self, key: &str) -> bool {
        self.variables.remove(key.trim()).is_some()
    }

    /// Replace the whole set.
    pub fn set_variables(&mut self, variables: BTreeMap<String, String>) {
        self.variables = variables
            .into_iter()
            .map(|(key, value)| (key.trim().to_string(), value))
            .filter(|(key, _)| !key.is_empty())
            .collect();
    }

    pub fn clear(&mut self) {
        self.variables.clear();
    }
}
