//! An in-memory credential backend

use std::collections::HashMap;

use async_trait::async_trait;

use super::{BackendError, CredentialBackend};

/// A volatile credential backend
///
/// Credentials held here do not survive a restart.
#[derive(Default, Debug)]
pub struct InMemoryBackend {
    values: HashMap<String, String>,
}

impl InMemoryBackend {
    /// Constructs a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a backend pre-populated with the given entries
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialBackend for InMemoryBackend {
    async fn get(&mut self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.values.get(key).cloned())
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.values.remove(key);
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), BackendError> {
        self.values.clear();
        Ok(())
    }
}
