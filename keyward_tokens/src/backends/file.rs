//! A file-backed credential backend

use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{BackendError, CredentialBackend};

/// A credential backend that keeps its entries in a local JSON file
///
/// The file holds a single JSON object of string values. It is rewritten in
/// full on every mutation and, on Unix, created readable only by its owner.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Constructs a new file backend
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_entries(&self) -> Result<BTreeMap<String, String>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let entries = serde_json::from_str(&data)?;
        Ok(entries)
    }

    async fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(entries)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialBackend for FileBackend {
    async fn get(&mut self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.read_entries().await?.remove(key))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(self.write_entries(&entries).await?)
    }

    async fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), BackendError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
