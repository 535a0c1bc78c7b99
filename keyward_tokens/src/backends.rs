//! Persistence backends for credentials
//!
//! A backend is a plain string key-value store. The [`CredentialStore`][crate::CredentialStore]
//! owns the rules about which keys exist and how they are kept consistent;
//! backends only need to remember what they are told.
//!
//! The backend is chosen by the caller when the store is constructed.

use async_trait::async_trait;
use std::error;

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileBackend;
pub use in_memory::InMemoryBackend;

/// The error type returned by credential backends
pub type BackendError = Box<dyn error::Error + Send + Sync + 'static>;

/// Key under which the access credential is persisted
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key under which the refresh credential is persisted
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Key under which the access credential's expiry is persisted
pub const ACCESS_EXPIRES_AT_KEY: &str = "access_token_expires_at";
/// Key under which the refresh credential's expiry is persisted
pub const REFRESH_EXPIRES_AT_KEY: &str = "refresh_token_expires_at";

/// All credential keys, in the order they are written
pub const CREDENTIAL_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    ACCESS_EXPIRES_AT_KEY,
    REFRESH_EXPIRES_AT_KEY,
];

/// An asynchronous key-value store for credential fields
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Reads the value stored under `key`
    async fn get(&mut self, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores `value` under `key`, replacing any existing value
    async fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Removes the value stored under `key`; removing a missing key is not an error
    async fn remove(&mut self, key: &str) -> Result<(), BackendError>;

    /// Removes every value held by this backend
    async fn clear(&mut self) -> Result<(), BackendError>;
}
