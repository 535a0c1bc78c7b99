use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use keyward_clock::{Clock, System, UnixTime};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::{
    backends::{
        BackendError, CredentialBackend, ACCESS_EXPIRES_AT_KEY, CREDENTIAL_KEYS,
        REFRESH_EXPIRES_AT_KEY,
    },
    credentials::{format_timestamp, parse_timestamp},
    AccessToken, CredentialPair, CredentialState, RefreshToken,
};

/// The storage operation that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageOperation {
    /// Reading a value
    Read,
    /// Writing a value
    Write,
    /// Clearing all values
    Clear,
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Clear => "clear",
        })
    }
}

/// A failure of the persistence backend
///
/// Whenever this is returned, the in-memory credential state is exactly what
/// it was before the failing call.
#[derive(Debug, Error)]
#[error("unable to {operation} credential storage (key: {key})")]
pub struct StorageError {
    operation: StorageOperation,
    key: &'static str,
    #[source]
    source: BackendError,
}

impl StorageError {
    fn new(operation: StorageOperation, key: &'static str, source: BackendError) -> Self {
        Self {
            operation,
            key,
            source,
        }
    }

    /// The operation that failed
    pub fn operation(&self) -> StorageOperation {
        self.operation
    }

    /// The key being operated on, or `*` for whole-store operations
    pub fn key(&self) -> &'static str {
        self.key
    }
}

/// The result of loading credentials from persistence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitOutcome {
    /// Whether a credential pair was loaded
    pub loaded: bool,
    /// Whether a stored refresh credential had already expired and was discarded
    pub refresh_was_expired: bool,
}

/// Durable storage of the session's credential pair
///
/// The store keeps an in-memory copy of the credentials that can be read
/// synchronously with [`get()`][Self::get()], and mirrors every mutation to a
/// [`CredentialBackend`]. Persistence is always written first; memory is only
/// updated once the backend has accepted the change.
///
/// Every change of the in-memory state advances the store's
/// [`generation()`][Self::generation()]. Writers that started from an older
/// state, such as a renewal racing a logout, use
/// [`set_if_current()`][Self::set_if_current()] so that they cannot
/// resurrect a session that has since ended or been replaced.
pub struct CredentialStore {
    backend: Mutex<Box<dyn CredentialBackend>>,
    state: watch::Sender<CredentialState>,
    generation: AtomicU64,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("state", &*self.state.borrow())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Constructs a new, empty store over the given backend
    ///
    /// Call [`initialize()`][Self::initialize()] to load any previously
    /// persisted credentials.
    pub fn new(backend: impl CredentialBackend + 'static) -> Self {
        let (state, _) = watch::channel(CredentialState::Absent);
        Self {
            backend: Mutex::new(Box::new(backend)),
            state,
            generation: AtomicU64::new(0),
            clock: Arc::new(System),
        }
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The current time according to the store's clock
    #[inline]
    pub fn now(&self) -> UnixTime {
        self.clock.now()
    }

    /// Gets the current in-memory credential state
    pub fn get(&self) -> CredentialState {
        self.state.borrow().clone()
    }

    /// Subscribes to changes of the credential state
    pub fn subscribe(&self) -> watch::Receiver<CredentialState> {
        self.state.subscribe()
    }

    /// The number of state changes published so far
    ///
    /// Read this before [`get()`][Self::get()] to know which state a
    /// later [`set_if_current()`][Self::set_if_current()] is conditioned on.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // The state is replaced before the generation advances, so a reader that
    // sees the new generation also sees the new state.
    fn publish(&self, state: CredentialState) -> CredentialState {
        let previous = self.state.send_replace(state);
        self.generation.fetch_add(1, Ordering::SeqCst);
        previous
    }

    /// Loads credentials from persistence
    ///
    /// A stored pair whose refresh credential has already expired is removed
    /// from persistence and reported through [`InitOutcome::refresh_was_expired`].
    /// Partially stored credentials are treated as corrupt and removed.
    pub async fn initialize(&self) -> Result<InitOutcome, StorageError> {
        let mut backend = self.backend.lock().await;

        let [access, refresh, access_expiry, refresh_expiry] =
            read_all(backend.as_mut()).await?;

        let (access, refresh) = match (access, refresh) {
            (Some(access), Some(refresh)) => (access, refresh),
            (None, None) if access_expiry.is_none() && refresh_expiry.is_none() => {
                tracing::debug!("no stored credentials");
                self.publish(CredentialState::Absent);
                return Ok(InitOutcome::default());
            }
            _ => {
                tracing::warn!("stored credentials are incomplete, discarding");
                clear_backend(backend.as_mut()).await?;
                self.publish(CredentialState::Absent);
                return Ok(InitOutcome::default());
            }
        };

        let access_expires_at = access_expiry.as_deref().and_then(parse_timestamp);
        let refresh_expires_at = refresh_expiry.as_deref().and_then(parse_timestamp);

        if access_expiry.is_some() && access_expires_at.is_none() {
            tracing::warn!(key = ACCESS_EXPIRES_AT_KEY, "malformed stored timestamp");
        }
        if refresh_expiry.is_some() && refresh_expires_at.is_none() {
            tracing::warn!(key = REFRESH_EXPIRES_AT_KEY, "malformed stored timestamp");
        }

        if let Some(refresh_expires_at) = refresh_expires_at {
            let now = self.clock.now();
            if now >= refresh_expires_at {
                tracing::info!(
                    refresh_expires_at = refresh_expires_at.0,
                    now = now.0,
                    "stored refresh credential has expired, discarding credentials"
                );
                clear_backend(backend.as_mut()).await?;
                self.publish(CredentialState::Absent);
                return Ok(InitOutcome {
                    loaded: false,
                    refresh_was_expired: true,
                });
            }
        }

        let pair = CredentialPair::from_parts(
            AccessToken::new(access),
            RefreshToken::new(refresh),
            access_expires_at,
            refresh_expires_at,
        );

        tracing::debug!(
            access_expires_at = access_expires_at.map(|t| t.0),
            refresh_expires_at = refresh_expires_at.map(|t| t.0),
            "loaded stored credentials"
        );

        self.publish(CredentialState::Present(Arc::new(pair)));

        Ok(InitOutcome {
            loaded: true,
            refresh_was_expired: false,
        })
    }

    /// Persists a new credential pair and makes it current
    ///
    /// Returns the pair as it is now held in memory.
    ///
    /// All four fields are written before the in-memory state changes. If any
    /// write fails, previously persisted values are restored and the
    /// in-memory state is left untouched.
    pub async fn set(&self, pair: CredentialPair) -> Result<Arc<CredentialPair>, StorageError> {
        let mut backend = self.backend.lock().await;
        self.write(backend.as_mut(), pair).await
    }

    /// Persists a new credential pair only if the state is still at `generation`
    ///
    /// Returns `None` without touching persistence if the credentials were
    /// set or cleared since `generation` was read.
    pub async fn set_if_current(
        &self,
        pair: CredentialPair,
        generation: u64,
    ) -> Result<Option<Arc<CredentialPair>>, StorageError> {
        let mut backend = self.backend.lock().await;
        if self.generation() != generation {
            tracing::debug!(
                generation,
                current = self.generation(),
                "credentials changed meanwhile, not storing"
            );
            return Ok(None);
        }
        self.write(backend.as_mut(), pair).await.map(Some)
    }

    async fn write(
        &self,
        backend: &mut dyn CredentialBackend,
        pair: CredentialPair,
    ) -> Result<Arc<CredentialPair>, StorageError> {
        let previous = read_all(backend).await?;

        let values = [
            Some(pair.access_token().as_str().to_owned()),
            Some(pair.refresh_token().as_str().to_owned()),
            pair.access_expires_at().map(format_timestamp),
            pair.refresh_expires_at().map(format_timestamp),
        ];

        for (idx, key) in CREDENTIAL_KEYS.iter().copied().enumerate() {
            let result = match &values[idx] {
                Some(value) => backend.set(key, value).await,
                None => backend.remove(key).await,
            };

            if let Err(source) = result {
                tracing::warn!(
                    key,
                    error = (&*source as &dyn std::error::Error),
                    "unable to persist credentials, restoring previous values"
                );
                restore(backend, &previous[..=idx]).await;
                return Err(StorageError::new(StorageOperation::Write, key, source));
            }
        }

        tracing::debug!(
            access_expires_at = pair.access_expires_at().map(|t| t.0),
            refresh_expires_at = pair.refresh_expires_at().map(|t| t.0),
            "stored new credentials"
        );

        let pair = Arc::new(pair);
        self.publish(CredentialState::Present(Arc::clone(&pair)));
        Ok(pair)
    }

    /// Removes all credentials
    ///
    /// Clearing an already empty store succeeds. Subscribers, such as the
    /// proactive refresh scheduler, observe the transition to
    /// [`CredentialState::Absent`] and stop their timers.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut backend = self.backend.lock().await;
        self.erase(backend.as_mut()).await
    }

    /// Removes all credentials only if the state is still at `generation`
    ///
    /// Returns whether the credentials were cleared.
    pub async fn clear_if_current(&self, generation: u64) -> Result<bool, StorageError> {
        let mut backend = self.backend.lock().await;
        if self.generation() != generation {
            return Ok(false);
        }
        self.erase(backend.as_mut()).await?;
        Ok(true)
    }

    async fn erase(&self, backend: &mut dyn CredentialBackend) -> Result<(), StorageError> {
        clear_backend(backend).await?;

        if self.publish(CredentialState::Absent).is_present() {
            tracing::info!("cleared stored credentials");
        }
        Ok(())
    }
}

async fn read_all(
    backend: &mut dyn CredentialBackend,
) -> Result<[Option<String>; 4], StorageError> {
    let mut values: [Option<String>; 4] = Default::default();
    for (slot, key) in values.iter_mut().zip(CREDENTIAL_KEYS) {
        *slot = backend
            .get(key)
            .await
            .map_err(|source| StorageError::new(StorageOperation::Read, key, source))?;
    }
    Ok(values)
}

async fn clear_backend(backend: &mut dyn CredentialBackend) -> Result<(), StorageError> {
    backend
        .clear()
        .await
        .map_err(|source| StorageError::new(StorageOperation::Clear, "*", source))
}

async fn restore(backend: &mut dyn CredentialBackend, previous: &[Option<String>]) {
    for (key, value) in CREDENTIAL_KEYS.iter().copied().zip(previous) {
        let result = match value {
            Some(value) => backend.set(key, value).await,
            None => backend.remove(key).await,
        };

        if let Err(error) = result {
            tracing::error!(
                key,
                error = (&*error as &dyn std::error::Error),
                "unable to restore previous credential value"
            );
        }
    }
}
