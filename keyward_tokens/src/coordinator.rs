//! Single-flight renewal of the credential pair
//!
//! The [`RefreshCoordinator`] guarantees that at most one renewal is in
//! flight at any time. Callers arriving while a renewal is running join it
//! and observe its outcome instead of starting their own.
//!
//! The renewal runs as its own tokio task, so it always runs to completion
//! and always vacates the in-flight slot, even if every caller that was
//! waiting on it has gone away or the renewal callback panics.

use std::{error, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{CredentialPair, CredentialStore, RefreshToken, RefreshTokenRef, StorageError};

/// Default upper bound on the duration of a single renewal
pub const DEFAULT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(30);

/// The error type returned by a [`Renewer`]
pub type RenewerError = Box<dyn error::Error + Send + Sync + 'static>;

/// Performs the actual exchange of a refresh credential for a new pair
///
/// Implementations carry the transport; the coordinator knows nothing about
/// how the exchange happens.
#[async_trait]
pub trait Renewer: Send + Sync {
    /// Exchanges `refresh_token` for a new credential pair
    async fn renew(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, RenewerError>;
}

#[async_trait]
impl<T: Renewer + ?Sized> Renewer for Arc<T> {
    async fn renew(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, RenewerError> {
        (**self).renew(refresh_token).await
    }
}

/// A [`Renewer`] backed by an async closure
///
/// Constructed with [`renewer_fn()`].
#[derive(Clone, Copy)]
pub struct FnRenewer<F> {
    f: F,
}

impl<F> fmt::Debug for FnRenewer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRenewer")
    }
}

/// Wraps an async closure as a [`Renewer`]
pub fn renewer_fn<F, Fut>(f: F) -> FnRenewer<F>
where
    F: Fn(RefreshToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CredentialPair, RenewerError>> + Send,
{
    FnRenewer { f }
}

#[async_trait]
impl<F, Fut> Renewer for FnRenewer<F>
where
    F: Fn(RefreshToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CredentialPair, RenewerError>> + Send,
{
    async fn renew(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, RenewerError> {
        (self.f)(refresh_token.to_owned()).await
    }
}

/// Why a renewal did not produce a new credential pair
///
/// Every caller that joined a renewal receives a clone of the same error.
#[derive(Clone, Debug, Error)]
pub enum RenewalError {
    /// No refresh credential is held, so no renewal was attempted
    #[error("no refresh credential available")]
    NotFound,
    /// The renewal callback failed or the authority rejected the refresh credential
    #[error("credential renewal was rejected")]
    Rejected(#[source] Arc<dyn error::Error + Send + Sync + 'static>),
    /// The renewal callback did not finish in time
    #[error("credential renewal timed out after {0:?}")]
    TimedOut(Duration),
    /// The new credentials could not be persisted
    #[error("renewed credentials could not be stored")]
    Storage(#[source] Arc<StorageError>),
    /// The renewal task was aborted before producing an outcome
    #[error("credential renewal was aborted")]
    Aborted,
    /// The credentials were cleared or replaced while the renewal ran
    ///
    /// The renewed pair was discarded and the current credentials left as
    /// they are.
    #[error("credentials changed during renewal")]
    Superseded,
}

type RenewalOutcome = Result<Arc<CredentialPair>, RenewalError>;
type InFlightRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

/// Owns the single in-flight renewal of the session's credentials
///
/// On success the new pair is written to the [`CredentialStore`]. On any
/// failure the store is cleared, ending the local session.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    renewer: Arc<dyn Renewer>,
    timeout: Duration,
    in_flight: Arc<Mutex<Option<InFlightRenewal>>>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .field("renewing", &self.is_renewing())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Constructs a new coordinator
    pub fn new(store: Arc<CredentialStore>, renewer: impl Renewer + 'static) -> Self {
        Self {
            store,
            renewer: Arc::new(renewer),
            timeout: DEFAULT_RENEWAL_TIMEOUT,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Sets the maximum duration of a renewal
    ///
    /// A renewal that runs longer is treated as failed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The store this coordinator renews into
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Whether a renewal is currently in flight
    pub fn is_renewing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Renews the credential pair using the configured [`Renewer`]
    ///
    /// If a renewal is already in flight, this joins it rather than starting
    /// another.
    pub async fn renew(&self) -> Result<Arc<CredentialPair>, RenewalError> {
        self.renew_with(Arc::clone(&self.renewer)).await
    }

    /// Renews the credential pair using a specific [`Renewer`]
    ///
    /// `renewer` is only used if this call starts a new renewal; a caller
    /// joining an in-flight renewal shares whatever that renewal is doing.
    pub async fn renew_with(
        &self,
        renewer: Arc<dyn Renewer>,
    ) -> Result<Arc<CredentialPair>, RenewalError> {
        let renewal = {
            let mut slot = self.in_flight.lock();
            if let Some(renewal) = slot.as_ref() {
                tracing::debug!("joining in-flight credential renewal");
                renewal.clone()
            } else {
                // Read before the state, so a concurrent change can only make
                // the generation look stale, never current.
                let generation = self.store.generation();
                let refresh_token = match self.store.get().pair() {
                    Some(pair) => pair.refresh_token().to_owned(),
                    None => {
                        tracing::debug!("no refresh credential held, not renewing");
                        return Err(RenewalError::NotFound);
                    }
                };

                let renewal = self.start(renewer, refresh_token, generation);
                *slot = Some(renewal.clone());
                renewal
            }
        };

        renewal.await
    }

    fn start(
        &self,
        renewer: Arc<dyn Renewer>,
        refresh_token: RefreshToken,
        generation: u64,
    ) -> InFlightRenewal {
        tracing::debug!("starting credential renewal");

        let store = Arc::clone(&self.store);
        let slot = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        // The slot lock is held by our caller until the handle is recorded,
        // so the task cannot vacate the slot before it has been filled.
        let task = tokio::spawn(async move {
            let exchanged = AssertUnwindSafe(exchange(&*renewer, &refresh_token, timeout))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!("credential renewal panicked");
                    Err(RenewalError::Aborted)
                });

            let outcome = settle(&store, generation, exchanged).await;
            slot.lock().take();
            outcome
        });

        let slot = Arc::clone(&self.in_flight);
        async move {
            task.await.unwrap_or_else(|err| {
                tracing::error!(error = (&err as &dyn error::Error), "renewal task failed");
                slot.lock().take();
                Err(RenewalError::Aborted)
            })
        }
        .boxed()
        .shared()
    }
}

async fn exchange(
    renewer: &dyn Renewer,
    refresh_token: &RefreshTokenRef,
    timeout: Duration,
) -> Result<CredentialPair, RenewalError> {
    match tokio::time::timeout(timeout, renewer.renew(refresh_token)).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(error)) => Err(RenewalError::Rejected(Arc::from(error))),
        Err(_) => Err(RenewalError::TimedOut(timeout)),
    }
}

/// Commits the outcome of a renewal started at `generation`
///
/// Nothing is written or cleared if the credentials changed since, so a
/// logout or a fresh login during the renewal stands.
async fn settle(
    store: &CredentialStore,
    generation: u64,
    exchanged: Result<CredentialPair, RenewalError>,
) -> RenewalOutcome {
    let result = match exchanged {
        Ok(pair) => match store.set_if_current(pair, generation).await {
            Ok(Some(pair)) => Ok(pair),
            Ok(None) => {
                tracing::info!("credentials changed during renewal, discarding renewed pair");
                return Err(RenewalError::Superseded);
            }
            Err(err) => Err(RenewalError::Storage(Arc::new(err))),
        },
        Err(err) => Err(err),
    };

    match result {
        Ok(pair) => {
            tracing::info!(
                access_expires_at = pair.access_expires_at().map(|t| t.0),
                refresh_expires_at = pair.refresh_expires_at().map(|t| t.0),
                "renewed credentials"
            );
            Ok(pair)
        }
        Err(error) => {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "credential renewal failed, clearing credentials"
            );
            match store.clear_if_current(generation).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("credentials changed during renewal, leaving them in place")
                }
                Err(clear_error) => tracing::error!(
                    error = (&clear_error as &dyn error::Error),
                    "unable to clear credentials after failed renewal"
                ),
            }
            Err(error)
        }
    }
}
