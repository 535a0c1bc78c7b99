use std::{sync::Arc, time::Duration};

use keyward_clock::DurationSecs;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{CredentialPair, CredentialStore};

/// Default lead time before access expiry at which renewal is wanted
pub const DEFAULT_EXPIRY_THRESHOLD: DurationSecs = DurationSecs::from_minutes(10);

const CHECK_CACHE_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct CachedCheck {
    checked_at: Instant,
    pair: Option<Arc<CredentialPair>>,
    expiring: bool,
}

impl CachedCheck {
    fn is_fresh_for(&self, pair: Option<&Arc<CredentialPair>>) -> bool {
        let same_pair = match (&self.pair, pair) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_pair && self.checked_at.elapsed() < CHECK_CACHE_TTL
    }
}

/// Answers whether the stored credentials need attention
///
/// The access check is fail-open: a missing or unparseable expiry counts as
/// "not expiring", leaving a 401 response to trigger renewal. The refresh
/// check is fail-closed: without a known expiry the refresh credential is
/// considered expired.
///
/// Results of the access check are cached globally for about a second so that a
/// burst of requests evaluates the expiry once. A cached result only applies to
/// the credential pair it was computed for.
#[derive(Debug)]
pub struct ExpiryEvaluator {
    store: Arc<CredentialStore>,
    cache: Mutex<Option<CachedCheck>>,
}

impl ExpiryEvaluator {
    /// Constructs an evaluator over the given store
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    /// Whether the access credential expires within `threshold`
    pub fn is_access_expiring_soon(&self, threshold: DurationSecs) -> bool {
        let state = self.store.get();
        let pair = state.pair();

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh_for(pair) {
                return cached.expiring;
            }
        }

        let expiring = self.evaluate_access(pair, threshold);
        *cache = Some(CachedCheck {
            checked_at: Instant::now(),
            pair: pair.cloned(),
            expiring,
        });
        expiring
    }

    fn evaluate_access(
        &self,
        pair: Option<&Arc<CredentialPair>>,
        threshold: DurationSecs,
    ) -> bool {
        let expires_at = match pair.and_then(|p| p.access_expires_at()) {
            Some(expires_at) => expires_at,
            None => return false,
        };

        let now = self.store.now();
        let expiring = now >= expires_at - threshold;
        tracing::trace!(
            now = now.0,
            access_expires_at = expires_at.0,
            threshold = threshold.0,
            expiring,
            "evaluated access credential expiry"
        );
        expiring
    }

    /// Whether the refresh credential has already expired
    pub fn is_refresh_expired(&self) -> bool {
        let state = self.store.get();
        match state.pair().and_then(|p| p.refresh_expires_at()) {
            Some(expires_at) => self.store.now() >= expires_at,
            None => true,
        }
    }
}
