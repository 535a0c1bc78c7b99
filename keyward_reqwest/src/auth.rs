use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::{BufMut, BytesMut};
use keyward_clock::DurationSecs;
use keyward_tokens::{
    AccessToken, AccessTokenRef, CredentialStore, ExpiryEvaluator, RefreshCoordinator,
    RenewalError, DEFAULT_EXPIRY_THRESHOLD,
};
use predicates::Predicate;
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

use crate::{AuthError, PathList, UnauthenticatedReason};

/// A callback invoked whenever the session is found to be no longer valid
pub type UnauthenticatedHandler = Arc<dyn Fn(UnauthenticatedReason) + Send + Sync + 'static>;

/// Marks a request that has already been replayed after a 401 response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Replayed;

/// Gate restricting requests to an allow-list while active
///
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct WithdrawalGate {
    active: Arc<AtomicBool>,
    allow_list: PathList,
}

impl WithdrawalGate {
    /// Constructs an inactive gate permitting `allow_list` while active
    pub fn new(allow_list: PathList) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            allow_list,
        }
    }

    /// Activates the gate
    pub fn enable(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::info!(allowed = %self.allow_list, "withdrawal mode enabled");
        }
    }

    /// Deactivates the gate
    pub fn disable(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::info!("withdrawal mode disabled");
        }
    }

    /// Whether the gate is active
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether `req` must be stopped by the gate
    pub fn blocks(&self, req: &Request) -> bool {
        self.is_active() && !self.allow_list.eval(req)
    }
}

/// A middleware that authenticates outgoing requests
///
/// For every request that is not to a public path, this middleware:
///
/// 1. Renews the credentials first if the access credential is about to
///    expire. If the refresh credential has already expired, the session is
///    ended instead.
/// 2. Attaches the access credential as a bearer token.
/// 3. On a 401 response, renews the credentials and replays the request once.
///    If another request already renewed the credentials in the meantime, the
///    request is replayed with those without renewing again.
///
/// If a request already has an `Authorization` header by the time this
/// middleware executes, the existing value is left in place and the request
/// is sent as is.
///
/// While withdrawal mode is active, requests to paths outside the allow-list
/// are rejected without being sent.
#[derive(Clone)]
pub struct AuthMiddleware {
    store: Arc<CredentialStore>,
    evaluator: Arc<ExpiryEvaluator>,
    coordinator: Arc<RefreshCoordinator>,
    threshold: DurationSecs,
    public_paths: PathList,
    refresh_path: PathList,
    withdrawal: WithdrawalGate,
    on_unauthenticated: Option<UnauthenticatedHandler>,
}

impl fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("coordinator", &self.coordinator)
            .field("threshold", &self.threshold)
            .field("public_paths", &self.public_paths)
            .field("refresh_path", &self.refresh_path)
            .field("withdrawal", &self.withdrawal)
            .finish_non_exhaustive()
    }
}

impl AuthMiddleware {
    /// Constructs a new middleware renewing through `coordinator`
    pub fn new(coordinator: Arc<RefreshCoordinator>, evaluator: Arc<ExpiryEvaluator>) -> Self {
        Self {
            store: Arc::clone(coordinator.store()),
            evaluator,
            coordinator,
            threshold: DEFAULT_EXPIRY_THRESHOLD,
            public_paths: PathList::default(),
            refresh_path: PathList::default(),
            withdrawal: WithdrawalGate::default(),
            on_unauthenticated: None,
        }
    }

    /// Sets how long before expiry the credentials are renewed
    pub fn with_threshold(mut self, threshold: DurationSecs) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the paths that are sent without credentials
    pub fn with_public_paths(mut self, public_paths: PathList) -> Self {
        self.public_paths = public_paths;
        self
    }

    /// Sets the path of the renewal endpoint
    ///
    /// A 401 response from this path ends the session instead of triggering
    /// another renewal.
    pub fn with_refresh_path(mut self, refresh_path: PathList) -> Self {
        self.refresh_path = refresh_path;
        self
    }

    /// Sets the withdrawal gate
    pub fn with_withdrawal_gate(mut self, withdrawal: WithdrawalGate) -> Self {
        self.withdrawal = withdrawal;
        self
    }

    /// Registers the callback invoked when the session is no longer valid
    pub fn on_unauthenticated(mut self, handler: UnauthenticatedHandler) -> Self {
        self.on_unauthenticated = Some(handler);
        self
    }

    fn notify(&self, reason: UnauthenticatedReason) {
        if let Some(handler) = &self.on_unauthenticated {
            handler(reason);
        }
    }

    fn unauthenticated(
        &self,
        reason: UnauthenticatedReason,
        source: Option<RenewalError>,
    ) -> AuthError {
        tracing::warn!(%reason, "session is not authenticated");
        self.notify(reason);
        AuthError::Unauthenticated { reason, source }
    }

    async fn end_session(&self, reason: UnauthenticatedReason) -> AuthError {
        if let Err(error) = self.store.clear().await {
            let error: &(dyn std::error::Error + 'static) = &error;
            tracing::error!(error, "unable to clear credentials");
        }
        self.unauthenticated(reason, None)
    }

    /// Makes sure fresh credentials are held and attaches them to `req`
    ///
    /// Returns the attached access credential, or `None` if the request
    /// already carried its own authorization.
    async fn prepare(
        &self,
        req: &mut Request,
    ) -> std::result::Result<Option<AccessToken>, AuthError> {
        if req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request already carries authorization");
            return Ok(None);
        }

        if self.evaluator.is_access_expiring_soon(self.threshold) {
            if self.evaluator.is_refresh_expired() {
                return Err(self.end_session(UnauthenticatedReason::RefreshExpired).await);
            }

            tracing::debug!("access credential expiring, renewing before sending");
            if let Err(error) = self.coordinator.renew().await {
                let reason = UnauthenticatedReason::RenewalFailed;
                return Err(self.unauthenticated(reason, Some(error)));
            }
        }

        let state = self.store.get();
        let pair = match state.pair() {
            Some(pair) => pair,
            None => {
                let reason = UnauthenticatedReason::MissingCredentials;
                return Err(self.unauthenticated(reason, None));
            }
        };

        attach(req, pair.access_token())?;
        Ok(Some(pair.access_token().to_owned()))
    }

    /// Obtains a credential to replay a request that was rejected with `sent`
    async fn credential_for_replay(
        &self,
        sent: &AccessTokenRef,
    ) -> std::result::Result<AccessToken, AuthError> {
        if let Some(pair) = self.store.get().pair() {
            if pair.access_token() != sent {
                tracing::debug!("credentials were renewed meanwhile, replaying without renewal");
                return Ok(pair.access_token().to_owned());
            }
        }

        match self.coordinator.renew().await {
            Ok(pair) => Ok(pair.access_token().to_owned()),
            Err(error) => {
                let reason = UnauthenticatedReason::RenewalFailed;
                Err(self.unauthenticated(reason, Some(error)))
            }
        }
    }
}

fn attach(req: &mut Request, token: &AccessTokenRef) -> std::result::Result<(), AuthError> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())
        .map_err(AuthError::InvalidCredential)?;
    value.set_sensitive(true);
    req.headers_mut().insert(header::AUTHORIZATION, value);
    Ok(())
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.withdrawal.blocks(&req) {
            let path = self.withdrawal.allow_list.relative_path(req.url()).to_owned();
            tracing::warn!(%path, "request blocked by withdrawal mode");
            self.notify(UnauthenticatedReason::WithdrawalBlocked);
            return Err(reqwest_middleware::Error::middleware(AuthError::Blocked {
                path,
            }));
        }

        if self.public_paths.eval(&req) {
            tracing::trace!(path = req.url().path(), "public path, skipping authentication");
            return next.run(req, extensions).await;
        }

        let sent = match self.prepare(&mut req).await {
            Ok(Some(sent)) => sent,
            Ok(None) => return next.run(req, extensions).await,
            Err(error) => return Err(reqwest_middleware::Error::middleware(error)),
        };

        let is_refresh_endpoint = self.refresh_path.eval(&req);
        let replay = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        if is_refresh_endpoint {
            tracing::debug!("renewal endpoint rejected the refresh credential");
            let error = self.end_session(UnauthenticatedReason::Rejected).await;
            return Err(reqwest_middleware::Error::middleware(error));
        }

        if extensions.get::<Replayed>().is_some() {
            let error = self.unauthenticated(UnauthenticatedReason::Rejected, None);
            return Err(reqwest_middleware::Error::middleware(error));
        }

        let mut replay = match replay {
            Some(replay) => replay,
            None => {
                tracing::debug!("request body cannot be replayed, returning 401 response");
                return Ok(resp);
            }
        };

        extensions.insert(Replayed);
        let token = self
            .credential_for_replay(&sent)
            .await
            .map_err(reqwest_middleware::Error::middleware)?;
        attach(&mut replay, &token).map_err(reqwest_middleware::Error::middleware)?;

        tracing::debug!("replaying request with renewed credentials");
        let resp = next.run(replay, extensions).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            let error = self.unauthenticated(UnauthenticatedReason::Rejected, None);
            return Err(reqwest_middleware::Error::middleware(error));
        }

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use keyward_clock::{TestClock, UnixTime};
    use keyward_tokens::{
        backends::InMemoryBackend, CredentialPair, CredentialState, RefreshToken,
        RefreshTokenRef, Renewer, RenewerError,
    };
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);
    const BASE: &str = "https://api.example.com";

    fn pair(access: &str, access_lifetime: u64) -> CredentialPair {
        CredentialPair::issued_at(
            AccessToken::new(access.to_owned()),
            RefreshToken::from_static("refresh"),
            NOW,
            DurationSecs(access_lifetime),
            DurationSecs(86_400),
        )
    }

    #[derive(Debug, Default)]
    struct CountingRenewer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Renewer for CountingRenewer {
        async fn renew(
            &self,
            _: &RefreshTokenRef,
        ) -> std::result::Result<CredentialPair, RenewerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.fail {
                return Err("refresh credential revoked".into());
            }
            Ok(pair("new", 3_600))
        }
    }

    /// Terminates the chain, answering 401 unless the request carries the accepted token
    struct FakeServer {
        accepted: String,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl FakeServer {
        fn accepting(token: &str) -> Self {
            Self {
                accepted: format!("Bearer {}", token),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Middleware for FakeServer {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization = req.headers().get(header::AUTHORIZATION).map(|v| {
                v.to_str()
                    .expect("authorization header was not valid UTF-8")
                    .to_owned()
            });
            self.seen.lock().unwrap().push(authorization.clone());

            let status = if authorization.as_deref() == Some(self.accepted.as_str()) {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };

            Ok(http::Response::builder()
                .status(status)
                .body(Vec::<u8>::new())
                .unwrap()
                .into())
        }
    }

    struct Fixture {
        store: Arc<CredentialStore>,
        renewer: Arc<CountingRenewer>,
        server: Arc<FakeServer>,
        reasons: Arc<Mutex<Vec<UnauthenticatedReason>>>,
        withdrawal: WithdrawalGate,
        client: reqwest_middleware::ClientWithMiddleware,
    }

    async fn fixture(
        initial: Option<CredentialPair>,
        renewer: CountingRenewer,
        accepted: &str,
    ) -> Fixture {
        let store = Arc::new(
            CredentialStore::new(InMemoryBackend::new()).with_clock(TestClock::new(NOW)),
        );
        if let Some(initial) = initial {
            store.set(initial).await.unwrap();
        }

        let renewer = Arc::new(renewer);
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), renewer.clone()));
        let evaluator = Arc::new(ExpiryEvaluator::new(store.clone()));
        let base = BASE.parse().unwrap();
        let withdrawal = WithdrawalGate::new(PathList::new(&base, ["/account/withdraw"]));
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = reasons.clone();

        let middleware = AuthMiddleware::new(coordinator, evaluator)
            .with_public_paths(PathList::new(&base, ["/auth/login"]))
            .with_refresh_path(PathList::new(&base, ["/auth/refresh"]))
            .with_withdrawal_gate(withdrawal.clone())
            .on_unauthenticated(Arc::new(move |reason| sink.lock().unwrap().push(reason)));

        let server = Arc::new(FakeServer::accepting(accepted));
        let client = ClientBuilder::new(Client::default())
            .with(middleware)
            .with_arc(server.clone())
            .build();

        Fixture {
            store,
            renewer,
            server,
            reasons,
            withdrawal,
            client,
        }
    }

    fn reasons(f: &Fixture) -> Vec<UnauthenticatedReason> {
        f.reasons.lock().unwrap().clone()
    }

    fn auth_error(err: reqwest_middleware::Error) -> AuthError {
        match err {
            reqwest_middleware::Error::Middleware(err) => err.downcast::<AuthError>().unwrap(),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    mod when_credentials_are_fresh {
        use super::*;

        #[tokio::test]
        async fn attaches_the_access_credential() {
            let f = fixture(Some(pair("current", 3_600)), CountingRenewer::default(), "current")
                .await;

            let resp = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(f.server.seen(), vec![Some("Bearer current".to_owned())]);
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn public_paths_are_sent_without_credentials() {
            let f = fixture(Some(pair("current", 3_600)), CountingRenewer::default(), "current")
                .await;

            let resp = f.client.post(format!("{}/auth/login", BASE)).send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(f.server.seen(), vec![None]);
            assert!(reasons(&f).is_empty());
        }

        #[tokio::test]
        async fn existing_authorization_is_left_in_place() {
            let f = fixture(Some(pair("current", 3_600)), CountingRenewer::default(), "override")
                .await;

            let resp = f
                .client
                .get(format!("{}/accounts", BASE))
                .bearer_auth("override")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(f.server.seen(), vec![Some("Bearer override".to_owned())]);
        }
    }

    mod when_credentials_are_expiring {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn renews_before_sending() {
            let f = fixture(Some(pair("old", 60)), CountingRenewer::default(), "new").await;

            let resp = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 1);
            assert_eq!(f.server.seen(), vec![Some("Bearer new".to_owned())]);
        }

        #[tokio::test(start_paused = true)]
        async fn failed_renewal_rejects_without_sending() {
            let renewer = CountingRenewer {
                fail: true,
                ..Default::default()
            };
            let f = fixture(Some(pair("old", 60)), renewer, "new").await;

            let err = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap_err();

            assert!(matches!(
                auth_error(err),
                AuthError::Unauthenticated {
                    reason: UnauthenticatedReason::RenewalFailed,
                    source: Some(RenewalError::Rejected(_)),
                }
            ));
            assert!(f.server.seen().is_empty());
            assert_eq!(reasons(&f), vec![UnauthenticatedReason::RenewalFailed]);
            assert_eq!(f.store.get(), CredentialState::Absent);
        }

        #[tokio::test(start_paused = true)]
        async fn expired_refresh_credential_ends_the_session() {
            let stale = CredentialPair::new(
                AccessToken::from_static("old"),
                RefreshToken::from_static("refresh"),
                NOW - DurationSecs(120),
                NOW - DurationSecs(60),
            );
            let f = fixture(Some(stale), CountingRenewer::default(), "new").await;

            let err = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap_err();

            assert!(matches!(
                auth_error(err),
                AuthError::Unauthenticated {
                    reason: UnauthenticatedReason::RefreshExpired,
                    ..
                }
            ));
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 0);
            assert_eq!(f.store.get(), CredentialState::Absent);
            assert_eq!(reasons(&f), vec![UnauthenticatedReason::RefreshExpired]);
        }
    }

    mod when_no_credentials_are_held {
        use super::*;

        #[tokio::test]
        async fn request_is_not_sent() {
            let f = fixture(None, CountingRenewer::default(), "new").await;

            let err = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap_err();

            assert!(matches!(
                auth_error(err),
                AuthError::Unauthenticated {
                    reason: UnauthenticatedReason::MissingCredentials,
                    ..
                }
            ));
            assert!(f.server.seen().is_empty());
        }
    }

    mod when_the_server_responds_401 {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn concurrent_requests_share_one_renewal_and_are_replayed() {
            let f = fixture(Some(pair("old", 3_600)), CountingRenewer::default(), "new").await;

            let (a, b) = tokio::join!(
                f.client.get(format!("{}/accounts", BASE)).send(),
                f.client.get(format!("{}/balances", BASE)).send(),
            );

            assert_eq!(a.unwrap().status(), StatusCode::OK);
            assert_eq!(b.unwrap().status(), StatusCode::OK);
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 1);

            let seen = f.server.seen();
            assert_eq!(seen.len(), 4);
            assert_eq!(
                seen.iter()
                    .filter(|s| s.as_deref() == Some("Bearer new"))
                    .count(),
                2
            );
        }

        #[tokio::test(start_paused = true)]
        async fn request_is_replayed_only_once() {
            let f = fixture(Some(pair("old", 3_600)), CountingRenewer::default(), "never").await;

            let err = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap_err();

            assert!(matches!(
                auth_error(err),
                AuthError::Unauthenticated {
                    reason: UnauthenticatedReason::Rejected,
                    ..
                }
            ));
            assert_eq!(f.server.seen().len(), 2);
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 1);
            assert_eq!(reasons(&f), vec![UnauthenticatedReason::Rejected]);
        }

        #[tokio::test(start_paused = true)]
        async fn credentials_renewed_elsewhere_are_reused() {
            let f = fixture(Some(pair("old", 3_600)), CountingRenewer::default(), "other").await;

            // Stores new credentials while the first attempt is in flight
            struct RenewOnFirstSight {
                store: Arc<CredentialStore>,
            }

            #[async_trait]
            impl Middleware for RenewOnFirstSight {
                async fn handle(
                    &self,
                    req: Request,
                    extensions: &mut http::Extensions,
                    next: Next<'_>,
                ) -> Result<Response> {
                    if extensions.get::<Replayed>().is_none() {
                        self.store.set(pair("other", 3_600)).await.unwrap();
                    }
                    next.run(req, extensions).await
                }
            }

            let coordinator =
                Arc::new(RefreshCoordinator::new(f.store.clone(), f.renewer.clone()));
            let evaluator = Arc::new(ExpiryEvaluator::new(f.store.clone()));
            let client = ClientBuilder::new(Client::default())
                .with(AuthMiddleware::new(coordinator, evaluator))
                .with(RenewOnFirstSight {
                    store: f.store.clone(),
                })
                .with_arc(f.server.clone())
                .build();

            let resp = client.get(format!("{}/accounts", BASE)).send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 0);
            assert_eq!(
                f.server.seen(),
                vec![
                    Some("Bearer old".to_owned()),
                    Some("Bearer other".to_owned())
                ]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn renewal_endpoint_rejection_ends_the_session() {
            let f = fixture(Some(pair("old", 3_600)), CountingRenewer::default(), "never").await;

            let err = f
                .client
                .post(format!("{}/auth/refresh", BASE))
                .send()
                .await
                .unwrap_err();

            assert!(matches!(
                auth_error(err),
                AuthError::Unauthenticated {
                    reason: UnauthenticatedReason::Rejected,
                    ..
                }
            ));
            assert_eq!(f.server.seen().len(), 1);
            assert_eq!(f.renewer.calls.load(Ordering::SeqCst), 0);
            assert_eq!(f.store.get(), CredentialState::Absent);
        }
    }

    mod when_withdrawal_mode_is_active {
        use super::*;

        #[tokio::test]
        async fn requests_outside_the_allow_list_are_blocked() {
            let f = fixture(Some(pair("current", 3_600)), CountingRenewer::default(), "current")
                .await;
            f.withdrawal.enable();

            let err = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap_err();

            assert!(matches!(
                auth_error(err),
                AuthError::Blocked { path } if path == "/accounts"
            ));
            assert!(f.server.seen().is_empty());
            assert_eq!(reasons(&f), vec![UnauthenticatedReason::WithdrawalBlocked]);
        }

        #[tokio::test]
        async fn allow_listed_requests_proceed_with_credentials() {
            let f = fixture(Some(pair("current", 3_600)), CountingRenewer::default(), "current")
                .await;
            f.withdrawal.enable();

            let resp = f
                .client
                .post(format!("{}/account/withdraw", BASE))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(f.server.seen(), vec![Some("Bearer current".to_owned())]);
        }

        #[tokio::test]
        async fn disabling_lifts_the_gate() {
            let f = fixture(Some(pair("current", 3_600)), CountingRenewer::default(), "current")
                .await;
            f.withdrawal.enable();
            f.withdrawal.disable();

            let resp = f.client.get(format!("{}/accounts", BASE)).send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
        }
    }
}
