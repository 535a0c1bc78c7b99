use std::{fmt, sync::Arc, time::Duration};

use keyward_clock::{Clock, System};
use keyward_tokens::{
    backends::{CredentialBackend, InMemoryBackend},
    CredentialPair, CredentialStore, ExpiryEvaluator, InitOutcome, ProactiveScheduler,
    RefreshCoordinator, RenewalError, Renewer, RetryPolicy, SchedulerConfig,
};
use reqwest::{Method, Response, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    envelope::Envelope, ApiError, ApiErrorKind, AuthMiddleware, HttpRenewer, PathList,
    PipelineConfig, RetryMiddleware, UnauthenticatedHandler, UnauthenticatedReason,
    WithdrawalGate,
};

/// A callback invoked with every error from a request not marked silent
pub type ErrorNotifier = Arc<dyn Fn(&ApiError) + Send + Sync + 'static>;

/// An error when constructing an [`ApiClient`]
#[derive(Debug, Error)]
pub enum BuildError {
    /// The base URL could not be parsed
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl {
        /// The configured base URL
        url: String,
        /// Why it could not be parsed
        reason: String,
    },
    /// The underlying HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    Client(#[from] reqwest::Error),
}

/// A request to be sent through an [`ApiClient`]
#[derive(Debug)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Result<serde_json::Value, String>>,
    silent: bool,
    timeout: Option<Duration>,
}

impl ApiRequest {
    /// Constructs a request for `path`, relative to the base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            silent: false,
            timeout: None,
        }
    }

    /// Constructs a `GET` request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Constructs a `POST` request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Constructs a `PUT` request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Constructs a `DELETE` request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.body = Some(serde_json::to_value(body).map_err(|e| e.to_string()));
        self
    }

    /// Marks the request as silent
    ///
    /// Errors from a silent request are still returned and logged, but are not
    /// passed to the error notifier.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Overrides the default timeout for this request
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the request is marked silent
    pub fn is_silent(&self) -> bool {
        self.silent
    }
}

/// Builder for an [`ApiClient`]
pub struct ApiClientBuilder {
    config: PipelineConfig,
    client: Option<reqwest::Client>,
    store: Option<CredentialStore>,
    clock: Arc<dyn Clock + Send + Sync>,
    renewer: Option<Arc<dyn Renewer>>,
    retry_policy: Option<RetryPolicy>,
    middleware: Vec<Arc<dyn Middleware>>,
    on_unauthenticated: Option<UnauthenticatedHandler>,
    on_error: Option<ErrorNotifier>,
}

impl fmt::Debug for ApiClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClientBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

impl ApiClientBuilder {
    /// Starts building a client from `config`
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            client: None,
            store: None,
            clock: Arc::new(System),
            renewer: None,
            retry_policy: None,
            middleware: Vec::new(),
            on_unauthenticated: None,
            on_error: None,
        }
    }

    /// Uses an existing `reqwest` client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Persists credentials to `backend`
    ///
    /// Credentials are kept in memory only by default.
    pub fn with_backend(mut self, backend: impl CredentialBackend + 'static) -> Self {
        self.store = Some(CredentialStore::new(backend));
        self
    }

    /// Sets the clock used to judge credential expiry
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Renews credentials with a custom [`Renewer`] instead of the renewal endpoint
    pub fn with_renewer(mut self, renewer: impl Renewer + 'static) -> Self {
        let renewer: Arc<dyn Renewer> = Arc::new(renewer);
        self.renewer = Some(renewer);
        self
    }

    /// Replaces the retry policy derived from the configuration
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Appends a middleware below the pipeline
    ///
    /// The middleware sees every request after credentials are attached,
    /// including requests to the renewal endpoint.
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        let middleware: Arc<dyn Middleware> = Arc::new(middleware);
        self.middleware.push(middleware);
        self
    }

    /// Registers the callback invoked when the session is no longer valid
    pub fn on_unauthenticated(
        mut self,
        handler: impl Fn(UnauthenticatedReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_unauthenticated = Some(Arc::new(handler));
        self
    }

    /// Registers the callback invoked with every non-silent error
    pub fn on_error(mut self, notifier: impl Fn(&ApiError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(notifier));
        self
    }

    /// Builds the client
    ///
    /// Unless the configured proactive interval is zero, this spawns the
    /// proactive refresh task, so it must be called from within a tokio
    /// runtime.
    pub fn build(self) -> Result<ApiClient, BuildError> {
        let config = self.config;
        let base_url = Url::parse(&config.base_url).map_err(|e| BuildError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder().build()?,
        };

        let store = Arc::new(
            self.store
                .unwrap_or_else(|| CredentialStore::new(InMemoryBackend::new()))
                .with_clock(Arc::clone(&self.clock)),
        );

        let renewer: Arc<dyn Renewer> = match self.renewer {
            Some(renewer) => renewer,
            None => {
                let refresh_url = join(&base_url, &config.refresh_path)?;
                let renewal_client = with_middleware(
                    ClientBuilder::new(client.clone()),
                    &self.middleware,
                )
                .build();
                Arc::new(
                    HttpRenewer::new(
                        renewal_client,
                        refresh_url,
                        config.refresh_transport.clone(),
                    )
                    .with_timeout(config.timeout)
                    .with_clock(Arc::clone(&self.clock)),
                )
            }
        };

        let coordinator = Arc::new(
            RefreshCoordinator::new(Arc::clone(&store), renewer).with_timeout(config.timeout),
        );
        let evaluator = Arc::new(ExpiryEvaluator::new(Arc::clone(&store)));
        let withdrawal =
            WithdrawalGate::new(PathList::new(&base_url, &config.withdrawal_allow_list));
        let retry_policy = Arc::new(
            self.retry_policy
                .unwrap_or_else(|| RetryPolicy::new(config.retry.into())),
        );

        let mut auth = AuthMiddleware::new(Arc::clone(&coordinator), Arc::clone(&evaluator))
            .with_threshold(config.expiry_threshold())
            .with_public_paths(PathList::new(&base_url, &config.public_paths))
            .with_refresh_path(PathList::new(&base_url, [&config.refresh_path]))
            .with_withdrawal_gate(withdrawal.clone());
        if let Some(handler) = &self.on_unauthenticated {
            auth = auth.on_unauthenticated(Arc::clone(handler));
        }

        let http = with_middleware(
            ClientBuilder::new(client)
                .with(auth)
                .with(RetryMiddleware::new(Arc::clone(&retry_policy))),
            &self.middleware,
        )
        .build();

        let scheduler = if config.proactive_interval.is_zero() {
            None
        } else {
            Some(ProactiveScheduler::spawn(
                Arc::clone(&coordinator),
                Arc::clone(&evaluator),
                SchedulerConfig::new(config.proactive_interval, config.expiry_threshold()),
            ))
        };

        Ok(ApiClient {
            base_url,
            http,
            store,
            coordinator,
            evaluator,
            retry_policy,
            withdrawal,
            timeout: config.timeout,
            on_unauthenticated: self.on_unauthenticated,
            on_error: self.on_error,
            _scheduler: scheduler,
        })
    }
}

fn with_middleware(mut builder: ClientBuilder, middleware: &[Arc<dyn Middleware>]) -> ClientBuilder {
    for m in middleware {
        builder = builder.with_arc(Arc::clone(m));
    }
    builder
}

fn join(base_url: &Url, path: &str) -> Result<Url, BuildError> {
    let joined = format!(
        "{}/{}",
        base_url.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| BuildError::InvalidBaseUrl {
        url: joined,
        reason: e.to_string(),
    })
}

/// An authenticated client for the API
///
/// All requests pass through the authentication pipeline: credentials are
/// attached and renewed as needed, transient server failures are retried,
/// and response envelopes are unwrapped. Session state is managed through
/// [`initialize()`][Self::initialize()], [`login()`][Self::login()] and
/// [`logout()`][Self::logout()].
///
/// Dropping the client stops proactive renewal.
pub struct ApiClient {
    base_url: Url,
    http: ClientWithMiddleware,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    evaluator: Arc<ExpiryEvaluator>,
    retry_policy: Arc<RetryPolicy>,
    withdrawal: WithdrawalGate,
    timeout: Duration,
    on_unauthenticated: Option<UnauthenticatedHandler>,
    on_error: Option<ErrorNotifier>,
    _scheduler: Option<ProactiveScheduler>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("store", &self.store)
            .field("withdrawal", &self.withdrawal)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Starts building a client from `config`
    pub fn builder(config: PipelineConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    /// Loads persisted credentials
    ///
    /// If the persisted refresh credential has already expired, the
    /// credentials are discarded and the unauthenticated callback is invoked.
    pub async fn initialize(&self) -> Result<InitOutcome, ApiError> {
        let outcome = self
            .store
            .initialize()
            .await
            .map_err(|e| self.report(ApiError::new(ApiErrorKind::Storage(e))))?;

        if outcome.refresh_was_expired {
            tracing::info!("persisted session has expired");
            if let Some(handler) = &self.on_unauthenticated {
                handler(UnauthenticatedReason::RefreshExpired);
            }
        }

        Ok(outcome)
    }

    /// Starts a session with credentials obtained from a login
    pub async fn login(&self, pair: CredentialPair) -> Result<(), ApiError> {
        self.store
            .set(pair)
            .await
            .map_err(|e| self.report(ApiError::new(ApiErrorKind::Storage(e))))?;
        tracing::info!("session started");
        Ok(())
    }

    /// Ends the session, discarding all credentials
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.store
            .clear()
            .await
            .map_err(|e| self.report(ApiError::new(ApiErrorKind::Storage(e))))?;
        tracing::info!("session ended");
        Ok(())
    }

    /// Renews the credentials now
    ///
    /// A failed renewal ends the session and invokes the unauthenticated
    /// callback, as it does when a request triggers the renewal.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let error = match self.coordinator.renew().await {
            Ok(_) => return Ok(()),
            Err(error) => error,
        };

        let reason = match &error {
            RenewalError::Superseded => None,
            RenewalError::NotFound => Some(UnauthenticatedReason::MissingCredentials),
            _ => Some(UnauthenticatedReason::RenewalFailed),
        };
        if let Some(reason) = reason {
            tracing::warn!(%reason, "session is not authenticated");
            if let Some(handler) = &self.on_unauthenticated {
                handler(reason);
            }
        }

        Err(self.report(ApiError::new(ApiErrorKind::Renewal(error))))
    }

    /// Whether a session with a usable refresh credential is held
    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_present() && !self.evaluator.is_refresh_expired()
    }

    /// Restricts requests to the withdrawal allow-list
    pub fn enable_withdrawal_mode(&self) {
        self.withdrawal.enable();
    }

    /// Lifts the withdrawal restriction
    pub fn disable_withdrawal_mode(&self) {
        self.withdrawal.disable();
    }

    /// Whether withdrawal mode is active
    pub fn is_withdrawal_mode(&self) -> bool {
        self.withdrawal.is_active()
    }

    /// The credential store backing this client
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// The retry policy used for transient failures
    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.retry_policy
    }

    /// Sends a `GET` request to `path`
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    /// Sends a `POST` request with a JSON body to `path`
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)).await
    }

    /// Sends a request, returning the unwrapped response payload
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let silent = request.silent;
        let method = request.method.clone();
        let path = request.path.clone();

        self.execute(request).await.map_err(|kind| {
            let error = ApiError::new(kind).silenced(silent);
            let source: &(dyn std::error::Error + 'static) = &error;
            tracing::debug!(%method, %path, silent, error = source, "request failed");
            self.report(error)
        })
    }

    async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiErrorKind> {
        let url = join(&self.base_url, &request.path)
            .map_err(|e| ApiErrorKind::InvalidRequest(e.to_string()))?;

        let mut builder = self
            .http
            .request(request.method, url)
            .timeout(request.timeout.unwrap_or(self.timeout));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.json(&body.map_err(ApiErrorKind::InvalidRequest)?);
        }

        let resp = builder.send().await.map_err(ApiErrorKind::from)?;
        unwrap_envelope(resp).await
    }

    fn report(&self, error: ApiError) -> ApiError {
        if !error.is_silent() {
            if let Some(notifier) = &self.on_error {
                notifier(&error);
            }
        }
        error
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(resp: Response) -> Result<T, ApiErrorKind> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(ApiErrorKind::Network)?;

    if !status.is_success() {
        let error = match serde_json::from_slice::<Envelope<serde_json::Value>>(&body) {
            Ok(Envelope::Error { error, .. }) => Some(error),
            _ => None,
        };
        return Err(ApiErrorKind::Http { status, error });
    }

    match serde_json::from_slice::<Envelope<T>>(&body).map_err(ApiErrorKind::Decode)? {
        Envelope::Success { data, .. } => Ok(data),
        Envelope::Error { message, error, .. } => Err(ApiErrorKind::Business {
            code: error.code,
            message,
            details: error.details,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use keyward_clock::{DurationSecs, TestClock, UnixTime};
    use keyward_tokens::{AccessToken, RefreshToken, RetryConfig, RetryKey};
    use reqwest::{header, Request, StatusCode};
    use reqwest_middleware::{Next, Result};
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn pair(access: &str, refresh_lifetime: u64) -> CredentialPair {
        CredentialPair::issued_at(
            AccessToken::new(access.to_owned()),
            RefreshToken::from_static("refresh"),
            NOW,
            DurationSecs(3_600),
            DurationSecs(refresh_lifetime),
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        id: u32,
        name: String,
    }

    #[derive(Default)]
    struct ApiState {
        fail_refresh: bool,
        renewals: AtomicUsize,
        requests: Mutex<Vec<String>>,
    }

    impl ApiState {
        fn count(&self, request: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| *r == request)
                .count()
        }
    }

    /// Terminates the chain, behaving like the API for a handful of paths
    ///
    /// Only `Bearer new` is accepted on authenticated paths.
    struct FakeApi(Arc<ApiState>);

    fn respond(status: StatusCode, body: serde_json::Value) -> Response {
        http::Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .unwrap()
            .into()
    }

    fn failure(code: &str, message: &str) -> serde_json::Value {
        json!({ "status": "ERROR", "message": message, "error": { "code": code } })
    }

    #[async_trait]
    impl Middleware for FakeApi {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let path = req.url().path().to_owned();
            self.0
                .requests
                .lock()
                .unwrap()
                .push(format!("{} {}", req.method(), path));
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            let resp = match path.as_str() {
                "/auth/refresh" => {
                    self.0.renewals.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if self.0.fail_refresh || !req.headers().contains_key("x-refresh-token") {
                        respond(
                            StatusCode::BAD_REQUEST,
                            failure("AUTH_INVALID_REFRESH", "refresh token is invalid"),
                        )
                    } else {
                        respond(
                            StatusCode::OK,
                            json!({
                                "status": "SUCCESS",
                                "data": {
                                    "accessToken": "new",
                                    "refreshToken": "refresh-2",
                                    "expiresIn": 3_600,
                                    "refreshExpiresIn": 86_400,
                                },
                            }),
                        )
                    }
                }
                _ if authorization.as_deref() != Some("Bearer new") => respond(
                    StatusCode::UNAUTHORIZED,
                    failure("UNAUTHORIZED", "authentication required"),
                ),
                "/accounts" => respond(
                    StatusCode::OK,
                    json!({ "status": "SUCCESS", "data": { "id": 7, "name": "checking" } }),
                ),
                "/account/withdraw" => respond(
                    StatusCode::OK,
                    json!({ "status": "SUCCESS", "data": null, "message": "withdrawn" }),
                ),
                "/transfers" => respond(
                    StatusCode::OK,
                    json!({
                        "status": "ERROR",
                        "message": "insufficient funds",
                        "error": { "code": "INSUFFICIENT_FUNDS", "details": { "available": 10 } },
                    }),
                ),
                "/flaky" => respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    failure("UNAVAILABLE", "try again later"),
                ),
                _ => respond(StatusCode::NOT_FOUND, failure("NOT_FOUND", "no such resource")),
            };

            Ok(resp)
        }
    }

    struct Fixture {
        client: ApiClient,
        api: Arc<ApiState>,
        reasons: Arc<Mutex<Vec<UnauthenticatedReason>>>,
        notified: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(fail_refresh: bool) -> Fixture {
        let api = Arc::new(ApiState {
            fail_refresh,
            ..ApiState::default()
        });
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let notified = Arc::new(Mutex::new(Vec::new()));

        let mut config = PipelineConfig::new("https://api.example.com");
        config.proactive_interval = Duration::ZERO;
        config.withdrawal_allow_list = vec!["/account/withdraw".to_owned()];

        let (reason_sink, error_sink) = (reasons.clone(), notified.clone());
        let client = ApiClient::builder(config)
            .with_clock(TestClock::new(NOW))
            .with_retry_policy(
                RetryPolicy::new(RetryConfig::new(3, Duration::from_millis(100)))
                    .without_jitter(),
            )
            .with_middleware(FakeApi(api.clone()))
            .on_unauthenticated(move |reason| reason_sink.lock().unwrap().push(reason))
            .on_error(move |error| error_sink.lock().unwrap().push(error.to_string()))
            .build()
            .unwrap();

        Fixture {
            client,
            api,
            reasons,
            notified,
        }
    }

    fn current_access(client: &ApiClient) -> Option<String> {
        client
            .store()
            .get()
            .pair()
            .map(|p| p.access_token().as_str().to_owned())
    }

    mod when_credentials_are_rejected {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn concurrent_requests_share_one_renewal() {
            let f = fixture(false);
            f.client.login(pair("old", 86_400)).await.unwrap();

            let (first, second) = tokio::join!(
                f.client.get::<Account>("/accounts"),
                f.client.get::<Account>("/accounts"),
            );

            let expected = Account {
                id: 7,
                name: "checking".to_owned(),
            };
            assert_eq!(first.unwrap(), expected);
            assert_eq!(second.unwrap(), expected);
            assert_eq!(f.api.renewals.load(Ordering::SeqCst), 1);
            assert_eq!(current_access(&f.client).as_deref(), Some("new"));
            assert!(f.reasons.lock().unwrap().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn rejected_renewal_ends_the_session() {
            let f = fixture(true);
            f.client.login(pair("old", 86_400)).await.unwrap();

            let err = f.client.get::<Account>("/accounts").await.unwrap_err();

            assert!(err.is_unauthenticated());
            assert_eq!(f.api.renewals.load(Ordering::SeqCst), 1);
            assert_eq!(f.api.count("POST /auth/refresh"), 1);
            assert!(!f.client.store().get().is_present());
            assert_eq!(
                *f.reasons.lock().unwrap(),
                vec![UnauthenticatedReason::RenewalFailed]
            );
            assert_eq!(f.notified.lock().unwrap().len(), 1);
        }
    }

    mod when_the_server_fails {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn server_errors_are_retried_then_reported() {
            let f = fixture(false);
            f.client.login(pair("new", 86_400)).await.unwrap();

            let err = f
                .client
                .get::<serde_json::Value>("/flaky")
                .await
                .unwrap_err();

            assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
            match err.kind() {
                ApiErrorKind::Http {
                    error: Some(error), ..
                } => assert_eq!(error.code, "UNAVAILABLE"),
                other => panic!("unexpected error kind: {:?}", other),
            }
            assert_eq!(f.api.count("GET /flaky"), 3);
            assert_eq!(
                f.client
                    .retry_policy()
                    .failures(&RetryKey::new("GET", "/flaky")),
                0
            );
            assert_eq!(f.notified.lock().unwrap().len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn silent_requests_are_not_notified() {
            let f = fixture(false);
            f.client.login(pair("new", 86_400)).await.unwrap();

            let err = f
                .client
                .send::<serde_json::Value>(ApiRequest::get("/flaky").silent())
                .await
                .unwrap_err();

            assert!(err.is_silent());
            assert!(f.notified.lock().unwrap().is_empty());
        }
    }

    mod when_the_api_reports_a_business_error {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn envelope_error_is_surfaced() {
            let f = fixture(false);
            f.client.login(pair("new", 86_400)).await.unwrap();

            let err = f
                .client
                .post::<_, serde_json::Value>("/transfers", &json!({ "amount": 100 }))
                .await
                .unwrap_err();

            match err.kind() {
                ApiErrorKind::Business {
                    code,
                    message,
                    details,
                } => {
                    assert_eq!(code, "INSUFFICIENT_FUNDS");
                    assert_eq!(message, "insufficient funds");
                    assert_eq!(details, &Some(json!({ "available": 10 })));
                }
                other => panic!("unexpected error kind: {:?}", other),
            }
            assert_eq!(f.api.count("POST /transfers"), 1);
        }
    }

    mod session {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn initialize_discards_expired_session() {
            let f = fixture(false);
            f.client.login(pair("new", 0)).await.unwrap();

            let outcome = f.client.initialize().await.unwrap();

            assert!(outcome.refresh_was_expired);
            assert!(!f.client.is_authenticated());
            assert_eq!(
                *f.reasons.lock().unwrap(),
                vec![UnauthenticatedReason::RefreshExpired]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn logout_discards_credentials() {
            let f = fixture(false);
            f.client.login(pair("new", 86_400)).await.unwrap();
            assert!(f.client.is_authenticated());

            f.client.logout().await.unwrap();

            assert!(!f.client.is_authenticated());
            assert_eq!(current_access(&f.client), None);
        }

        #[tokio::test(start_paused = true)]
        async fn explicit_refresh_renews_credentials() {
            let f = fixture(false);
            f.client.login(pair("old", 86_400)).await.unwrap();

            f.client.refresh().await.unwrap();

            assert_eq!(current_access(&f.client).as_deref(), Some("new"));
            assert_eq!(f.api.renewals.load(Ordering::SeqCst), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn rejected_explicit_refresh_ends_the_session() {
            let f = fixture(true);
            f.client.login(pair("old", 86_400)).await.unwrap();

            let err = f.client.refresh().await.unwrap_err();

            assert!(matches!(
                err.kind(),
                ApiErrorKind::Renewal(RenewalError::Rejected(_))
            ));
            assert!(!f.client.is_authenticated());
            assert_eq!(
                *f.reasons.lock().unwrap(),
                vec![UnauthenticatedReason::RenewalFailed]
            );
            assert_eq!(f.notified.lock().unwrap().len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn explicit_refresh_without_session_reports_missing_credentials() {
            let f = fixture(false);

            let err = f.client.refresh().await.unwrap_err();

            assert!(matches!(
                err.kind(),
                ApiErrorKind::Renewal(RenewalError::NotFound)
            ));
            assert_eq!(
                *f.reasons.lock().unwrap(),
                vec![UnauthenticatedReason::MissingCredentials]
            );
            assert_eq!(f.api.renewals.load(Ordering::SeqCst), 0);
        }
    }

    mod in_withdrawal_mode {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn only_allow_listed_paths_are_sent() {
            let f = fixture(false);
            f.client.login(pair("new", 86_400)).await.unwrap();
            f.client.enable_withdrawal_mode();
            assert!(f.client.is_withdrawal_mode());

            let err = f.client.get::<Account>("/accounts").await.unwrap_err();
            assert!(matches!(err.kind(), ApiErrorKind::Blocked { path } if path == "/accounts"));
            assert_eq!(f.api.count("GET /accounts"), 0);

            let withdrawn: serde_json::Value = f
                .client
                .post("/account/withdraw", &json!({ "reason": "moving" }))
                .await
                .unwrap();
            assert_eq!(withdrawn, serde_json::Value::Null);

            assert_eq!(
                *f.reasons.lock().unwrap(),
                vec![UnauthenticatedReason::WithdrawalBlocked]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn disabling_restores_access() {
            let f = fixture(false);
            f.client.login(pair("new", 86_400)).await.unwrap();
            f.client.enable_withdrawal_mode();
            f.client.disable_withdrawal_mode();

            let account = f.client.get::<Account>("/accounts").await.unwrap();
            assert_eq!(account.id, 7);
        }
    }
}
