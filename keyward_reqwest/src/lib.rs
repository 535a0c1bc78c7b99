//! An authenticated request pipeline for `reqwest`
//!
//! The [`ApiClient`] attaches the session's access credential to every
//! outbound request and keeps that credential fresh. Credentials expiring
//! soon are renewed before the request is sent. A request rejected with
//! `401 Unauthorized` is replayed exactly once with renewed credentials.
//! However many requests observe an expired credential at once, only a
//! single renewal is performed, and all of them wait on its outcome.
//!
//! Server errors are retried according to a per-request
//! [`RetryPolicy`][keyward_tokens::RetryPolicy], and response envelopes are
//! unwrapped so that callers only see the payload or an [`ApiError`].
//!
//! ```
//! use keyward_reqwest::{ApiClient, ApiRequest, PipelineConfig};
//! use keyward_tokens::{AccessToken, CredentialPair, RefreshToken};
//! use keyward_clock::{Clock, DurationSecs, System};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let client = ApiClient::builder(PipelineConfig::new("https://api.example.com"))
//!     .on_unauthenticated(|reason| println!("please sign in again: {}", reason))
//!     .build()
//!     .unwrap();
//!
//! let pair = CredentialPair::issued_at(
//!     AccessToken::from_static("access"),
//!     RefreshToken::from_static("refresh"),
//!     System.now(),
//!     DurationSecs::from_minutes(30),
//!     DurationSecs::from_minutes(60 * 24),
//! );
//! client.login(pair).await.unwrap();
//!
//! let request = ApiRequest::get("/accounts").query("page", "1");
//! # async move {
//! let accounts: serde_json::Value = client.send(request).await.unwrap();
//! # };
//! # }
//! ```
//!
//! The pieces of the pipeline are also usable on their own. The
//! [`AuthMiddleware`] and [`RetryMiddleware`] can be placed into any
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware) stack,
//! and [`HttpRenewer`] can drive a
//! [`RefreshCoordinator`][keyward_tokens::RefreshCoordinator] directly.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod auth;
mod client;
mod config;
mod envelope;
mod error;
mod paths;
mod renewal;
mod retry;

pub use auth::{AuthMiddleware, Replayed, UnauthenticatedHandler, WithdrawalGate};
pub use client::{ApiClient, ApiClientBuilder, ApiRequest, BuildError, ErrorNotifier};
pub use config::{
    PipelineConfig, RefreshTransport, RetrySettings, DEFAULT_REFRESH_PATH, DEFAULT_TIMEOUT,
};
pub use envelope::{Envelope, EnvelopeError};
pub use error::{ApiError, ApiErrorKind, AuthError, UnauthenticatedReason};
pub use paths::PathList;
pub use renewal::{HttpRenewer, RenewalRequestError};
pub use retry::RetryMiddleware;
