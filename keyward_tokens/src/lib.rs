//! Facilities for keeping a client session's credentials fresh
//!
//! A session is represented by a pair of credentials: a short-lived access
//! credential that is attached to requests, and a longer-lived refresh
//! credential that is exchanged for a new pair when the access credential
//! is about to lapse. This crate manages that pair on behalf of a client so
//! that the code making requests need be hardly aware that renewals are
//! happening at all.
//!
//! The pieces fit together as follows:
//!
//! * A [`CredentialStore`] holds the current pair in memory and mirrors it to
//!   a [`CredentialBackend`][backends::CredentialBackend], such as a JSON file
//!   on disk.
//! * An [`ExpiryEvaluator`] answers whether the access credential is about to
//!   expire and whether the refresh credential already has.
//! * A [`RefreshCoordinator`] performs renewals through a [`Renewer`], ensuring
//!   that concurrent callers share a single in-flight exchange.
//! * A [`ProactiveScheduler`] periodically renews credentials in the
//!   background before they expire.
//! * A [`RetryPolicy`] decides whether a failed request is worth trying again.
//!
//! # General Flow
//!
//! On application start-up, load any persisted credentials, then wire up
//! renewal and the background scheduler.
//!
//! ```
//! use std::sync::Arc;
//!
//! use keyward_clock::{Clock, DurationSecs, System};
//! use keyward_tokens::{
//!     backends::InMemoryBackend, renewer_fn, AccessToken, CredentialPair, CredentialStore,
//!     ExpiryEvaluator, ProactiveScheduler, RefreshCoordinator, RefreshToken, RenewerError,
//!     SchedulerConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let store = Arc::new(CredentialStore::new(InMemoryBackend::new()));
//! store.initialize().await?;
//!
//! let renewer = renewer_fn(|refresh: RefreshToken| async move {
//!     // Exchange `refresh` with the authority here
//!     let now = System.now();
//!     Ok::<_, RenewerError>(CredentialPair::issued_at(
//!         AccessToken::from_static("fresh access"),
//!         refresh,
//!         now,
//!         DurationSecs::from_minutes(30),
//!         DurationSecs::from_minutes(60 * 24),
//!     ))
//! });
//!
//! let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), renewer));
//! let evaluator = Arc::new(ExpiryEvaluator::new(store.clone()));
//! let scheduler =
//!     ProactiveScheduler::spawn(coordinator, evaluator, SchedulerConfig::default());
//! # drop(scheduler);
//! # Ok(())
//! # }
//! ```
//!
//! The `keyward_reqwest` crate builds on these pieces to attach credentials
//! to outgoing HTTP requests and to recover from rejected ones.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `file`: Provides a credential backend persisting to the local filesystem.
//! * `rand`: Provides for an implementation of [JitterSource][jitter::JitterSource] based on the
//!   random number generator provided by the [rand] crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backends;
mod braids;
mod coordinator;
mod credentials;
mod expiry;
pub mod jitter;
mod retry;
mod scheduler;
mod store;

pub use backends::{
    ACCESS_EXPIRES_AT_KEY, ACCESS_TOKEN_KEY, REFRESH_EXPIRES_AT_KEY, REFRESH_TOKEN_KEY,
};
pub use braids::*;
pub use coordinator::{
    renewer_fn, FnRenewer, RefreshCoordinator, RenewalError, Renewer, RenewerError,
    DEFAULT_RENEWAL_TIMEOUT,
};
pub use credentials::{format_timestamp, parse_timestamp, CredentialPair, CredentialState};
pub use expiry::{ExpiryEvaluator, DEFAULT_EXPIRY_THRESHOLD};
pub use retry::{FailureClass, RetryConfig, RetryKey, RetryPolicy};
pub use scheduler::{ProactiveScheduler, SchedulerConfig, DEFAULT_PROACTIVE_INTERVAL};
pub use store::{CredentialStore, InitOutcome, StorageError, StorageOperation};
