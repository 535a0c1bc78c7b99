use std::{error, fmt};

use keyward_tokens::{RenewalError, StorageError};
use reqwest::StatusCode;
use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Why the pipeline concluded that the session is no longer valid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// The refresh credential has expired
    RefreshExpired,
    /// Renewing the credentials failed
    RenewalFailed,
    /// No credentials are held
    MissingCredentials,
    /// The server rejected the request even after renewal, or rejected the
    /// refresh credential itself
    Rejected,
    /// The request was blocked by withdrawal mode
    WithdrawalBlocked,
}

impl fmt::Display for UnauthenticatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RefreshExpired => "refresh credential expired",
            Self::RenewalFailed => "credential renewal failed",
            Self::MissingCredentials => "no credentials held",
            Self::Rejected => "credentials rejected",
            Self::WithdrawalBlocked => "blocked by withdrawal mode",
        })
    }
}

/// A failure raised inside the authentication middleware
///
/// These travel through [`reqwest_middleware::Error::Middleware`] and are
/// recovered by the [`ApiClient`][crate::ApiClient].
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request was not allowed while withdrawal mode is active
    #[error("request to {path} blocked while withdrawal mode is active")]
    Blocked {
        /// The blocked path
        path: String,
    },
    /// The session is not authenticated
    #[error("session is not authenticated: {reason}")]
    Unauthenticated {
        /// Why the session is not authenticated
        reason: UnauthenticatedReason,
        /// The renewal failure that led here, if any
        #[source]
        source: Option<RenewalError>,
    },
    /// The access credential cannot be sent as a header value
    #[error("access credential is not a valid header value")]
    InvalidCredential(#[source] http::header::InvalidHeaderValue),
}

/// The kind of failure an [`ApiError`] represents
#[derive(Debug, Error)]
pub enum ApiErrorKind {
    /// No response was received
    #[error("no response received")]
    Network(#[source] reqwest::Error),
    /// A response was received with an error status
    #[error("request failed with status {status}")]
    Http {
        /// The response status
        status: StatusCode,
        /// The error detail from the response envelope, if one was sent
        error: Option<EnvelopeError>,
    },
    /// A successful response carried an error envelope
    #[error("{message} ({code})")]
    Business {
        /// Machine-readable error code
        code: String,
        /// Human-readable message
        message: String,
        /// Further detail, if any
        details: Option<serde_json::Value>,
    },
    /// The session is not authenticated
    #[error("session is not authenticated: {reason}")]
    Unauthenticated {
        /// Why the session is not authenticated
        reason: UnauthenticatedReason,
        /// The renewal failure that led here, if any
        #[source]
        source: Option<RenewalError>,
    },
    /// The request was blocked by withdrawal mode
    #[error("request to {path} blocked while withdrawal mode is active")]
    Blocked {
        /// The blocked path
        path: String,
    },
    /// An explicit renewal failed
    #[error("credential renewal failed")]
    Renewal(#[source] RenewalError),
    /// Credentials could not be persisted
    #[error("credential storage failed")]
    Storage(#[source] StorageError),
    /// The response body could not be decoded
    #[error("unable to decode response body")]
    Decode(#[source] serde_json::Error),
    /// The request could not be constructed
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Some other middleware failed
    #[error("request pipeline failed")]
    Pipeline(#[source] reqwest_middleware::Error),
}

/// An error returned by the [`ApiClient`][crate::ApiClient]
#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
    silent: bool,
}

impl ApiError {
    pub(crate) fn new(kind: ApiErrorKind) -> Self {
        Self {
            kind,
            silent: false,
        }
    }

    pub(crate) fn silenced(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// The kind of failure
    pub fn kind(&self) -> &ApiErrorKind {
        &self.kind
    }

    /// Consumes the error, returning its kind
    pub fn into_kind(self) -> ApiErrorKind {
        self.kind
    }

    /// Whether the request that failed was marked silent
    ///
    /// Silent errors are not passed to the error notifier.
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// The HTTP status of the response, if one was received with an error status
    pub fn status(&self) -> Option<StatusCode> {
        match &self.kind {
            ApiErrorKind::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error means the session is no longer valid
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Unauthenticated { .. })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl error::Error for ApiError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<ApiErrorKind> for ApiError {
    fn from(kind: ApiErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<AuthError> for ApiErrorKind {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Blocked { path } => Self::Blocked { path },
            AuthError::Unauthenticated { reason, source } => {
                Self::Unauthenticated { reason, source }
            }
            AuthError::InvalidCredential(error) => Self::InvalidRequest(error.to_string()),
        }
    }
}

impl From<reqwest_middleware::Error> for ApiErrorKind {
    fn from(error: reqwest_middleware::Error) -> Self {
        match error {
            reqwest_middleware::Error::Reqwest(error) if error.is_builder() => {
                Self::InvalidRequest(error.to_string())
            }
            reqwest_middleware::Error::Reqwest(error) => Self::Network(error),
            reqwest_middleware::Error::Middleware(error) => match error.downcast::<AuthError>() {
                Ok(auth) => auth.into(),
                Err(other) => Self::Pipeline(reqwest_middleware::Error::Middleware(other)),
            },
        }
    }
}
