//! Renewal of credentials against the API's renewal endpoint

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use keyward_clock::{Clock, DurationSecs, System, UnixTime};
use keyward_tokens::{
    parse_timestamp, AccessToken, CredentialPair, RefreshToken, RefreshTokenRef, Renewer,
    RenewerError,
};
use reqwest::{header, StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use thiserror::Error;

use crate::{config::RefreshTransport, envelope::Envelope};

/// An error when exchanging the refresh credential
#[derive(Debug, Error)]
pub enum RenewalRequestError {
    /// The renewal request could not be sent
    #[error("error sending renewal request")]
    Send(#[source] reqwest_middleware::Error),
    /// The renewal endpoint rejected the refresh credential
    #[error("refresh credential rejected with status {0}")]
    Rejected(StatusCode),
    /// The renewal endpoint failed
    #[error("renewal endpoint responded with status {0}")]
    Status(StatusCode),
    /// The response body could not be read
    #[error("error reading renewal response body")]
    BodyRead(#[source] reqwest::Error),
    /// The response body was not a valid renewal response
    #[error("error deserializing renewal response")]
    Deserialize(#[from] serde_json::Error),
    /// The renewal endpoint reported a business error
    #[error("renewal failed: {message} ({code})")]
    Business {
        /// Machine-readable error code
        code: String,
        /// Human-readable message
        message: String,
    },
    /// The refresh credential cannot be sent as a header value
    #[error("refresh credential is not a valid header value")]
    InvalidCredential(#[source] header::InvalidHeaderValue),
    /// The configured refresh header name is not a valid header name
    #[error("refresh header name is not valid")]
    InvalidHeaderName(#[source] header::InvalidHeaderName),
}

/// An expiry as sent by the renewal endpoint
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Expiry {
    Seconds(u64),
    Text(String),
}

impl Expiry {
    fn resolve(&self) -> Option<UnixTime> {
        match self {
            Self::Seconds(secs) => Some(UnixTime(*secs)),
            Self::Text(text) => parse_timestamp(text),
        }
    }
}

/// The payload of a successful renewal response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewedCredentials {
    #[serde(alias = "access_token")]
    access_token: AccessToken,
    #[serde(alias = "refresh_token")]
    refresh_token: RefreshToken,
    #[serde(default, alias = "accessTokenExpiresAt", alias = "access_token_expires_at")]
    access_expires_at: Option<Expiry>,
    #[serde(default, alias = "refreshTokenExpiresAt", alias = "refresh_token_expires_at")]
    refresh_expires_at: Option<Expiry>,
    #[serde(default, alias = "expires_in")]
    expires_in: Option<u64>,
    #[serde(default, alias = "refresh_expires_in")]
    refresh_expires_in: Option<u64>,
}

impl RenewedCredentials {
    fn into_pair(self, now: UnixTime) -> CredentialPair {
        let access_expires_at = self
            .access_expires_at
            .and_then(|e| e.resolve())
            .or_else(|| self.expires_in.map(|s| now + DurationSecs(s)));
        let refresh_expires_at = self
            .refresh_expires_at
            .and_then(|e| e.resolve())
            .or_else(|| self.refresh_expires_in.map(|s| now + DurationSecs(s)));

        CredentialPair::from_parts(
            self.access_token,
            self.refresh_token,
            access_expires_at,
            refresh_expires_at,
        )
    }
}

/// A [`Renewer`] that POSTs the refresh credential to the renewal endpoint
///
/// The client used here must not carry the authentication middleware, so
/// that a rejected renewal can never trigger another renewal. A 400 or 401
/// response means the refresh credential is no longer valid.
pub struct HttpRenewer {
    client: ClientWithMiddleware,
    url: Url,
    transport: RefreshTransport,
    timeout: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for HttpRenewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRenewer")
            .field("url", &self.url)
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpRenewer {
    /// Constructs a new renewer posting to `url`
    pub fn new(client: ClientWithMiddleware, url: Url, transport: RefreshTransport) -> Self {
        Self {
            client,
            url,
            transport,
            timeout: crate::config::DEFAULT_TIMEOUT,
            clock: Arc::new(System),
        }
    }

    /// Sets the timeout of the renewal request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the clock used to resolve relative lifetimes
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn credential_header(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<(header::HeaderName, header::HeaderValue), RenewalRequestError> {
        let (name, value) = match &self.transport {
            RefreshTransport::Header { name } => (
                header::HeaderName::try_from(name.as_str())
                    .map_err(RenewalRequestError::InvalidHeaderName)?,
                refresh_token.as_str().to_owned(),
            ),
            RefreshTransport::Cookie { name } => (
                header::COOKIE,
                format!("{}={}", name, refresh_token.as_str()),
            ),
        };

        let mut value =
            header::HeaderValue::try_from(value).map_err(RenewalRequestError::InvalidCredential)?;
        value.set_sensitive(true);
        Ok((name, value))
    }

    #[tracing::instrument(err, skip(self, refresh_token), fields(url = %self.url))]
    async fn exchange(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, RenewalRequestError> {
        tracing::trace!("requesting renewal from authority");

        let (name, value) = self.credential_header(refresh_token)?;
        let resp = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .header(name, value)
            .send()
            .await
            .map_err(RenewalRequestError::Send)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received renewal response"
        );

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(RenewalRequestError::Rejected(status));
        }
        if !status.is_success() {
            return Err(RenewalRequestError::Status(status));
        }

        let body = resp
            .bytes()
            .await
            .map_err(RenewalRequestError::BodyRead)?;

        match serde_json::from_slice::<Envelope<RenewedCredentials>>(&body)? {
            Envelope::Success { data, .. } => {
                let pair = data.into_pair(self.clock.now());
                tracing::info!(
                    access_expires_at = pair.access_expires_at().map(|t| t.0),
                    refresh_expires_at = pair.refresh_expires_at().map(|t| t.0),
                    "received new credentials"
                );
                Ok(pair)
            }
            Envelope::Error { message, error, .. } => Err(RenewalRequestError::Business {
                code: error.code,
                message,
            }),
        }
    }
}

#[async_trait]
impl Renewer for HttpRenewer {
    async fn renew(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, RenewerError> {
        Ok(self.exchange(refresh_token).await?)
    }
}
