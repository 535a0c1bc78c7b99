use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use keyward_clock::{DurationSecs, UnixTime};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// The access and refresh credentials along with their expiries
///
/// A pair is always persisted and cleared as a unit. An expiry of `None`
/// means the timestamp was missing or could not be parsed when the pair was
/// loaded from persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialPair {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    access_expires_at: Option<UnixTime>,
    refresh_expires_at: Option<UnixTime>,
}

impl CredentialPair {
    /// Constructs a new credential pair with known expiries
    pub fn new(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        access_expires_at: UnixTime,
        refresh_expires_at: UnixTime,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expires_at: Some(access_expires_at),
            refresh_expires_at: Some(refresh_expires_at),
        }
    }

    /// Constructs a credential pair whose expiries are relative to `issued`
    pub fn issued_at(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        issued: UnixTime,
        access_lifetime: DurationSecs,
        refresh_lifetime: DurationSecs,
    ) -> Self {
        Self::new(
            access_token,
            refresh_token,
            issued + access_lifetime,
            issued + refresh_lifetime,
        )
    }

    /// Constructs a credential pair whose expiries may be unknown
    ///
    /// An unknown access expiry never triggers renewal ahead of time. An
    /// unknown refresh expiry is treated as already expired.
    pub fn from_parts(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        access_expires_at: Option<UnixTime>,
        refresh_expires_at: Option<UnixTime>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        }
    }

    /// Gets the access credential
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh credential
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// Gets the time at which the access credential expires, if known
    #[inline]
    pub fn access_expires_at(&self) -> Option<UnixTime> {
        self.access_expires_at
    }

    /// Gets the time at which the refresh credential expires, if known
    #[inline]
    pub fn refresh_expires_at(&self) -> Option<UnixTime> {
        self.refresh_expires_at
    }
}

/// Whether the session currently holds credentials
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum CredentialState {
    /// No credentials are held
    #[default]
    Absent,
    /// A full credential pair is held
    Present(Arc<CredentialPair>),
}

impl CredentialState {
    /// Gets the held credential pair, if any
    #[inline]
    pub fn pair(&self) -> Option<&Arc<CredentialPair>> {
        match self {
            Self::Absent => None,
            Self::Present(pair) => Some(pair),
        }
    }

    /// Whether credentials are held
    #[inline]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Formats a timestamp as RFC 3339 in UTC
pub fn format_timestamp(time: UnixTime) -> String {
    let secs = i64::try_from(time.0).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a timestamp written either as RFC 3339 or as integer unix seconds
///
/// Returns `None` for anything else, including times before the epoch.
pub fn parse_timestamp(raw: &str) -> Option<UnixTime> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(UnixTime(secs));
    }

    DateTime::parse_from_rfc3339(raw)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp()).ok())
        .map(UnixTime)
}
