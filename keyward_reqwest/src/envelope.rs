//! The response envelope wrapping every API response body

use serde::{Deserialize, Serialize};

/// A response body as sent by the API
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope<T> {
    /// The request succeeded
    Success {
        /// The response payload
        data: T,
        /// Human-readable message
        #[serde(default)]
        message: Option<String>,
        /// Server timestamp of the response
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// The request was understood but failed for a business reason
    Error {
        /// Human-readable message
        message: String,
        /// Machine-readable error detail
        error: EnvelopeError,
        /// Server timestamp of the response
        #[serde(default)]
        timestamp: Option<String>,
    },
}

/// Error detail carried by an [`Envelope::Error`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    /// Machine-readable error code
    pub code: String,
    /// Further detail, if any
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
