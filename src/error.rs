//! Typed error hierarchy for the aad-token-cache crate.
//!
//! Only two kinds of failure ever reach a caller of the acquisition path:
//! a broken session store (`Store`) and, for the sign-in and app-only paths
//! that have no silent fallback, the authority's own failures. Everything
//! the token policy can recover from (cache miss, missing refresh token,
//! rejected refresh token) is encoded in return values instead.
//!
//! Variant boundaries:
//! - `Store` covers the host's session storage.
//! - `Authority` covers non-2xx answers from the Azure AD token endpoint and
//!   keeps the response body, which carries the AADSTS diagnostic codes.
//! - `Network` wraps `reqwest::Error` for transport failures (DNS, TCP, TLS,
//!   timeouts) that never produced an HTTP status.
//! - `Parse` wraps `serde_json::Error` for malformed token responses.
//! - `Config` covers settings that could not be loaded or validated.

use reqwest::StatusCode;

/// Unified error type for all library operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenCacheError {
    /// The session store could not be read or written.
    ///
    /// This is the StoreUnavailable condition: it is never swallowed by the
    /// token policy, because a cache that cannot be trusted cannot decide
    /// between "cached", "refresh" and "sign in again".
    #[error("session store unavailable: {message}")]
    Store {
        /// What the store was doing when it failed.
        message: String,
        /// The underlying storage error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The token endpoint returned a non-success HTTP status.
    #[error("authority returned {status}: {body}")]
    Authority {
        /// The HTTP status code returned by the token endpoint.
        status: StatusCode,
        /// The raw response body. For Azure AD this is a JSON document with
        /// `error`, `error_description` and `error_codes` fields.
        body: String,
    },

    /// The token response body could not be deserialized.
    #[error("failed to parse token response: {0}")]
    Parse(#[from] serde_json::Error),

    /// A network-level failure occurred before any HTTP status was received.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Settings were missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TokenCacheError {
    /// Convenience constructor for store failures without an underlying cause.
    pub fn store(message: impl Into<String>) -> Self {
        TokenCacheError::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Returns `true` for failures worth another attempt against the
    /// authority: transport errors and 5xx answers. A 4xx (most notably
    /// `invalid_grant`) is a verdict on the credential and will not change.
    pub fn is_transient(&self) -> bool {
        match self {
            TokenCacheError::Network(_) => true,
            TokenCacheError::Authority { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, TokenCacheError>;
