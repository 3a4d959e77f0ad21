//! Token cookie codec and id-token tenant extraction.
//!
//! Hosts that keep tokens client-side store a [`TokenCookie`] as JSON,
//! base64-encoded so it survives cookie value restrictions. Parsing is
//! forgiving: a cookie that does not decode is treated as absent, which
//! sends the user back through sign-in instead of failing the request.
//!
//! Tenant extraction reads the `tid` claim from the JWT payload without
//! verifying the signature. It is only meant to pick the authority for a
//! token the host already trusts (for example an id token delivered by the
//! OpenID Connect middleware).

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

/// Claim carrying the directory (tenant) id in Azure AD tokens.
pub const TENANT_ID_CLAIM: &str = "tid";

/// Tokens persisted in the browser between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenCookie {
    /// Access token for the configured resource.
    pub access_token: String,
    /// OpenID Connect id token from sign-in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Refresh token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenCookie {
    /// Creates a cookie holding the given tokens.
    pub fn new(access_token: &str, id_token: Option<&str>, refresh_token: Option<&str>) -> Self {
        TokenCookie {
            access_token: access_token.to_string(),
            id_token: id_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    /// Encodes the cookie as base64 of its JSON form.
    pub fn to_cookie_string(&self) -> String {
        // Serializing a struct of strings cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    /// Decodes a cookie value. Returns `None` for an empty value or anything
    /// that is not base64-encoded cookie JSON.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }

        let bytes = match STANDARD.decode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "token cookie is not valid base64");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(cookie) => Some(cookie),
            Err(e) => {
                tracing::error!(error = %e, "token cookie does not hold token JSON");
                None
            }
        }
    }

    /// Tenant of the signed-in user: the id token's `tid` claim, falling
    /// back to the access token's.
    pub fn tenant_id(&self) -> Option<String> {
        self.id_token
            .as_deref()
            .and_then(tenant_id_from_jwt)
            .or_else(|| tenant_id_from_jwt(&self.access_token))
    }
}

/// Reads the `tid` claim from an unverified JWT. Returns `None` when the
/// token is not a three-part JWT, the payload does not decode, or the claim
/// is missing or empty.
pub fn tenant_id_from_jwt(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get(TENANT_ID_CLAIM)?
        .as_str()
        .filter(|tid| !tid.is_empty())
        .map(str::to_string)
}
