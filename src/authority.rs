//! Token redemption against the Azure AD token endpoint.
//!
//! [`Authority`] is the seam between the token policy and the identity
//! provider. The policy only ever asks three questions of it: redeem this
//! refresh token, redeem this authorization code, and issue an app-only
//! token. [`AadAuthority`] answers them over HTTP using the v1
//! `/oauth2/token` endpoint, which takes a `resource` rather than a scope.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TokenCacheError};

/// Default Azure AD login instance.
pub const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com";

/// Token requests are small; 30 seconds covers a slow authority without
/// letting a web request hang indefinitely.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound applied to `expires_in` before date arithmetic.
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;

/// Delay between attempts when a redemption fails transiently.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// A successful answer from the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Bearer token for the requested resource.
    pub access_token: String,
    /// True expiry as reported by the authority, without any safety margin.
    pub expires_at: DateTime<Utc>,
    /// Rotated refresh token. `None` for grants that never issue one
    /// (client credentials) or when the authority chose not to rotate.
    pub refresh_token: Option<String>,
    /// OpenID Connect id token, present on authorization-code redemption.
    pub id_token: Option<String>,
}

/// The token-issuing service.
///
/// Implementations report every non-success outcome as an error; the
/// caller decides which of those are recoverable.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Exchanges a refresh token for a new access token for `resource_id`.
    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<TokenGrant>;

    /// Exchanges an authorization code obtained by interactive sign-in.
    async fn redeem_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<TokenGrant>;

    /// Obtains a token with the application's own credentials.
    async fn acquire_app_only(&self, tenant_id: &str, resource_id: &str) -> Result<TokenGrant>;
}

/// Form body sent to the token endpoint.
/// Serialized as `application/x-www-form-urlencoded` by reqwest's `.form()`.
/// Grant-specific fields are skipped when absent.
#[derive(Serialize)]
pub struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    resource: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
}

/// Subset of the v1 token response that we need.
///
/// The v1 endpoint returns `expires_in` as a string (`"3599"`) while v2
/// returns a number; both are accepted.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    pub access_token: String,
    /// Usually `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds from issuance.
    #[serde(deserialize_with = "seconds_from_number_or_string")]
    pub expires_in: u64,
    /// Rotated refresh token, absent for client credentials.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Present when the `openid` scope was part of the sign-in.
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Converts the relative lifetime into an absolute grant, anchored at `now`.
    pub fn into_grant(self, now: DateTime<Utc>) -> TokenGrant {
        let lifetime = chrono::Duration::seconds(self.expires_in.min(MAX_LIFETIME_SECS) as i64);
        TokenGrant {
            access_token: self.access_token,
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            refresh_token: self.refresh_token,
            id_token: self.id_token,
        }
    }
}

fn seconds_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// HTTP client for the Azure AD v1 token endpoint.
///
/// Invariants:
/// - `max_attempts` is at least 1.
/// - Only transient failures (transport errors, 5xx) are retried; a 4xx
///   answer is returned after the first attempt.
pub struct AadAuthority {
    client: Client,
    instance: String,
    client_id: String,
    client_secret: String,
    max_attempts: u32,
}

impl AadAuthority {
    /// Creates an authority for the public Azure AD instance.
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::with_instance(DEFAULT_INSTANCE, client_id, client_secret)
    }

    /// Creates an authority against a custom instance URL (sovereign clouds,
    /// or a mock server in tests).
    pub fn with_instance(instance: &str, client_id: &str, client_secret: &str) -> Self {
        AadAuthority {
            client: build_token_client(),
            instance: instance.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            max_attempts: 2,
        }
    }

    /// Sets how many times a transiently failing request is attempted.
    /// Values below 1 are clamped to 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Token endpoint for `tenant_id`, e.g.
    /// `https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/token`.
    pub fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/token", self.instance, tenant_id)
    }

    fn request<'a>(&'a self, grant_type: &'a str, resource: &'a str) -> TokenRequest<'a> {
        TokenRequest {
            grant_type,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            resource,
            refresh_token: None,
            code: None,
            redirect_uri: None,
        }
    }

    /// Posts `body` to the tenant's token endpoint, retrying transient failures.
    async fn post_token(&self, tenant_id: &str, body: &TokenRequest<'_>) -> Result<TokenGrant> {
        let url = self.token_url(tenant_id);
        let mut attempt = 1;
        loop {
            match self.post_once(&url, body).await {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::debug!(attempt, grant_type = body.grant_type, error = %err, "retrying token request");
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }

    /// The response body is read as text first so that on failure the raw
    /// AADSTS error message is preserved in the error.
    async fn post_once(&self, url: &str, body: &TokenRequest<'_>) -> Result<TokenGrant> {
        let response = self.client.post(url).form(body).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(TokenCacheError::Authority { status, body: text });
        }

        let parsed: TokenResponse = serde_json::from_str(&text)?;
        Ok(parsed.into_grant(Utc::now()))
    }
}

#[async_trait]
impl Authority for AadAuthority {
    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<TokenGrant> {
        let mut body = self.request("refresh_token", resource_id);
        body.refresh_token = Some(refresh_token);
        self.post_token(tenant_id, &body).await
    }

    async fn redeem_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<TokenGrant> {
        let mut body = self.request("authorization_code", resource_id);
        body.code = Some(code);
        body.redirect_uri = Some(redirect_uri);
        self.post_token(tenant_id, &body).await
    }

    async fn acquire_app_only(&self, tenant_id: &str, resource_id: &str) -> Result<TokenGrant> {
        let body = self.request("client_credentials", resource_id);
        self.post_token(tenant_id, &body).await
    }
}

fn build_token_client() -> Client {
    Client::builder()
        .connect_timeout(TOKEN_CONNECT_TIMEOUT)
        .timeout(TOKEN_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}
