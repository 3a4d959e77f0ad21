//! Silent token acquisition policy.
//!
//! `TokenAcquirer` answers one question for a web request: "give me an
//! access token for this resource, or tell me the user has to sign in
//! again". Per call it walks a small state machine:
//!
//! ```text
//! START            cached and unexpired?          -> HIT, return it
//! MISS             refresh token in the session?  no -> interaction required
//! ATTEMPT_REFRESH  authority.redeem_refresh_token
//!                    ok   -> cache access token (expiry - skew), rotate refresh token
//!                    fail -> drop the refresh token we tried, interaction required
//! ```
//!
//! Token lifecycle:
//! - The safety margin is applied once, when a grant is stored, so every
//!   stored expiry already encodes it.
//! - A rejected refresh token is assumed permanently invalid for the
//!   session; it is removed so later requests do not hit the network again.
//! - Acquisitions on one acquirer are serialized by an async mutex held for
//!   the whole call. That covers the double-redemption race between two
//!   requests of the same session, and keeps read-then-evict atomic.
//!
//! The acquirer never starts an interactive challenge itself. `None`
//! (or [`TokenOutcome::InteractionRequired`]) is the caller's cue to
//! redirect the browser.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::authority::{Authority, TokenGrant};
use crate::error::Result;
use crate::store::TokenStore;

/// Margin subtracted from every expiry before it is stored.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(5 * 60);

/// Why silent acquisition gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionReason {
    /// The session holds no refresh token; no network call was made.
    NoRefreshToken,
    /// The authority rejected the refresh token (or could not be reached);
    /// the token has been removed from the session.
    RedemptionFailed,
}

/// Result of one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// Served from the cache without contacting the authority.
    Cached(String),
    /// Minted by redeeming the session's refresh token.
    Refreshed(String),
    /// The caller must send the user through interactive sign-in.
    InteractionRequired(InteractionReason),
}

impl TokenOutcome {
    /// The access token, if one was produced.
    pub fn into_token(self) -> Option<String> {
        match self {
            TokenOutcome::Cached(token) | TokenOutcome::Refreshed(token) => Some(token),
            TokenOutcome::InteractionRequired(_) => None,
        }
    }
}

/// Per-session token acquisition.
///
/// Build one per session (or per request, around the session's store);
/// the serialization guarantee only spans calls on the same instance.
pub struct TokenAcquirer {
    store: TokenStore,
    authority: Arc<dyn Authority>,
    skew: chrono::Duration,
    guard: Mutex<()>,
}

impl TokenAcquirer {
    /// Creates an acquirer with the default five-minute expiry margin.
    pub fn new(store: TokenStore, authority: Arc<dyn Authority>) -> Self {
        TokenAcquirer {
            store,
            authority,
            skew: to_chrono(DEFAULT_EXPIRY_SKEW),
            guard: Mutex::new(()),
        }
    }

    /// Overrides the margin subtracted from expiries at storage time.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = to_chrono(skew);
        self
    }

    /// The session cache this acquirer manages.
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Returns an access token for `resource_id`, or `None` when the user
    /// must sign in interactively.
    ///
    /// # Errors
    ///
    /// Only `TokenCacheError::Store`: the session itself is unusable.
    /// Authority failures are absorbed into `None`.
    pub async fn acquire(&self, tenant_id: &str, resource_id: &str) -> Result<Option<String>> {
        Ok(self
            .acquire_outcome(tenant_id, resource_id)
            .await?
            .into_token())
    }

    /// Same as [`acquire`](Self::acquire) but reports which path was taken.
    pub async fn acquire_outcome(&self, tenant_id: &str, resource_id: &str) -> Result<TokenOutcome> {
        let _serialized = self.guard.lock().await;

        if let Some(token) = self.store.get_access_token(resource_id).await? {
            tracing::debug!(tenant = tenant_id, resource = resource_id, "access token cache hit");
            return Ok(TokenOutcome::Cached(token));
        }

        let Some(refresh_token) = self.store.get_refresh_token().await? else {
            tracing::debug!(
                tenant = tenant_id,
                resource = resource_id,
                "no refresh token in session; interactive sign-in required"
            );
            return Ok(TokenOutcome::InteractionRequired(
                InteractionReason::NoRefreshToken,
            ));
        };

        match self
            .authority
            .redeem_refresh_token(&refresh_token, tenant_id, resource_id)
            .await
        {
            Ok(grant) => {
                let access_token = self.store_grant(resource_id, &grant, &refresh_token).await?;
                tracing::info!(tenant = tenant_id, resource = resource_id, "redeemed refresh token");
                Ok(TokenOutcome::Refreshed(access_token))
            }
            Err(err) => {
                tracing::warn!(
                    tenant = tenant_id,
                    resource = resource_id,
                    error = %err,
                    "refresh token redemption failed; invalidating refresh token"
                );
                self.store.remove_refresh_token_if(&refresh_token).await?;
                Ok(TokenOutcome::InteractionRequired(
                    InteractionReason::RedemptionFailed,
                ))
            }
        }
    }

    /// Stores a grant obtained through interactive sign-in.
    ///
    /// The refresh token, if the grant carries one, replaces the session's
    /// current refresh token.
    pub async fn complete_sign_in(&self, resource_id: &str, grant: &TokenGrant) -> Result<()> {
        let _serialized = self.guard.lock().await;

        self.store
            .set_access_token(resource_id, &grant.access_token, self.stored_expiry(grant.expires_at))
            .await?;
        if let Some(refresh_token) = &grant.refresh_token {
            self.store.set_refresh_token(refresh_token).await?;
        }
        Ok(())
    }

    /// Redeems an authorization code returned to `redirect_uri` and caches
    /// the resulting tokens.
    ///
    /// Returns the grant so the caller can inspect the id token (for the
    /// tenant claim, for instance).
    ///
    /// # Errors
    ///
    /// The authority's error is returned as-is and the cache is left
    /// untouched; there is no silent fallback for a failed sign-in.
    pub async fn redeem_code(
        &self,
        tenant_id: &str,
        resource_id: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant> {
        let grant = self
            .authority
            .redeem_authorization_code(code, redirect_uri, tenant_id, resource_id)
            .await?;
        self.complete_sign_in(resource_id, &grant).await?;
        tracing::info!(tenant = tenant_id, resource = resource_id, "redeemed authorization code");
        Ok(grant)
    }

    /// Removes every cached token for the session. Idempotent.
    pub async fn sign_out(&self, tenant_id: &str) -> Result<()> {
        let _serialized = self.guard.lock().await;
        self.store.clear_all().await?;
        tracing::info!(tenant = tenant_id, "signed out; token cache cleared");
        Ok(())
    }

    /// Writes a refreshed grant: access token with margin applied, then the
    /// rotated refresh token (or the presented one if the authority did not
    /// rotate). Returns the new access token.
    async fn store_grant(
        &self,
        resource_id: &str,
        grant: &TokenGrant,
        presented_refresh: &str,
    ) -> Result<String> {
        self.store
            .set_access_token(resource_id, &grant.access_token, self.stored_expiry(grant.expires_at))
            .await?;
        let refresh = grant.refresh_token.as_deref().unwrap_or(presented_refresh);
        self.store.set_refresh_token(refresh).await?;
        Ok(grant.access_token.clone())
    }

    fn stored_expiry(&self, expires_at: DateTime<Utc>) -> DateTime<Utc> {
        expires_at
            .checked_sub_signed(self.skew)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
