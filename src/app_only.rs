//! App-only (client credentials) tokens.
//!
//! A daemon credential has no refresh token and no user to send through a
//! sign-in page, so the policy is simpler than [`TokenAcquirer`]'s: serve
//! the cached token while it is inside its margin, otherwise ask the
//! authority for a new one and let any failure propagate.
//!
//! [`TokenAcquirer`]: crate::acquirer::TokenAcquirer

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::acquirer::{DEFAULT_EXPIRY_SKEW, to_chrono};
use crate::authority::Authority;
use crate::error::Result;
use crate::store::CachedToken;

type Slot = Arc<Mutex<Option<CachedToken>>>;

/// Process-wide cache of application tokens, keyed by (tenant, resource).
pub struct AppOnlyTokens {
    authority: Arc<dyn Authority>,
    skew: chrono::Duration,
    slots: Mutex<HashMap<(String, String), Slot>>,
}

impl AppOnlyTokens {
    /// Creates an empty cache with the default expiry margin.
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        AppOnlyTokens {
            authority,
            skew: to_chrono(DEFAULT_EXPIRY_SKEW),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the margin subtracted from expiries at storage time.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = to_chrono(skew);
        self
    }

    async fn slot(&self, tenant_id: &str, resource_id: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry((tenant_id.to_string(), resource_id.to_string()))
            .or_default()
            .clone()
    }

    /// Returns a valid app-only token for `resource_id` in `tenant_id`.
    ///
    /// Each (tenant, resource) pair has its own lock, held across the
    /// authority call: concurrent callers for the same pair wait for one
    /// acquisition, callers for other pairs are not blocked by it.
    ///
    /// # Errors
    ///
    /// Any authority failure (`Authority`, `Network`, `Parse`).
    pub async fn token(&self, tenant_id: &str, resource_id: &str) -> Result<String> {
        let slot = self.slot(tenant_id, resource_id).await;
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_valid_at(Utc::now())) {
            return Ok(token.access_token.clone());
        }
        *cached = None;

        let grant = self.authority.acquire_app_only(tenant_id, resource_id).await?;
        tracing::info!(tenant = tenant_id, resource = resource_id, "acquired app-only token");

        let expires_at = grant
            .expires_at
            .checked_sub_signed(self.skew)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        *cached = Some(CachedToken {
            resource_id: resource_id.to_string(),
            access_token: grant.access_token.clone(),
            expires_at,
        });

        Ok(grant.access_token)
    }

    /// Drops the cached token for (`tenant_id`, `resource_id`), e.g. after
    /// the resource rejected it with 401.
    pub async fn invalidate(&self, tenant_id: &str, resource_id: &str) {
        let slot = self.slot(tenant_id, resource_id).await;
        *slot.lock().await = None;
    }
}
