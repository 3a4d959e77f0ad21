//! Expiry-aware token cache layered on a session store.
//!
//! `TokenStore` keeps at most one access token per resource and one refresh
//! token per session. Expiry is checked lazily on read: an expired entry is
//! evicted by the `get_access_token` call that discovers it, there is no
//! background sweep.
//!
//! Session layout (all values are strings):
//!
//! ```text
//! {prefix}AccessToken#{resource}   {"token":"...","expires_at":"<RFC 3339>"}
//! {prefix}RefreshToken             refresh token
//! ```
//!
//! A token and its expiry live in one value, so every read and write of an
//! entry is a single session call. Several `TokenStore`s over one session
//! can never observe a token paired with another token's expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::SessionStore;

/// Key prefix used when none is configured.
pub const DEFAULT_CACHE_PREFIX: &str = "AzureAdCache#";

const ACCESS_TOKEN_KIND: &str = "AccessToken#";
const REFRESH_TOKEN_KIND: &str = "RefreshToken";

/// An access token together with the resource it is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    /// Identifier of the protected API, e.g. `https://graph.windows.net`.
    pub resource_id: String,
    /// Opaque bearer token.
    pub access_token: String,
    /// Instant after which the token must not be served.
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// A token is usable only while `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Session value stored under `{prefix}AccessToken#{resource}`.
#[derive(Serialize, Deserialize)]
struct AccessTokenEntry {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Per-session token cache.
///
/// Cloning is cheap and yields a handle onto the same session.
#[derive(Clone)]
pub struct TokenStore {
    session: Arc<dyn SessionStore>,
    prefix: String,
}

impl TokenStore {
    /// Creates a store using [`DEFAULT_CACHE_PREFIX`].
    pub fn new(session: Arc<dyn SessionStore>) -> Self {
        Self::with_prefix(session, DEFAULT_CACHE_PREFIX)
    }

    /// Creates a store whose keys all start with `prefix`.
    pub fn with_prefix(session: Arc<dyn SessionStore>, prefix: impl Into<String>) -> Self {
        TokenStore {
            session,
            prefix: prefix.into(),
        }
    }

    fn access_key(&self, resource_id: &str) -> String {
        format!("{}{}{}", self.prefix, ACCESS_TOKEN_KIND, resource_id)
    }

    fn refresh_key(&self) -> String {
        format!("{}{}", self.prefix, REFRESH_TOKEN_KIND)
    }

    /// Returns the cached entry for `resource_id` if it is still valid.
    ///
    /// An entry that has expired, or that no longer parses, is removed
    /// before `None` is returned. The removal only happens if the session
    /// still holds the exact value that was judged stale; a fresh entry
    /// written in between by another request is left alone.
    pub async fn get_cached(&self, resource_id: &str) -> Result<Option<CachedToken>> {
        let key = self.access_key(resource_id);
        let Some(raw) = self.session.get(&key).await? else {
            return Ok(None);
        };

        let entry = match serde_json::from_str::<AccessTokenEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(resource = resource_id, error = %e, "cached access token entry is malformed; evicting");
                self.evict_if_unchanged(&key, &raw).await?;
                return Ok(None);
            }
        };

        let cached = CachedToken {
            resource_id: resource_id.to_string(),
            access_token: entry.token,
            expires_at: entry.expires_at,
        };

        if !cached.is_valid_at(Utc::now()) {
            tracing::debug!(resource = resource_id, expires_at = %cached.expires_at, "cached access token expired; evicting");
            self.evict_if_unchanged(&key, &raw).await?;
            return Ok(None);
        }

        Ok(Some(cached))
    }

    /// Returns the cached access token for `resource_id` if present and not
    /// expired. Expired entries are evicted as a side effect.
    pub async fn get_access_token(&self, resource_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_cached(resource_id)
            .await?
            .map(|cached| cached.access_token))
    }

    /// Stores `token` for `resource_id`, overwriting any previous entry.
    ///
    /// `expires_at` is stored as given; any safety margin must already have
    /// been subtracted by the caller.
    pub async fn set_access_token(
        &self,
        resource_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = AccessTokenEntry {
            token: token.to_string(),
            expires_at,
        };
        let value = serde_json::to_string(&entry)?;
        self.session.set(&self.access_key(resource_id), &value).await
    }

    /// Removes the entry for `resource_id`. Removing a missing entry is a no-op.
    pub async fn remove_access_token(&self, resource_id: &str) -> Result<()> {
        self.session.remove(&self.access_key(resource_id)).await
    }

    /// Returns the session's refresh token, if any.
    pub async fn get_refresh_token(&self) -> Result<Option<String>> {
        self.session.get(&self.refresh_key()).await
    }

    /// Stores the session's refresh token, replacing the previous one.
    pub async fn set_refresh_token(&self, token: &str) -> Result<()> {
        self.session.set(&self.refresh_key(), token).await
    }

    /// Removes the session's refresh token. Idempotent.
    pub async fn remove_refresh_token(&self) -> Result<()> {
        self.session.remove(&self.refresh_key()).await
    }

    /// Removes the refresh token only if it still equals `expected`.
    ///
    /// Returns `true` if a token was removed. A different stored value means
    /// another request has already rotated the token; that one stays.
    pub async fn remove_refresh_token_if(&self, expected: &str) -> Result<bool> {
        let key = self.refresh_key();
        self.remove_if_unchanged(&key, expected).await
    }

    /// Removes every key under this store's prefix: all access tokens and
    /// the refresh token. Keys outside the prefix survive.
    pub async fn clear_all(&self) -> Result<()> {
        let keys: Vec<String> = self
            .session
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&self.prefix))
            .collect();

        for key in &keys {
            self.session.remove(key).await?;
        }

        tracing::debug!(removed = keys.len(), "cleared token cache");
        Ok(())
    }

    async fn evict_if_unchanged(&self, key: &str, seen: &str) -> Result<()> {
        self.remove_if_unchanged(key, seen).await.map(|_| ())
    }

    async fn remove_if_unchanged(&self, key: &str, expected: &str) -> Result<bool> {
        match self.session.get(key).await? {
            Some(current) if current == expected => {
                self.session.remove(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use chrono::Duration;

    fn new_store() -> (Arc<MemorySessionStore>, TokenStore) {
        let session = Arc::new(MemorySessionStore::new());
        let store = TokenStore::new(session.clone());
        (session, store)
    }

    #[tokio::test]
    async fn fresh_token_is_returned() {
        let (_, store) = new_store();
        let future = Utc::now() + Duration::hours(1);
        store.set_access_token("R1", "tok", future).await.unwrap();

        assert_eq!(
            store.get_access_token("R1").await.unwrap().as_deref(),
            Some("tok")
        );
    }

    #[tokio::test]
    async fn expired_token_is_evicted_on_read() {
        let (session, store) = new_store();
        let past = Utc::now() - Duration::minutes(1);
        store.set_access_token("R1", "tok", past).await.unwrap();

        assert!(store.get_access_token("R1").await.unwrap().is_none());
        assert!(session.is_empty().await);
        assert!(store.get_cached("R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_entry_is_treated_as_expired() {
        let (session, store) = new_store();
        session
            .set("AzureAdCache#AccessToken#R1", r#"{"token":"tok","expires_at":"not a date"}"#)
            .await
            .unwrap();

        assert!(store.get_access_token("R1").await.unwrap().is_none());
        assert!(session.is_empty().await);
    }

    #[tokio::test]
    async fn bare_token_without_expiry_is_evicted() {
        let (session, store) = new_store();
        session
            .set("AzureAdCache#AccessToken#R1", "tok")
            .await
            .unwrap();

        assert!(store.get_access_token("R1").await.unwrap().is_none());
        assert!(session.is_empty().await);
    }

    #[tokio::test]
    async fn set_access_token_overwrites() {
        let (_, store) = new_store();
        let future = Utc::now() + Duration::hours(1);
        store.set_access_token("R1", "old", future).await.unwrap();
        store.set_access_token("R1", "new", future).await.unwrap();

        assert_eq!(
            store.get_access_token("R1").await.unwrap().as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn tokens_are_kept_per_resource() {
        let (_, store) = new_store();
        let future = Utc::now() + Duration::hours(1);
        store.set_access_token("R1", "one", future).await.unwrap();
        store.set_access_token("R2", "two", future).await.unwrap();
        store.remove_access_token("R1").await.unwrap();

        assert!(store.get_access_token("R1").await.unwrap().is_none());
        assert_eq!(
            store.get_access_token("R2").await.unwrap().as_deref(),
            Some("two")
        );
    }

    #[tokio::test]
    async fn token_and_expiry_share_one_session_value() {
        let (session, store) = new_store();
        let at = DateTime::parse_from_rfc3339("2030-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        store.set_access_token("R1", "tok", at).await.unwrap();

        assert_eq!(session.len().await, 1);
        let raw = session
            .get("AzureAdCache#AccessToken#R1")
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["token"], "tok");
        assert_eq!(value["expires_at"], "2030-01-02T03:04:05Z");
    }

    /// Session that lets a second store replace the entry right after the
    /// first read of it, before any eviction check runs.
    struct InterleavedWrite {
        inner: Arc<MemorySessionStore>,
        writer: tokio::sync::Mutex<Option<TokenStore>>,
    }

    #[async_trait::async_trait]
    impl SessionStore for InterleavedWrite {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await?;
            if let Some(writer) = self.writer.lock().await.take() {
                writer
                    .set_access_token("R1", "at_new", Utc::now() + Duration::hours(1))
                    .await?;
            }
            Ok(value)
        }
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn concurrent_write_never_pairs_old_token_with_new_expiry() {
        let inner = Arc::new(MemorySessionStore::new());
        let writer = TokenStore::new(inner.clone());
        writer
            .set_access_token("R1", "at_old", Utc::now() - Duration::minutes(10))
            .await
            .unwrap();

        let reader = TokenStore::new(Arc::new(InterleavedWrite {
            inner: inner.clone(),
            writer: tokio::sync::Mutex::new(Some(writer.clone())),
        }));

        // The reader saw `at_old` with its own expiry, so it is a miss.
        assert!(reader.get_access_token("R1").await.unwrap().is_none());
        // The fresh entry written in between survives the eviction.
        assert_eq!(
            writer.get_access_token("R1").await.unwrap().as_deref(),
            Some("at_new")
        );
        assert_eq!(
            reader.get_access_token("R1").await.unwrap().as_deref(),
            Some("at_new")
        );
    }

    #[tokio::test]
    async fn refresh_token_lifecycle() {
        let (_, store) = new_store();
        assert!(store.get_refresh_token().await.unwrap().is_none());

        store.set_refresh_token("rt0").await.unwrap();
        store.set_refresh_token("rt1").await.unwrap();
        assert_eq!(
            store.get_refresh_token().await.unwrap().as_deref(),
            Some("rt1")
        );

        store.remove_refresh_token().await.unwrap();
        store.remove_refresh_token().await.unwrap();
        assert!(store.get_refresh_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_remove_keeps_rotated_token() {
        let (_, store) = new_store();
        store.set_refresh_token("rotated").await.unwrap();

        assert!(!store.remove_refresh_token_if("stale").await.unwrap());
        assert_eq!(
            store.get_refresh_token().await.unwrap().as_deref(),
            Some("rotated")
        );

        assert!(store.remove_refresh_token_if("rotated").await.unwrap());
        assert!(store.get_refresh_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_all_removes_only_prefixed_keys() {
        let (session, store) = new_store();
        let future = Utc::now() + Duration::hours(1);
        store.set_access_token("R1", "one", future).await.unwrap();
        store.set_access_token("R2", "two", future).await.unwrap();
        store.set_refresh_token("rt").await.unwrap();
        session.set("UserPreference", "dark").await.unwrap();

        store.clear_all().await.unwrap();

        assert!(store.get_access_token("R1").await.unwrap().is_none());
        assert!(store.get_access_token("R2").await.unwrap().is_none());
        assert!(store.get_refresh_token().await.unwrap().is_none());
        assert_eq!(
            session.get("UserPreference").await.unwrap().as_deref(),
            Some("dark")
        );
    }

    #[tokio::test]
    async fn clear_all_on_empty_session_is_ok() {
        let (_, store) = new_store();
        store.clear_all().await.unwrap();
        store.clear_all().await.unwrap();
    }

    #[tokio::test]
    async fn custom_prefix_isolates_caches_sharing_a_session() {
        let session = Arc::new(MemorySessionStore::new());
        let a = TokenStore::with_prefix(session.clone(), "AppA#");
        let b = TokenStore::with_prefix(session.clone(), "AppB#");
        a.set_refresh_token("rt-a").await.unwrap();
        b.set_refresh_token("rt-b").await.unwrap();

        a.clear_all().await.unwrap();

        assert!(a.get_refresh_token().await.unwrap().is_none());
        assert_eq!(b.get_refresh_token().await.unwrap().as_deref(), Some("rt-b"));
    }
}
