//! Layered settings: built-in defaults, an optional TOML file, then
//! `AAD__`-prefixed environment variables (`AAD__AUTHORITY__CLIENT_SECRET`
//! overrides `authority.client_secret`).
//!
//! Keep the client secret out of files checked into source control; the
//! environment layer exists for that.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;

use crate::acquirer::TokenAcquirer;
use crate::authority::{AadAuthority, DEFAULT_INSTANCE};
use crate::error::{Result, TokenCacheError};
use crate::session::SessionStore;
use crate::store::{DEFAULT_CACHE_PREFIX, TokenStore};

/// Azure AD Graph resource used when none is configured.
pub const DEFAULT_RESOURCE_ID: &str = "https://graph.windows.net";

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Token endpoint and application credentials.
    pub authority: AuthoritySettings,
    /// Session cache layout and expiry policy.
    pub cache: CacheSettings,
    /// Logging.
    pub log: LogSettings,
}

/// Application registration and authority location.
#[derive(Clone, Deserialize)]
pub struct AuthoritySettings {
    /// Login instance, e.g. `https://login.microsoftonline.com`.
    pub instance: String,
    /// Application (client) id.
    pub client_id: String,
    /// Application key.
    pub client_secret: String,
    /// Tenant used by the CLI and app-only flows when none is given.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Resource requested when none is given.
    pub resource_id: String,
    /// Reply URL registered for the authorization-code flow.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Attempts per token request when failures are transient.
    pub max_attempts: u32,
}

// Hand-written so the secret never reaches a log line via `{:?}`.
impl std::fmt::Debug for AuthoritySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritySettings")
            .field("instance", &self.instance)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("resource_id", &self.resource_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Session cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Prefix of every session key the cache owns.
    pub prefix: String,
    /// Seconds subtracted from token expiries at storage time.
    pub expiry_skew_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,aad_token_cache=debug`.
    pub filter: String,
}

impl Settings {
    /// Loads defaults, then `path` (if given; it must exist), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("AAD").separator("__"));
        finish(builder)
    }

    /// Loads defaults overlaid with a TOML document. The environment is not
    /// consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let builder = defaults()?.add_source(File::from_str(toml, FileFormat::Toml));
        finish(builder)
    }

    /// Storage-time expiry margin.
    pub fn expiry_skew(&self) -> Duration {
        Duration::from_secs(self.cache.expiry_skew_secs)
    }

    /// Builds the HTTP authority described by these settings.
    pub fn authority(&self) -> AadAuthority {
        AadAuthority::with_instance(
            &self.authority.instance,
            &self.authority.client_id,
            &self.authority.client_secret,
        )
        .max_attempts(self.authority.max_attempts)
    }

    /// Reply URL to present when redeeming an authorization code. It must
    /// match the one the code was issued for.
    ///
    /// # Errors
    ///
    /// `Config` if `authority.redirect_uri` is not set.
    pub fn redirect_uri(&self) -> Result<&str> {
        self.authority.redirect_uri.as_deref().ok_or_else(|| {
            TokenCacheError::Config(
                "authority.redirect_uri is required to redeem an authorization code".into(),
            )
        })
    }

    /// Builds an acquirer for one session using these settings.
    pub fn acquirer(&self, session: Arc<dyn SessionStore>) -> TokenAcquirer {
        let store = TokenStore::with_prefix(session, self.cache.prefix.clone());
        TokenAcquirer::new(store, Arc::new(self.authority())).with_skew(self.expiry_skew())
    }

    fn validate(self) -> Result<Self> {
        if self.authority.client_id.trim().is_empty() {
            return Err(TokenCacheError::Config(
                "authority.client_id is required".into(),
            ));
        }
        if self.authority.client_secret.is_empty() {
            return Err(TokenCacheError::Config(
                "authority.client_secret is required (set AAD__AUTHORITY__CLIENT_SECRET)".into(),
            ));
        }
        if self.cache.prefix.is_empty() {
            return Err(TokenCacheError::Config(
                "cache.prefix must not be empty; sign-out would clear the whole session".into(),
            ));
        }
        Ok(self)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Config::builder()
        .set_default("authority.instance", DEFAULT_INSTANCE)
        .and_then(|b| b.set_default("authority.client_id", ""))
        .and_then(|b| b.set_default("authority.client_secret", ""))
        .and_then(|b| b.set_default("authority.resource_id", DEFAULT_RESOURCE_ID))
        .and_then(|b| b.set_default("authority.max_attempts", 2))
        .and_then(|b| b.set_default("cache.prefix", DEFAULT_CACHE_PREFIX))
        .and_then(|b| b.set_default("cache.expiry_skew_secs", 300))
        .and_then(|b| b.set_default("log.filter", "info"))
        .map_err(|e| TokenCacheError::Config(e.to_string()))
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Settings> {
    let settings: Settings = builder
        .build()
        .map_err(|e| TokenCacheError::Config(e.to_string()))?
        .try_deserialize()
        .map_err(|e| TokenCacheError::Config(e.to_string()))?;
    settings.validate()
}
