//! Tracing subscriber bootstrap for binaries embedding the cache.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's decision. `Logger::bootstrap` installs a reloadable
//! `EnvFilter` at `info` so early startup is logged before settings are
//! read, and `apply` swaps in the configured filter afterwards.

use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::error::{Result, TokenCacheError};

/// Handle onto the installed global subscriber.
pub struct Logger {
    reload_handle: reload::Handle<EnvFilter, Registry>,
}

impl Logger {
    /// Installs the global subscriber, writing to stderr.
    ///
    /// # Errors
    ///
    /// `Config` if a global subscriber is already installed.
    pub fn bootstrap() -> Result<Self> {
        let (filter, reload_handle) = reload::Layer::new(EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| TokenCacheError::Config(e.to_string()))?;

        Ok(Self { reload_handle })
    }

    /// Replaces the active filter with `directive`.
    pub fn apply(&self, directive: &str) -> Result<()> {
        let filter = parse_filter(directive)?;
        self.reload_handle
            .reload(filter)
            .map_err(|e| TokenCacheError::Config(e.to_string()))
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| TokenCacheError::Config(format!("invalid log filter {directive:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_directives_parse() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("warn,aad_token_cache=debug").is_ok());
    }

    #[test]
    fn invalid_directive_is_a_config_error() {
        let err = parse_filter("aad_token_cache=notalevel").unwrap_err();
        assert!(matches!(err, TokenCacheError::Config(_)));
    }

    // The only test in this binary that touches the global subscriber.
    #[test]
    fn bootstrap_then_apply_configured_filter() {
        let logger = Logger::bootstrap().unwrap();
        logger.apply("warn,aad_token_cache=debug").unwrap();
        assert!(matches!(
            logger.apply("aad_token_cache=notalevel"),
            Err(TokenCacheError::Config(_))
        ));

        assert!(matches!(Logger::bootstrap(), Err(TokenCacheError::Config(_))));
    }
}
