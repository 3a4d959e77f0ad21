//! CLI entry point for aad-token — exercise the token cache from a shell.
//!
//! Loads settings (file + `AAD__*` environment), then runs exactly one
//! action selected by flag:
//! - `-r` redeems a refresh token through the session cache and prints the
//!   access token (or reports that interactive sign-in is required).
//! - `-s` completes an interactive sign-in: redeems an authorization code
//!   against `authority.redirect_uri` and prints the access token.
//! - `-a` acquires an app-only (client credentials) token.
//! - `-c` decodes a token cookie and prints the signed-in tenant.
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error, or interactive sign-in required
//! - 2: argument validation error (clap handles this automatically)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;

use aad_token_cache::acquirer::TokenOutcome;
use aad_token_cache::app_only::AppOnlyTokens;
use aad_token_cache::cookie::{TokenCookie, tenant_id_from_jwt};
use aad_token_cache::logging::Logger;
use aad_token_cache::session::MemorySessionStore;
use aad_token_cache::settings::Settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML). Environment variables prefixed `AAD__`
    /// override its values.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Tenant to authenticate against. Defaults to `authority.tenant_id`.
    #[arg(long)]
    tenant_id: Option<String>,

    /// Resource to request a token for. Defaults to `authority.resource_id`.
    #[arg(long)]
    resource: Option<String>,

    /// Refresh token to redeem (required for -r). Prefer the environment
    /// variable to keep the token out of shell history.
    #[arg(long, env = "AAD_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Authorization code returned to the reply URL (required for -s).
    #[arg(long, env = "AAD_AUTH_CODE", hide_env_values = true)]
    code: Option<String>,

    /// Token cookie value to decode (required for -c).
    #[arg(long)]
    cookie: Option<String>,

    #[command(flatten)]
    actions: ActionFlags,
}

/// Action flags — exactly one must be set per invocation.
#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct ActionFlags {
    /// Redeem --refresh-token for an access token via the session cache.
    #[arg(short)]
    refresh: bool,

    /// Redeem --code from an interactive sign-in.
    #[arg(short)]
    sign_in: bool,

    /// Acquire an app-only token with the configured client credentials.
    #[arg(short)]
    app_only: bool,

    /// Decode --cookie and print its tenant.
    #[arg(short)]
    cookie_decode: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logger = match Logger::bootstrap() {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        }
    };

    match run(cli, logger.as_ref()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, logger: Option<&Logger>) -> anyhow::Result<ExitCode> {
    if cli.actions.cookie_decode {
        // Cookie decoding is local; it does not need credentials.
        let value = cli
            .cookie
            .as_deref()
            .ok_or_else(|| anyhow!("--cookie is required when using -c"))?;
        let cookie = TokenCookie::parse(value).ok_or_else(|| anyhow!("cookie could not be decoded"))?;
        match cookie.tenant_id() {
            Some(tenant) => println!("tenant: {tenant}"),
            None => println!("tenant: <none>"),
        }
        println!("refresh token present: {}", cookie.refresh_token.is_some());
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings::load(cli.settings.as_deref()).context("loading settings")?;
    if let Some(logger) = logger {
        logger.apply(&settings.log.filter)?;
    }
    tracing::debug!(?settings, "settings loaded");

    let tenant_id = cli
        .tenant_id
        .or_else(|| settings.authority.tenant_id.clone())
        .ok_or_else(|| anyhow!("--tenant-id is required (or set authority.tenant_id)"))?;
    let resource = cli
        .resource
        .unwrap_or_else(|| settings.authority.resource_id.clone());

    if cli.actions.app_only {
        let tokens = AppOnlyTokens::new(Arc::new(settings.authority()))
            .with_skew(settings.expiry_skew());
        let token = tokens.token(&tenant_id, &resource).await?;
        println!("{token}");
        return Ok(ExitCode::SUCCESS);
    }

    if cli.actions.sign_in {
        let code = cli
            .code
            .as_deref()
            .ok_or_else(|| anyhow!("--code is required when using -s"))?;
        let redirect_uri = settings.redirect_uri()?;
        let acquirer = settings.acquirer(Arc::new(MemorySessionStore::new()));
        let grant = acquirer
            .redeem_code(&tenant_id, &resource, code, redirect_uri)
            .await?;
        println!("{}", grant.access_token);
        if let Some(tenant) = grant.id_token.as_deref().and_then(tenant_id_from_jwt) {
            eprintln!("Signed in to tenant {tenant}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let refresh_token = cli
        .refresh_token
        .ok_or_else(|| anyhow!("--refresh-token is required when using -r"))?;

    let session = Arc::new(MemorySessionStore::new());
    let acquirer = settings.acquirer(session);
    acquirer.store().set_refresh_token(&refresh_token).await?;

    match acquirer.acquire_outcome(&tenant_id, &resource).await? {
        TokenOutcome::Cached(token) | TokenOutcome::Refreshed(token) => {
            println!("{token}");
            if let Some(rotated) = acquirer.store().get_refresh_token().await? {
                if rotated != refresh_token {
                    eprintln!("Note: the refresh token was rotated; the old one is no longer valid.");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        TokenOutcome::InteractionRequired(reason) => {
            eprintln!("Interactive sign-in required ({reason:?})");
            Ok(ExitCode::FAILURE)
        }
    }
}
