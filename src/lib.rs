//! Session-scoped Azure AD token cache with silent refresh.
//!
//! A web application calling a protected API (the Azure AD Graph API, for
//! instance) needs an access token per request. This crate keeps those
//! tokens in the user's session, redeems the session's refresh token when
//! a cached token has expired, and tells the caller when neither works so
//! it can send the user through interactive sign-in.
//!
//! # Modules
//!
//! - [`acquirer`] — The acquisition state machine (`TokenAcquirer`).
//! - [`app_only`] — Client-credentials tokens for daemon calls.
//! - [`authority`] — The `Authority` seam and its Azure AD HTTP client.
//! - [`cookie`] — Token cookie codec and tenant-claim extraction.
//! - [`error`] — Typed error hierarchy (`TokenCacheError`).
//! - [`logging`] — Tracing subscriber bootstrap for binaries.
//! - [`session`] — The `SessionStore` seam and an in-memory store.
//! - [`settings`] — Layered configuration (defaults, TOML, environment).
//! - [`store`] — Expiry-aware `TokenStore` over a session.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use aad_token_cache::acquirer::TokenAcquirer;
//! use aad_token_cache::authority::AadAuthority;
//! use aad_token_cache::session::MemorySessionStore;
//! use aad_token_cache::store::TokenStore;
//!
//! let store = TokenStore::new(Arc::new(MemorySessionStore::new()));
//! let acquirer = TokenAcquirer::new(store, Arc::new(AadAuthority::new("client", "secret")));
//! match acquirer.acquire("contoso.onmicrosoft.com", "https://graph.windows.net").await? {
//!     Some(token) => { /* call the API with `token` */ }
//!     None => { /* issue an OpenID Connect challenge */ }
//! }
//! ```

#![warn(missing_docs)]

pub mod acquirer;
pub mod app_only;
pub mod authority;
pub mod cookie;
pub mod error;
pub mod logging;
pub mod session;
pub mod settings;
pub mod store;
