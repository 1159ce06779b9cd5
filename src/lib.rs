//! Token-issuing OIDC gateway core.
//!
//! Authenticates users against an upstream OpenID Connect provider,
//! establishes sessions, and vends short-lived, scope-limited child tokens to
//! internal services. Also acts as a downstream OIDC provider, issuing and
//! redeeming opaque authorization codes bound to a session.
//!
//! HTTP routing, middleware, and the GitHub-style OAuth2 provider variant are
//! external collaborators of this crate, not part of it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod downstream;
pub mod error;
pub mod issuer;
pub mod oidc;
pub mod store;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber. `level` is the default filter
/// (overridden by `RUST_LOG` if set); `format` selects `"json"` or compact
/// text output.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
