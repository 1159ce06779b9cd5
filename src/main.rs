//! Token-gateway binary entry point.
//!
//! Wires configuration, tracing, and the core components together. The
//! actual request-serving HTTP layer is external to this crate; `serve`
//! stops at "components constructed and ready".

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use jsonwebtoken::Algorithm;
use tracing::{error, info};

use token_gateway::cli::{Cli, Command};
use token_gateway::clock::SystemClock;
use token_gateway::config::Config;
use token_gateway::downstream::DownstreamOidcService;
use token_gateway::oidc::{JwksFetcher, OidcProvider, OidcVerifier};
use token_gateway::store::memory::{InMemoryKeyValueStore, InMemoryRelationalStore};
use token_gateway::{cache::ChildTokenCache, issuer::ChildTokenIssuer, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(cli.log_level.as_deref().unwrap_or("info"), cli.log_format.as_deref()) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Config => {
            info!("configuration loaded and valid");
            ExitCode::SUCCESS
        }
        Command::Serve => match bootstrap(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("failed to initialize gateway core: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn bootstrap(config: Config) -> token_gateway::Result<()> {
    let clock = Arc::new(SystemClock);
    let http = reqwest::Client::builder()
        .timeout(config.oidc_provider.http_timeout)
        .build()
        .map_err(token_gateway::Error::from)?;

    let algorithm = match config.oidc_provider.algorithm.as_str() {
        "RS256" => Algorithm::RS256,
        "RS384" => Algorithm::RS384,
        "RS512" => Algorithm::RS512,
        other => return Err(token_gateway::Error::Config(format!("unsupported upstream algorithm: {other}"))),
    };

    let jwks = Arc::new(JwksFetcher::new(http.clone(), std::time::Duration::from_secs(3600)));
    let verifier = Arc::new(OidcVerifier::new(
        config.oidc_provider.issuer.clone(),
        config.oidc_provider.audience.clone(),
        algorithm,
        jwks,
    ));
    let _provider = OidcProvider::new(config.oidc_provider.clone(), http, verifier);

    let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
    let relational = Arc::new(InMemoryRelationalStore::new());
    let issuer = Arc::new(ChildTokenIssuer::new(
        kv.clone(),
        relational,
        clock.clone(),
        config.child_token.token_lifetime,
    ));
    let _cache = ChildTokenCache::new(issuer, clock.clone());

    let _downstream = DownstreamOidcService::new(config.downstream_oidc, kv, clock)?;

    info!("token gateway core initialized");
    Ok(())
}
