//! authgate: an authenticating reverse proxy.
//!
//! Sits between unauthenticated clients and an upstream HTTP application.
//! Requests authenticate via a bearer JWT from a trusted issuer, Basic
//! credentials against an htpasswd file, or a stored session minted by the
//! OAuth2/OIDC authorization-code flow; identity is projected onto the
//! upstream request as configurable headers.
//!
//! The library surface exists so integration tests (and a shim binary) can
//! assemble the router with their own collaborators.

pub mod auth;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod csrf;
pub mod gate;
pub mod headers;
pub mod http;
pub mod options;
pub mod provider;
pub mod redirect;
pub mod session;
pub mod upstream;

use std::fs;
use std::sync::Once;

use eyre::{Result, WrapErr as _};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

static INIT_TRACING: Once = Once::new();
static INIT_RUSTLS: Once = Once::new();

/// The proxy's main function; callable from a shim binary.
///
/// # Errors
///
/// Returns an error if configuration loading or server startup fails.
///
/// # Panics
///
/// Panics if the rustls crypto provider cannot be installed.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Serve(args) => {
            INIT_TRACING.call_once(|| {
                tracing_subscriber::fmt()
                    .with_env_filter(
                        EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| EnvFilter::new("info")),
                    )
                    .init();
            });

            INIT_RUSTLS.call_once(|| {
                rustls::crypto::aws_lc_rs::default_provider()
                    .install_default()
                    .expect("rustls crypto provider installs once");
            });

            let config_path = fs::canonicalize(&args.config)
                .wrap_err(format!("Config file not found at: {}", args.config))?;
            info!("Using config path: {}", config_path.display());

            http::start(&config_path, args.port, args.bind.as_deref()).await
        }
    }
}
