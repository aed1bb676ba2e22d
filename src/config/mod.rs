//! Configuration for the proxy.
//!
//! Raw TOML structures live in [`types`]; [`loader`] reads them from disk.
//! The resolved, validated runtime policy is [`crate::options::Options`].

mod loader;
mod types;

pub use loader::load;
pub use types::{
    AuthSection, Config, CookieSection, HeadersSection, JwtIssuerSection, OidcSection,
    ProxySection, ServerSection, UpstreamSection,
};
