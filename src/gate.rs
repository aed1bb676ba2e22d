//! The whitelist gate: decides whether a request bypasses authentication.
//!
//! A request skips the gate when it is a permitted CORS preflight, when its
//! path matches a configured regex, or when the client IP falls inside a
//! trusted CIDR. The client IP comes from the configured front-proxy header
//! when present, falling back to the transport remote address.

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName, Method};
use eyre::{WrapErr as _, eyre};
use ipnet::IpNet;
use regex::Regex;

use crate::config::AuthSection;

pub struct Gate {
    skip_auth_preflight: bool,
    skip_auth_routes: Vec<Regex>,
    trusted_ips: Vec<IpNet>,
    real_ip_header: Option<HeaderName>,
}

impl Gate {
    /// Compiles the gate from configuration. Invalid regexes, CIDRs or
    /// header names abort startup.
    pub fn from_config(cfg: &AuthSection) -> eyre::Result<Self> {
        let skip_auth_routes = cfg
            .skip_auth_routes
            .iter()
            .map(|raw| {
                Regex::new(raw).wrap_err_with(|| format!("invalid skip_auth_route regex {raw:?}"))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        let trusted_ips = cfg
            .trusted_ips
            .iter()
            .map(|raw| parse_trusted_ip(raw))
            .collect::<eyre::Result<Vec<_>>>()?;

        let real_ip_header = cfg
            .real_ip_header
            .as_deref()
            .map(|raw| {
                HeaderName::from_lowercase(raw.to_ascii_lowercase().as_bytes())
                    .wrap_err_with(|| format!("invalid real_ip_header {raw:?}"))
            })
            .transpose()?;

        Ok(Self {
            skip_auth_preflight: cfg.skip_auth_preflight,
            skip_auth_routes,
            trusted_ips,
            real_ip_header,
        })
    }

    /// True when the request may go straight to the upstream.
    pub fn is_whitelisted(&self, method: &Method, path: &str, client_ip: Option<IpAddr>) -> bool {
        if self.skip_auth_preflight && method == Method::OPTIONS {
            return true;
        }
        if self.skip_auth_routes.iter().any(|re| re.is_match(path)) {
            return true;
        }
        if let Some(ip) = client_ip
            && self.trusted_ips.iter().any(|net| net.contains(&ip))
        {
            return true;
        }
        false
    }

    /// Real client IP: the first entry of the configured header, otherwise
    /// the transport remote address.
    pub fn client_ip(&self, headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<IpAddr> {
        if let Some(name) = &self.real_ip_header
            && let Some(value) = headers.get(name)
            && let Ok(value) = value.to_str()
            && let Some(first) = value.split(',').next()
            && let Some(ip) = parse_ip_entry(first.trim())
        {
            return Some(ip);
        }
        remote.map(|addr| addr.ip())
    }
}

/// Accepts `10.0.0.0/8` CIDRs as well as bare addresses (host-length nets).
fn parse_trusted_ip(raw: &str) -> eyre::Result<IpNet> {
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net);
    }
    raw.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| eyre!("invalid trusted_ip entry {raw:?}"))
}

/// Header entries occasionally carry a port (`1.2.3.4:5678`); accept both.
fn parse_ip_entry(raw: &str) -> Option<IpAddr> {
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    raw.parse::<SocketAddr>().ok().map(|addr| addr.ip())
}
