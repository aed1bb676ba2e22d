//! Open-redirect defense for every post-auth redirect target.
//!
//! A redirect is accepted when it is a plain path on the proxy's own origin,
//! or an absolute http(s) URL whose host matches the configured whitelist.
//! Everything else — protocol-relative targets, backslash variants, dot
//! segments, whitespace tricks — is rejected.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Matches the browser-normalization escapes hidden inside path-absolute
/// targets: slash-or-backslash, then optional whitespace or one/two dots,
/// then slash-or-backslash (`//`, `/\`, `/ /`, `/./`, `/../`, ...).
static INVALID_REDIRECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[/\\](?:[\s\x0B]*|\.{1,2})[/\\]").expect("static redirect pattern parses")
});

/// A single whitelist entry, parsed from `host[:port]` notation.
///
/// A leading dot (`.example.com`) additionally admits subdomains. The port
/// suffix may be absent (redirect must carry no explicit port), `:*` (any
/// port) or `:N` (exactly that port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedDomain {
    host: String,
    subdomains: bool,
    port: PortRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortRule {
    None,
    Any,
    Exact(u16),
}

impl AllowedDomain {
    /// Parses a whitelist entry. Fails on an empty host or a non-numeric
    /// port that isn't `*`.
    pub fn parse(entry: &str) -> Result<Self, String> {
        let (host_part, port_part) = split_host_port(entry);
        let port = match port_part {
            "" => PortRule::None,
            ":*" => PortRule::Any,
            other => {
                let digits = &other[1..];
                let port = digits
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port in whitelist domain {entry:?}"))?;
                PortRule::Exact(port)
            }
        };
        let subdomains = host_part.starts_with('.');
        let host = host_part.trim_start_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return Err(format!("empty host in whitelist domain {entry:?}"));
        }
        Ok(Self {
            host,
            subdomains,
            port,
        })
    }

    fn matches(&self, hostname: &str, port: Option<u16>) -> bool {
        match self.port {
            PortRule::None => {
                if port.is_some() {
                    return false;
                }
            }
            PortRule::Any => {}
            PortRule::Exact(expected) => {
                if port != Some(expected) {
                    return false;
                }
            }
        }
        let hostname = hostname.to_ascii_lowercase();
        if hostname == self.host {
            return true;
        }
        self.subdomains && hostname.ends_with(&format!(".{}", self.host))
    }
}

/// Splits a trailing `:port` (including the `:*` wildcard) off a host,
/// leaving bracketed IPv6 hosts intact. The returned port keeps its leading
/// colon, so `join_host_port` is the exact inverse.
pub fn split_host_port(hostport: &str) -> (&str, &str) {
    let Some(idx) = hostport.rfind(':') else {
        return (hostport, "");
    };
    if let Some(bracket) = hostport.rfind(']') {
        if idx < bracket {
            return (hostport, "");
        }
    } else if hostport[..idx].contains(':') {
        // bare IPv6 address, the colons are part of the host
        return (hostport, "");
    }
    (&hostport[..idx], &hostport[idx..])
}

pub fn join_host_port(host: &str, port: &str) -> String {
    format!("{host}{port}")
}

/// Decides whether a user-supplied post-auth redirect is safe to follow.
pub fn is_valid_redirect(redirect: &str, whitelist: &[AllowedDomain]) -> bool {
    if redirect.is_empty() {
        return false;
    }
    if redirect.starts_with('/') {
        return !redirect.starts_with("//") && !INVALID_REDIRECT_RE.is_match(redirect);
    }
    if redirect.starts_with("http://") || redirect.starts_with("https://") {
        let Ok(parsed) = Url::parse(redirect) else {
            return false;
        };
        let Some(hostname) = parsed.host_str() else {
            return false;
        };
        // Url::port() reports only explicit, non-default ports, which is
        // exactly the "implicit 80/443" rule the whitelist needs.
        let port = parsed.port();
        return whitelist.iter().any(|d| d.matches(hostname, port));
    }
    false
}
