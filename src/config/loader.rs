//! Reads and parses the proxy configuration from a TOML file.

use std::path::Path;

use eyre::WrapErr as _;
use tokio::fs;

use crate::config::Config;

/// Reads and parses the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<Config> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(&path).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: Config = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use secrecy::ExposeSecret as _;

    use super::*;

    #[tokio::test]
    async fn load_full_config_file() {
        let toml_str = r#"
            [server]
            port = 9090
            bind = "0.0.0.0"

            [upstream]
            url = "http://127.0.0.1:3000"

            [proxy]
            prefix = "/oauth2"
            skip_provider_button = true

            [cookie]
            name = "_proxy"
            domains = ["example.com"]
            expire_secs = 3600
            refresh_secs = 600

            [auth]
            email_domains = ["example.com"]
            whitelist_domains = [".example.com:*"]
            skip_auth_routes = ["^/health$"]
            trusted_ips = ["10.0.0.0/8"]

            [headers]
            pass_access_token = true

            [oidc]
            issuer = "https://idp.example.com/realms/main"
            client_secret = "hunter2"

            [[jwt_issuers]]
            issuer = "https://idp.example.com/realms/main"
            audience = "authgate"
            secret = "shared"
        "#;
        let tmp = env::temp_dir().join("authgate_test_config.toml");
        fs::write(&tmp, toml_str).unwrap();
        let cfg = load(&tmp).await.unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.upstream.url, "http://127.0.0.1:3000");
        assert!(cfg.proxy.skip_provider_button);
        assert_eq!(cfg.cookie.name, "_proxy");
        assert_eq!(cfg.cookie.expire_secs, 3600);
        assert_eq!(cfg.cookie.refresh_secs, 600);
        assert_eq!(cfg.auth.whitelist_domains, vec![".example.com:*"]);
        assert!(cfg.headers.pass_access_token);
        let oidc = cfg.oidc.expect("oidc section present");
        assert_eq!(oidc.client_id, "authgate");
        assert_eq!(oidc.client_secret.expose_secret(), "hunter2");
        assert_eq!(oidc.scopes, vec!["openid", "email", "profile"]);
        assert_eq!(cfg.jwt_issuers.len(), 1);
        assert_eq!(cfg.jwt_issuers[0].audience.as_deref(), Some("authgate"));
    }

    #[tokio::test]
    async fn load_missing_file() {
        let tmp = env::temp_dir().join("authgate_does_not_exist.toml");
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for missing file");
    }

    #[tokio::test]
    async fn load_invalid_toml() {
        let tmp = env::temp_dir().join("authgate_invalid.toml");
        fs::write(&tmp, "not valid toml").unwrap();
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for invalid TOML");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [upstream]
            url = "http://127.0.0.1:8080"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 4180);
        assert_eq!(cfg.proxy.prefix, "/oauth2");
        assert_eq!(cfg.cookie.name, "_authgate");
        assert!(cfg.cookie.secure);
        assert!(cfg.auth.skip_auth_strip_headers);
        assert_eq!(cfg.auth.email_domains, vec!["*"]);
        assert!(cfg.headers.pass_basic_auth);
        assert!(!cfg.headers.set_xauthrequest);
        assert!(cfg.oidc.is_none());
        assert!(cfg.jwt_issuers.is_empty());
    }
}
