//! Initiator configuration and target address construction
//!
//! A target is either a full URL (normalized to `ws://` / `wss://`) or a
//! host/port/path triple. Missing parts come from a [`Defaults`] provider.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Initiator configuration, loadable from TOML
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitiatorConfig {
    /// Full address; excludes host/port/path
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    /// Appended as a query string, in key order
    pub query: BTreeMap<String, String>,
    /// Use the secure scheme; falls back to [`Defaults::secure`]
    pub ssl: Option<bool>,
    /// Connect as soon as the initiator is constructed
    pub open: bool,
}

impl InitiatorConfig {
    /// Target a full URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Target a host/port/path triple
    pub fn with_endpoint(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn auto_open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    /// Parse from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(format!("initiator config: {}", e)))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations that name both a URL and endpoint parts
    pub fn validate(&self) -> Result<()> {
        if self.url.is_some() && (self.host.is_some() || self.port.is_some() || self.path.is_some())
        {
            return Err(Error::config(
                "either `url` or `host`/`port`/`path` may be given, not both",
            ));
        }
        Ok(())
    }
}

/// Source of defaults for address parts the configuration leaves out
pub trait Defaults: Send + Sync {
    fn host(&self) -> String;

    /// `None` means the scheme's default port
    fn port(&self) -> Option<u16>;

    fn path(&self) -> String;

    fn secure(&self) -> bool;
}

/// Fixed defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDefaults {
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub secure: bool,
}

impl Default for StaticDefaults {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            path: "/".to_string(),
            secure: false,
        }
    }
}

impl Defaults for StaticDefaults {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn secure(&self) -> bool {
        self.secure
    }
}

/// Build the WebSocket address an initiator connects to
pub fn target_address(config: &InitiatorConfig, defaults: &dyn Defaults) -> Result<Url> {
    config.validate()?;

    let secure = config.ssl.unwrap_or_else(|| defaults.secure());
    let mut url = match &config.url {
        Some(raw) => normalize_url(raw, secure)?,
        None => {
            let host = config.host.clone().unwrap_or_else(|| defaults.host());
            let port = config.port.or_else(|| defaults.port());
            let path = config.path.clone().unwrap_or_else(|| defaults.path());
            endpoint_url(&host, port, &path, secure)?
        }
    };

    if !config.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &config.query {
            pairs.append_pair(key, value);
        }
    }

    Ok(url)
}

fn scheme(secure: bool) -> &'static str {
    if secure {
        "wss"
    } else {
        "ws"
    }
}

fn endpoint_url(host: &str, port: Option<u16>, path: &str, secure: bool) -> Result<Url> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::config("host must not be empty"));
    }

    // Bare IPv6 literals need brackets inside a URL
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    let authority = match port {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    };

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    Ok(Url::parse(&format!("{}://{}{}", scheme(secure), authority, path))?)
}

/// Map a user-supplied URL onto the ws/wss schemes
fn normalize_url(raw: &str, secure: bool) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::config("url must not be empty"));
    }

    let normalized = match raw.split_once("://") {
        Some((given, rest)) => {
            let mapped = match given.to_ascii_lowercase().as_str() {
                "ws" | "http" => "ws",
                "wss" | "https" => "wss",
                other => {
                    return Err(Error::config(format!("unsupported url scheme `{}`", other)));
                }
            };
            format!("{}://{}", mapped, rest)
        }
        None => {
            let rest = raw.strip_prefix("//").unwrap_or(raw);
            format!("{}://{}", scheme(secure), rest)
        }
    };

    Ok(Url::parse(&normalized)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(config: &InitiatorConfig) -> String {
        target_address(config, &StaticDefaults::default())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_endpoint_with_query() {
        let config = InitiatorConfig::with_endpoint("example.test", 8080, "/ws")
            .query("room", "42")
            .ssl(false);
        assert_eq!(resolve(&config), "ws://example.test:8080/ws?room=42");
    }

    #[test]
    fn test_secure_endpoint() {
        let config = InitiatorConfig::with_endpoint("example.test", 8443, "events").ssl(true);
        assert_eq!(resolve(&config), "wss://example.test:8443/events");
    }

    #[test]
    fn test_defaults_fill_missing_parts() {
        let defaults = StaticDefaults {
            host: "app.local".into(),
            port: Some(9000),
            path: "/socket".into(),
            secure: true,
        };
        let url = target_address(&InitiatorConfig::default(), &defaults).unwrap();
        assert_eq!(url.as_str(), "wss://app.local:9000/socket");

        let config = InitiatorConfig {
            port: Some(1234),
            ssl: Some(false),
            ..Default::default()
        };
        let url = target_address(&config, &defaults).unwrap();
        assert_eq!(url.as_str(), "ws://app.local:1234/socket");
    }

    #[test]
    fn test_static_defaults() {
        assert_eq!(resolve(&InitiatorConfig::default()), "ws://localhost/");
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let config = InitiatorConfig::with_endpoint("::1", 7331, "/");
        assert_eq!(resolve(&config), "ws://[::1]:7331/");
    }

    #[test]
    fn test_url_scheme_normalization() {
        assert_eq!(
            resolve(&InitiatorConfig::with_url("http://example.test/ws")),
            "ws://example.test/ws"
        );
        assert_eq!(
            resolve(&InitiatorConfig::with_url("https://example.test/ws")),
            "wss://example.test/ws"
        );
        assert_eq!(
            resolve(&InitiatorConfig::with_url("wss://example.test:9/")),
            "wss://example.test:9/"
        );
        assert_eq!(
            resolve(&InitiatorConfig::with_url("example.test:8080/ws")),
            "ws://example.test:8080/ws"
        );
        assert_eq!(
            resolve(&InitiatorConfig::with_url("//example.test/ws").ssl(true)),
            "wss://example.test/ws"
        );
    }

    #[test]
    fn test_url_query_is_appended() {
        let config = InitiatorConfig::with_url("ws://example.test/ws?a=1")
            .query("b", "two words");
        assert_eq!(resolve(&config), "ws://example.test/ws?a=1&b=two+words");
    }

    #[test]
    fn test_invalid_urls() {
        let defaults = StaticDefaults::default();
        let ftp = InitiatorConfig::with_url("ftp://example.test");
        assert!(target_address(&ftp, &defaults).is_err());
        assert!(target_address(&InitiatorConfig::with_url("   "), &defaults).is_err());
        assert!(target_address(&InitiatorConfig::with_url("ws://"), &defaults).is_err());
    }

    #[test]
    fn test_url_and_endpoint_conflict() {
        let mut config = InitiatorConfig::with_url("ws://example.test/");
        config.host = Some("other.test".into());
        let result = target_address(&config, &StaticDefaults::default());
        assert!(matches!(
            result,
            Err(Error::Core(eventsock_core::Error::InvalidConfiguration(_)))
        ));
    }

    #[test]
    fn test_from_toml() {
        let config = InitiatorConfig::from_toml_str(
            r#"
host = "example.test"
port = 8080
path = "/ws"
ssl = false
open = true

[query]
room = "42"
"#,
        )
        .unwrap();

        assert!(config.open);
        assert_eq!(resolve(&config), "ws://example.test:8080/ws?room=42");
    }

    #[test]
    fn test_toml_url_must_be_string() {
        let result = InitiatorConfig::from_toml_str("url = 42");
        assert!(matches!(
            result,
            Err(Error::Core(eventsock_core::Error::InvalidConfiguration(_)))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("initiator.toml");
        std::fs::write(&path, "url = \"https://example.test/live\"\n").unwrap();

        let config = InitiatorConfig::load(&path).unwrap();
        assert_eq!(resolve(&config), "wss://example.test/live");
    }
}
