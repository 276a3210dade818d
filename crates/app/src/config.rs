//! Initiator configuration lookup for `eventsock connect`

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use eventsock_net::{InitiatorConfig, DEFAULT_PORT};

/// Pick the configuration from flags, the default config file, or built-ins
pub fn resolve(url: Option<String>, path: Option<PathBuf>) -> anyhow::Result<InitiatorConfig> {
    resolve_with_default(url, path, default_config_path().as_deref())
}

fn resolve_with_default(
    url: Option<String>,
    path: Option<PathBuf>,
    default_path: Option<&Path>,
) -> anyhow::Result<InitiatorConfig> {
    if let Some(url) = url {
        return Ok(InitiatorConfig::with_url(url));
    }

    if let Some(path) = path {
        return InitiatorConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()));
    }

    if let Some(path) = default_path.filter(|p| p.exists()) {
        tracing::debug!(path = %path.display(), "Using default initiator config");
        return InitiatorConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()));
    }

    Ok(InitiatorConfig::with_endpoint("127.0.0.1", DEFAULT_PORT, "/"))
}

/// `<config dir>/initiator.toml`
fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "onyx", "eventsock")
        .map(|dirs| dirs.config_dir().join("initiator.toml"))
}
