//! Layered configuration (defaults → file → environment) via the
//! `config` crate, with a `PORTAL_<UPPER_SNAKE>` environment convention.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One OAuth rollout override sourced from `PORTAL_FEATURE_OAUTH_<NAME>_ENABLED`
/// / `_ROLLOUT_PERCENTAGE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthFlagOverride {
    pub enabled: bool,
    pub rollout_percentage: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub verbose: bool,
    /// Path to the MCP CLI binary `CommandExecutor` invokes.
    pub executor_binary_path: String,
    /// Interval at which `FeatureFlags::spawn_watch` refreshes from the
    /// `FlagStore`.
    #[serde(with = "humantime_secs")]
    pub flag_refresh_interval: Duration,
    /// Rollout overrides for the `oauth_dcr`-style feature flags, keyed by
    /// flag name.
    #[serde(default)]
    pub feature_oauth: HashMap<String, OAuthFlagOverride>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            database_url: None,
            redis_url: None,
            tls_cert: None,
            tls_key: None,
            verbose: false,
            executor_binary_path: "mcp".into(),
            flag_refresh_interval: Duration::from_secs(30),
            feature_oauth: HashMap::new(),
        }
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Scans `PORTAL_FEATURE_OAUTH_<NAME>_ENABLED` / `_ROLLOUT_PERCENTAGE`
/// pairs out of the process environment; the `config` crate's generic
/// `__`-separated nesting doesn't model this pair-of-suffixes shape
/// cleanly, so it's assembled by hand like the rest of 's flag
/// convention.
fn scan_oauth_flag_env() -> std::collections::HashMap<String, OAuthFlagOverride> {
    use std::collections::HashMap;
    let mut enabled: HashMap<String, bool> = HashMap::new();
    let mut rollout: HashMap<String, u8> = HashMap::new();

    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix("PORTAL_FEATURE_OAUTH_") else { continue };
        if let Some(name) = rest.strip_suffix("_ENABLED") {
            enabled.insert(name.to_lowercase(), value.eq_ignore_ascii_case("true") || value == "1");
        } else if let Some(name) = rest.strip_suffix("_ROLLOUT_PERCENTAGE") {
            if let Ok(pct) = value.parse::<u8>() {
                rollout.insert(name.to_lowercase(), pct.min(100));
            }
        }
    }

    let mut names: std::collections::HashSet<String> = enabled.keys().cloned().collect();
    names.extend(rollout.keys().cloned());

    names
        .into_iter()
        .map(|name| {
            let override_ = OAuthFlagOverride {
                enabled: enabled.get(&name).copied().unwrap_or(true),
                rollout_percentage: rollout.get(&name).copied().unwrap_or(0),
            };
            (name, override_)
        })
        .collect()
}

/// Loads `PortalConfig` layered defaults → optional file → environment
///.
pub fn load(config_file: Option<&std::path::Path>) -> anyhow::Result<PortalConfig> {
    let defaults = PortalConfig::default();
    let mut builder = config::Config::builder()
        .set_default("host", defaults.host)?
        .set_default("port", defaults.port as i64)?
        .set_default("verbose", defaults.verbose)?
        .set_default("executor_binary_path", defaults.executor_binary_path)?
        .set_default("flag_refresh_interval", defaults.flag_refresh_interval.as_secs() as i64)?;

    if let Some(path) = config_file {
        builder = builder.add_source(config::File::from(path).required(false));
    } else {
        builder = builder.add_source(config::File::with_name("portal").required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PORTAL")
            .separator("__")
            .try_parsing(true),
    );

    let mut loaded: PortalConfig = builder.build()?.try_deserialize()?;
    let scanned = scan_oauth_flag_env();
    if !scanned.is_empty() {
        loaded.feature_oauth.extend(scanned);
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_source() {
        let cfg = PortalConfig::default();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.feature_oauth.is_empty());
    }
}
