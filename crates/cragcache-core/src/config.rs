//! Application configuration management.
//!
//! Configuration is read from `~/.config/cragcache/config.json` when it
//! exists, then overridden by `CRAGCACHE_*` environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "cragcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Offline database file name
const DB_FILE: &str = "offline.db";

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_GEOCODE_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_GEOCODE_USER_AGENT: &str = concat!("cragcache/", env!("CARGO_PKG_VERSION"));

/// Requests per client per window for the geocoding proxy
const DEFAULT_GEOCODE_LIMIT: u32 = 30;
const DEFAULT_GEOCODE_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub backend_url: Option<String>,
    pub backend_anon_key: Option<String>,
    pub csrf_secret: Option<String>,
    pub secure_cookies: bool,
    /// Key rate limits on `X-Forwarded-For` instead of the peer address.
    /// Only safe behind a reverse proxy that overwrites the header.
    pub trust_proxy: bool,
    pub geocode_url: String,
    pub geocode_user_agent: String,
    pub geocode_limit: u32,
    pub geocode_window_secs: u64,
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    /// Static map image URL with `{west}`, `{south}`, `{east}`, `{north}`
    /// placeholders, fetched as the offline screenshot of a crag.
    pub screenshot_url_template: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            backend_url: None,
            backend_anon_key: None,
            csrf_secret: None,
            secure_cookies: false,
            trust_proxy: false,
            geocode_url: DEFAULT_GEOCODE_URL.to_string(),
            geocode_user_agent: DEFAULT_GEOCODE_USER_AGENT.to_string(),
            geocode_limit: DEFAULT_GEOCODE_LIMIT,
            geocode_window_secs: DEFAULT_GEOCODE_WINDOW_SECS,
            data_dir: None,
            cache_dir: None,
            log_dir: None,
            screenshot_url_template: None,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `CRAGCACHE_*` variables looked up through `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("CRAGCACHE_BIND") {
            self.bind_address = v;
        }
        if let Some(v) = get("CRAGCACHE_BACKEND_URL") {
            self.backend_url = Some(v);
        }
        if let Some(v) = get("CRAGCACHE_BACKEND_ANON_KEY") {
            self.backend_anon_key = Some(v);
        }
        if let Some(v) = get("CRAGCACHE_CSRF_SECRET") {
            self.csrf_secret = Some(v);
        }
        if let Some(v) = get("CRAGCACHE_SECURE_COOKIES") {
            self.secure_cookies = parse_flag(&v);
        }
        if let Some(v) = get("CRAGCACHE_TRUST_PROXY") {
            self.trust_proxy = parse_flag(&v);
        }
        if let Some(v) = get("CRAGCACHE_GEOCODE_URL") {
            self.geocode_url = v;
        }
        if let Some(v) = get("CRAGCACHE_GEOCODE_USER_AGENT") {
            self.geocode_user_agent = v;
        }
        if let Some(v) = get("CRAGCACHE_GEOCODE_LIMIT") {
            self.geocode_limit = v
                .parse()
                .with_context(|| format!("CRAGCACHE_GEOCODE_LIMIT is not a number: {}", v))?;
        }
        if let Some(v) = get("CRAGCACHE_GEOCODE_WINDOW_SECS") {
            self.geocode_window_secs = v
                .parse()
                .with_context(|| format!("CRAGCACHE_GEOCODE_WINDOW_SECS is not a number: {}", v))?;
        }
        if let Some(v) = get("CRAGCACHE_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CRAGCACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CRAGCACHE_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CRAGCACHE_SCREENSHOT_URL") {
            self.screenshot_url_template = Some(v);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Backend URL and anon key, both required for anything that talks to it.
    pub fn backend(&self) -> Result<(&str, &str)> {
        let url = self
            .backend_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("CRAGCACHE_BACKEND_URL is not set"))?;
        let key = self
            .backend_anon_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("CRAGCACHE_BACKEND_ANON_KEY is not set"))?;
        Ok((url, key))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Location of the offline database, `None` meaning the platform default.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(DB_FILE))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CRAGCACHE_BIND", "0.0.0.0:9000"),
            ("CRAGCACHE_BACKEND_URL", "https://project.backend.test"),
            ("CRAGCACHE_BACKEND_ANON_KEY", "anon"),
            ("CRAGCACHE_SECURE_COOKIES", "true"),
            ("CRAGCACHE_GEOCODE_LIMIT", "5"),
            ("CRAGCACHE_DATA_DIR", "/tmp/cragcache"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert!(config.secure_cookies);
        assert!(!config.trust_proxy);
        assert_eq!(config.geocode_limit, 5);
        assert_eq!(config.geocode_window_secs, DEFAULT_GEOCODE_WINDOW_SECS);
        assert_eq!(config.backend().unwrap(), ("https://project.backend.test", "anon"));
        assert_eq!(config.db_path(), Some(PathBuf::from("/tmp/cragcache/offline.db")));
    }

    #[test]
    fn test_trust_proxy_flag() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "CRAGCACHE_TRUST_PROXY").then(|| "YES".to_string())).unwrap();
        assert!(config.trust_proxy);
    }

    #[test]
    fn test_bad_number_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(|k| (k == "CRAGCACHE_GEOCODE_LIMIT").then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_required() {
        assert!(Config::default().backend().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"geocode_limit": 3}"#).unwrap();
        assert_eq!(config.geocode_limit, 3);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
    }
}
