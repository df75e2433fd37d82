//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_DIR: &str = "iptv_manager";

/// Outbound playlist download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 { 12 }
fn default_max_bytes() -> u64 { 10 * 1024 * 1024 }
fn default_user_agent() -> String { format!("iptv_manager/{}", env!("CARGO_PKG_VERSION")) }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_bytes: default_max_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub admin_token: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub default_app_key: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub fetch: FetchConfig,
}

fn default_addr() -> String { "127.0.0.1:8080".to_string() }
fn default_log_level() -> String { "info".to_string() }

fn default_db_path() -> PathBuf {
    match dirs::data_dir() {
        Some(mut path) => {
            path.push(APP_DIR);
            path.push("iptv_manager.db");
            path
        }
        None => PathBuf::from("./data/iptv_manager.db"),
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            db_path: default_db_path(),
            admin_token: String::new(),
            cors_origins: Vec::new(),
            default_app_key: None,
            log_level: default_log_level(),
            fetch: FetchConfig::default(),
        }
    }
}

impl AppConfig {
    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("IPTV_CONFIG") {
            if !path.trim().is_empty() {
                return PathBuf::from(path.trim());
            }
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path.push("config.json");
        path
    }

    /// Load from the config file, apply `IPTV_*` environment overrides, validate
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(addr) = get("IPTV_ADDR").filter(|v| !v.is_empty()) {
            self.addr = addr;
        }
        if let Some(path) = get("IPTV_DB_PATH").filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(token) = get("IPTV_ADMIN_TOKEN") {
            self.admin_token = token;
        }
        if let Some(origins) = get("IPTV_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(key) = get("IPTV_DEFAULT_APPKEY") {
            self.default_app_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(level) = get("IPTV_LOG").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.admin_token.trim().is_empty() && !self.binds_loopback() {
            return Err(ConfigError::Invalid(format!(
                "admin_token is required when listening on {}",
                self.addr
            )));
        }
        if self.fetch.max_bytes == 0 {
            return Err(ConfigError::Invalid("fetch.max_bytes must be positive".to_string()));
        }
        Ok(())
    }

    /// Listen address. `localhost` is accepted as an alias for 127.0.0.1.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self.addr.trim();
        let resolved = match addr.strip_prefix("localhost:") {
            Some(port) => format!("127.0.0.1:{}", port),
            None => addr.to_string(),
        };
        resolved
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid addr {:?}", self.addr)))
    }

    fn binds_loopback(&self) -> bool {
        self.socket_addr().map(|a| a.ip().is_loopback()).unwrap_or(false)
    }

    /// Admin auth is off only for a token-less server bound to loopback
    pub fn auth_disabled(&self) -> bool {
        self.admin_token.trim().is_empty() && self.binds_loopback()
    }

    /// Configured fallback key for the compatibility playlist endpoint
    pub fn fallback_app_key(&self) -> Option<&str> {
        self.default_app_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.fetch.timeout_secs, 12);
        assert_eq!(config.fetch.max_bytes, 10 * 1024 * 1024);
        assert!(config.auth_disabled());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"addr": "0.0.0.0:9000", "admin_token": "s3cret", "fetch": {"timeout_secs": 3}}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.fetch.timeout_secs, 3);
        assert_eq!(config.fetch.max_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
        assert!(!config.auth_disabled());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[
            ("IPTV_ADDR", " 127.0.0.1:7000 "),
            ("IPTV_DB_PATH", "/tmp/x.db"),
            ("IPTV_ADMIN_TOKEN", "tok"),
            ("IPTV_CORS_ORIGINS", "http://a.test, ,HTTP://B.test"),
            ("IPTV_DEFAULT_APPKEY", "abc"),
            ("IPTV_LOG", "debug"),
        ]));

        assert_eq!(config.addr, "127.0.0.1:7000");
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.admin_token, "tok");
        assert_eq!(config.cors_origins, vec!["http://a.test", "HTTP://B.test"]);
        assert_eq!(config.fallback_app_key(), Some("abc"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_empty_default_app_key_clears() {
        let mut config = AppConfig {
            default_app_key: Some("old".to_string()),
            ..Default::default()
        };
        config.apply_overrides(env(&[("IPTV_DEFAULT_APPKEY", "  ")]));
        assert_eq!(config.fallback_app_key(), None);
    }

    #[test]
    fn test_empty_token_requires_loopback() {
        let mut config = AppConfig {
            addr: "0.0.0.0:8080".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(!config.auth_disabled());

        for addr in ["127.0.0.1:8080", "localhost:8080", "[::1]:8080"] {
            config.addr = addr.to_string();
            assert!(config.validate().is_ok(), "{}", addr);
            assert!(config.auth_disabled(), "{}", addr);
        }
    }

    #[test]
    fn test_invalid_addr_rejected() {
        let config = AppConfig {
            addr: "not-an-addr".to_string(),
            admin_token: "tok".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
