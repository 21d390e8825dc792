//! Application settings
//!
//! Stored as `settings.json` in the data directory. Environment variables
//! override the file. Settings are loaded once by each binary and passed to
//! the components that need them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

pub const APP_DIR: &str = "linkboard";
pub const SETTINGS_FILE: &str = "settings.json";
pub const DB_FILE: &str = "linkboard.db";

/// Opaque connection pair handed to the rendering layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub store_key: Option<String>,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Upper bound for a single icon probe or download
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Favicon service URL templates, `{domain}` is substituted
    #[serde(default = "default_favicon_services")]
    pub favicon_services: Vec<String>,
    /// Store chosen image icons as data: URIs
    #[serde(default = "default_true")]
    pub inline_icons: bool,
    #[serde(default = "default_search_url")]
    pub search_url: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_favicon_services() -> Vec<String> {
    vec![
        "https://icons.duckduckgo.com/ip1/{domain}.ico".to_string(),
        "https://logo.clearbit.com/{domain}".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_search_url() -> String {
    "https://www.google.com/search?q=".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: None,
            store_key: None,
            db_path: None,
            bind_addr: default_bind_addr(),
            probe_timeout_secs: default_probe_timeout(),
            favicon_services: default_favicon_services(),
            inline_icons: true,
            search_url: default_search_url(),
        }
    }
}

impl Settings {
    /// Load settings from disk or fall back to defaults.
    ///
    /// A missing file is normal; an unreadable or malformed one is logged
    /// and replaced by defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "[Settings] malformed settings file, using defaults");
                Settings::default()
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[Settings] unreadable settings file, using defaults");
                Settings::default()
            }
        }
    }

    /// Load from `<data_dir>/settings.json` and apply environment overrides.
    pub fn from_environment() -> Self {
        let mut settings = Self::load(&data_dir().join(SETTINGS_FILE));
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Settings(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = get("LINKBOARD_STORE_URL") {
            self.store_url = Some(url);
        }
        if let Some(key) = get("LINKBOARD_STORE_KEY") {
            self.store_key = Some(key);
        }
        if let Some(path) = get("LINKBOARD_DB") {
            self.db_path = Some(path);
        }
        if let Some(bind) = get("LINKBOARD_BIND") {
            self.bind_addr = bind;
        }
        if let Some(port) = get("PORT") {
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.bind_addr = format!("{}:{}", host, port);
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.store_url.clone(),
            key: self.store_key.clone(),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Database path: explicit argument, then configured path, then the
    /// default file in the data directory.
    pub fn resolve_db_path(&self, arg: Option<&str>) -> PathBuf {
        if let Some(path) = arg.filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        if let Some(path) = self.db_path.as_deref().filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        data_dir().join(DB_FILE)
    }
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.favicon_services.len(), 2);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let mut settings = Settings::default();
        settings.store_url = Some("https://db.example".into());
        settings.inline_icons = false;
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"store_key": "k", "probe_timeout_secs": 2}"#).unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.store_key.as_deref(), Some("k"));
        assert_eq!(settings.probe_timeout_secs, 2);
        assert_eq!(settings.bind_addr, "127.0.0.1:8000");
        assert!(settings.inline_icons);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.apply_env(env(&[
            ("LINKBOARD_STORE_URL", "https://x.example"),
            ("LINKBOARD_STORE_KEY", ""),
            ("PORT", "9000"),
        ]));
        assert_eq!(
            settings.connection(),
            ConnectionConfig { url: Some("https://x.example".into()), key: None }
        );
        assert_eq!(settings.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_db_path_resolution_order() {
        let mut settings = Settings::default();
        settings.db_path = Some("/tmp/configured.db".into());
        assert_eq!(settings.resolve_db_path(Some("/tmp/arg.db")), PathBuf::from("/tmp/arg.db"));
        assert_eq!(settings.resolve_db_path(None), PathBuf::from("/tmp/configured.db"));
        settings.db_path = None;
        assert!(settings.resolve_db_path(None).ends_with(DB_FILE));
    }
}
