use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::api::models::User;
use crate::error::{Error, Result};
use crate::storage::{self, SqliteStore};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_reply_min() -> u64 {
    1000
}

fn default_reply_max() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub token: Option<String>,
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_reply_min")]
    pub reply_delay_min_ms: u64,
    #[serde(default = "default_reply_max")]
    pub reply_delay_max_ms: u64,
    // Kept last: TOML tables must follow plain values.
    pub user: Option<User>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            data_dir: None,
            reply_delay_min_ms: default_reply_min(),
            reply_delay_max_ms: default_reply_max(),
            user: None,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // REDWEB_CONFIG wins; otherwise the TOML file lives in the user config dir.
    fn toml_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("REDWEB_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("redweb").join("redweb.toml"))
    }

    pub fn load() -> Self {
        Self::toml_path().map(|path| Self::load_from(&path)).unwrap_or_default()
    }

    /// Read a config file. A missing or unreadable file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::new();
        };
        match toml::from_str::<AppConfig>(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ignoring unreadable config {}: {e}", path.display());
                Self::new()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| Error::Config("no config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn current_user(&self) -> Result<&User> {
        self.user.as_ref().ok_or(Error::NotAuthenticated)
    }

    pub fn reply_delay(&self) -> (Duration, Duration) {
        let min = self.reply_delay_min_ms.min(self.reply_delay_max_ms);
        let max = self.reply_delay_min_ms.max(self.reply_delay_max_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.join("redweb.sqlite")),
            None => storage::default_db_path(),
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            token = "abc"

            [user]
            id = "1"
            name = "Alice"
            email = "alice@redweb.com"
            role = "PATIENT"
            "#,
        )
        .unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.current_user().unwrap().name, "Alice");
        assert_eq!(config.reply_delay(), (Duration::from_millis(1000), Duration::from_millis(2000)));
    }

    #[test]
    fn missing_user_is_not_authenticated() {
        let config = AppConfig::new();
        assert!(matches!(config.current_user(), Err(Error::NotAuthenticated)));
    }

    #[test]
    fn inverted_delays_are_normalised() {
        let config = AppConfig { reply_delay_min_ms: 500, reply_delay_max_ms: 100, ..AppConfig::new() };
        assert_eq!(config.reply_delay(), (Duration::from_millis(100), Duration::from_millis(500)));
    }

    #[test]
    fn saved_session_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("redweb.toml");
        assert_eq!(AppConfig::load_from(&path).token, None);

        let config = AppConfig {
            token: Some("t0k".into()),
            user: Some(User {
                id: "1".into(),
                name: "Alice".into(),
                email: "alice@redweb.com".into(),
                role: Default::default(),
                profile_picture: None,
            }),
            ..AppConfig::new()
        };
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.token.as_deref(), Some("t0k"));
        assert_eq!(loaded.current_user().unwrap().id, "1");
        assert_eq!(loaded.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn stray_json_state_is_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"api_url":"http://old","token":"legacy"}"#).unwrap();
        let config = AppConfig::load_from(&path);
        assert_eq!(config.token, None);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn db_path_follows_data_dir() {
        let config = AppConfig { data_dir: Some(PathBuf::from("/tmp/rw")), ..AppConfig::new() };
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/tmp/rw/redweb.sqlite"));
    }
}
