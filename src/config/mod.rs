use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "ChatSearch";
const APP_NAME: &str = "chatsearch";

/// Smallest snippet that still leaves room for both ellipsis markers and
/// some context.
pub const MIN_SNIPPET_LENGTH: usize = 10;

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("CHATSEARCH_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("CHATSEARCH_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let database_path = data_root.join("messages.db");

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
        })
    }

    /// Layout rooted at a single directory; used by tests and portable installs.
    pub fn rooted_at(root: &Path) -> Self {
        let config_dir = root.join("config");
        let data_dir = root.join("data");
        Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            database_path: data_dir.join("messages.db"),
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("search.snippet_length must be at least {min}, got {value}")]
    SnippetTooShort { value: usize, min: usize },
    #[error("search.{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Number of newest messages treated as the loaded conversation window.
    pub window_size: usize,
    pub search: SearchOptions,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            search: SearchOptions::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.search.validate().context("validating search options")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Idle time after the last keystroke before the loaded window is scanned.
    pub local_debounce_ms: u64,
    /// Extra delay between local results and the database search.
    pub database_delay_ms: u64,
    pub message_result_limit: usize,
    pub attachment_result_limit: usize,
    pub snippet_length: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            local_debounce_ms: 150,
            database_delay_ms: 300,
            message_result_limit: 100,
            attachment_result_limit: 50,
            snippet_length: 100,
        }
    }
}

impl SearchOptions {
    pub fn local_debounce(&self) -> Duration {
        Duration::from_millis(self.local_debounce_ms)
    }

    pub fn database_delay(&self) -> Duration {
        Duration::from_millis(self.database_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snippet_length < MIN_SNIPPET_LENGTH {
            return Err(ConfigError::SnippetTooShort {
                value: self.snippet_length,
                min: MIN_SNIPPET_LENGTH,
            });
        }
        if self.message_result_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "message_result_limit",
            });
        }
        if self.attachment_result_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "attachment_result_limit",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_default_config() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        let loader = ConfigLoader::with_paths(paths.clone());

        let cfg = loader.load_or_init()?;
        assert!(paths.config_file.exists());
        assert!(paths.data_dir.is_dir());
        assert!(!temp.path().join("logs").exists());
        assert_eq!(cfg.search.local_debounce_ms, 150);
        assert_eq!(cfg.storage.database_path, paths.database_path);

        let reloaded = loader.load()?;
        assert_eq!(reloaded.search.snippet_length, 100);
        assert_eq!(reloaded.window_size, 50);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_keys() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "[search]\nlocal_debounce_ms = 50\nmessage_result_limit = 20\n",
        )?;

        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.search.local_debounce(), Duration::from_millis(50));
        assert_eq!(cfg.search.message_result_limit, 20);
        assert_eq!(cfg.search.database_delay(), Duration::from_millis(300));
        assert_eq!(cfg.search.attachment_result_limit, 50);
        Ok(())
    }

    #[test]
    fn invalid_search_options_are_rejected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        fs::write(&paths.config_file, "[search]\nsnippet_length = 3\n")?;

        let err = ConfigLoader::with_paths(paths)
            .load()
            .expect_err("snippet length below minimum");
        assert_matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::SnippetTooShort { value: 3, .. })
        );

        let options = SearchOptions {
            attachment_result_limit: 0,
            ..SearchOptions::default()
        };
        assert_eq!(
            options.validate(),
            Err(ConfigError::ZeroLimit {
                field: "attachment_result_limit"
            })
        );
        Ok(())
    }
}
