use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::remote::{DirectoryRemoteStore, HttpRemoteStore, RemoteStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteConfig {
    #[default]
    None,
    Http {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
    },
    Directory {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Option<PathBuf>,
    pub remote: RemoteConfig,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            remote: RemoteConfig::None,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Config file, then `JOBTRACK_*` environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = var("JOBTRACK_DB") {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(level) = var("JOBTRACK_LOG") {
            self.log_level = level;
        }
        if let Some(dir) = var("JOBTRACK_REMOTE_DIR") {
            self.remote = RemoteConfig::Directory {
                path: PathBuf::from(dir),
            };
        }
        // URL wins over a directory when both are set
        if let Some(url) = var("JOBTRACK_REMOTE_URL") {
            let token = match &self.remote {
                RemoteConfig::Http { token, .. } => token.clone(),
                _ => None,
            };
            self.remote = RemoteConfig::Http {
                base_url: url,
                token,
            };
        }
        if let Some(new_token) = var("JOBTRACK_REMOTE_TOKEN") {
            if let RemoteConfig::Http { token, .. } = &mut self.remote {
                *token = Some(new_token);
            }
        }
    }

    pub fn config_path() -> PathBuf {
        match project_dirs() {
            Some(dirs) => dirs.config_dir().join("config.json"),
            None => PathBuf::from("jobtrack.json"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database {
            return path.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.data_dir().join("jobtrack.db"),
            // Fallback to current directory
            None => PathBuf::from("jobtrack.db"),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        if let Some(dir) = &self.log_dir {
            return dir.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.data_dir().join("logs"),
            None => PathBuf::from("logs"),
        }
    }

    pub fn build_remote(&self) -> Result<Option<Arc<dyn RemoteStore>>, PersistenceError> {
        match &self.remote {
            RemoteConfig::None => Ok(None),
            RemoteConfig::Http { base_url, token } => {
                let store = HttpRemoteStore::new(base_url, token.clone())?;
                Ok(Some(Arc::new(store)))
            }
            RemoteConfig::Directory { path } => Ok(Some(Arc::new(DirectoryRemoteStore::new(path)))),
        }
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let RemoteConfig::Http { token: Some(token), .. } = &mut config.remote {
            *token = "********".to_string();
        }
        config
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "jobtrack")
}
