// config.rs - Warden configuration loaded from `.warden/warden.toml`.
//
// Every field has a default, so a missing file or a partial one is valid.
//
// ```toml
// [storage]
// backend = "sqlite"          # or "memory"
// path = ".warden/warden.db"
//
// [authority]
// super_admin_id = 1234
// elevated_group = [1234, 5678]
//
// [cache]
// entity_ttl_secs = 300
// profile_ttl_secs = 30       # clamped to 60
// capacity = 10000
//
// [history]
// capacity = 100
// ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use warden_store::{CacheOptions, MAX_PROFILE_TTL_SECS};

use crate::error::StaffError;

/// Directory under the project root holding config and data.
pub const WARDEN_DIR: &str = ".warden";
pub const CONFIG_FILE: &str = "warden.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Database file; relative paths resolve against the project root.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// The Super Admin's user id; 0 means none.
    #[serde(default)]
    pub super_admin_id: u64,
    /// Static elevated-group membership.
    #[serde(default)]
    pub elevated_group: BTreeSet<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_entity_ttl")]
    pub entity_ttl_secs: u64,
    #[serde(default = "default_profile_ttl")]
    pub profile_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_ttl_secs: default_entity_ttl(),
            profile_ttl_secs: default_profile_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Size of the recent-denials ring buffer.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_db_path() -> PathBuf {
    PathBuf::from(WARDEN_DIR).join("warden.db")
}

fn default_entity_ttl() -> u64 {
    300
}

fn default_profile_ttl() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_history_capacity() -> usize {
    100
}

impl WardenConfig {
    /// Parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, StaffError> {
        let content = std::fs::read_to_string(path).map_err(|e| StaffError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: WardenConfig = toml::from_str(&content).map_err(|e| StaffError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Load `<root>/.warden/warden.toml`, or the defaults when it does not
    /// exist.
    pub fn for_project(project_root: impl AsRef<Path>) -> Result<Self, StaffError> {
        let path = Self::config_path(project_root);
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn config_path(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(WARDEN_DIR).join(CONFIG_FILE)
    }

    pub fn validate(&self, path: &Path) -> Result<(), StaffError> {
        let invalid = |reason: &str| StaffError::Config {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity must be at least 1"));
        }
        if self.history.capacity == 0 {
            return Err(invalid("history.capacity must be at least 1"));
        }
        if self.cache.profile_ttl_secs > MAX_PROFILE_TTL_SECS {
            tracing::warn!(
                configured = self.cache.profile_ttl_secs,
                max = MAX_PROFILE_TTL_SECS,
                "profile_ttl_secs clamped"
            );
        }
        Ok(())
    }

    pub fn super_admin(&self) -> Option<u64> {
        (self.authority.super_admin_id != 0).then_some(self.authority.super_admin_id)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            entity_ttl_secs: self.cache.entity_ttl_secs,
            profile_ttl_secs: self.cache.profile_ttl_secs.min(MAX_PROFILE_TTL_SECS),
            capacity: self.cache.capacity,
        }
    }

    /// The database path, resolved against `project_root` when relative.
    pub fn database_path(&self, project_root: impl AsRef<Path>) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            project_root.as_ref().join(&self.storage.path)
        }
    }
}
