//! Ambient configuration: global settings under the user's data directory
//! plus per-repository overrides, merged with environment variables.
//! Grounded on the host crate's `config::mod` (`Config`/`GlobalConfig`
//! loaded via `directories::ProjectDirs`, overridden by env vars) trimmed to
//! the settings this crate's orchestrator actually reads.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub fn global_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("dev", "expedition", "expedition")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("could not determine a home directory for the current user"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub explorations_home: PathBuf,
    pub log_level: Option<String>,
    pub docker_image: Option<String>,
    pub max_concurrent_explorations: Option<u32>,
    pub port_range_start: Option<u16>,
    pub port_range_end: Option<u16>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            explorations_home: global_data_dir().unwrap_or_else(|_| PathBuf::from(".expedition")),
            log_level: Some("info".to_string()),
            docker_image: None,
            max_concurrent_explorations: Some(4),
            port_range_start: None,
            port_range_end: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub docker_image: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub worktree_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub project: Option<ProjectConfig>,
}

impl Config {
    pub fn new() -> Self {
        Self { global: GlobalConfig::default(), project: None }
    }

    /// Loads `<global_data_dir>/config.toml` and `<repo>/.expedition/config.toml`
    /// if present, falling back to defaults for anything missing, then
    /// applies `merge_env_vars`.
    pub fn load(repo_root: &std::path::Path) -> Result<Self> {
        let mut config = Self::new();

        if let Ok(dir) = global_data_dir() {
            let global_path = dir.join("config.toml");
            if let Ok(contents) = std::fs::read_to_string(&global_path) {
                config.global = toml::from_str(&contents)
                    .map_err(|e| anyhow!("invalid global config at {}: {e}", global_path.display()))?;
            }
        }

        let project_path = repo_root.join(".expedition").join("config.toml");
        if let Ok(contents) = std::fs::read_to_string(&project_path) {
            config.project = Some(
                toml::from_str(&contents)
                    .map_err(|e| anyhow!("invalid project config at {}: {e}", project_path.display()))?,
            );
        }

        config.merge_env_vars();
        Ok(config)
    }

    pub fn merge_env_vars(&mut self) {
        if let Ok(log_level) = std::env::var("EXPEDITION_LOG_LEVEL") {
            self.global.log_level = Some(log_level);
        }
        if let Ok(image) = std::env::var("EXPEDITION_DOCKER_IMAGE") {
            self.global.docker_image = Some(image);
        }
        if let Ok(max) = std::env::var("EXPEDITION_MAX_CONCURRENT") {
            if let Ok(value) = max.parse() {
                self.global.max_concurrent_explorations = Some(value);
            }
        }
    }

    pub fn docker_image(&self) -> Option<&str> {
        self.project
            .as_ref()
            .and_then(|p| p.docker_image.as_deref())
            .or(self.global.docker_image.as_deref())
    }

    pub fn cpu_limit(&self) -> Option<&str> {
        self.project.as_ref().and_then(|p| p.cpu_limit.as_deref())
    }

    pub fn memory_limit(&self) -> Option<&str> {
        self.project.as_ref().and_then(|p| p.memory_limit.as_deref())
    }

    pub fn worktree_limit(&self) -> Option<usize> {
        self.project.as_ref().and_then(|p| p.worktree_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_docker_image_overrides_global() {
        let mut config = Config::new();
        config.global.docker_image = Some("base:latest".into());
        config.project = Some(ProjectConfig {
            docker_image: Some("project:latest".into()),
            ..Default::default()
        });
        assert_eq!(config.docker_image(), Some("project:latest"));
    }

    #[test]
    fn falls_back_to_global_when_project_unset() {
        let mut config = Config::new();
        config.global.docker_image = Some("base:latest".into());
        assert_eq!(config.docker_image(), Some("base:latest"));
    }

    #[test]
    fn env_var_overrides_log_level() {
        std::env::set_var("EXPEDITION_LOG_LEVEL", "debug");
        let mut config = Config::new();
        config.merge_env_vars();
        assert_eq!(config.global.log_level.as_deref(), Some("debug"));
        std::env::remove_var("EXPEDITION_LOG_LEVEL");
    }
}
