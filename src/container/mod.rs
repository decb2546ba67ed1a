//! C3 — ContainerManager: a thin supervisory layer over the container
//! runtime, grounded on the subprocess-runner pattern used throughout the
//! host crate (`subprocess::claude::ClaudeRunnerImpl` wrapping a
//! `ProcessRunner`) generalised to Docker and given the stateful
//! `container_name -> ContainerInfo` bookkeeping.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::{ExplorationError, Result};
use crate::model::ContainerStats;
use crate::subprocess::docker::{volumes_for, CreateContainerSpec, DockerRunner};
use crate::subprocess::SubprocessManager;

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub container_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

pub struct ContainerSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub cpu_limit: f64,
    pub memory_limit: &'a str,
    pub env: HashMap<String, String>,
    pub port_mapping: Option<(u16, u16)>,
    pub worktree_path: &'a Path,
    pub shared_path: &'a Path,
    pub command: Option<Vec<String>>,
}

pub struct ContainerManager {
    docker: DockerRunner,
    clock: Arc<dyn Clock>,
    containers: Mutex<HashMap<String, ContainerInfo>>,
}

impl ContainerManager {
    pub fn new(subprocess: &SubprocessManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            docker: subprocess.docker(),
            clock,
            containers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pull_if_absent(&self, image: &str) -> Result<()> {
        if self
            .docker
            .image_exists(image)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))?
        {
            return Ok(());
        }
        self.docker
            .pull(image)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }

    pub async fn create(&self, spec: &ContainerSpec<'_>) -> Result<String> {
        let volumes = volumes_for(spec.worktree_path, spec.shared_path);
        let docker_spec = CreateContainerSpec {
            image: spec.image,
            name: spec.name,
            cpu_limit: spec.cpu_limit,
            memory_limit: spec.memory_limit,
            env: &spec.env,
            port_mapping: spec.port_mapping,
            volumes: &volumes,
            command: spec.command.as_deref(),
        };

        let container_id = self
            .docker
            .create(&docker_spec)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))?;

        self.containers.lock().await.insert(
            spec.name.to_string(),
            ContainerInfo {
                container_id: container_id.clone(),
                status: "running".to_string(),
                started_at: self.clock.now(),
                finished_at: None,
                exit_code: None,
            },
        );

        Ok(container_id)
    }

    /// Creates containers concurrently rather than one at a time.
    pub async fn create_multiple(&self, specs: Vec<ContainerSpec<'_>>) -> Result<Vec<(String, String)>> {
        let futures = specs.iter().map(|spec| async move {
            let id = self.create(spec).await?;
            Ok::<_, ExplorationError>((spec.name.to_string(), id))
        });
        futures::future::try_join_all(futures).await
    }

    pub async fn stop(&self, name: &str, timeout_s: u32) -> Result<()> {
        self.docker
            .stop(name, timeout_s)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }

    pub async fn stop_multiple(&self, names: &[String], timeout_s: u32) -> Result<()> {
        let futures = names.iter().map(|n| self.stop(n, timeout_s));
        let results = futures::future::join_all(futures).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(container = %name, error = %e, "stop failed, continuing");
            }
        }
        Ok(())
    }

    /// Removal of an already-gone container is a soft success.
    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        self.docker
            .remove(name, force)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))?;
        self.containers.lock().await.remove(name);
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.containers.lock().await.contains_key(name)
    }

    pub async fn refresh_status(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let status = self
            .docker
            .inspect_status(name)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))?;

        let Some(status) = status else {
            return Ok(None);
        };

        let mut containers = self.containers.lock().await;
        let entry = containers.entry(name.to_string()).or_insert(ContainerInfo {
            container_id: name.to_string(),
            status: status.status.clone(),
            started_at: self.clock.now(),
            finished_at: None,
            exit_code: None,
        });
        entry.status = status.status;
        entry.exit_code = status.exit_code;
        if status.finished_at.is_some() && entry.finished_at.is_none() {
            entry.finished_at = Some(self.clock.now());
        }
        Ok(Some(entry.clone()))
    }

    pub async fn get_stats(&self, name: &str) -> Result<Option<ContainerStats>> {
        let raw = self
            .docker
            .stats_once(name)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))?;

        let Some(raw) = raw else { return Ok(None) };

        let containers = self.containers.lock().await;
        let info = containers.get(name);
        let started_at = info.map(|i| i.started_at).unwrap_or_else(|| self.clock.now());
        let finished_at = info.and_then(|i| i.finished_at);
        let status = info.map(|i| i.status.clone()).unwrap_or_default();
        drop(containers);

        let uptime = (finished_at.unwrap_or_else(|| self.clock.now()) - started_at).num_seconds();

        Ok(Some(ContainerStats {
            cpu_percent: parse_cpu_percent(&raw.cpu_percent_raw),
            memory_mb: parse_memory_usage_mb(&raw.mem_usage_raw),
            uptime_seconds: uptime,
            status,
        }))
    }

    pub async fn logs(&self, name: &str) -> Result<String> {
        self.docker
            .logs(name)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }

    pub async fn exec(&self, name: &str, cmd: &[String]) -> Result<String> {
        let out = self
            .docker
            .exec(name, cmd)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))?;
        Ok(out.stdout)
    }

    pub async fn pause(&self, name: &str) -> Result<()> {
        self.docker
            .pause(name)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }

    pub async fn unpause(&self, name: &str) -> Result<()> {
        self.docker
            .unpause(name)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }

    pub async fn kill(&self, name: &str, signal: &str) -> Result<()> {
        self.docker
            .kill(name, signal)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }

    pub async fn wait(&self, name: &str) -> Result<i32> {
        self.docker
            .wait(name)
            .await
            .map_err(|e| ExplorationError::Container(e.to_string()))
    }
}

/// `"256MiB"`/`"1GiB"`/`"512KiB"` -> MB. Unknown units soft-fail to 0.
fn parse_memory_usage_mb(raw: &str) -> f64 {
    let used = raw.split('/').next().unwrap_or(raw).trim();
    parse_memory_to_mb(used)
}

fn parse_memory_to_mb(token: &str) -> f64 {
    let token = token.trim();
    let split_at = token
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(split_at);
    let Ok(value) = number.parse::<f64>() else {
        return 0.0;
    };
    match unit.trim() {
        "B" => value / 1_000_000.0,
        "KiB" | "KB" => value / 1024.0,
        "MiB" | "MB" => value,
        "GiB" | "GB" => value * 1024.0,
        _ => 0.0,
    }
}

fn parse_cpu_percent(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_units() {
        assert_eq!(parse_memory_to_mb("256MiB"), 256.0);
        assert_eq!(parse_memory_to_mb("1GiB"), 1024.0);
        assert_eq!(parse_memory_to_mb("1024KiB"), 1.0);
        assert_eq!(parse_memory_to_mb("2000000B"), 2.0);
        assert_eq!(parse_memory_to_mb("nonsense"), 0.0);
    }

    #[test]
    fn parses_memory_usage_string() {
        assert_eq!(parse_memory_usage_mb("25MiB / 512MiB"), 25.0);
    }

    #[test]
    fn parses_cpu_percent() {
        assert_eq!(parse_cpu_percent("12.34%"), 12.34);
        assert_eq!(parse_cpu_percent("0.00%"), 0.0);
    }
}
