//! Argv-style invocation of the container runtime CLI. `ContainerManager`
//! (see `crate::container`) is the stateful layer on top of this; this
//! module only knows how to shell out to `docker` and parse its output,
//! the same separation the git runner keeps between argv-building and
//! session bookkeeping.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::{ProcessOutput, ProcessRunner};

#[derive(Debug, Clone)]
pub struct CreateContainerSpec<'a> {
    pub image: &'a str,
    pub name: &'a str,
    pub cpu_limit: f64,
    pub memory_limit: &'a str,
    pub env: &'a HashMap<String, String>,
    pub port_mapping: Option<(u16, u16)>,
    pub volumes: &'a [(std::path::PathBuf, String)],
    pub command: Option<&'a [String]>,
}

#[derive(Clone)]
pub struct DockerRunner {
    runner: Arc<dyn ProcessRunner>,
}

impl DockerRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn docker(&self, args: Vec<String>) -> Result<ProcessOutput, ProcessError> {
        let command = ProcessCommandBuilder::new("docker").args(args).build();
        self.runner.run(command).await
    }

    /// Raw `docker --version` stdout, e.g. `Docker version 24.0.7, build afdd53b`.
    pub async fn version(&self) -> Result<String, ProcessError> {
        let out = self.docker(vec!["--version".into()]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: "docker --version".into(),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout.trim().to_string())
    }

    pub async fn image_exists(&self, image: &str) -> Result<bool, ProcessError> {
        let out = self
            .docker(vec!["image".into(), "inspect".into(), image.into()])
            .await?;
        Ok(out.status.success())
    }

    pub async fn pull(&self, image: &str) -> Result<(), ProcessError> {
        let out = self.docker(vec!["pull".into(), image.into()]).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: format!("docker pull {image}"),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn create(&self, spec: &CreateContainerSpec<'_>) -> Result<String, ProcessError> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), spec.name.to_string()];
        args.push("--cpus".into());
        args.push(spec.cpu_limit.to_string());
        args.push("--memory".into());
        args.push(spec.memory_limit.to_string());

        for (key, value) in spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }

        if let Some((host_port, container_port)) = spec.port_mapping {
            args.push("-p".into());
            args.push(format!("{host_port}:{container_port}"));
        }

        for (host_path, container_path) in spec.volumes {
            args.push("-v".into());
            args.push(format!("{}:{}", host_path.display(), container_path));
        }

        args.push(spec.image.to_string());

        if let Some(cmd) = spec.command {
            args.extend(cmd.iter().cloned());
        }

        let out = self.docker(args).await?;
        if !out.status.success() {
            return Err(ProcessError::CommandFailed {
                command: format!("docker run {}", spec.name),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout.trim().to_string())
    }

    pub async fn stop(&self, name: &str, timeout_s: u32) -> Result<(), ProcessError> {
        let out = self
            .docker(vec![
                "stop".into(),
                "-t".into(),
                timeout_s.to_string(),
                name.into(),
            ])
            .await?;
        if out.status.success() || is_soft_missing(&out.stderr) {
            return Ok(());
        }
        Err(ProcessError::CommandFailed {
            command: format!("docker stop {name}"),
            stderr: out.stderr,
        })
    }

    pub async fn remove(&self, name: &str, force: bool) -> Result<(), ProcessError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".into());
        }
        args.push(name.into());

        let out = self.docker(args).await?;
        if out.status.success() || is_soft_missing(&out.stderr) {
            return Ok(());
        }
        Err(ProcessError::CommandFailed {
            command: format!("docker rm {name}"),
            stderr: out.stderr,
        })
    }

    pub async fn inspect_status(&self, name: &str) -> Result<Option<InspectStatus>, ProcessError> {
        let out = self
            .docker(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}}|{{.State.ExitCode}}|{{.State.StartedAt}}|{{.State.FinishedAt}}"
                    .into(),
                name.into(),
            ])
            .await?;
        if !out.status.success() {
            if is_soft_missing(&out.stderr) {
                return Ok(None);
            }
            return Err(ProcessError::CommandFailed {
                command: format!("docker inspect {name}"),
                stderr: out.stderr,
            });
        }
        Ok(parse_inspect(&out.stdout))
    }

    pub async fn stats_once(&self, name: &str) -> Result<Option<RawStats>, ProcessError> {
        let out = self
            .docker(vec![
                "stats".into(),
                "--no-stream".into(),
                "--format".into(),
                "{{.CPUPerc}}|{{.MemUsage}}".into(),
                name.into(),
            ])
            .await?;
        if !out.status.success() {
            if is_soft_missing(&out.stderr) {
                return Ok(None);
            }
            return Err(ProcessError::CommandFailed {
                command: format!("docker stats {name}"),
                stderr: out.stderr,
            });
        }
        Ok(parse_stats(&out.stdout))
    }

    pub async fn logs(&self, name: &str) -> Result<String, ProcessError> {
        Ok(self.docker(vec!["logs".into(), name.into()]).await?.stdout)
    }

    pub async fn exec(&self, name: &str, cmd: &[String]) -> Result<ProcessOutput, ProcessError> {
        let mut args = vec!["exec".to_string(), name.to_string()];
        args.extend(cmd.iter().cloned());
        self.docker(args).await
    }

    pub async fn pause(&self, name: &str) -> Result<(), ProcessError> {
        let out = self.docker(vec!["pause".into(), name.into()]).await?;
        if !out.status.success() && !is_soft_missing(&out.stderr) {
            return Err(ProcessError::CommandFailed {
                command: format!("docker pause {name}"),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn unpause(&self, name: &str) -> Result<(), ProcessError> {
        let out = self.docker(vec!["unpause".into(), name.into()]).await?;
        if !out.status.success() && !is_soft_missing(&out.stderr) {
            return Err(ProcessError::CommandFailed {
                command: format!("docker unpause {name}"),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn kill(&self, name: &str, signal: &str) -> Result<(), ProcessError> {
        let out = self
            .docker(vec!["kill".into(), "-s".into(), signal.into(), name.into()])
            .await?;
        if !out.status.success() && !is_soft_missing(&out.stderr) {
            return Err(ProcessError::CommandFailed {
                command: format!("docker kill {name}"),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    pub async fn wait(&self, name: &str) -> Result<i32, ProcessError> {
        let out = self.docker(vec!["wait".into(), name.into()]).await?;
        Ok(out.stdout.trim().parse().unwrap_or(-1))
    }
}

fn is_soft_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("is not running")
}

#[derive(Debug, Clone)]
pub struct InspectStatus {
    pub status: String,
    pub exit_code: Option<i32>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

fn parse_inspect(stdout: &str) -> Option<InspectStatus> {
    let line = stdout.trim();
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 4 {
        return None;
    }
    let exit_code: i32 = parts[1].parse().unwrap_or(0);
    Some(InspectStatus {
        status: parts[0].to_string(),
        exit_code: if parts[0] == "exited" || parts[0] == "dead" {
            Some(exit_code)
        } else {
            None
        },
        started_at: none_if_zero_time(parts[2]),
        finished_at: none_if_zero_time(parts[3]),
    })
}

fn none_if_zero_time(s: &str) -> Option<String> {
    if s.starts_with("0001-01-01") {
        None
    } else {
        Some(s.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawStats {
    pub cpu_percent_raw: String,
    pub mem_usage_raw: String,
}

fn parse_stats(stdout: &str) -> Option<RawStats> {
    let line = stdout.lines().next()?.trim();
    let mut parts = line.splitn(2, '|');
    let cpu = parts.next()?.to_string();
    let mem = parts.next()?.to_string();
    Some(RawStats {
        cpu_percent_raw: cpu,
        mem_usage_raw: mem,
    })
}

pub fn volumes_for(worktree: &Path, shared: &Path) -> Vec<(std::path::PathBuf, String)> {
    vec![
        (worktree.to_path_buf(), "/workspace".to_string()),
        (shared.to_path_buf(), "/shared".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inspect_running_status() {
        let s = parse_inspect("running|0|2024-01-01T00:00:00Z|0001-01-01T00:00:00Z\n").unwrap();
        assert_eq!(s.status, "running");
        assert_eq!(s.exit_code, None);
        assert!(s.finished_at.is_none());
    }

    #[test]
    fn parses_inspect_exited_status() {
        let s = parse_inspect("exited|1|2024-01-01T00:00:00Z|2024-01-01T00:01:00Z\n").unwrap();
        assert_eq!(s.exit_code, Some(1));
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn parses_stats_line() {
        let s = parse_stats("1.23%|25MiB / 512MiB\n").unwrap();
        assert_eq!(s.cpu_percent_raw, "1.23%");
        assert_eq!(s.mem_usage_raw, "25MiB / 512MiB");
    }
}
