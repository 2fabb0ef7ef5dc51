//! Container runtime adapter used by the Lifecycle Engine (C10) for
//! `runtime=container` instances. The core never links a container
//! engine library; it shells out to whichever compose-capable binary is
//! found, the same detect-then-invoke pattern the teacher's
//! `ContainerManager` used to pick between bolt/podman/docker.
use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeEngine {
    DockerCompose,
    PodmanCompose,
    DockerComposePlugin,
}

impl ComposeEngine {
    fn program_and_prefix_args(self) -> (&'static str, &'static [&'static str]) {
        match self {
            ComposeEngine::DockerCompose => ("docker-compose", &[]),
            ComposeEngine::PodmanCompose => ("podman-compose", &[]),
            ComposeEngine::DockerComposePlugin => ("docker", &["compose"]),
        }
    }
}

/// Tries `docker-compose`, then `podman-compose`, then the `docker
/// compose` plugin form, mirroring the teacher's
/// `ContainerManager::detect_runtime` cascade. A `which` lookup on the
/// base binary filters out candidates before we bother invoking them.
pub fn detect() -> Result<ComposeEngine> {
    for candidate in [
        ComposeEngine::DockerCompose,
        ComposeEngine::PodmanCompose,
        ComposeEngine::DockerComposePlugin,
    ] {
        let (program, prefix) = candidate.program_and_prefix_args();
        if which::which(program).is_err() {
            continue;
        }
        let probe = Command::new(program).args(prefix).arg("version").output();
        if matches!(probe, Ok(output) if output.status.success()) {
            return Ok(candidate);
        }
    }
    Err(Error::dependency(
        "container",
        "no compose-capable runtime found (tried docker-compose, podman-compose, docker compose)",
    ))
}

pub struct ComposeController {
    engine: ComposeEngine,
}

impl ComposeController {
    pub fn new(engine: ComposeEngine) -> Self {
        Self { engine }
    }

    fn command(&self, working_dir: &Path) -> Command {
        let (program, prefix) = self.engine.program_and_prefix_args();
        let mut cmd = Command::new(program);
        cmd.args(prefix).current_dir(working_dir);
        cmd
    }

    /// `compose up -d`; the instance's own compose file is expected at
    /// `<working_dir>/docker-compose.yml` (C7 output).
    pub fn up(&self, working_dir: &Path) -> Result<()> {
        let status = self
            .command(working_dir)
            .args(["up", "-d"])
            .status()
            .map_err(|e| Error::dependency("container", e.to_string()))?;
        if !status.success() {
            return Err(Error::upstream("container", "compose up failed"));
        }
        Ok(())
    }

    /// `compose down`, honoring the same stop-timeout semantics as
    /// native SIGTERM/SIGKILL escalation via `-t <timeout>`.
    pub fn down(&self, working_dir: &Path, timeout_seconds: u32) -> Result<()> {
        let status = self
            .command(working_dir)
            .args(["down", "-t", &timeout_seconds.to_string()])
            .status()
            .map_err(|e| Error::dependency("container", e.to_string()))?;
        if !status.success() {
            return Err(Error::upstream("container", "compose down failed"));
        }
        Ok(())
    }

    /// Queries whether the first service is `running`; used by
    /// `is-active`/`status`.
    pub fn is_running(&self, working_dir: &Path, service: &str) -> Result<bool> {
        let output = self
            .command(working_dir)
            .args(["ps", "--format", "{{.Service}} {{.State}}", service])
            .output()
            .map_err(|e| Error::dependency("container", e.to_string()))?;
        if !output.status.success() {
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| line.contains("running")))
    }

    /// `compose logs [--follow]` proxy. Non-follow calls block and
    /// return the captured lines; a follow call inherits this
    /// process's stdout/stderr and blocks until the compose process
    /// exits (normally via the caller being interrupted).
    pub fn logs(&self, working_dir: &Path, tail: u32, follow: bool) -> Result<Vec<String>> {
        let mut cmd = self.command(working_dir);
        cmd.args(["logs", "--tail", &tail.to_string()]);
        if follow {
            cmd.arg("--follow");
            cmd.status().map_err(|e| Error::dependency("container", e.to_string()))?;
            return Ok(Vec::new());
        }
        let output = cmd.output().map_err(|e| Error::dependency("container", e.to_string()))?;
        Ok(String::from_utf8_lossy(&output.stdout).lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_and_prefix_args_match_expected_binaries() {
        assert_eq!(
            ComposeEngine::DockerCompose.program_and_prefix_args(),
            ("docker-compose", &[][..])
        );
        assert_eq!(
            ComposeEngine::DockerComposePlugin.program_and_prefix_args(),
            ("docker", &["compose"][..])
        );
    }
}
