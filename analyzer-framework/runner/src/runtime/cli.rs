use std::{process::Stdio, time::Duration};

use analyzer_framework_core::constants::container_runtime_override;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

use super::{ContainerRuntime, RunSpec, RuntimeError, VolumeRecord};

const RUNTIME_PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const SUBCOMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const ONESHOT_TIMEOUT: Duration = Duration::from_secs(600);

/// Shells out to podman or docker; both expose the required subcommands with
/// identical argument shapes.
#[derive(Clone, Debug)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    /// Detect an available runtime binary, honoring the override env var.
    pub async fn detect() -> Option<Self> {
        let candidates = match container_runtime_override() {
            Some(forced) => vec![forced],
            None => vec!["podman".to_owned(), "docker".to_owned()],
        };
        for binary in candidates {
            if probe_runtime(&binary).await {
                info!(runtime = %binary, "using container runtime");
                return Some(Self { binary });
            }
        }
        None
    }

    /// Use a specific binary without probing (tests, pre-validated setups).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self, args: &[&str]) -> (Command, String) {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdin(Stdio::null());
        let description = format!("{} {}", self.binary, args.join(" "));
        (command, description)
    }

    async fn run(
        &self,
        args: &[&str],
        budget: Duration,
    ) -> Result<String, RuntimeError> {
        let (mut command, description) = self.command(args);
        debug!(command = %description, "invoking container runtime");
        let output = timeout(budget, command.output())
            .await
            .map_err(|_| RuntimeError::Timeout {
                command: description.clone(),
                timeout: budget,
            })?
            .map_err(|source| RuntimeError::Spawn {
                command: description.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::Failed {
                command: description,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_args<'a>(spec: &'a RunSpec, detached: bool, storage: &'a mut Vec<String>) -> Vec<&'a str> {
        let mut args: Vec<&str> = vec!["run", "--rm"];
        if detached {
            args.push("-d");
        }
        if let Some(name) = &spec.name {
            args.push("--name");
            args.push(name);
        }
        if let Some(network) = &spec.network {
            args.push("--network");
            args.push(network);
        }
        for (host, container) in &spec.ports {
            storage.push(format!("{host}:{container}"));
        }
        for (source, target) in &spec.volumes {
            storage.push(format!("{source}:{target}"));
        }
        for (key, value) in &spec.env {
            storage.push(format!("{key}={value}"));
        }
        let ports = spec.ports.len();
        let volumes = spec.volumes.len();
        for (index, rendered) in storage.iter().enumerate() {
            if index < ports {
                args.push("-p");
            } else if index < ports + volumes {
                args.push("-v");
            } else {
                args.push("-e");
            }
            args.push(rendered);
        }
        args.push(&spec.image);
        for part in &spec.command {
            args.push(part);
        }
        args
    }
}

async fn probe_runtime(binary: &str) -> bool {
    let mut command = Command::new(binary);
    command
        .arg("info")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    timeout(RUNTIME_PROBE_TIMEOUT, command.status())
        .await
        .ok()
        .and_then(Result::ok)
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeInspectEntry {
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    options: Option<VolumeInspectOptions>,
}

#[derive(Deserialize)]
struct VolumeInspectOptions {
    #[serde(default)]
    device: Option<String>,
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn network_create(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["network", "create", name], SUBCOMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn network_rm(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["network", "rm", name], SUBCOMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn volume_create_bind(&self, name: &str, device: &str) -> Result<(), RuntimeError> {
        let device_opt = format!("--opt=device={device}");
        self.run(
            &[
                "volume",
                "create",
                "--opt=type=none",
                &device_opt,
                "--opt=o=bind",
                name,
            ],
            SUBCOMMAND_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn volume_inspect(&self, name: &str) -> Result<VolumeRecord, RuntimeError> {
        let stdout = self
            .run(&["volume", "inspect", name], SUBCOMMAND_TIMEOUT)
            .await?;
        let entries: Vec<VolumeInspectEntry> =
            serde_json::from_str(&stdout).map_err(|err| RuntimeError::Parse {
                command: format!("{} volume inspect {name}", self.binary),
                message: err.to_string(),
            })?;
        let entry = entries.into_iter().next().ok_or_else(|| RuntimeError::Parse {
            command: format!("{} volume inspect {name}", self.binary),
            message: "empty inspect result".into(),
        })?;
        Ok(VolumeRecord {
            device: entry.options.and_then(|options| options.device),
            mountpoint: entry.mountpoint,
        })
    }

    async fn volume_rm(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["volume", "rm", name], SUBCOMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<(), RuntimeError> {
        let mut storage = Vec::new();
        let args = Self::run_args(spec, true, &mut storage);
        self.run(&args, SUBCOMMAND_TIMEOUT).await.map(|_| ())
    }

    async fn run_oneshot(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        let mut storage = Vec::new();
        let args = Self::run_args(spec, false, &mut storage);
        self.run(&args, ONESHOT_TIMEOUT).await
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        self.run(&["stop", container], SUBCOMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn logs(&self, container: &str) -> Result<String, RuntimeError> {
        self.run(&["logs", container], SUBCOMMAND_TIMEOUT).await
    }

    async fn image_inspect(&self, image: &str) -> Result<(), RuntimeError> {
        self.run(&["image", "inspect", image], SUBCOMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_order_ports_volumes_env() {
        let spec = RunSpec {
            image: "example/provider:latest".into(),
            name: Some("provider-java-abc123".into()),
            network: Some("analyzer-net".into()),
            ports: vec![(40021, 40021)],
            volumes: vec![("analyzer-src".into(), "/opt/input/source".into())],
            env: vec![("RUST_LOG".into(), "info".into())],
            command: vec!["--port".into(), "40021".into()],
        };
        let mut storage = Vec::new();
        let args = CliRuntime::run_args(&spec, true, &mut storage);
        assert_eq!(
            args,
            [
                "run",
                "--rm",
                "-d",
                "--name",
                "provider-java-abc123",
                "--network",
                "analyzer-net",
                "-p",
                "40021:40021",
                "-v",
                "analyzer-src:/opt/input/source",
                "-e",
                "RUST_LOG=info",
                "example/provider:latest",
                "--port",
                "40021",
            ]
        );
    }

    #[test]
    fn oneshot_args_omit_detach() {
        let spec = RunSpec::new("example/runner:latest");
        let mut storage = Vec::new();
        let args = CliRuntime::run_args(&spec, false, &mut storage);
        assert_eq!(args, ["run", "--rm", "example/runner:latest"]);
    }

    #[test]
    fn volume_inspect_parses_device_and_mountpoint() {
        let raw = r#"[{"Mountpoint": "/var/lib/containers/volumes/src/_data", "Options": {"device": "/home/dev/app"}}]"#;
        let entries: Vec<VolumeInspectEntry> = serde_json::from_str(raw).unwrap();
        let entry = &entries[0];
        assert_eq!(
            entry.options.as_ref().and_then(|o| o.device.as_deref()),
            Some("/home/dev/app")
        );
        assert_eq!(
            entry.mountpoint.as_deref(),
            Some("/var/lib/containers/volumes/src/_data")
        );
    }
}
