pub mod cli;

use std::{process::ExitStatus, time::Duration};

use async_trait::async_trait;

pub use cli::CliRuntime;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("unable to parse '{command}' output: {message}")]
    Parse { command: String, message: String },
}

impl RuntimeError {
    /// True when the failure reports a resource that already exists, which
    /// idempotent creators treat as success.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Failed { stderr, .. } if stderr.to_ascii_lowercase().contains("already exists"))
    }
}

/// What `volume inspect` reports about a bind volume.
#[derive(Clone, Debug, Default)]
pub struct VolumeRecord {
    /// The bound host device path, when the volume was created with one.
    pub device: Option<String>,
    /// Runtime-managed mountpoint, used when no device is recorded.
    pub mountpoint: Option<String>,
}

impl VolumeRecord {
    /// Host path backing the volume.
    pub fn host_path(&self) -> Option<&str> {
        self.device
            .as_deref()
            .filter(|device| !device.is_empty())
            .or(self.mountpoint.as_deref())
    }
}

/// Launch parameters for a provider or one-shot container.
#[derive(Clone, Debug, Default)]
pub struct RunSpec {
    pub image: String,
    pub name: Option<String>,
    pub network: Option<String>,
    /// `(host, container)` TCP port pairs.
    pub ports: Vec<(u16, u16)>,
    /// `(volume-or-host-path, container-path)` mounts.
    pub volumes: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub command: Vec<String>,
}

impl RunSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }
}

/// The container runtime operations the orchestrator relies on. Both podman
/// and docker satisfy this; tests substitute a fake.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn network_create(&self, name: &str) -> Result<(), RuntimeError>;

    async fn network_rm(&self, name: &str) -> Result<(), RuntimeError>;

    /// Create a named volume bind-mounted to a host device path.
    async fn volume_create_bind(&self, name: &str, device: &str) -> Result<(), RuntimeError>;

    async fn volume_inspect(&self, name: &str) -> Result<VolumeRecord, RuntimeError>;

    async fn volume_rm(&self, name: &str) -> Result<(), RuntimeError>;

    /// Start a detached, auto-removing container.
    async fn run_detached(&self, spec: &RunSpec) -> Result<(), RuntimeError>;

    /// Run a container to completion and return its stdout.
    async fn run_oneshot(&self, spec: &RunSpec) -> Result<String, RuntimeError>;

    async fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    /// Combined stdout/stderr of a container.
    async fn logs(&self, container: &str) -> Result<String, RuntimeError>;

    async fn image_inspect(&self, image: &str) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt as _;

    use super::*;

    fn failed_with(stderr: &str) -> RuntimeError {
        RuntimeError::Failed {
            command: "volume create".into(),
            status: ExitStatus::from_raw(1 << 8),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn already_exists_is_recognized_case_insensitively() {
        assert!(failed_with("Error: volume Already Exists").is_already_exists());
        assert!(!failed_with("permission denied").is_already_exists());
    }

    #[test]
    fn volume_record_prefers_device_over_mountpoint() {
        let record = VolumeRecord {
            device: Some("/home/dev/app".into()),
            mountpoint: Some("/var/lib/volumes/x/_data".into()),
        };
        assert_eq!(record.host_path(), Some("/home/dev/app"));

        let fallback = VolumeRecord {
            device: Some(String::new()),
            mountpoint: Some("/var/lib/volumes/x/_data".into()),
        };
        assert_eq!(fallback.host_path(), Some("/var/lib/volumes/x/_data"));
    }
}
