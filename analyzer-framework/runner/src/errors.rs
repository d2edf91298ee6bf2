use std::{path::PathBuf, time::Duration};

use analyzer_framework_core::{
    engine::EngineError,
    provider::{ProviderClientError, ProviderKind},
};
use analyzer_framework_providers::{composer::ComposerError, registry::RegistryError};

use crate::runtime::RuntimeError;

/// Pre-flight configuration problems, reported before any resource exists.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("input path {path} does not exist")]
    InputMissing { path: PathBuf },
    #[error("output directory {path} already exists; pass --overwrite to replace it")]
    OutputExists { path: PathBuf },
    #[error("{role} file {path} does not exist")]
    FileMissing { role: &'static str, path: PathBuf },
    #[error("port {port} for the {kind} provider is already in use")]
    PortInUse { kind: ProviderKind, port: u16 },
}

/// One startup task failed while its siblings ran.
#[derive(Debug, thiserror::Error)]
#[error("startup task '{task}' failed: {source}")]
pub struct StartupError {
    pub task: &'static str,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("{kind} provider at {address} failed to become ready within {timeout:?}")]
    Timeout {
        kind: ProviderKind,
        address: String,
        timeout: Duration,
    },
    #[error("readiness probing cancelled")]
    Cancelled,
}

/// Rule loading failed outright; partial failures are only logged.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no rules were provided and default rulesets are disabled")]
    NoRules,
    #[error("all {count} ruleset(s) failed to load; first failure: {first}")]
    AllFailed { count: usize, first: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level analysis failure surfaced to the command.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("no container runtime is available on this host")]
    RuntimeUnavailable,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Composer(#[from] ComposerError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error("failed to initialize the {kind} provider: {source}")]
    ProviderInit {
        kind: ProviderKind,
        #[source]
        source: ProviderClientError,
    },
    #[error(transparent)]
    RuleLoad(#[from] LoadError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("analysis cancelled")]
    Cancelled,
}

impl RunnerError {
    /// A short operator-facing hint for diagnosing the failure.
    pub fn troubleshooting(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeUnavailable => Some(
                "install podman or docker, or point ANALYZER_CONTAINER_RUNTIME at a working binary; verify with '<runtime> info'",
            ),
            Self::Validation(ValidationError::PortInUse { .. }) => {
                Some("find the conflicting process with 'ss -ltnp' and free the port, then re-run")
            }
            Self::Readiness(ReadinessError::Timeout { .. }) => Some(
                "re-run with --no-cleanup and inspect the provider container ('<runtime> ps -a', '<runtime> logs <container>'); provider.log in the output directory keeps the captured output",
            ),
            Self::Runtime(_) | Self::Startup(_) => Some(
                "re-run with --no-cleanup to keep partial resources for inspection; '<runtime> ps -a' and '<runtime> volume ls' show what was created",
            ),
            Self::ProviderInit { .. } => Some(
                "check provider.log in the output directory; the provider container may have exited during initialization",
            ),
            Self::RuleLoad(_) => {
                Some("verify every --rules path exists and contains valid ruleset YAML")
            }
            _ => None,
        }
    }
}
