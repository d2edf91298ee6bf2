use std::{
    collections::BTreeSet,
    net::{Ipv4Addr, TcpListener as StdTcpListener},
    path::{Path, PathBuf},
    sync::Arc,
};

use analyzer_framework_core::provider::{ProviderConfig, ProviderKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    errors::{StartupError, ValidationError},
    rulesets::ensure_default_rulesets,
    runtime::ContainerRuntime,
    supervisor::ContainerSupervisor,
};

/// Inputs for the parallel startup phase.
pub struct StartupInputs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub maven_settings: Option<PathBuf>,
    pub override_file: Option<PathBuf>,
    pub configs: Vec<ProviderConfig>,
    /// Ports still guarded by our own reservations; exempt from the free
    /// check.
    pub reserved_ports: BTreeSet<u16>,
    /// Host directory the source volume binds; `None` skips volume creation
    /// (builtin-only runs).
    pub volume_root: Option<PathBuf>,
    pub enable_default_rulesets: bool,
    pub runner_image: String,
}

/// What the startup phase produced.
#[derive(Debug, Default)]
pub struct StartupOutcome {
    pub source_volume: Option<String>,
    pub default_rulesets: Option<PathBuf>,
}

/// Check the run configuration before any resource is created.
pub fn validate(inputs: &StartupInputs) -> Result<(), ValidationError> {
    if !inputs.input.exists() {
        return Err(ValidationError::InputMissing {
            path: inputs.input.clone(),
        });
    }
    for (role, path) in [
        ("maven settings", inputs.maven_settings.as_ref()),
        ("override provider settings", inputs.override_file.as_ref()),
    ] {
        if let Some(path) = path
            && !path.exists()
        {
            return Err(ValidationError::FileMissing {
                role,
                path: path.clone(),
            });
        }
    }
    for config in &inputs.configs {
        let Ok(kind) = config.name.parse::<ProviderKind>() else {
            continue;
        };
        let Some(port) = config.port() else {
            continue;
        };
        if inputs.reserved_ports.contains(&port) {
            continue;
        }
        if StdTcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_err() {
            return Err(ValidationError::PortInUse { kind, port });
        }
    }
    Ok(())
}

enum TaskOutput {
    Validated,
    Volume(Option<String>),
    Rulesets(Option<PathBuf>),
}

/// Run validation, source-volume creation, and default-ruleset extraction in
/// parallel, failing fast on the first error.
///
/// Resources created by the surviving tasks are already registered with the
/// cleanup coordinator, so the caller's error path reclaims them.
pub async fn run_startup(
    supervisor: Arc<ContainerSupervisor>,
    runtime: Arc<dyn ContainerRuntime>,
    cancel: &CancellationToken,
    inputs: Arc<StartupInputs>,
) -> Result<StartupOutcome, StartupError> {
    let task_cancel = cancel.child_token();
    let mut tasks: JoinSet<Result<TaskOutput, StartupError>> = JoinSet::new();

    {
        let inputs = Arc::clone(&inputs);
        tasks.spawn(async move {
            validate(&inputs)
                .map(|()| TaskOutput::Validated)
                .map_err(|err| StartupError {
                    task: "validation",
                    source: err.into(),
                })
        });
    }

    {
        let inputs = Arc::clone(&inputs);
        let supervisor = Arc::clone(&supervisor);
        let volume_cancel = task_cancel.clone();
        tasks.spawn(async move {
            let Some(volume_root) = inputs.volume_root.clone() else {
                return Ok(TaskOutput::Volume(None));
            };
            tokio::select! {
                result = supervisor.create_source_volume(&volume_root) => result
                    .map(|name| TaskOutput::Volume(Some(name)))
                    .map_err(|err| StartupError { task: "source-volume", source: err.into() }),
                () = volume_cancel.cancelled() => Ok(TaskOutput::Volume(None)),
            }
        });
    }

    {
        let inputs = Arc::clone(&inputs);
        let runtime = Arc::clone(&runtime);
        let rulesets_cancel = task_cancel.clone();
        tasks.spawn(async move {
            if !inputs.enable_default_rulesets {
                return Ok(TaskOutput::Rulesets(None));
            }
            tokio::select! {
                result = ensure_default_rulesets(runtime.as_ref(), &inputs.runner_image, &inputs.output) => result
                    .map(|path| TaskOutput::Rulesets(Some(path)))
                    .map_err(|err| StartupError { task: "default-rulesets", source: err }),
                () = rulesets_cancel.cancelled() => Ok(TaskOutput::Rulesets(None)),
            }
        });
    }

    let mut outcome = StartupOutcome::default();
    let mut failure: Option<StartupError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(TaskOutput::Validated)) => debug!("startup validation passed"),
            Ok(Ok(TaskOutput::Volume(volume))) => outcome.source_volume = volume,
            Ok(Ok(TaskOutput::Rulesets(path))) => outcome.default_rulesets = path,
            Ok(Err(err)) => {
                if failure.is_none() {
                    task_cancel.cancel();
                    failure = Some(err);
                }
            }
            Err(join_err) => {
                if failure.is_none() {
                    task_cancel.cancel();
                    failure = Some(StartupError {
                        task: "startup",
                        source: anyhow::anyhow!("startup task panicked: {join_err}"),
                    });
                }
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => {
            info!(
                volume = outcome.source_volume.as_deref().unwrap_or("<none>"),
                "startup phase complete"
            );
            Ok(outcome)
        }
    }
}

/// Resolve the rule paths for the run: explicit `--rules` entries plus the
/// extracted default ruleset cache.
pub fn collect_rule_paths(explicit: &[PathBuf], default_rulesets: Option<&Path>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = explicit.to_vec();
    if let Some(cache) = default_rulesets {
        paths.push(cache.to_path_buf());
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs(input: PathBuf) -> StartupInputs {
        StartupInputs {
            input,
            output: PathBuf::from("/tmp/out"),
            maven_settings: None,
            override_file: None,
            configs: Vec::new(),
            reserved_ports: BTreeSet::new(),
            volume_root: None,
            enable_default_rulesets: false,
            runner_image: "runner:test".into(),
        }
    }

    #[test]
    fn missing_input_fails_validation() {
        let inputs = base_inputs(PathBuf::from("/definitely/not/here"));
        assert!(matches!(
            validate(&inputs),
            Err(ValidationError::InputMissing { .. })
        ));
    }

    #[test]
    fn missing_maven_settings_names_the_role() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = base_inputs(dir.path().to_path_buf());
        inputs.maven_settings = Some(dir.path().join("settings.xml"));
        let err = validate(&inputs).unwrap_err();
        assert!(err.to_string().contains("maven settings"));
    }

    #[test]
    fn pre_bound_port_is_reported_before_any_container_exists() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = blocker.local_addr().unwrap().port();

        let mut inputs = base_inputs(dir.path().to_path_buf());
        inputs.configs = vec![ProviderConfig {
            name: "java".into(),
            address: format!("localhost:{port}"),
            ..ProviderConfig::default()
        }];

        let err = validate(&inputs).unwrap_err();
        match err {
            ValidationError::PortInUse { kind, port: seen } => {
                assert_eq!(kind, ProviderKind::Java);
                assert_eq!(seen, port);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reserved_ports_are_exempt_from_the_free_check() {
        let dir = tempfile::tempdir().unwrap();
        let guard = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = guard.local_addr().unwrap().port();

        let mut inputs = base_inputs(dir.path().to_path_buf());
        inputs.reserved_ports.insert(port);
        inputs.configs = vec![ProviderConfig {
            name: "java".into(),
            address: format!("localhost:{port}"),
            ..ProviderConfig::default()
        }];

        assert!(validate(&inputs).is_ok());
    }

    #[test]
    fn rule_paths_append_the_default_cache() {
        let explicit = vec![PathBuf::from("/rules/custom")];
        let paths = collect_rule_paths(&explicit, Some(Path::new("/out/.rulesets-v1")));
        assert_eq!(
            paths,
            [
                PathBuf::from("/rules/custom"),
                PathBuf::from("/out/.rulesets-v1")
            ]
        );
    }
}
