use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use analyzer_framework_core::{
    constants::{CONTAINER_SOURCE_MOUNT, DEFAULT_ENGINE_WORKERS, DEFAULT_READINESS_TIMEOUT},
    engine::{RuleEngine, RuleParser},
    progress::{ChannelProgress, NoopProgress, ProgressSink},
    provider::{AnalysisMode, ProviderConfig, ProviderKind},
};
use analyzer_framework_providers::{
    composer::{ComposeInputs, apply_overrides, compose_configs, load_override_file},
    paths::PathTranslator,
    registry::ProviderRegistry,
    settings::ProviderSettings,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cleanup::CleanupCoordinator,
    driver::{AnalysisDriver, AnalysisReport, DriverInputs},
    errors::{OutputError, RunnerError, StartupError, ValidationError},
    progress::BarReporter,
    readiness,
    runtime::ContainerRuntime,
    startup::{StartupInputs, StartupOutcome, collect_rule_paths, run_startup},
    supervisor::{ContainerSupervisor, SourceMount},
};

/// Captured provider container output inside the output directory.
pub const PROVIDER_LOG: &str = "provider.log";

/// Directory the external report renderer populates.
pub const STATIC_REPORT_DIR: &str = "static-report";

/// One analysis invocation, as resolved from the command line.
#[derive(Clone, Debug)]
pub struct AnalyzeConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: AnalysisMode,
    pub rules: Vec<PathBuf>,
    /// Explicit provider selection; empty means detect from the input.
    pub providers: Vec<ProviderKind>,
    pub enable_default_rulesets: bool,
    pub analyze_known_libraries: bool,
    pub label_selector: Option<String>,
    pub incident_selector: Option<String>,
    pub jaeger_endpoint: Option<String>,
    pub override_file: Option<PathBuf>,
    pub workers: usize,
    pub json_output: bool,
    pub overwrite: bool,
    pub bulk: bool,
    pub skip_static_report: bool,
    pub no_cleanup: bool,
    pub no_progress: bool,
    pub readiness_timeout: Duration,
}

impl AnalyzeConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            mode: AnalysisMode::Full,
            rules: Vec::new(),
            providers: Vec::new(),
            enable_default_rulesets: true,
            analyze_known_libraries: false,
            label_selector: None,
            incident_selector: None,
            jaeger_endpoint: None,
            override_file: None,
            workers: DEFAULT_ENGINE_WORKERS,
            json_output: false,
            overwrite: false,
            bulk: false,
            skip_static_report: false,
            no_cleanup: false,
            no_progress: false,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }
}

/// Supervises a whole analysis run: registry assembly, startup choreography,
/// container provisioning, readiness, the analysis driver, and teardown.
pub struct AnalyzeOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    engine: Arc<dyn RuleEngine>,
    parser: Arc<dyn RuleParser>,
    settings: ProviderSettings,
}

impl AnalyzeOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        engine: Arc<dyn RuleEngine>,
        parser: Arc<dyn RuleParser>,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            runtime,
            engine,
            parser,
            settings,
        }
    }

    pub async fn run(
        &self,
        cancel: &CancellationToken,
        config: AnalyzeConfig,
    ) -> Result<AnalysisReport, RunnerError> {
        prepare_output_dir(&config)?;

        let cleanup = CleanupCoordinator::new(Arc::clone(&self.runtime), config.no_cleanup);
        let result = self.run_phases(cancel, &config, &cleanup).await;
        cleanup.run().await;

        match &result {
            Ok(report) => info!(
                rule_sets = report.rule_sets.len(),
                output = %config.output.display(),
                "analysis finished"
            ),
            Err(err) => {
                if let Some(hint) = err.troubleshooting() {
                    warn!(hint, "analysis failed");
                }
            }
        }
        result
    }

    async fn run_phases(
        &self,
        cancel: &CancellationToken,
        config: &AnalyzeConfig,
        cleanup: &Arc<CleanupCoordinator>,
    ) -> Result<AnalysisReport, RunnerError> {
        let supervisor = Arc::new(ContainerSupervisor::new(
            Arc::clone(&self.runtime),
            Arc::clone(cleanup),
        ));

        // The command-line mode wins over whatever the settings were built
        // with; the composer reads the mode from here.
        let settings = {
            let mut settings = self.settings.clone();
            settings.mode = config.mode;
            settings
        };

        let mut registry =
            ProviderRegistry::discover(&config.input, &config.providers, &settings)?;
        let mount = supervisor
            .stage_input(&config.input)
            .await
            .map_err(|source| StartupError {
                task: "input-staging",
                source: source.into(),
            })?;

        let mut config_dir = None;
        let mut maven_settings_container_path = None;
        if registry.get(ProviderKind::Java).is_some()
            && let Some(settings_file) = &settings.maven_settings
            && settings_file.is_file()
        {
            let (host_dir, container_path) = supervisor
                .stage_maven_settings(settings_file)
                .await
                .map_err(|source| StartupError {
                    task: "maven-settings",
                    source: source.into(),
                })?;
            config_dir = Some(host_dir);
            maven_settings_container_path = Some(container_path);
        }

        let compose_inputs = ComposeInputs {
            settings: &settings,
            container_source: mount.container_location.clone(),
            host_source: mount.host_root.clone(),
            maven_settings_container_path,
        };
        let mut configs = compose_configs(&registry, &compose_inputs);

        if let Some(path) = &config.override_file
            && path.is_file()
        {
            let overrides = load_override_file(path)?;
            for override_config in &overrides {
                if override_config.address.is_empty() {
                    continue;
                }
                if let (Ok(kind), Some(port)) = (
                    override_config.name.parse::<ProviderKind>(),
                    override_port(&override_config.address),
                ) {
                    registry.set_port(kind, port);
                }
            }
            apply_overrides(&mut configs, &overrides);
        }
        if config.analyze_known_libraries {
            debug!("known open-source libraries included in analysis");
        }

        let startup_inputs = StartupInputs {
            input: config.input.clone(),
            output: config.output.clone(),
            maven_settings: settings.maven_settings.clone(),
            override_file: config.override_file.clone(),
            configs: configs.clone(),
            reserved_ports: registry.reserved_ports(),
            volume_root: (!registry.is_empty()).then(|| mount.host_root.clone()),
            enable_default_rulesets: config.enable_default_rulesets,
            runner_image: settings.runner_image.clone(),
        };
        let startup = run_startup(
            Arc::clone(&supervisor),
            Arc::clone(&self.runtime),
            cancel,
            Arc::new(startup_inputs),
        )
        .await?;
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        if !registry.is_empty() {
            self.launch_providers(
                &mut registry,
                &supervisor,
                startup.source_volume.as_deref(),
                config_dir.as_deref(),
            )
            .await?;
        }

        let phase_result = self
            .ready_and_drive(cancel, config, &registry, &mount, &startup, &configs)
            .await;

        if !registry.running_containers().is_empty() {
            supervisor
                .capture_logs(
                    &registry.running_containers(),
                    &config.output.join(PROVIDER_LOG),
                )
                .await;
        }

        let report = phase_result?;
        if !config.skip_static_report {
            prepare_static_report_dir(&config.output)?;
        }
        Ok(report)
    }

    async fn launch_providers(
        &self,
        registry: &mut ProviderRegistry,
        supervisor: &ContainerSupervisor,
        source_volume: Option<&str>,
        config_dir: Option<&Path>,
    ) -> Result<(), RunnerError> {
        let Some(source_volume) = source_volume else {
            // Startup either failed (already surfaced) or was cancelled.
            return Err(RunnerError::Cancelled);
        };
        let network = supervisor.create_network().await?;
        let maven_cache = if registry.get(ProviderKind::Java).is_some() {
            supervisor.ensure_maven_cache().await?
        } else {
            None
        };

        for kind in registry.kinds() {
            registry.release_port(kind);
            let descriptor = registry
                .get(kind)
                .expect("descriptor must exist for its own kind")
                .clone();
            let name = supervisor
                .launch_provider(
                    &descriptor,
                    &network,
                    source_volume,
                    maven_cache.as_deref(),
                    config_dir,
                    self.settings.proxy.as_ref(),
                )
                .await?;
            registry.mark_running(kind, name)?;
        }
        Ok(())
    }

    /// Probe readiness, resolve the host source root, and hand off to the
    /// analysis driver.
    async fn ready_and_drive(
        &self,
        cancel: &CancellationToken,
        config: &AnalyzeConfig,
        registry: &ProviderRegistry,
        mount: &SourceMount,
        startup: &StartupOutcome,
        configs: &[ProviderConfig],
    ) -> Result<AnalysisReport, RunnerError> {
        if !registry.is_empty() {
            let targets: Vec<(ProviderKind, u16)> = registry
                .descriptors()
                .map(|descriptor| (descriptor.kind, descriptor.port))
                .collect();
            readiness::wait_all(cancel, &targets, config.readiness_timeout).await?;
        }

        let host_root = self
            .resolve_host_root(mount, startup.source_volume.as_deref())
            .await;
        let translator = PathTranslator::new(CONTAINER_SOURCE_MOUNT, host_root);

        let (progress, reporter): (Arc<dyn ProgressSink>, Option<BarReporter>) =
            if config.no_progress {
                (Arc::new(NoopProgress), None)
            } else {
                let (sink, receiver) = ChannelProgress::bounded(256);
                (Arc::new(sink), Some(BarReporter::spawn(receiver)))
            };

        let driver = AnalysisDriver::new(Arc::clone(&self.engine), Arc::clone(&self.parser));
        let result = driver
            .run(
                cancel,
                DriverInputs {
                    configs: configs.to_vec(),
                    translator,
                    mode: config.mode,
                    output: config.output.clone(),
                    json_output: config.json_output,
                    rule_paths: collect_rule_paths(&config.rules, startup.default_rulesets.as_deref()),
                    workers: config.workers,
                    label_selector: config.label_selector.clone(),
                    incident_selector: config.incident_selector.clone(),
                    jaeger_endpoint: config.jaeger_endpoint.clone(),
                    progress,
                },
            )
            .await;

        if let Some(reporter) = reporter {
            reporter.shutdown().await;
        }
        result
    }

    /// For binary inputs the staging dir is recorded in the runtime's volume;
    /// prefer what the runtime reports, falling back to the staged path.
    async fn resolve_host_root(
        &self,
        mount: &SourceMount,
        source_volume: Option<&str>,
    ) -> PathBuf {
        if !mount.is_binary {
            return mount.host_root.clone();
        }
        let Some(volume) = source_volume else {
            return mount.host_root.clone();
        };
        match self.runtime.volume_inspect(volume).await {
            Ok(record) => record
                .host_path()
                .map(PathBuf::from)
                .unwrap_or_else(|| mount.host_root.clone()),
            Err(err) => {
                warn!(volume = %volume, error = %err, "volume inspect failed; using staged path");
                mount.host_root.clone()
            }
        }
    }
}

fn prepare_output_dir(config: &AnalyzeConfig) -> Result<(), RunnerError> {
    let output = &config.output;
    if output.exists() && !config.overwrite && !config.bulk {
        return Err(ValidationError::OutputExists {
            path: output.clone(),
        }
        .into());
    }
    if output.exists() && config.overwrite && !config.bulk {
        fs::remove_dir_all(output).map_err(|source| OutputError::Io {
            path: output.clone(),
            source,
        })?;
    }
    fs::create_dir_all(output).map_err(|source| OutputError::Io {
        path: output.clone(),
        source,
    })?;
    Ok(())
}

fn prepare_static_report_dir(output: &Path) -> Result<(), RunnerError> {
    let dir = output.join(STATIC_REPORT_DIR);
    fs::create_dir_all(&dir).map_err(|source| OutputError::Io {
        path: dir.clone(),
        source,
    })?;
    debug!(path = %dir.display(), "static report directory ready for the renderer");
    Ok(())
}

fn override_port(address: &str) -> Option<u16> {
    address.rsplit(':').next()?.parse().ok()
}
