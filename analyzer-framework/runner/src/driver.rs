use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
};

use analyzer_framework_core::{
    constants::DEFAULT_ENGINE_WORKERS,
    engine::{EngineOptions, RuleEngine, RuleParser},
    progress::{ProgressEvent, ProgressSink, ProgressStage},
    provider::{
        AnalysisMode, BuiltinClient, InitConfig, ProviderClient, ProviderConfig, ProviderKind,
        RpcProviderClient,
    },
    rules::{FlatDependency, RuleSet, sort_rule_sets},
};
use analyzer_framework_providers::paths::PathTranslator;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    deps::{collect_dependencies, write_dependencies},
    errors::RunnerError,
    loader::load_rule_sets,
    output::write_results,
};

/// Engine log file name inside the output directory.
pub const ANALYSIS_LOG: &str = "analysis.log";

type Clients = BTreeMap<ProviderKind, Arc<dyn ProviderClient>>;

/// Everything the driver needs once providers are up.
pub struct DriverInputs {
    /// Composed provider configs, overrides applied and validated.
    pub configs: Vec<ProviderConfig>,
    /// Container↔host location translator for additional builtin configs.
    pub translator: PathTranslator,
    pub mode: AnalysisMode,
    pub output: PathBuf,
    pub json_output: bool,
    pub rule_paths: Vec<PathBuf>,
    pub workers: usize,
    pub label_selector: Option<String>,
    pub incident_selector: Option<String>,
    pub jaeger_endpoint: Option<String>,
    pub progress: Arc<dyn ProgressSink>,
}

/// Final artifacts of a completed analysis.
#[derive(Debug)]
pub struct AnalysisReport {
    pub rule_sets: Vec<RuleSet>,
    pub dependencies: Option<Vec<FlatDependency>>,
}

/// Drives a run from ready providers to written artifacts: client init,
/// builtin config translation, rule loading, provider preparation, engine
/// execution with an interleaved dependency pass, and the final drain.
pub struct AnalysisDriver {
    engine: Arc<dyn RuleEngine>,
    parser: Arc<dyn RuleParser>,
}

impl AnalysisDriver {
    pub fn new(engine: Arc<dyn RuleEngine>, parser: Arc<dyn RuleParser>) -> Self {
        Self { engine, parser }
    }

    pub async fn run(
        &self,
        cancel: &CancellationToken,
        inputs: DriverInputs,
    ) -> Result<AnalysisReport, RunnerError> {
        let clients = self.initialize_clients(cancel, &inputs).await?;

        let summary = load_rule_sets(
            Arc::clone(&self.parser),
            &inputs.rule_paths,
            inputs.progress.as_ref(),
        )
        .await?;

        self.prepare_providers(cancel, &clients, &summary).await?;

        // The dependency pass runs beside rule execution and is joined
        // before the drain; it is only wanted for full analyses with a java
        // provider in play.
        let dependency_task = (inputs.mode == AnalysisMode::Full
            && clients.contains_key(&ProviderKind::Java))
        .then(|| {
            let clients = clients.clone();
            tokio::spawn(async move { collect_dependencies(&clients).await })
        });

        let options = EngineOptions {
            workers: inputs.workers.max(1).min(DEFAULT_ENGINE_WORKERS),
            label_selector: inputs.label_selector.clone(),
            incident_selector: inputs.incident_selector.clone(),
            jaeger_endpoint: inputs.jaeger_endpoint.clone(),
            progress: Arc::clone(&inputs.progress),
            log_path: Some(inputs.output.join(ANALYSIS_LOG)),
        };
        let engine_result = self
            .engine
            .run(cancel, summary.rule_sets, &clients, options)
            .await;

        let dependencies = match dependency_task {
            Some(task) => match task.await {
                Ok(dependencies) => Some(dependencies),
                Err(err) => {
                    warn!(error = %err, "dependency task failed to join");
                    Some(Vec::new())
                }
            },
            None => None,
        };

        let mut rule_sets = match engine_result {
            Ok(rule_sets) => rule_sets,
            Err(err) => {
                stop_clients(&clients, &summary.required_providers).await;
                return Err(err.into());
            }
        };

        if let Some(dependencies) = &dependencies {
            write_dependencies(dependencies, &inputs.output, inputs.json_output)?;
        }

        stop_clients(&clients, &summary.required_providers).await;
        sort_rule_sets(&mut rule_sets);
        write_results(&rule_sets, &inputs.output, inputs.json_output)?;

        inputs.progress.emit(ProgressEvent::new(
            ProgressStage::Complete,
            0,
            0,
            "analysis complete",
        ));
        Ok(AnalysisReport {
            rule_sets,
            dependencies,
        })
    }

    /// Connect and initialize every containerized provider, then hand the
    /// translated additional configs to the builtin provider.
    async fn initialize_clients(
        &self,
        cancel: &CancellationToken,
        inputs: &DriverInputs,
    ) -> Result<Clients, RunnerError> {
        let mut clients: Clients = BTreeMap::new();
        let mut additional: Vec<InitConfig> = Vec::new();
        let mut builtin_init: Vec<InitConfig> = Vec::new();
        let total = inputs.configs.len() as u64;
        let mut initialized = 0_u64;

        for config in &inputs.configs {
            let Ok(kind) = config.name.parse::<ProviderKind>() else {
                warn!(provider = %config.name, "skipping config for unknown provider");
                continue;
            };
            if kind == ProviderKind::Builtin {
                builtin_init = config.init_configs.clone();
                continue;
            }
            let Some(port) = config.port() else {
                warn!(provider = %kind, address = %config.address, "provider config has no usable port");
                continue;
            };

            let client = tokio::select! {
                connected = RpcProviderClient::connect(kind, port) => {
                    connected.map_err(|source| RunnerError::ProviderInit { kind, source })?
                }
                () = cancel.cancelled() => return Err(RunnerError::Cancelled),
            };
            // Providers that refuse a null config list still accept an empty
            // one, so init always ships a list.
            let extra = tokio::select! {
                result = client.init(config.init_configs.clone()) => {
                    result.map_err(|source| RunnerError::ProviderInit { kind, source })?
                }
                () = cancel.cancelled() => return Err(RunnerError::Cancelled),
            };
            debug!(provider = %kind, additional = extra.len(), "provider initialized");
            additional.extend(extra);
            clients.insert(kind, Arc::new(client));

            initialized += 1;
            inputs.progress.emit(ProgressEvent::new(
                ProgressStage::ProviderInit,
                initialized,
                total,
                kind.to_string(),
            ));
        }

        for mut config in additional {
            config.location = inputs.translator.to_host(&config.location);
            builtin_init.push(config);
        }

        let builtin = BuiltinClient::new();
        builtin
            .init(builtin_init)
            .await
            .map_err(|source| RunnerError::ProviderInit {
                kind: ProviderKind::Builtin,
                source,
            })?;
        clients.insert(ProviderKind::Builtin, Arc::new(builtin));
        inputs.progress.emit(ProgressEvent::new(
            ProgressStage::ProviderInit,
            total,
            total,
            "providers initialized",
        ));

        Ok(clients)
    }

    /// Warm every required provider with the conditions its rules will
    /// exercise. Failures are logged; the rules that need the provider may
    /// still partially evaluate.
    async fn prepare_providers(
        &self,
        cancel: &CancellationToken,
        clients: &Clients,
        summary: &crate::loader::LoadSummary,
    ) -> Result<(), RunnerError> {
        for kind in &summary.required_providers {
            let Some(client) = clients.get(kind) else {
                warn!(provider = %kind, "rules require a provider that was not initialized");
                continue;
            };
            let Some(conditions) = summary.provider_conditions.get(kind) else {
                continue;
            };
            let outcome = tokio::select! {
                result = client.prepare(conditions.clone()) => result,
                () = cancel.cancelled() => return Err(RunnerError::Cancelled),
            };
            match outcome {
                Ok(()) => debug!(provider = %kind, conditions = conditions.len(), "provider prepared"),
                Err(err) => {
                    warn!(provider = %kind, error = %err, "provider prepare failed; continuing")
                }
            }
        }
        info!(providers = summary.required_providers.len(), "providers prepared");
        Ok(())
    }
}

/// Stop the clients the loaded rules actually referenced, plus the builtin
/// one; containers for unreferenced providers are reclaimed by cleanup.
async fn stop_clients(clients: &Clients, required: &BTreeSet<ProviderKind>) {
    join_all(
        clients
            .iter()
            .filter(|(kind, _)| required.contains(kind) || **kind == ProviderKind::Builtin)
            .map(|(_, client)| client.stop()),
    )
    .await;
}
