use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    constants::DEFAULT_ENGINE_WORKERS,
    progress::{NoopProgress, ProgressSink},
    provider::{ConditionByCapability, ProviderClient, ProviderKind},
    rules::RuleSet,
};

/// Everything a ruleset load produced: the rules themselves plus the provider
/// demand they imply.
#[derive(Debug, Default)]
pub struct LoadedRules {
    pub rule_sets: Vec<RuleSet>,
    pub required_providers: BTreeSet<ProviderKind>,
    pub provider_conditions: BTreeMap<ProviderKind, Vec<ConditionByCapability>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read ruleset at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ruleset at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("ruleset at {path} contains no rules")]
    Empty { path: PathBuf },
}

/// Loads one ruleset path into rules plus provider requirements.
pub trait RuleParser: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedRules, ParseError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("rule execution cancelled")]
    Cancelled,
    #[error("engine worker panicked: {0}")]
    WorkerPanic(String),
}

/// Options for one engine run.
#[derive(Clone)]
pub struct EngineOptions {
    pub workers: usize,
    pub label_selector: Option<String>,
    pub incident_selector: Option<String>,
    pub jaeger_endpoint: Option<String>,
    pub progress: Arc<dyn ProgressSink>,
    pub log_path: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_ENGINE_WORKERS,
            label_selector: None,
            incident_selector: None,
            jaeger_endpoint: None,
            progress: Arc::new(NoopProgress),
            log_path: None,
        }
    }
}

/// Evaluates rulesets against a set of prepared providers.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        rule_sets: Vec<RuleSet>,
        providers: &BTreeMap<ProviderKind, Arc<dyn ProviderClient>>,
        options: EngineOptions,
    ) -> Result<Vec<RuleSet>, EngineError>;
}
