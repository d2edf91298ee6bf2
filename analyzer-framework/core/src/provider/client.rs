use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    provider::{ConditionByCapability, InitConfig, ProviderKind},
    rules::{Dependency, Incident},
};

/// Dependencies keyed by the file URI they were resolved from.
pub type DependencyMap = BTreeMap<String, Vec<Dependency>>;

/// Result of evaluating one condition against a provider capability.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub matched: bool,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderClientError {
    #[error("failed to connect to {kind} provider at {address}: {source}")]
    Connect {
        kind: ProviderKind,
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} provider connection lost: {source}")]
    Transport {
        kind: ProviderKind,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} provider closed the connection")]
    Closed { kind: ProviderKind },
    #[error("{kind} provider rejected '{method}': {message}")]
    Remote {
        kind: ProviderKind,
        method: String,
        message: String,
    },
    #[error("invalid payload from {kind} provider: {source}")]
    Codec {
        kind: ProviderKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} provider does not serve capability '{capability}'")]
    UnknownCapability {
        kind: ProviderKind,
        capability: String,
    },
}

/// One language provider as seen by the orchestrator and the engine.
///
/// Containerized providers implement this over TCP RPC; the builtin provider
/// implements it in-process. Callers race long operations against the run's
/// cancellation token.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Initialize the provider. Returns additional init configs the builtin
    /// provider should consume (paths are container-side and must be
    /// translated before use on the host).
    async fn init(&self, configs: Vec<InitConfig>)
    -> Result<Vec<InitConfig>, ProviderClientError>;

    /// Warm provider state for the exact capabilities rules will exercise.
    async fn prepare(
        &self,
        conditions: Vec<ConditionByCapability>,
    ) -> Result<(), ProviderClientError>;

    /// Evaluate one condition; invoked by the engine per rule leaf.
    async fn evaluate(
        &self,
        capability: &str,
        condition: Value,
    ) -> Result<EvaluationResponse, ProviderClientError>;

    /// Full dependency listing, keyed by file URI.
    async fn get_dependencies(&self) -> Result<DependencyMap, ProviderClientError>;

    /// Best-effort shutdown; never fails.
    async fn stop(&self);
}
