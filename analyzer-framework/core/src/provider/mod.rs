pub mod builtin;
pub mod client;
pub mod config;
pub mod rpc;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use builtin::BuiltinClient;
pub use client::{DependencyMap, EvaluationResponse, ProviderClient, ProviderClientError};
pub use config::{AnalysisMode, ConditionByCapability, ConfigError, InitConfig, ProviderConfig, Proxy};
pub use rpc::RpcProviderClient;

/// Identifies a language provider, including the in-process builtin one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Java,
    Go,
    Python,
    NodeJs,
    CSharp,
    Builtin,
}

impl ProviderKind {
    /// Every provider the orchestrator knows how to run.
    pub const ALL: &'static [Self] = &[
        Self::Java,
        Self::Go,
        Self::Python,
        Self::NodeJs,
        Self::CSharp,
        Self::Builtin,
    ];

    /// Containerized providers, i.e. everything except builtin.
    pub const CONTAINERIZED: &'static [Self] = &[
        Self::Java,
        Self::Go,
        Self::Python,
        Self::NodeJs,
        Self::CSharp,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Go => "go",
            Self::Python => "python",
            Self::NodeJs => "nodejs",
            Self::CSharp => "csharp",
            Self::Builtin => "builtin",
        }
    }

    pub const fn is_containerized(self) -> bool {
        !matches!(self, Self::Builtin)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown provider '{0}'; expected one of java, go, python, nodejs, csharp, builtin")]
pub struct UnknownProvider(String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "java" => Ok(Self::Java),
            "go" | "golang" => Ok(Self::Go),
            "python" => Ok(Self::Python),
            "nodejs" => Ok(Self::NodeJs),
            "csharp" | "dotnet" => Ok(Self::CSharp),
            "builtin" => Ok(Self::Builtin),
            other => Err(UnknownProvider(other.to_owned())),
        }
    }
}
