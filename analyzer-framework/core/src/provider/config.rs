use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Analysis depth requested from providers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    #[default]
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "source-only")]
    SourceOnly,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::SourceOnly => f.write_str("source-only"),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid analysis mode '{0}'; expected 'full' or 'source-only'")]
pub struct InvalidMode(String);

impl FromStr for AnalysisMode {
    type Err = InvalidMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full" => Ok(Self::Full),
            "source-only" => Ok(Self::SourceOnly),
            other => Err(InvalidMode(other.to_owned())),
        }
    }
}

/// Proxy settings forwarded to providers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

/// Per-location parameter block handed to a provider's `init`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfig {
    pub location: String,
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_specific_config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Proxy>,
}

impl InitConfig {
    pub fn new(location: impl Into<String>, mode: AnalysisMode) -> Self {
        Self {
            location: location.into(),
            analysis_mode: mode,
            provider_specific_config: BTreeMap::new(),
            proxy: None,
        }
    }

    /// Insert a provider-specific setting, replacing any existing value.
    pub fn with_setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.provider_specific_config
            .insert(key.to_owned(), value.into());
        self
    }
}

/// Full configuration for one provider.
///
/// `address` non-empty means the provider is reached over the network;
/// `binary_path` non-empty means it is spawned in-process. The builtin
/// provider carries neither.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub binary_path: String,
    #[serde(default)]
    pub context_lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Proxy>,
    #[serde(default)]
    pub init_configs: Vec<InitConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("provider '{name}' must set exactly one of address or binary path")]
    AmbiguousEndpoint { name: String },
    #[error("builtin provider must not carry an address or binary path")]
    BuiltinEndpoint,
}

impl ProviderConfig {
    /// Host port parsed from `address`, when one is set.
    pub fn port(&self) -> Option<u16> {
        self.address.rsplit(':').next()?.parse().ok()
    }

    /// Enforce the address-xor-binary invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_address = !self.address.is_empty();
        let has_binary = !self.binary_path.is_empty();
        if self.name == "builtin" {
            if has_address || has_binary {
                return Err(ConfigError::BuiltinEndpoint);
            }
            return Ok(());
        }
        if has_address == has_binary {
            return Err(ConfigError::AmbiguousEndpoint {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// A predicate plus the provider capability that evaluates it, used to
/// warm-prepare providers before rules run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionByCapability {
    pub capability: String,
    pub condition: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn network_config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_owned(),
            address: "localhost:40021".into(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn network_provider_validates() {
        assert!(network_config("java").validate().is_ok());
    }

    #[test]
    fn both_endpoints_rejected() {
        let mut config = network_config("java");
        config.binary_path = "/usr/local/bin/provider".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AmbiguousEndpoint { .. })
        ));
    }

    #[test]
    fn neither_endpoint_rejected_for_containerized() {
        let config = ProviderConfig {
            name: "go".into(),
            ..ProviderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn builtin_requires_empty_endpoints() {
        let config = ProviderConfig {
            name: "builtin".into(),
            ..ProviderConfig::default()
        };
        assert!(config.validate().is_ok());

        let bad = ProviderConfig {
            name: "builtin".into(),
            address: "localhost:9000".into(),
            ..ProviderConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::BuiltinEndpoint)));
    }

    #[test]
    fn init_config_serializes_camel_case() {
        let config = InitConfig::new("/opt/input/source", AnalysisMode::SourceOnly)
            .with_setting("lspServerName", "generic");
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["analysisMode"], json!("source-only"));
        assert_eq!(
            value["providerSpecificConfig"]["lspServerName"],
            json!("generic")
        );
    }

    #[test]
    fn analysis_mode_parses() {
        assert_eq!(
            "source-only".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::SourceOnly
        );
        assert!("partial".parse::<AnalysisMode>().is_err());
    }
}
