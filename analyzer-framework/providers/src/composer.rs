use std::{collections::BTreeMap, fs, path::PathBuf};

use analyzer_framework_core::provider::{
    AnalysisMode, InitConfig, ProviderConfig, ProviderKind, Proxy,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    registry::ProviderRegistry,
    settings::{
        GO_DEP_PROVIDER_BIN, GOPLS_BIN, ILSPY_BIN, JAVA_BUNDLE_JAR, JDTLS_BIN, MAVEN_INDEX,
        NODEJS_LSP_BIN, PAKET_BIN, ProviderSettings, PYLSP_BIN,
    },
};

/// Directory name holding per-user provider overrides under the user config
/// root.
const USER_OVERRIDE_DIR: &str = ".analyzer";

/// Profile directory excluded from builtin file rules when present in the
/// input.
const PROFILE_DIR: &str = ".analyzer";

#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    #[error("failed to read provider override file {path}: {source}")]
    OverrideRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed provider override file {path}: {source}")]
    OverrideParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// User-supplied override for one provider, matched by name. Absent fields
/// leave the composed defaults in place.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderOverride {
    pub name: String,
    pub address: String,
    pub context_lines: usize,
    pub proxy: Option<Proxy>,
    pub init_configs: Vec<InitOverride>,
}

/// Override for one init-config entry, merged positionally.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitOverride {
    pub analysis_mode: Option<AnalysisMode>,
    pub provider_specific_config: BTreeMap<String, Value>,
}

/// Inputs the composer needs beyond the registry itself.
#[derive(Clone, Debug)]
pub struct ComposeInputs<'a> {
    pub settings: &'a ProviderSettings,
    /// Container-side source location; includes the archive basename for
    /// binary inputs.
    pub container_source: String,
    /// Host-side source root the builtin provider analyzes directly.
    pub host_source: PathBuf,
    /// Container-side path of the copied maven settings file, when supplied.
    pub maven_settings_container_path: Option<String>,
}

/// Produce one provider-config per registered provider plus the builtin one,
/// with per-user overrides already folded in.
pub fn compose_configs(
    registry: &ProviderRegistry,
    inputs: &ComposeInputs<'_>,
) -> Vec<ProviderConfig> {
    let mut configs: Vec<ProviderConfig> = registry
        .descriptors()
        .map(|descriptor| containerized_config(descriptor.kind, descriptor.port, inputs))
        .collect();
    configs.push(builtin_config(inputs));

    for config in &mut configs {
        if let Some(user) = user_override(&config.name) {
            debug!(provider = %config.name, "applying per-user provider override");
            apply_override(config, &user);
        }
    }
    configs
}

fn containerized_config(
    kind: ProviderKind,
    port: u16,
    inputs: &ComposeInputs<'_>,
) -> ProviderConfig {
    let settings = inputs.settings;
    let mut init = InitConfig::new(inputs.container_source.clone(), settings.mode);

    match kind {
        ProviderKind::Java => {
            init = init
                .with_setting("lspServerName", "java")
                .with_setting("lspServerPath", JDTLS_BIN)
                .with_setting("bundles", JAVA_BUNDLE_JAR)
                .with_setting("depOpenSourceLabelsFile", MAVEN_INDEX);
            if let Some(path) = &inputs.maven_settings_container_path {
                init = init.with_setting("mavenSettingsFile", path.as_str());
            }
            if settings.disable_maven_search {
                init = init.with_setting("disableMavenSearch", true);
            }
            if let Some(max_mem) = &settings.jvm_max_mem {
                init = init.with_setting("jvmMaxMem", max_mem.as_str());
            }
        }
        ProviderKind::Go => {
            // The generic init derives workspace scope from `location`;
            // setting workspaceFolders as well double-counts files.
            init = init
                .with_setting("lspServerName", "generic")
                .with_setting("lspServerPath", GOPLS_BIN)
                .with_setting("dependencyProviderPath", GO_DEP_PROVIDER_BIN);
        }
        ProviderKind::Python => {
            init = init
                .with_setting("lspServerName", "generic")
                .with_setting("lspServerPath", PYLSP_BIN);
        }
        ProviderKind::NodeJs => {
            init = init
                .with_setting("lspServerName", "nodejs")
                .with_setting("lspServerPath", NODEJS_LSP_BIN)
                .with_setting("lspServerArgs", json!(["--stdio"]))
                .with_setting(
                    "workspaceFolders",
                    json!([format!("file://{}", inputs.container_source)]),
                );
        }
        ProviderKind::CSharp => {
            init = init
                .with_setting("ilspy_cmd", ILSPY_BIN)
                .with_setting("paket_cmd", PAKET_BIN);
        }
        ProviderKind::Builtin => unreachable!("builtin is composed separately"),
    }

    init.proxy = settings.proxy.clone();

    ProviderConfig {
        name: kind.name().to_owned(),
        address: format!("localhost:{port}"),
        binary_path: String::new(),
        context_lines: settings.context_lines,
        proxy: settings.proxy.clone(),
        init_configs: vec![init],
    }
}

/// Compose the builtin provider config over the host source root. Beyond
/// the analyzer's default exclusion list, a profile directory in the input
/// is skipped when present.
pub fn builtin_config(inputs: &ComposeInputs<'_>) -> ProviderConfig {
    let mut init = InitConfig::new(
        inputs.host_source.display().to_string(),
        inputs.settings.mode,
    );
    let profile_dir = inputs.host_source.join(PROFILE_DIR);
    if profile_dir.is_dir() {
        init = init.with_setting("excludedDirs", json!([profile_dir.display().to_string()]));
    }

    ProviderConfig {
        name: ProviderKind::Builtin.name().to_owned(),
        address: String::new(),
        binary_path: String::new(),
        context_lines: inputs.settings.context_lines,
        proxy: None,
        init_configs: vec![init],
    }
}

/// Parse an override-provider-settings file: a JSON array of provider-config
/// objects matched by name.
pub fn load_override_file(path: &PathBuf) -> Result<Vec<ProviderOverride>, ComposerError> {
    let raw = fs::read_to_string(path).map_err(|source| ComposerError::OverrideRead {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ComposerError::OverrideParse {
        path: path.clone(),
        source,
    })
}

/// Apply overrides to the composed configs; unknown names are ignored.
pub fn apply_overrides(configs: &mut [ProviderConfig], overrides: &[ProviderOverride]) {
    for override_config in overrides {
        match configs
            .iter_mut()
            .find(|config| config.name == override_config.name)
        {
            Some(config) => apply_override(config, override_config),
            None => warn!(
                provider = %override_config.name,
                "override names a provider that is not part of this run; ignoring"
            ),
        }
    }
}

fn apply_override(config: &mut ProviderConfig, override_config: &ProviderOverride) {
    if !override_config.address.is_empty() {
        config.address = override_config.address.clone();
    }
    if override_config.context_lines != 0 {
        config.context_lines = override_config.context_lines;
    }
    if let Some(proxy) = &override_config.proxy {
        config.proxy = Some(proxy.clone());
    }
    for (init, override_init) in config
        .init_configs
        .iter_mut()
        .zip(override_config.init_configs.iter())
    {
        if let Some(mode) = override_init.analysis_mode {
            init.analysis_mode = mode;
        }
        for (key, value) in &override_init.provider_specific_config {
            init.provider_specific_config
                .insert(key.clone(), value.clone());
        }
    }
}

/// Per-user override stored at `<config>/.analyzer/<provider>.json`.
fn user_override(provider: &str) -> Option<ProviderOverride> {
    let path = dirs::config_dir()?
        .join(USER_OVERRIDE_DIR)
        .join(format!("{provider}.json"));
    let raw = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<ProviderOverride>(&raw) {
        Ok(mut parsed) => {
            parsed.name = provider.to_owned();
            Some(parsed)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring malformed per-user provider override");
            None
        }
    }
}
