use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    constants::DEFAULT_EXCLUDED_DIRS,
    provider::{
        ConditionByCapability, InitConfig, ProviderKind,
        client::{DependencyMap, EvaluationResponse, ProviderClient, ProviderClientError},
    },
    rules::Incident,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileCondition {
    pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileContentCondition {
    pattern: String,
    #[serde(default)]
    file_pattern: Option<String>,
}

/// The always-in-process provider serving file and content rules.
///
/// Locations come from the composed builtin init config plus the translated
/// additional configs containerized providers return from `init`.
pub struct BuiltinClient {
    state: Mutex<BuiltinState>,
}

#[derive(Default)]
struct BuiltinState {
    locations: Vec<PathBuf>,
    excluded_dirs: BTreeSet<String>,
}

impl Default for BuiltinClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BuiltinState::default()),
        }
    }

    fn snapshot(&self) -> (Vec<PathBuf>, BTreeSet<String>) {
        let state = self.state.lock().expect("builtin state poisoned");
        (state.locations.clone(), state.excluded_dirs.clone())
    }

    fn codec_error(&self, source: serde_json::Error) -> ProviderClientError {
        ProviderClientError::Codec {
            kind: ProviderKind::Builtin,
            source,
        }
    }

    fn compile(&self, pattern: &str) -> Result<Regex, ProviderClientError> {
        Regex::new(pattern).map_err(|err| ProviderClientError::Remote {
            kind: ProviderKind::Builtin,
            method: "evaluate".into(),
            message: format!("invalid pattern '{pattern}': {err}"),
        })
    }

    fn evaluate_file(&self, condition: Value) -> Result<EvaluationResponse, ProviderClientError> {
        let condition: FileCondition =
            serde_json::from_value(condition).map_err(|err| self.codec_error(err))?;
        let matcher = self.compile(&condition.pattern)?;
        let (locations, excluded) = self.snapshot();

        let mut incidents = Vec::new();
        for location in &locations {
            walk_files(location, &excluded, &mut |path| {
                let name = path.file_name().and_then(|name| name.to_str());
                if name.is_some_and(|name| matcher.is_match(name)) {
                    incidents.push(Incident {
                        uri: file_uri(path),
                        ..Incident::default()
                    });
                }
            });
        }
        Ok(EvaluationResponse {
            matched: !incidents.is_empty(),
            incidents,
        })
    }

    fn evaluate_file_content(
        &self,
        condition: Value,
    ) -> Result<EvaluationResponse, ProviderClientError> {
        let condition: FileContentCondition =
            serde_json::from_value(condition).map_err(|err| self.codec_error(err))?;
        let matcher = self.compile(&condition.pattern)?;
        let name_matcher = condition
            .file_pattern
            .as_deref()
            .map(|pattern| self.compile(pattern))
            .transpose()?;
        let (locations, excluded) = self.snapshot();

        let mut incidents = Vec::new();
        for location in &locations {
            walk_files(location, &excluded, &mut |path| {
                if let Some(name_matcher) = &name_matcher {
                    let name = path.file_name().and_then(|name| name.to_str());
                    if !name.is_some_and(|name| name_matcher.is_match(name)) {
                        return;
                    }
                }
                let Ok(content) = fs::read_to_string(path) else {
                    return;
                };
                for (index, line) in content.lines().enumerate() {
                    if matcher.is_match(line) {
                        incidents.push(Incident {
                            uri: file_uri(path),
                            message: line.trim().to_owned(),
                            line_number: Some(index as u32 + 1),
                            ..Incident::default()
                        });
                    }
                }
            });
        }
        Ok(EvaluationResponse {
            matched: !incidents.is_empty(),
            incidents,
        })
    }
}

#[async_trait]
impl ProviderClient for BuiltinClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Builtin
    }

    async fn init(
        &self,
        configs: Vec<InitConfig>,
    ) -> Result<Vec<InitConfig>, ProviderClientError> {
        let mut state = self.state.lock().expect("builtin state poisoned");
        for config in configs {
            for dir in DEFAULT_EXCLUDED_DIRS {
                state.excluded_dirs.insert((*dir).to_owned());
            }
            if let Some(extra) = config
                .provider_specific_config
                .get("excludedDirs")
                .and_then(Value::as_array)
            {
                state.excluded_dirs.extend(
                    extra
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned),
                );
            }
            state.locations.push(PathBuf::from(config.location));
        }
        debug!(
            locations = state.locations.len(),
            "builtin provider initialized"
        );
        Ok(Vec::new())
    }

    async fn prepare(&self, _: Vec<ConditionByCapability>) -> Result<(), ProviderClientError> {
        Ok(())
    }

    async fn evaluate(
        &self,
        capability: &str,
        condition: Value,
    ) -> Result<EvaluationResponse, ProviderClientError> {
        match capability {
            "file" => self.evaluate_file(condition),
            "filecontent" => self.evaluate_file_content(condition),
            other => Err(ProviderClientError::UnknownCapability {
                kind: ProviderKind::Builtin,
                capability: other.to_owned(),
            }),
        }
    }

    async fn get_dependencies(&self) -> Result<DependencyMap, ProviderClientError> {
        Ok(DependencyMap::new())
    }

    async fn stop(&self) {}
}

fn walk_files(root: &Path, excluded: &BTreeSet<String>, visit: &mut impl FnMut(&Path)) {
    if root.is_file() {
        visit(root);
        return;
    }
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let skip = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| excluded.contains(name));
            if !skip {
                walk_files(&path, excluded, visit);
            }
        } else {
            visit(&path);
        }
    }
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}
