use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
};

use analyzer_framework_core::{
    engine::{LoadedRules, ParseError, RuleParser},
    progress::{ProgressEvent, ProgressSink, ProgressStage},
    provider::{ConditionByCapability, ProviderKind},
    rules::{RuleSet, sort_rule_sets},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::errors::LoadError;

/// Aggregated result of loading every ruleset path.
#[derive(Default, Debug)]
pub struct LoadSummary {
    pub rule_sets: Vec<RuleSet>,
    pub required_providers: BTreeSet<ProviderKind>,
    pub provider_conditions: BTreeMap<ProviderKind, Vec<ConditionByCapability>>,
    /// Paths that failed to load; non-fatal while at least one succeeded.
    pub failures: Vec<(PathBuf, ParseError)>,
}

impl LoadSummary {
    pub fn rule_count(&self) -> usize {
        self.rule_sets.iter().map(|set| set.rules.len()).sum()
    }
}

/// Load every ruleset path on its own task and merge the results.
///
/// Required-provider sets union; per-provider condition lists append, never
/// overwrite. Individual load failures are logged and skipped; the run fails
/// only when nothing loaded at all. Rulesets come back sorted by name.
pub async fn load_rule_sets(
    parser: Arc<dyn RuleParser>,
    paths: &[PathBuf],
    progress: &dyn ProgressSink,
) -> Result<LoadSummary, LoadError> {
    if paths.is_empty() {
        return Err(LoadError::NoRules);
    }

    let total = paths.len();
    let (sender, mut receiver) = mpsc::channel::<(PathBuf, Result<LoadedRules, ParseError>)>(total);
    for path in paths {
        let parser = Arc::clone(&parser);
        let path = path.clone();
        let sender = sender.clone();
        tokio::task::spawn_blocking(move || {
            let result = parser.load(&path);
            let _ = sender.blocking_send((path, result));
        });
    }
    drop(sender);

    let mut summary = LoadSummary::default();
    let mut collected = 0_u64;
    while let Some((path, result)) = receiver.recv().await {
        collected += 1;
        match result {
            Ok(loaded) => {
                summary.rule_sets.extend(loaded.rule_sets);
                summary
                    .required_providers
                    .extend(loaded.required_providers.iter().copied());
                for (kind, conditions) in loaded.provider_conditions {
                    summary
                        .provider_conditions
                        .entry(kind)
                        .or_default()
                        .extend(conditions);
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping ruleset that failed to load");
                summary.failures.push((path.clone(), err));
            }
        }
        progress.emit(ProgressEvent::new(
            ProgressStage::RuleParsing,
            collected,
            total as u64,
            path.display().to_string(),
        ));
    }

    if summary.rule_sets.is_empty() {
        let first = summary
            .failures
            .first()
            .map(|(_, err)| err.to_string())
            .unwrap_or_else(|| "no rulesets found".to_owned());
        return Err(LoadError::AllFailed {
            count: summary.failures.len(),
            first,
        });
    }

    sort_rule_sets(&mut summary.rule_sets);
    info!(
        rule_sets = summary.rule_sets.len(),
        rules = summary.rule_count(),
        required_providers = ?summary.required_providers,
        failed_paths = summary.failures.len(),
        "rulesets loaded"
    );
    Ok(summary)
}
