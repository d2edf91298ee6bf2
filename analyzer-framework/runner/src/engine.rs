use std::{
    collections::BTreeMap,
    fs::File,
    io::Write as _,
    pin::Pin,
    sync::{Arc, Mutex},
};

use analyzer_framework_core::{
    engine::{EngineError, EngineOptions, RuleEngine},
    progress::{ProgressEvent, ProgressStage},
    provider::{ProviderClient, ProviderKind},
    rules::{Incident, Rule, RuleSet, Violation},
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Providers = BTreeMap<ProviderKind, Arc<dyn ProviderClient>>;

struct EvalOutcome {
    matched: bool,
    incidents: Vec<Incident>,
}

enum RuleOutcome {
    Matched(Vec<Incident>),
    Unmatched,
    Failed(String),
}

/// Runs rules by dispatching their conditions to the owning providers.
///
/// The engine knows nothing about rule semantics beyond the `and`/`or`
/// composite shape; every leaf is evaluated by the provider named in its
/// condition key.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchEngine;

#[async_trait]
impl RuleEngine for DispatchEngine {
    async fn run(
        &self,
        cancel: &CancellationToken,
        rule_sets: Vec<RuleSet>,
        providers: &Providers,
        options: EngineOptions,
    ) -> Result<Vec<RuleSet>, EngineError> {
        if let Some(endpoint) = &options.jaeger_endpoint {
            debug!(endpoint = %endpoint, "trace export requested");
        }
        if let Some(selector) = &options.label_selector {
            debug!(selector = %selector, "label selector forwarded");
        }
        let log = options
            .log_path
            .as_ref()
            .and_then(|path| match File::create(path) {
                Ok(file) => Some(Arc::new(Mutex::new(file))),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot open analysis log");
                    None
                }
            });

        let limiter = Arc::new(Semaphore::new(options.workers.max(1)));
        let mut finished = Vec::with_capacity(rule_sets.len());

        for mut rule_set in rule_sets {
            let rules = std::mem::take(&mut rule_set.rules);
            let total = rules.len() as u64;
            let mut tasks: JoinSet<(usize, RuleOutcome)> = JoinSet::new();

            for (index, rule) in rules.iter().enumerate() {
                let limiter = Arc::clone(&limiter);
                let providers = providers.clone();
                let rule = rule.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let _permit = limiter.acquire_owned().await;
                    let outcome = tokio::select! {
                        outcome = evaluate_rule(&providers, &rule) => outcome,
                        () = cancel.cancelled() => RuleOutcome::Failed("cancelled".into()),
                    };
                    (index, outcome)
                });
            }

            let mut completed = 0_u64;
            while let Some(joined) = tasks.join_next().await {
                if cancel.is_cancelled() {
                    tasks.abort_all();
                    return Err(EngineError::Cancelled);
                }
                let (index, outcome) = joined.map_err(|err| {
                    EngineError::WorkerPanic(err.to_string())
                })?;
                let rule = &rules[index];
                completed += 1;

                if let Some(log) = &log
                    && let Ok(mut file) = log.lock()
                {
                    let _ = writeln!(
                        file,
                        "ruleset={} rule={} outcome={}",
                        rule_set.name,
                        rule.rule_id,
                        match &outcome {
                            RuleOutcome::Matched(incidents) =>
                                format!("matched incidents={}", incidents.len()),
                            RuleOutcome::Unmatched => "unmatched".to_owned(),
                            RuleOutcome::Failed(message) => format!("error: {message}"),
                        }
                    );
                }

                match outcome {
                    RuleOutcome::Matched(incidents) => {
                        rule_set.violations.insert(
                            rule.rule_id.clone(),
                            Violation {
                                description: rule.description.clone().or_else(|| rule.message.clone()),
                                category: rule.category.clone(),
                                labels: rule.labels.clone(),
                                effort: rule.effort,
                                incidents,
                            },
                        );
                    }
                    RuleOutcome::Unmatched => rule_set.unmatched.push(rule.rule_id.clone()),
                    RuleOutcome::Failed(message) => {
                        rule_set.errors.insert(rule.rule_id.clone(), message);
                    }
                }

                options.progress.emit(ProgressEvent::new(
                    ProgressStage::RuleExecution,
                    completed,
                    total,
                    rule.rule_id.clone(),
                ));
            }

            rule_set.unmatched.sort();
            finished.push(rule_set);
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(finished)
    }
}

async fn evaluate_rule(providers: &Providers, rule: &Rule) -> RuleOutcome {
    match evaluate_condition(providers, &rule.when).await {
        Ok(outcome) if outcome.matched => RuleOutcome::Matched(outcome.incidents),
        Ok(_) => RuleOutcome::Unmatched,
        Err(message) => RuleOutcome::Failed(message),
    }
}

/// Evaluate a condition tree. Leaves are `<provider>.<capability>` entries;
/// sibling entries and `and` children must all match, `or` children need one.
fn evaluate_condition<'a>(
    providers: &'a Providers,
    condition: &'a Value,
) -> Pin<Box<dyn Future<Output = Result<EvalOutcome, String>> + Send + 'a>> {
    Box::pin(async move {
        let Some(map) = condition.as_object() else {
            return Ok(EvalOutcome {
                matched: false,
                incidents: Vec::new(),
            });
        };

        let mut matched = !map.is_empty();
        let mut incidents = Vec::new();
        for (key, child) in map {
            let outcome = match key.as_str() {
                "and" => evaluate_children(providers, child, true).await?,
                "or" => evaluate_children(providers, child, false).await?,
                leaf => evaluate_leaf(providers, leaf, child).await?,
            };
            matched &= outcome.matched;
            incidents.extend(outcome.incidents);
        }
        if !matched {
            incidents.clear();
        }
        Ok(EvalOutcome { matched, incidents })
    })
}

async fn evaluate_children(
    providers: &Providers,
    children: &Value,
    require_all: bool,
) -> Result<EvalOutcome, String> {
    let Some(items) = children.as_array() else {
        return Err("composite condition must hold a list".to_owned());
    };
    let mut any = false;
    let mut all = true;
    let mut incidents = Vec::new();
    for item in items {
        let outcome = evaluate_condition(providers, item).await?;
        any |= outcome.matched;
        all &= outcome.matched;
        if outcome.matched {
            incidents.extend(outcome.incidents);
        }
    }
    let matched = if require_all { all && !items.is_empty() } else { any };
    if !matched {
        incidents.clear();
    }
    Ok(EvalOutcome { matched, incidents })
}

async fn evaluate_leaf(
    providers: &Providers,
    key: &str,
    condition: &Value,
) -> Result<EvalOutcome, String> {
    let Some((provider, capability)) = key.split_once('.') else {
        return Err(format!("unrecognized condition key '{key}'"));
    };
    let kind: ProviderKind = provider
        .parse()
        .map_err(|_| format!("condition references unknown provider '{provider}'"))?;
    let Some(client) = providers.get(&kind) else {
        return Err(format!("provider '{kind}' is not initialized for this run"));
    };
    let response = client
        .evaluate(capability, condition.clone())
        .await
        .map_err(|err| err.to_string())?;
    Ok(EvalOutcome {
        matched: response.matched,
        incidents: response.incidents,
    })
}

#[cfg(test)]
mod tests {
    use analyzer_framework_core::provider::{
        ConditionByCapability, EvaluationResponse, InitConfig, ProviderClientError,
        client::DependencyMap,
    };
    use serde_json::json;

    use super::*;

    /// Provider fake that matches when the condition carries `"match": true`.
    struct ScriptedProvider {
        kind: ProviderKind,
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        async fn init(
            &self,
            _: Vec<InitConfig>,
        ) -> Result<Vec<InitConfig>, ProviderClientError> {
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
            let matched = condition["match"].as_bool().unwrap_or(false);
            Ok(EvaluationResponse {
                matched,
                incidents: if matched {
                    vec![Incident {
                        uri: format!("file:///{capability}"),
                        ..Incident::default()
                    }]
                } else {
                    Vec::new()
                },
            })
        }
        async fn get_dependencies(&self) -> Result<DependencyMap, ProviderClientError> {
            Ok(DependencyMap::new())
        }
        async fn stop(&self) {}
    }

    fn providers() -> Providers {
        let mut map: Providers = BTreeMap::new();
        map.insert(
            ProviderKind::Java,
            Arc::new(ScriptedProvider {
                kind: ProviderKind::Java,
            }),
        );
        map.insert(
            ProviderKind::Builtin,
            Arc::new(ScriptedProvider {
                kind: ProviderKind::Builtin,
            }),
        );
        map
    }

    fn rule(id: &str, when: Value) -> Rule {
        Rule {
            rule_id: id.into(),
            when,
            ..Rule::default()
        }
    }

    fn rule_set(rules: Vec<Rule>) -> RuleSet {
        RuleSet {
            name: "test".into(),
            rules,
            ..RuleSet::default()
        }
    }

    async fn run_engine(rules: Vec<Rule>) -> RuleSet {
        let cancel = CancellationToken::new();
        let mut results = DispatchEngine
            .run(
                &cancel,
                vec![rule_set(rules)],
                &providers(),
                EngineOptions::default(),
            )
            .await
            .unwrap();
        results.remove(0)
    }

    #[tokio::test]
    async fn matched_rules_become_violations() {
        let result = run_engine(vec![
            rule("r-match", json!({"java.referenced": {"match": true}})),
            rule("r-miss", json!({"java.referenced": {"match": false}})),
        ])
        .await;

        assert!(result.violations.contains_key("r-match"));
        assert_eq!(result.unmatched, ["r-miss"]);
        assert_eq!(result.violations["r-match"].incidents.len(), 1);
    }

    #[tokio::test]
    async fn or_composite_needs_one_match() {
        let result = run_engine(vec![rule(
            "r-or",
            json!({"or": [
                {"java.referenced": {"match": false}},
                {"builtin.filecontent": {"match": true}},
            ]}),
        )])
        .await;

        assert!(result.violations.contains_key("r-or"));
    }

    #[tokio::test]
    async fn and_composite_needs_every_match() {
        let result = run_engine(vec![rule(
            "r-and",
            json!({"and": [
                {"java.referenced": {"match": true}},
                {"builtin.filecontent": {"match": false}},
            ]}),
        )])
        .await;

        assert_eq!(result.unmatched, ["r-and"]);
    }

    #[tokio::test]
    async fn uninitialized_provider_is_a_rule_error() {
        let result = run_engine(vec![rule(
            "r-go",
            json!({"go.referenced": {"match": true}}),
        )])
        .await;

        assert!(result.errors["r-go"].contains("not initialized"));
    }

    #[tokio::test]
    async fn progress_counts_every_rule_against_the_ruleset_total() {
        let (sink, mut receiver) =
            analyzer_framework_core::progress::ChannelProgress::bounded(16);
        let cancel = CancellationToken::new();
        let options = EngineOptions {
            progress: Arc::new(sink),
            ..EngineOptions::default()
        };
        DispatchEngine
            .run(
                &cancel,
                vec![rule_set(vec![
                    rule("a", json!({"java.referenced": {"match": true}})),
                    rule("b", json!({"java.referenced": {"match": false}})),
                ])],
                &providers(),
                options,
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            seen.push((event.current, event.total));
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, total)| *total == 2));
        assert_eq!(seen.last().unwrap().0, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = DispatchEngine
            .run(
                &cancel,
                vec![rule_set(vec![rule(
                    "a",
                    json!({"java.referenced": {"match": true}}),
                )])],
                &providers(),
                EngineOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
