mod args;

use std::{collections::BTreeSet, process::ExitCode, sync::Arc};

use analyzer_framework_core::{
    engine::RuleParser,
    provider::{ProviderKind, Proxy},
};
use analyzer_framework_providers::{detect::language_census, settings::ProviderSettings};
use analyzer_framework_runner::{
    AnalyzeConfig, AnalyzeOrchestrator, DispatchEngine, RunnerError, YamlRuleParser,
    runtime::CliRuntime,
};
use clap::Parser as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{AnalyzeArgs, Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args).await,
    }
}

async fn run_analyze(args: AnalyzeArgs) -> ExitCode {
    if args.list_providers {
        for kind in ProviderKind::ALL {
            println!("{kind}");
        }
        return ExitCode::SUCCESS;
    }
    if args.list_sources || args.list_targets {
        return list_rule_labels(&args);
    }
    if args.list_languages {
        return list_languages(&args);
    }

    let (input, output) = match (&args.input, &args.output) {
        (Some(input), Some(output)) => (input.clone(), output.clone()),
        _ => {
            error!("analyze requires --input and --output");
            return ExitCode::FAILURE;
        }
    };

    let mode = match args.parsed_mode() {
        Ok(mode) => mode,
        Err(message) => {
            error!("{message}");
            return ExitCode::FAILURE;
        }
    };
    let providers = match args.parsed_providers() {
        Ok(providers) => providers,
        Err(message) => {
            error!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let Some(runtime) = CliRuntime::detect().await else {
        let err = RunnerError::RuntimeUnavailable;
        error!("{err}");
        if let Some(hint) = err.troubleshooting() {
            warn!("{hint}");
        }
        return ExitCode::FAILURE;
    };

    let mut settings = ProviderSettings::from_env();
    settings.mode = mode;
    settings.context_lines = args.context_lines;
    settings.maven_settings = args.maven_settings.clone();
    settings.disable_maven_search = args.disable_maven_search;
    settings.jvm_max_mem = args.jvm_max_mem.clone();
    settings.proxy = proxy_from_env();

    let mut config = AnalyzeConfig::new(input, output);
    config.mode = mode;
    config.rules = args.rules.clone();
    config.providers = providers;
    config.enable_default_rulesets = args.enable_default_rulesets;
    config.analyze_known_libraries = args.analyze_known_libraries;
    config.label_selector = args.effective_label_selector();
    config.incident_selector = args.incident_selector.clone();
    config.jaeger_endpoint = args.jaeger_endpoint.clone();
    config.override_file = args.override_provider_settings.clone();
    config.json_output = args.json_output;
    config.overwrite = args.overwrite;
    config.bulk = args.bulk;
    config.skip_static_report = args.skip_static_report;
    config.no_cleanup = args.no_cleanup;
    config.no_progress = args.no_progress;

    let orchestrator = AnalyzeOrchestrator::new(
        Arc::new(runtime),
        Arc::new(DispatchEngine),
        Arc::new(YamlRuleParser),
        settings,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; unwinding");
            signal_cancel.cancel();
        }
    });

    match orchestrator.run(&cancel, config).await {
        Ok(report) => {
            info!(
                rule_sets = report.rule_sets.len(),
                violations = report
                    .rule_sets
                    .iter()
                    .map(|set| set.violations.len())
                    .sum::<usize>(),
                "analysis complete"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            if let Some(hint) = err.troubleshooting() {
                warn!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Scan the given rulesets for `source=`/`target=` labels and print the
/// unique technology names.
fn list_rule_labels(args: &AnalyzeArgs) -> ExitCode {
    if args.rules.is_empty() {
        error!("--list-sources/--list-targets need at least one --rules path");
        return ExitCode::FAILURE;
    }
    let prefix = if args.list_sources { "source=" } else { "target=" };
    let mut values = BTreeSet::new();
    for path in &args.rules {
        match YamlRuleParser.load(path) {
            Ok(loaded) => {
                for rule_set in &loaded.rule_sets {
                    collect_label_values(&rule_set.labels, prefix, &mut values);
                    for rule in &rule_set.rules {
                        collect_label_values(&rule.labels, prefix, &mut values);
                    }
                }
            }
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable ruleset"),
        }
    }
    for value in values {
        println!("{value}");
    }
    ExitCode::SUCCESS
}

fn collect_label_values(labels: &[String], prefix: &str, into: &mut BTreeSet<String>) {
    for label in labels {
        if let Some(value) = label.strip_prefix(prefix)
            && !value.is_empty()
        {
            into.insert(value.to_owned());
        }
    }
}

fn list_languages(args: &AnalyzeArgs) -> ExitCode {
    let Some(input) = &args.input else {
        error!("--list-languages needs --input");
        return ExitCode::FAILURE;
    };
    match language_census(input) {
        Ok(census) => {
            for (language, files) in census {
                println!("{language}: {files}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("failed to scan {}: {err}", input.display());
            ExitCode::FAILURE
        }
    }
}

/// Providers inherit the host proxy environment.
fn proxy_from_env() -> Option<Proxy> {
    let lookup = |upper: &str, lower: &str| {
        std::env::var(upper)
            .or_else(|_| std::env::var(lower))
            .ok()
            .filter(|value| !value.is_empty())
    };
    let proxy = Proxy {
        http_proxy: lookup("HTTP_PROXY", "http_proxy"),
        https_proxy: lookup("HTTPS_PROXY", "https_proxy"),
        no_proxy: lookup("NO_PROXY", "no_proxy"),
    };
    (proxy.http_proxy.is_some() || proxy.https_proxy.is_some()).then_some(proxy)
}
