use std::path::PathBuf;

use analyzer_framework_core::provider::{AnalysisMode, ProviderKind};
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "analyzer",
    about = "Static source analysis with containerized language providers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze application source code or a binary artifact.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Path to the application source tree or archive.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Directory the analysis artifacts are written to.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Source technology to match rules against; repeatable.
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Target technology to match rules against; repeatable.
    #[arg(long = "target")]
    pub targets: Vec<String>,

    /// Label selector expression forwarded to the engine.
    #[arg(long)]
    pub label_selector: Option<String>,

    /// Ruleset file or directory; repeatable.
    #[arg(long = "rules")]
    pub rules: Vec<PathBuf>,

    /// Analysis depth.
    #[arg(long, default_value = "full")]
    pub mode: String,

    /// Run the rulesets shipped in the runner image.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub enable_default_rulesets: bool,

    /// Include incidents inside known open-source libraries.
    #[arg(long)]
    pub analyze_known_libraries: bool,

    /// Number of source lines attached to each incident.
    #[arg(long, default_value_t = 10)]
    pub context_lines: usize,

    /// Incident selector expression forwarded to the engine.
    #[arg(long)]
    pub incident_selector: Option<String>,

    /// Maven settings file mounted into the java provider.
    #[arg(long)]
    pub maven_settings: Option<PathBuf>,

    /// JSON file overriding composed provider configs, matched by name.
    #[arg(long)]
    pub override_provider_settings: Option<PathBuf>,

    /// Jaeger collector endpoint forwarded to the engine.
    #[arg(long)]
    pub jaeger_endpoint: Option<String>,

    /// Replace the output directory if it exists.
    #[arg(long)]
    pub overwrite: bool,

    /// Allow writing into an existing output directory.
    #[arg(long)]
    pub bulk: bool,

    /// Skip preparing the static report directory.
    #[arg(long)]
    pub skip_static_report: bool,

    /// Additionally write output.json and dependencies.json.
    #[arg(long)]
    pub json_output: bool,

    /// Leave containers, volumes, and temp directories in place.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Disable the interactive progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// Run a specific provider instead of detecting from the input;
    /// repeatable.
    #[arg(long = "provider")]
    pub providers: Vec<String>,

    /// Maximum heap passed to the java provider's language server.
    #[arg(long)]
    pub jvm_max_mem: Option<String>,

    /// Disable maven central lookups in the java provider.
    #[arg(long)]
    pub disable_maven_search: bool,

    /// List source technologies found in the given rulesets and exit.
    #[arg(long)]
    pub list_sources: bool,

    /// List target technologies found in the given rulesets and exit.
    #[arg(long)]
    pub list_targets: bool,

    /// List supported providers and exit.
    #[arg(long)]
    pub list_providers: bool,

    /// List languages detected in the input and exit.
    #[arg(long)]
    pub list_languages: bool,
}

impl AnalyzeArgs {
    pub fn parsed_mode(&self) -> Result<AnalysisMode, String> {
        self.mode.parse::<AnalysisMode>().map_err(|err| err.to_string())
    }

    pub fn parsed_providers(&self) -> Result<Vec<ProviderKind>, String> {
        self.providers
            .iter()
            .map(|raw| raw.parse::<ProviderKind>().map_err(|err| err.to_string()))
            .collect()
    }

    /// Compose the label selector from --source/--target unless an explicit
    /// expression was given. The expression itself is parsed by the engine.
    pub fn effective_label_selector(&self) -> Option<String> {
        if self.label_selector.is_some() {
            return self.label_selector.clone();
        }
        let mut clauses = Vec::new();
        if !self.sources.is_empty() {
            let sources: Vec<String> = self
                .sources
                .iter()
                .map(|source| format!("source={source}"))
                .collect();
            clauses.push(format!("({})", sources.join(" || ")));
        }
        if !self.targets.is_empty() {
            let targets: Vec<String> = self
                .targets
                .iter()
                .map(|target| format!("target={target}"))
                .collect();
            clauses.push(format!("({})", targets.join(" || ")));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" && "))
        }
    }
}
