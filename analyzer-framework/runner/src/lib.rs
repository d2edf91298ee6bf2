pub mod cleanup;
pub mod deps;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod orchestrator;
pub mod output;
pub mod parser;
pub mod progress;
pub mod readiness;
pub mod rulesets;
pub mod runtime;
pub mod startup;
pub mod supervisor;

pub use cleanup::CleanupCoordinator;
pub use driver::{AnalysisDriver, AnalysisReport, DriverInputs};
pub use engine::DispatchEngine;
pub use errors::{
    LoadError, OutputError, ReadinessError, RunnerError, StartupError, ValidationError,
};
pub use orchestrator::{AnalyzeConfig, AnalyzeOrchestrator, PROVIDER_LOG, STATIC_REPORT_DIR};
pub use parser::YamlRuleParser;
pub use runtime::{CliRuntime, ContainerRuntime, RunSpec, RuntimeError, VolumeRecord};
pub use supervisor::{ContainerSupervisor, SourceMount};
