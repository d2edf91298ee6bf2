pub mod constants;
pub mod engine;
pub mod progress;
pub mod provider;
pub mod rules;

pub use engine::{EngineError, EngineOptions, LoadedRules, ParseError, RuleEngine, RuleParser};
pub use progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink, ProgressStage};
pub use provider::{
    AnalysisMode, ConditionByCapability, EvaluationResponse, InitConfig, ProviderClient,
    ProviderClientError, ProviderConfig, ProviderKind, Proxy,
};
pub use rules::{Dependency, FlatDependency, Incident, Rule, RuleSet, Violation};
