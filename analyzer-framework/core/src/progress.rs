use std::fmt;

use tokio::sync::mpsc;

/// Phases a progress stream moves through; transitions are monotonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressStage {
    ProviderInit,
    RuleParsing,
    RuleExecution,
    Complete,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderInit => f.write_str("provider-init"),
            Self::RuleParsing => f.write_str("rule-parsing"),
            Self::RuleExecution => f.write_str("rule-execution"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// One progress update emitted by the engine or the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub current: u64,
    pub total: u64,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            stage,
            current,
            total,
            message: message.into(),
        }
    }
}

/// Receives progress events; implementations must never block the emitter.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink for scripted runs; events are discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _: ProgressEvent) {}
}

/// Bounded-channel sink feeding a renderer task. When the renderer falls
/// behind, events are dropped rather than stalling rule execution.
#[derive(Clone)]
pub struct ChannelProgress {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.try_send(event);
    }
}
