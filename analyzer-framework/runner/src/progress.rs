use std::io::Write as _;

use analyzer_framework_core::progress::{ProgressEvent, ProgressStage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Rendering arithmetic for the progress line, kept free of I/O.
///
/// Rule-execution totals accumulate across rulesets: when `total` changes
/// mid-stream the previous ruleset's total folds into a completed counter so
/// the overall percentage keeps climbing monotonically.
#[derive(Debug, Default)]
struct BarState {
    past_init: bool,
    suppress_next_execution: bool,
    completed_previous: u64,
    ruleset_total: u64,
}

impl BarState {
    /// Returns the line to render, or `None` when the event is dropped.
    fn line_for(&mut self, event: &ProgressEvent) -> Option<String> {
        if event.total == 0 && self.past_init && event.stage != ProgressStage::Complete {
            return None;
        }
        match event.stage {
            ProgressStage::ProviderInit => {
                Some(format!(
                    "initializing providers {}/{}",
                    event.current, event.total
                ))
            }
            ProgressStage::RuleParsing => {
                self.past_init = true;
                if event.current == event.total {
                    // The first execution event lands right behind this
                    // banner; rendering both stutters.
                    self.suppress_next_execution = true;
                    Some(format!("rules loaded from {} path(s)", event.total))
                } else {
                    Some(format!(
                        "loading rules {}/{}",
                        event.current, event.total
                    ))
                }
            }
            ProgressStage::RuleExecution => {
                self.past_init = true;
                if self.ruleset_total != event.total {
                    self.completed_previous += self.ruleset_total;
                    self.ruleset_total = event.total;
                }
                if self.suppress_next_execution {
                    self.suppress_next_execution = false;
                    return None;
                }
                let overall = self.completed_previous + event.current;
                let cumulative = self.completed_previous + self.ruleset_total;
                let percent = if cumulative == 0 {
                    0
                } else {
                    overall * 100 / cumulative
                };
                Some(format!(
                    "evaluating rules {overall}/{cumulative} ({percent}%)"
                ))
            }
            ProgressStage::Complete => Some("analysis complete".to_owned()),
        }
    }
}

/// Consumes progress events from a bounded channel and redraws a single
/// carriage-return line on stderr. The cursor is hidden while the bar is
/// live and restored on shutdown.
pub struct BarReporter {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl BarReporter {
    pub fn spawn(mut receiver: mpsc::Receiver<ProgressEvent>) -> Self {
        let cancel = CancellationToken::new();
        let render_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut state = BarState::default();
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{HIDE_CURSOR}");
            loop {
                let event = tokio::select! {
                    event = receiver.recv() => event,
                    () = render_cancel.cancelled() => None,
                };
                let Some(event) = event else {
                    break;
                };
                let done = event.stage == ProgressStage::Complete;
                if let Some(line) = state.line_for(&event) {
                    let _ = write!(stderr, "{CLEAR_LINE}{line}");
                    if done {
                        let _ = writeln!(stderr);
                    }
                    let _ = stderr.flush();
                }
                if done {
                    break;
                }
            }
            let _ = write!(stderr, "{SHOW_CURSOR}");
            let _ = stderr.flush();
        });
        Self { cancel, handle }
    }

    /// Tear the renderer down ahead of the run's shared token and join it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            debug!(error = %err, "progress renderer did not shut down cleanly");
        }
    }
}
