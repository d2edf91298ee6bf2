use std::time::Duration;

use analyzer_framework_core::{
    constants::{READINESS_BACKOFF_CAP, READINESS_BACKOFF_START, READINESS_DIAL_TIMEOUT},
    provider::ProviderKind,
};
use futures::future::try_join_all;
use tokio::{
    net::TcpStream,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::ReadinessError;

/// Block until a TCP connection to the provider's port succeeds, backing off
/// exponentially between attempts. Each dial gets its own short timeout so a
/// slow accept cannot burn the whole budget.
pub async fn wait(
    cancel: &CancellationToken,
    kind: ProviderKind,
    port: u16,
    budget: Duration,
) -> Result<(), ReadinessError> {
    let address = format!("127.0.0.1:{port}");
    let deadline = Instant::now() + budget;
    let mut backoff = READINESS_BACKOFF_START;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ReadinessError::Cancelled);
        }
        attempts += 1;
        let dial = timeout(READINESS_DIAL_TIMEOUT, TcpStream::connect(&address));
        tokio::select! {
            result = dial => {
                if matches!(result, Ok(Ok(_))) {
                    info!(provider = %kind, address = %address, attempts, "provider ready");
                    return Ok(());
                }
            }
            () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
        }

        if Instant::now() + backoff >= deadline {
            debug!(provider = %kind, address = %address, attempts, "readiness budget exhausted");
            return Err(ReadinessError::Timeout {
                kind,
                address,
                timeout: budget,
            });
        }
        tokio::select! {
            () = sleep(backoff) => {}
            () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
        }
        backoff = (backoff * 2).min(READINESS_BACKOFF_CAP);
    }
}

/// Probe every provider in parallel; the first failure cancels the rest.
pub async fn wait_all(
    cancel: &CancellationToken,
    targets: &[(ProviderKind, u16)],
    budget: Duration,
) -> Result<(), ReadinessError> {
    let probe_cancel = cancel.child_token();
    let probes = targets.iter().map(|(kind, port)| {
        let probe_cancel = probe_cancel.clone();
        let (kind, port) = (*kind, *port);
        async move {
            let result = wait(&probe_cancel, kind, port, budget).await;
            if result.is_err() {
                probe_cancel.cancel();
            }
            result
        }
    });
    try_join_all(probes).await.map(|_| ())
}
