//! Cooperative cancellation plumbing.
//!
//! Producers flip `cancel_requested` on a workflow run; consumers observe
//! it three ways: a pre-start check, the periodic poll implemented here,
//! and the [`CancellationToken`] handed to in-flight LLM calls.
//! Cancellation never travels as an exception across task boundaries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dealflow_core::{TenantId, WorkflowRunId};
use dealflow_store::DealStore;

/// Default poll interval for the cancel flag.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls a run's `cancel_requested` flag and trips a token when it is set.
///
/// The watcher owns a background task; [`CancelWatcher::stop`] (or drop)
/// aborts it. Trip-once: after the token is cancelled the poll loop exits
/// on its own.
#[derive(Debug)]
pub struct CancelWatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CancelWatcher {
    /// Spawns a watcher for the given run.
    ///
    /// A store error during polling is logged and the poll retried on the
    /// next tick; the watcher never trips the token on read failures.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn DealStore>,
        tenant_id: TenantId,
        run_id: WorkflowRunId,
        interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let poll_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match store.cancel_requested(tenant_id, run_id).await {
                    Ok(true) => {
                        tracing::info!(run_id = %run_id, "cancel requested, tripping token");
                        poll_token.cancel();
                        return;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(run_id = %run_id, %error, "cancel poll failed");
                    }
                }
            }
        });

        Self { token, handle }
    }

    /// Returns the shared token to pass into cancellable calls.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns true once cancellation has been observed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the poller.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for CancelWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
