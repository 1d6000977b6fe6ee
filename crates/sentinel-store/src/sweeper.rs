//! Background expiry sweeping.
//!
//! Expiry is lazy on the read paths; the sweeper is the complementary
//! background job that moves overdue approvals and sessions to `expired` so
//! listings and dashboards do not accumulate stale `pending`/`active` rows.
//! One worker task, a shutdown signal, and a `close` that joins cleanly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sentinel_core::Clock;

use crate::approval::ApprovalStore;
use crate::session::SessionStore;

/// Periodic expiry worker over the approval and (optionally) session stores.
pub struct ExpirySweeper {
    handle: tokio::sync::Mutex<Option<SweeperHandle>>,
}

struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Default sweep cadence.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Spawn the sweeper. Must run inside a tokio runtime; stop it with
    /// [`close`](Self::close).
    pub fn spawn(
        approvals: Arc<dyn ApprovalStore>,
        sessions: Option<Arc<dyn SessionStore>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = clock.now();
                        match approvals.expire_overdue(now).await {
                            Ok(0) => {}
                            Ok(n) => debug!(count = n, "expired overdue approvals"),
                            Err(e) => warn!(error = %e, "approval expiry sweep failed"),
                        }
                        if let Some(sessions) = &sessions {
                            match sessions.expire_overdue(now).await {
                                Ok(0) => {}
                                Ok(n) => debug!(count = n, "expired overdue sessions"),
                                Err(e) => warn!(error = %e, "session expiry sweep failed"),
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        Self {
            handle: tokio::sync::Mutex::new(Some(SweeperHandle { shutdown, task })),
        }
    }

    /// Stop the worker and wait for it to finish. Idempotent.
    pub async fn close(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
            debug!("expiry sweeper stopped");
        }
    }
}
