//! Background task marking silent sources unavailable.

use crate::Agent;
use observability_deps::tracing::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle on the staleness sweep task. Dropping it leaves the task
/// running; call [`stop`](Self::stop) for an orderly shutdown.
#[derive(Debug)]
pub struct StalenessMonitor {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl StalenessMonitor {
    /// Spawns a task that polls [`Agent::sweep_stale_sources`] every
    /// `poll_interval`. Must be called within a tokio runtime.
    pub fn spawn(agent: Arc<Agent>, poll_interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let stale = agent.sweep_stale_sources();
                        if stale > 0 {
                            debug!(stale, "staleness sweep marked sources unavailable");
                        }
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}
