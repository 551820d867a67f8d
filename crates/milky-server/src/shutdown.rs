//! Stop signal for the server and a bounded wait for exit work.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once [`Self::shutdown`] is called.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Stop the server, then give `tasks` at most `limit` to finish.
    /// Returns false when the limit was hit.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, limit: Duration) -> bool {
        self.shutdown();
        let finished = tokio::time::timeout(limit, futures::future::join_all(tasks)).await.is_ok();
        if !finished {
            warn!(limit_secs = limit.as_secs(), "exit tasks still running at shutdown");
        }
        finished
    }
}
