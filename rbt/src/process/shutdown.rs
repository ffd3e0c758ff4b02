//! SIGINT/SIGTERM handling for backup runs.
//!
//! A signal cancels the shared token; the running rsync child is killed and
//! the job unwinds normally, which releases its lock.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token observed by long-running work.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that cancels the token on SIGINT or SIGTERM.
    pub fn listen(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            token.cancel();
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), aborting current backup");
        }
        _ = terminate => {
            info!("Received SIGTERM, aborting current backup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_is_shared() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        let listener = coordinator.listen();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        coordinator.token.cancel();
        handle.await.unwrap();
        listener.abort();
    }
}
