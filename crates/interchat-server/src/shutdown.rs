//! Process shutdown: stop accepting connections, end open sessions and wait
//! for them to leave the room.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Signals the listener and every open session to stop.
///
/// This is process lifecycle only: the room itself has no closing state and
/// stops once the last handle to it is dropped.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run one session, counting it as open from its first poll until it
    /// returns.
    pub async fn track_session<F: Future>(&self, session: F) -> F::Output {
        self.sessions.track_future(session).await
    }

    /// Sessions that have not finished yet.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Fire the token, then wait up to `timeout` for the listener task and
    /// every open session to finish. Returns `false` on timeout.
    pub async fn drain(&self, listener: JoinHandle<()>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.sessions.close();
        info!(open_sessions = self.open_sessions(), ?timeout, "draining sessions");

        let drained = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
            self.sessions.wait().await;
        };
        if tokio::time::timeout(timeout, drained).await.is_ok() {
            info!("all sessions closed");
            true
        } else {
            warn!(
                open_sessions = self.open_sessions(),
                ?timeout,
                "shutdown timed out with sessions still open"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_and_stays_fired() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_sessions_to_end() {
        let coord = std::sync::Arc::new(ShutdownCoordinator::new());
        let token = coord.token();
        let tracked = std::sync::Arc::clone(&coord);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let session = tokio::spawn(async move {
            tracked
                .track_session(async move {
                    let _ = started_tx.send(());
                    token.cancelled().await;
                })
                .await;
        });
        started_rx.await.unwrap();
        assert_eq!(coord.open_sessions(), 1);

        let listener = tokio::spawn(async {});
        assert!(coord.drain(listener, Duration::from_secs(1)).await);
        assert_eq!(coord.open_sessions(), 0);
        session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let stuck = coord.track_session(std::future::pending::<()>());
        tokio::pin!(stuck);
        let started = tokio::time::Instant::now();
        let listener = tokio::spawn(async {});

        tokio::select! {
            () = &mut stuck => unreachable!("pending never completes"),
            drained = coord.drain(listener, Duration::from_secs(2)) => assert!(!drained),
        }
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(coord.open_sessions(), 1);
    }
}
