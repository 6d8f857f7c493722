//! Graceful shutdown coordination.
//!
//! On SIGTERM/SIGINT the gateway stops admitting new work, waits up to the
//! grace period for in-flight requests to finish, unloads the provider and
//! exits. Readiness reports not-ready as soon as the stopping phase begins.

use crate::queue::TranslationQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default grace period for draining in-flight requests.
pub const DEFAULT_GRACE_SECS: u64 = 120;

/// Interval between drain polls.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shutdown lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Running,
    Stopping,
    Stopped,
}

/// Process-wide shutdown state.
pub struct ShutdownCoordinator {
    phase: AtomicU8,
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            phase: AtomicU8::new(Phase::Running as u8),
            token: CancellationToken::new(),
            grace: Duration::from_secs(grace_secs),
        })
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::SeqCst) {
            0 => Phase::Running,
            1 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }

    /// Gate for admissions and readiness.
    pub fn is_shutting_down(&self) -> bool {
        self.phase() != Phase::Running
    }

    /// Token the HTTP server's graceful-shutdown future waits on.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Enter the stopping phase and wake the server shutdown future.
    /// Idempotent; only the first call has any effect.
    pub fn begin(&self) {
        if self
            .phase
            .compare_exchange(
                Phase::Running as u8,
                Phase::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            warn!("shutdown already in progress");
            return;
        }
        info!("graceful shutdown started (grace: {:?})", self.grace);
        self.token.cancel();
    }

    /// Wait for in-flight requests to finish, up to the grace period.
    /// Returns `true` when the queue drained in time.
    pub async fn drain(&self, queue: &TranslationQueue) -> bool {
        let deadline = Instant::now() + self.grace;
        loop {
            let active = queue.active_count();
            if active == 0 {
                info!("all in-flight requests completed");
                return true;
            }
            if Instant::now() >= deadline {
                warn!("grace period elapsed with {active} requests still in flight");
                return false;
            }
            info!("waiting for {active} in-flight requests");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Mark the process stopped.
    pub fn finish(&self) {
        self.phase.store(Phase::Stopped as u8, Ordering::SeqCst);
        info!("graceful shutdown complete");
    }
}

/// Resolve when the process receives SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            r = tokio::signal::ctrl_c() => {
                if r.is_ok() {
                    info!("received SIGINT");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_is_idempotent_and_cancels_token() {
        let coordinator = ShutdownCoordinator::new(1);
        let token = coordinator.cancellation_token();
        assert_eq!(coordinator.phase(), Phase::Running);
        assert!(!coordinator.is_shutting_down());

        coordinator.begin();
        coordinator.begin();
        assert_eq!(coordinator.phase(), Phase::Stopping);
        assert!(coordinator.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_idle() {
        let coordinator = ShutdownCoordinator::new(60);
        let queue = TranslationQueue::new(2, 2);
        assert!(coordinator.drain(&queue).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace_period() {
        let coordinator = ShutdownCoordinator::new(2);
        let queue = TranslationQueue::new(2, 2);
        queue.acquire_slot("stuck");
        assert!(!coordinator.drain(&queue).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_observes_late_releases() {
        let coordinator = ShutdownCoordinator::new(30);
        let queue = Arc::new(TranslationQueue::new(2, 2));
        queue.acquire_slot("slow");

        let release_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            release_queue.release_slot("slow");
        });

        assert!(coordinator.drain(&queue).await);
    }

    #[tokio::test]
    async fn finish_moves_to_stopped() {
        let coordinator = ShutdownCoordinator::new(1);
        coordinator.begin();
        coordinator.finish();
        assert_eq!(coordinator.phase(), Phase::Stopped);
        assert!(coordinator.is_shutting_down());
    }
}
