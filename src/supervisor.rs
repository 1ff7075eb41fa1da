use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;

/// One connection attempt, run until it fails or `cancel` fires.
///
/// Implementations return `Ok(())` when the attempt ended because of
/// cancellation; any `Err` is a failure the supervisor may replace.
#[async_trait::async_trait]
pub trait Worker: Send + Sync + 'static {
    async fn run(&self, id: u64, cancel: CancellationToken) -> Result<(), ConnectionError>;
}

/// Keeps a target number of [`Worker`] runs in flight.
///
/// With replacement on, every failed run is answered by a new one under a
/// fresh id until cancellation. With it off, the first failure cancels the
/// remaining runs and is returned.
pub struct Supervisor<W> {
    worker: Arc<W>,
    target: usize,
    replace: bool,
    grace: Duration,
    next_id: AtomicU64,
}

type Outcome = (u64, Result<(), ConnectionError>);

impl<W: Worker> Supervisor<W> {
    /// `target` below 1 is raised to 1.
    pub fn new(worker: W, target: usize) -> Self {
        Self {
            worker: Arc::new(worker),
            target: target.max(1),
            replace: false,
            grace: Duration::from_secs(5),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_replacement(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Bound on how long in-flight runs get to finish once stopping.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn target(&self) -> usize { self.target }

    /// Starts `target` runs and supervises them until `cancel` fires or, when
    /// not replacing, until the first failure.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConnectionError> {
        // fail-fast stops our runs without touching the caller's token
        let cancel = cancel.child_token();
        let mut set = JoinSet::new();
        for _ in 0..self.target {
            self.spawn(&mut set, &cancel);
        }
        tracing::info!(connections = self.target, replace = self.replace, "supervisor started");

        let mut failure = None;
        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            let Some((id, res)) = unwind(joined) else { continue };

            match res {
                Ok(()) => tracing::debug!(id, "connection finished"),
                Err(e) if self.replace => {
                    let replacement = self.spawn(&mut set, &cancel);
                    tracing::warn!(id, replacement, error = %e, "replacing failed connection");
                }
                Err(e) => {
                    tracing::error!(id, error = %e, "connection failed, stopping all connections");
                    failure = Some(e);
                    cancel.cancel();
                    break;
                }
            }
        }

        self.drain(set).await;
        failure.map_or(Ok(()), Err)
    }

    fn spawn(&self, set: &mut JoinSet<Outcome>, cancel: &CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::clone(&self.worker);
        let cancel = cancel.clone();
        set.spawn(async move { (id, worker.run(id, cancel).await) });
        id
    }

    async fn drain(&self, mut set: JoinSet<Outcome>) {
        let wait = async {
            while let Some(joined) = set.join_next().await {
                if let Some((id, Err(e))) = unwind(joined) {
                    tracing::debug!(id, error = %e, "connection ended during shutdown");
                }
            }
        };
        if tokio::time::timeout(self.grace, wait).await.is_err() {
            tracing::warn!(
                remaining = set.len(),
                grace_secs = self.grace.as_secs(),
                "connections did not finish in time, aborting"
            );
            set.abort_all();
        }
    }
}

/// Re-raises worker panics; aborted tasks yield nothing.
fn unwind(joined: Result<Outcome, JoinError>) -> Option<Outcome> {
    match joined {
        Ok(outcome) => Some(outcome),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => None,
    }
}
