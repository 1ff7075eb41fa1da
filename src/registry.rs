use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::{
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

/// Live server connections by id, mapped to the peer address.
///
/// The gauge is updated while the write lock is held, so a scrape never
/// sees a value that disagrees with the map.
pub struct Registry {
    conns: RwLock<HashMap<u64, String>>,
    metrics: Metrics,
}

impl Registry {
    #[must_use]
    pub fn new(metrics: Metrics) -> Self {
        metrics.set_active(0);
        Self {
            conns: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn insert(&self, id: u64, addr: impl Into<String>) {
        let mut conns = self.conns.write();
        conns.insert(id, addr.into());
        self.metrics.set_active(conns.len());
    }

    /// Returns the address the id was registered with.
    pub fn remove(&self, id: u64) -> Option<String> {
        let mut conns = self.conns.write();
        let addr = conns.remove(&id);
        self.metrics.set_active(conns.len());
        addr
    }

    #[must_use]
    pub fn len(&self) -> usize { self.conns.read().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.conns.read().is_empty() }

    /// Copy of the current entries, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(u64, String)> {
        let mut entries: Vec<_> = self
            .conns
            .read()
            .iter()
            .map(|(id, addr)| (*id, addr.clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics { &self.metrics }
}

/// Logs the connection count every `interval` until `cancel` fires.
pub fn spawn_reporter(
    registry: Arc<Registry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => tracing::info!(count = registry.len(), "active connections"),
                () = cancel.cancelled() => return,
            }
        }
    })
}
