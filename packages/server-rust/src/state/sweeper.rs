//! Periodic purge of expired shared-state entries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::traits::SharedStateStore;
use crate::worker::BackgroundRunnable;

/// On-demand sweep request.
#[derive(Debug)]
pub enum SweepTask {
    Now,
}

/// [`BackgroundRunnable`] that purges expired entries on every tick.
pub struct ExpirySweeper {
    store: Arc<dyn SharedStateStore>,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStateStore>) -> Self {
        Self { store }
    }

    async fn sweep(&self) {
        let purged = self.store.purge_expired().await;
        if purged > 0 {
            debug!(purged, "expired shared-state entries purged");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ExpirySweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::Now => self.sweep().await,
        }
    }

    async fn on_tick(&mut self) {
        self.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::state::{Expiry, InMemorySharedState, StateKey};
    use crate::worker::BackgroundWorker;

    #[tokio::test]
    async fn submitted_sweep_purges_expired_entries() {
        let store = Arc::new(InMemorySharedState::new());
        store
            .put(
                &StateKey::new("ns", "p", "short"),
                json!(1),
                Expiry::After(Duration::from_millis(5)),
            )
            .await
            .unwrap();
        store
            .put(&StateKey::new("ns", "p", "long"), json!(1), Expiry::Never)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut worker =
            BackgroundWorker::start(ExpirySweeper::new(store.clone()), Duration::from_secs(60));
        worker.submit(SweepTask::Now).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.stop().await;

        assert_eq!(store.len(), 1);
    }
}
