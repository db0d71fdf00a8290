use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use super::Scheduler;
use crate::core::lifecycle::LifecycleComponent;

/// Lifecycle wrapper: listens to engine events and reconciles the engine
/// with the ledger before anything else starts.
pub struct SchedulerService {
    scheduler: Arc<Scheduler>,
    listener: Option<JoinHandle<()>>,
}

impl SchedulerService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            listener: None,
        }
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for SchedulerService {
    async fn on_init(&mut self) -> Result<()> {
        self.listener = Some(self.scheduler.spawn_event_listener());
        Ok(())
    }

    async fn on_restore(&mut self) -> Result<()> {
        self.scheduler.restore_from_ledger().await?;
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            info!("Scheduler event listener stopped");
        }
        Ok(())
    }
}
