use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::scheduler::ExecutionEngine;

#[derive(Debug, PartialEq)]
pub enum LifecycleState {
    Init,
    RestoreSchedules,
    Serve,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    /// Runs after every component is initialized and before any starts serving.
    async fn on_restore(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<Mutex<dyn LifecycleComponent + Send + Sync>>>,
    engine: Arc<dyn ExecutionEngine>,
}

impl LifecycleManager {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            engine,
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Components start in attach order.
    pub fn attach(&mut self, component: Arc<Mutex<dyn LifecycleComponent + Send + Sync>>) {
        self.components.push(component);
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        info!("Lifecycle Phase: Restore Schedules");
        self.state = LifecycleState::RestoreSchedules;
        for comp in &self.components {
            comp.lock().await.on_restore().await?;
        }

        info!("Lifecycle Phase: Serve");
        self.state = LifecycleState::Serve;
        for comp in &self.components {
            comp.lock().await.on_start().await?;
        }

        info!("Lifecycle Phase: Ready (Starting Execution Engine)");
        self.engine.start().await?;
        self.state = LifecycleState::Ready;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        if let Err(e) = self.engine.shutdown().await {
            warn!("Execution engine shutdown error: {}", e);
        }
        for comp in self.components.iter().rev() {
            if let Err(e) = comp.lock().await.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::{EngineEvent, JobHandle, JobSpec, TriggerArgs};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;

    struct Recorder {
        name: &'static str,
        journal: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Recorder {
        async fn on_init(&mut self) -> Result<()> {
            self.journal.lock().unwrap().push(format!("{}:init", self.name));
            Ok(())
        }
        async fn on_restore(&mut self) -> Result<()> {
            self.journal.lock().unwrap().push(format!("{}:restore", self.name));
            Ok(())
        }
        async fn on_start(&mut self) -> Result<()> {
            self.journal.lock().unwrap().push(format!("{}:start", self.name));
            Ok(())
        }
        async fn on_shutdown(&mut self) -> Result<()> {
            self.journal.lock().unwrap().push(format!("{}:shutdown", self.name));
            Ok(())
        }
    }

    struct IdleEngine {
        journal: Arc<StdMutex<Vec<String>>>,
        events: broadcast::Sender<EngineEvent>,
    }

    #[async_trait::async_trait]
    impl ExecutionEngine for IdleEngine {
        async fn start(&self) -> Result<()> {
            self.journal.lock().unwrap().push("engine:start".into());
            Ok(())
        }
        async fn shutdown(&self) -> Result<()> {
            self.journal.lock().unwrap().push("engine:shutdown".into());
            Ok(())
        }
        async fn add_job(&self, _spec: JobSpec) -> Result<JobHandle> {
            anyhow::bail!("not supported")
        }
        async fn remove_job(&self, _job_id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn reschedule_job(&self, _job_id: &str, _trigger: TriggerArgs) -> Result<JobHandle> {
            anyhow::bail!("not supported")
        }
        async fn get_job(&self, _job_id: &str) -> Option<JobHandle> {
            None
        }
        async fn job_ids(&self) -> Vec<String> {
            Vec::new()
        }
        fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
            self.events.subscribe()
        }
    }

    #[tokio::test]
    async fn components_run_in_phase_order() {
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let (events, _) = broadcast::channel(1);
        let mut manager = LifecycleManager::new(Arc::new(IdleEngine {
            journal: journal.clone(),
            events,
        }));
        for name in ["scheduler", "api"] {
            manager.attach(Arc::new(Mutex::new(Recorder {
                name,
                journal: journal.clone(),
            })));
        }

        manager.start().await.unwrap();
        assert_eq!(manager.state(), &LifecycleState::Ready);
        manager.shutdown().await.unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "scheduler:init",
                "api:init",
                "scheduler:restore",
                "api:restore",
                "scheduler:start",
                "api:start",
                "engine:start",
                "engine:shutdown",
                "api:shutdown",
                "scheduler:shutdown",
            ]
        );
    }
}
