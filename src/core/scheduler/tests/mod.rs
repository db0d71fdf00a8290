mod restore;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::core::ledger::TaskLedger;
use crate::core::scheduler::{
    DeliveryDefaults, EngineEvent, EngineEventKind, ExecutionEngine, JobHandle, JobKwargs, JobSpec, ScheduleRequest,
    Scheduler, SchedulerTask, TriggerArgs,
};

struct NoopTask;

#[async_trait]
impl SchedulerTask for NoopTask {
    fn name(&self) -> &str {
        "noop"
    }

    async fn job_func(&self, _args: Value, _kwargs: JobKwargs) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// In-memory engine that never fires on its own.
struct FakeEngine {
    jobs: Mutex<HashMap<String, JobHandle>>,
    reject_adds: AtomicBool,
    add_calls: AtomicUsize,
    events: broadcast::Sender<EngineEvent>,
}

impl FakeEngine {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            reject_adds: AtomicBool::new(false),
            add_calls: AtomicUsize::new(0),
            events,
        })
    }

    fn rejecting() -> Arc<Self> {
        let engine = Self::new();
        engine.reject_adds.store(true, Ordering::SeqCst);
        engine
    }

    fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    fn contains(&self, job_id: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(job_id)
    }

    fn trigger_of(&self, job_id: &str) -> Option<TriggerArgs> {
        self.jobs.lock().unwrap().get(job_id).map(|job| job.trigger.clone())
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn add_job(&self, spec: JobSpec) -> Result<JobHandle> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_adds.load(Ordering::SeqCst) {
            bail!("jobstore unavailable");
        }
        let handle = JobHandle {
            id: spec.id.clone(),
            next_run_time: spec.trigger.next_fire_after(Utc::now()),
            trigger: spec.trigger,
            executor: spec.executor,
        };
        self.jobs.lock().unwrap().insert(spec.id.clone(), handle.clone());
        let _ = self.events.send(EngineEvent {
            job_id: spec.id,
            kind: EngineEventKind::Added,
            scheduled_time: None,
        });
        Ok(handle)
    }

    async fn remove_job(&self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.lock().unwrap().remove(job_id).is_some())
    }

    async fn reschedule_job(&self, job_id: &str, trigger: TriggerArgs) -> Result<JobHandle> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            bail!("job {} is not registered", job_id);
        };
        job.next_run_time = trigger.next_fire_after(Utc::now());
        job.trigger = trigger;
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: &str) -> Option<JobHandle> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }

    async fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

async fn scheduler_with(engine: Arc<FakeEngine>) -> (Arc<Scheduler>, TaskLedger) {
    let ledger = TaskLedger::in_memory().await.unwrap();
    let scheduler = Scheduler::new(engine, ledger.clone(), Arc::new(NoopTask), DeliveryDefaults::default());
    (Arc::new(scheduler), ledger)
}

fn weekly_request() -> ScheduleRequest {
    ScheduleRequest {
        cron_pattern: "0 20 * * 1".into(),
        webhook_url: Some("https://hooks.example.com/weekly".into()),
        tenant_id: Some("acme".into()),
        payload: json!({ "report": "weekly" }),
        ..Default::default()
    }
}
