use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, broadcast};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::delivery::{JobKwargs, SchedulerTask};
use super::trigger::TriggerArgs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Default,
    /// Runs on a dedicated blocking thread, away from the shared workers.
    Isolated,
}

#[derive(Debug, Clone)]
pub struct EngineLimits {
    pub default_workers: usize,
    pub isolated_workers: usize,
    pub max_instances: usize,
    pub misfire_grace: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            default_workers: 20,
            isolated_workers: 5,
            max_instances: 3,
            misfire_grace: Duration::from_secs(5),
        }
    }
}

pub struct JobSpec {
    pub id: String,
    pub task: Arc<dyn SchedulerTask>,
    pub trigger: TriggerArgs,
    pub args: Value,
    pub kwargs: JobKwargs,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub executor: ExecutorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: String,
    pub trigger: TriggerArgs,
    pub next_run_time: Option<DateTime<Utc>>,
    pub executor: ExecutorKind,
}

impl JobHandle {
    pub fn definition(&self) -> String {
        match self.next_run_time {
            Some(next) => format!(
                "{} (trigger: {}, next run at: {})",
                self.id,
                self.trigger,
                next.to_rfc3339()
            ),
            None => format!("{} (trigger: {}, no further runs)", self.id, self.trigger),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    Added,
    Submitted,
    Executed(Option<Value>),
    Error(String),
    Missed,
}

#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub job_id: String,
    pub kind: EngineEventKind,
    pub scheduled_time: Option<DateTime<Utc>>,
}

/// Runs registered jobs on their triggers and reports what happened to them.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
    async fn add_job(&self, spec: JobSpec) -> Result<JobHandle>;
    /// `Ok(false)` when no such job was registered.
    async fn remove_job(&self, job_id: &str) -> Result<bool>;
    async fn reschedule_job(&self, job_id: &str, trigger: TriggerArgs) -> Result<JobHandle>;
    async fn get_job(&self, job_id: &str) -> Option<JobHandle>;
    async fn job_ids(&self) -> Vec<String>;
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

struct JobRun {
    id: String,
    task: Arc<dyn SchedulerTask>,
    trigger: TriggerArgs,
    args: Value,
    kwargs: JobKwargs,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    executor: ExecutorKind,
    next_run: Mutex<Option<DateTime<Utc>>>,
    instances: Arc<Semaphore>,
    pool: Arc<Semaphore>,
    misfire_grace: ChronoDuration,
    events: broadcast::Sender<EngineEvent>,
}

impl JobRun {
    fn first_run(trigger: &TriggerArgs, start_date: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        trigger.next_fire_after(start_date.map_or(now, |start| start.max(now)))
    }

    fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id.clone(),
            trigger: self.trigger.clone(),
            next_run_time: *self.next_run.lock().unwrap_or_else(PoisonError::into_inner),
            executor: self.executor,
        }
    }

    /// Same job, new trigger. The instance cap is shared with the old run.
    fn with_trigger(&self, trigger: TriggerArgs) -> Self {
        Self {
            id: self.id.clone(),
            task: self.task.clone(),
            next_run: Mutex::new(Self::first_run(&trigger, self.start_date)),
            trigger,
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            executor: self.executor,
            instances: self.instances.clone(),
            pool: self.pool.clone(),
            misfire_grace: self.misfire_grace,
            events: self.events.clone(),
        }
    }

    fn emit(&self, kind: EngineEventKind, scheduled_time: Option<DateTime<Utc>>) {
        // No subscribers is not an error for the engine.
        let _ = self.events.send(EngineEvent {
            job_id: self.id.clone(),
            kind,
            scheduled_time,
        });
    }

    fn tick(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.fire(Utc::now()).await;
        })
    }

    async fn fire(&self, now: DateTime<Utc>) {
        // next_run keeps pointing at the first run inside the window.
        if self.start_date.is_some_and(|start| now < start) {
            debug!("Job {} fired before its start date; skipping", self.id);
            return;
        }
        if self.end_date.is_some_and(|end| now > end) {
            *self.next_run.lock().unwrap_or_else(PoisonError::into_inner) = None;
            debug!("Job {} fired after its end date; skipping", self.id);
            return;
        }

        let scheduled = {
            let mut next = self.next_run.lock().unwrap_or_else(PoisonError::into_inner);
            let scheduled = next.unwrap_or(now);
            *next = self
                .trigger
                .next_fire_after(scheduled.max(now))
                .filter(|upcoming| self.end_date.is_none_or(|end| *upcoming <= end));
            scheduled
        };

        if now - scheduled > self.misfire_grace {
            self.emit(EngineEventKind::Missed, Some(scheduled));
            return;
        }

        let Ok(_instance) = self.instances.clone().try_acquire_owned() else {
            warn!(
                "Execution of job {} skipped: maximum number of running instances reached",
                self.id
            );
            return;
        };
        let Ok(_worker) = self.pool.clone().acquire_owned().await else {
            warn!("Worker pool closed; job {} not run", self.id);
            return;
        };

        self.emit(EngineEventKind::Submitted, Some(scheduled));
        let task = self.task.clone();
        let args = self.args.clone();
        let kwargs = self.kwargs.clone();
        let outcome = match self.executor {
            ExecutorKind::Default => tokio::spawn(async move { task.job_func(args, kwargs).await }).await,
            ExecutorKind::Isolated => {
                let runtime = tokio::runtime::Handle::current();
                tokio::task::spawn_blocking(move || runtime.block_on(task.job_func(args, kwargs))).await
            }
        };
        let kind = match outcome {
            Ok(Ok(result)) => EngineEventKind::Executed(result),
            Ok(Err(e)) => EngineEventKind::Error(format!("{:#}", e)),
            Err(join_error) => EngineEventKind::Error(join_error.to_string()),
        };
        self.emit(kind, Some(scheduled));
    }
}

struct EngineJob {
    engine_id: Uuid,
    run: Arc<JobRun>,
}

/// [`ExecutionEngine`] on top of `tokio-cron-scheduler`, with two bounded
/// worker pools and a per-job instance cap.
pub struct CronEngine {
    scheduler: JobScheduler,
    jobs: RwLock<HashMap<String, EngineJob>>,
    events: broadcast::Sender<EngineEvent>,
    default_pool: Arc<Semaphore>,
    isolated_pool: Arc<Semaphore>,
    limits: EngineLimits,
}

impl CronEngine {
    pub async fn new(limits: EngineLimits) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            scheduler,
            jobs: RwLock::new(HashMap::new()),
            events,
            default_pool: Arc::new(Semaphore::new(limits.default_workers.max(1))),
            isolated_pool: Arc::new(Semaphore::new(limits.isolated_workers.max(1))),
            limits,
        })
    }

    fn pool_for(&self, executor: ExecutorKind) -> Arc<Semaphore> {
        match executor {
            ExecutorKind::Default => self.default_pool.clone(),
            ExecutorKind::Isolated => self.isolated_pool.clone(),
        }
    }

    fn misfire_grace(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.limits.misfire_grace).unwrap_or_else(|_| ChronoDuration::seconds(5))
    }

    async fn register(&self, run: &Arc<JobRun>) -> Result<Uuid> {
        let runner = run.clone();
        let job = match &run.trigger {
            TriggerArgs::Cron(args) => {
                Job::new_async(args.engine_expression().as_str(), move |_uuid, _l| runner.clone().tick())?
            }
            TriggerArgs::Interval(args) => {
                let period = args.validate()?;
                Job::new_repeated_async(period, move |_uuid, _l| runner.clone().tick())?
            }
        };
        Ok(self.scheduler.add(job).await?)
    }
}

#[async_trait]
impl ExecutionEngine for CronEngine {
    async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!(
            "Execution engine started ({} default workers, {} isolated workers)",
            self.limits.default_workers, self.limits.isolated_workers
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        info!("Execution engine stopped");
        Ok(())
    }

    async fn add_job(&self, spec: JobSpec) -> Result<JobHandle> {
        if self.jobs.read().await.contains_key(&spec.id) {
            bail!("job {} is already registered", spec.id);
        }
        let run = Arc::new(JobRun {
            next_run: Mutex::new(JobRun::first_run(&spec.trigger, spec.start_date)),
            id: spec.id,
            task: spec.task,
            trigger: spec.trigger,
            args: spec.args,
            kwargs: spec.kwargs,
            start_date: spec.start_date,
            end_date: spec.end_date,
            executor: spec.executor,
            instances: Arc::new(Semaphore::new(self.limits.max_instances.max(1))),
            pool: self.pool_for(spec.executor),
            misfire_grace: self.misfire_grace(),
            events: self.events.clone(),
        });
        let engine_id = self.register(&run).await?;
        let handle = run.handle();
        self.jobs.write().await.insert(
            handle.id.clone(),
            EngineJob {
                engine_id,
                run: run.clone(),
            },
        );
        run.emit(EngineEventKind::Added, None);
        Ok(handle)
    }

    async fn remove_job(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get(job_id) else {
            return Ok(false);
        };
        self.scheduler.remove(&job.engine_id).await?;
        jobs.remove(job_id);
        Ok(true)
    }

    async fn reschedule_job(&self, job_id: &str, trigger: TriggerArgs) -> Result<JobHandle> {
        let mut jobs = self.jobs.write().await;
        let Some(current) = jobs.get(job_id) else {
            bail!("job {} is not registered", job_id);
        };
        let run = Arc::new(current.run.with_trigger(trigger));
        let engine_id = self.register(&run).await?;
        let previous = current.engine_id;
        jobs.insert(job_id.to_string(), EngineJob { engine_id, run: run.clone() });
        self.scheduler.remove(&previous).await?;
        Ok(run.handle())
    }

    async fn get_job(&self, job_id: &str) -> Option<JobHandle> {
        self.jobs.read().await.get(job_id).map(|job| job.run.handle())
    }

    async fn job_ids(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
