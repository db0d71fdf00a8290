mod delivery;
mod engine;
mod service;
mod trigger;

#[cfg(test)]
mod tests;

pub use delivery::{CallWebhook, DEFAULT_BACKOFF, DEFAULT_RETRY, JobKwargs, SchedulerTask};
pub use engine::{
    CronEngine, EngineEvent, EngineEventKind, EngineLimits, ExecutionEngine, ExecutorKind, JobHandle, JobSpec,
};
pub use service::SchedulerService;
pub use trigger::{CronArgs, IntervalArgs, TriggerArgs, parse_cron_pattern};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::ledger::{NewTask, TaskLedger, TaskRecord, TaskStatus, TaskUpdate, Transition};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid cron pattern '{pattern}': {reason}")]
    InvalidCron { pattern: String, reason: String },
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("invalid webhook url '{0}': only http and https urls are accepted")]
    InvalidWebhookUrl(String),
    #[error("end_date must be later than start_date")]
    InvalidBounds,
    #[error("Failed to schedule job and insert into Task table")]
    Transaction,
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    pub cron_pattern: String,
    pub webhook_url: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub job_args: Value,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub retry: Option<u32>,
    pub backoff: Option<u32>,
    #[serde(default)]
    pub executor: ExecutorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub message: &'static str,
    pub job_id: String,
}

impl ScheduledJob {
    fn new(job_id: String) -> Self {
        Self {
            message: "Job scheduled successfully",
            job_id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryDefaults {
    pub retry: u32,
    pub backoff: u32,
}

impl Default for DeliveryDefaults {
    fn default() -> Self {
        Self {
            retry: DEFAULT_RETRY,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub kept: usize,
    pub restored: usize,
    pub removed: usize,
    pub failed: usize,
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, SchedulerError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(SchedulerError::MissingField(field))
}

fn validate_webhook_url(raw: &str) -> Result<(), SchedulerError> {
    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
        _ => Err(SchedulerError::InvalidWebhookUrl(raw.to_string())),
    }
}

/// Keeps the task ledger and the execution engine in agreement. Every job
/// the engine runs has a ledger row; the ledger wins after a restart.
pub struct Scheduler {
    engine: Arc<dyn ExecutionEngine>,
    ledger: TaskLedger,
    task: Arc<dyn SchedulerTask>,
    defaults: DeliveryDefaults,
}

impl Scheduler {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        ledger: TaskLedger,
        task: Arc<dyn SchedulerTask>,
        defaults: DeliveryDefaults,
    ) -> Self {
        Self {
            engine,
            ledger,
            task,
            defaults,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    /// Validates everything before touching the ledger or the engine.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledJob, SchedulerError> {
        let tenant_id = required(request.tenant_id.as_deref(), "tenant_id")?;
        let webhook_url = required(request.webhook_url.as_deref(), "webhook_url")?;
        validate_webhook_url(&webhook_url)?;
        let cron = parse_cron_pattern(&request.cron_pattern)?;
        if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
            if end <= start {
                return Err(SchedulerError::InvalidBounds);
            }
        }

        let trigger = TriggerArgs::Cron(cron);
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let next_run_time = trigger.next_fire_after(request.start_date.map_or(now, |start| start.max(now)));
        let kwargs = JobKwargs {
            webhook_url: Some(webhook_url.clone()),
            payload: request.payload.clone(),
            retry: request.retry.unwrap_or(self.defaults.retry),
            backoff: request.backoff.unwrap_or(self.defaults.backoff),
        };
        let task = NewTask {
            task_id: job_id.clone(),
            tenant_id: tenant_id.clone(),
            schedule: request.cron_pattern.trim().to_string(),
            status: TaskStatus::New,
            next_run_time,
            webhook_url,
            job_state: String::new(),
            payload: request.payload,
            job_args: request.job_args.clone(),
            start_date: request.start_date,
            end_date: request.end_date,
            retry: kwargs.retry,
            backoff: kwargs.backoff,
        };
        let spec = JobSpec {
            id: job_id.clone(),
            task: self.task.clone(),
            trigger,
            args: request.job_args,
            kwargs,
            start_date: request.start_date,
            end_date: request.end_date,
            executor: request.executor,
        };

        match self.insert_and_register(task, spec).await {
            Ok(handle) => {
                info!("Scheduled job {} for tenant {}: {}", job_id, tenant_id, handle.definition());
                Ok(ScheduledJob::new(job_id))
            }
            Err(e) => {
                error!("Failed to schedule job {} for tenant {}: {:#}", job_id, tenant_id, e);
                Err(SchedulerError::Transaction)
            }
        }
    }

    /// The ledger row is written first; the engine only sees the job once the
    /// row exists inside the open transaction.
    async fn insert_and_register(&self, mut task: NewTask, spec: JobSpec) -> Result<JobHandle> {
        task.job_state = serde_json::to_string(&spec.trigger)?;
        let tx = self.ledger.begin().await?;
        tx.insert_job(&task)?;
        let handle = self.engine.add_job(spec).await?;
        if let Err(e) = tx.commit() {
            if let Err(remove_err) = self.engine.remove_job(&task.task_id).await {
                warn!(
                    "Failed to withdraw job {} from the engine after a failed commit: {}",
                    task.task_id, remove_err
                );
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Engine first, then the ledger row is soft-deleted. A run already in
    /// flight finishes.
    pub async fn remove(&self, job_id: &str) -> Result<(), SchedulerError> {
        let removed = self.engine.remove_job(job_id).await?;
        let deleted = self.ledger.soft_delete_job(job_id).await?;
        if !removed && !deleted {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        info!("Removed job {}", job_id);
        Ok(())
    }

    pub async fn update(&self, job_id: &str, trigger: TriggerArgs) -> Result<JobHandle, SchedulerError> {
        if let TriggerArgs::Interval(interval) = &trigger {
            interval.validate()?;
        }
        if self.engine.get_job(job_id).await.is_none() {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        let handle = self.engine.reschedule_job(job_id, trigger.clone()).await?;
        self.ledger
            .update_job(
                job_id,
                TaskUpdate {
                    schedule: Some(trigger.to_string()),
                    next_run_time: Some(handle.next_run_time),
                    job_state: Some(serde_json::to_string(&trigger).map_err(anyhow::Error::from)?),
                    ..Default::default()
                },
            )
            .await?;
        info!("Rescheduled job {}: {}", job_id, handle.definition());
        Ok(handle)
    }

    pub async fn job(&self, job_id: &str) -> Result<Option<TaskRecord>> {
        self.ledger.get_task(job_id).await
    }

    pub async fn jobs(&self, tenant_id: &str) -> Result<Vec<TaskRecord>> {
        self.ledger.list_tasks(Some(tenant_id), false).await
    }

    async fn record(&self, job_id: &str, update: TaskUpdate) {
        let target = update.status;
        match self.ledger.transition(job_id, update).await {
            Ok(Transition::Applied) => {}
            Ok(Transition::Rejected(from)) => warn!(
                "Ignoring status change for job {}: {} -> {}",
                job_id,
                from.as_str(),
                target.map_or("?", TaskStatus::as_str)
            ),
            Ok(Transition::Missing) => debug!("No ledger row for job {}", job_id),
            Err(e) => error!("Failed to record status for job {}: {}", job_id, e),
        }
    }

    pub async fn handle_event(&self, event: EngineEvent) {
        let job_id = event.job_id.as_str();
        match event.kind {
            EngineEventKind::Added => {
                self.record(
                    job_id,
                    TaskUpdate {
                        status: Some(TaskStatus::Pending),
                        ..Default::default()
                    },
                )
                .await;
            }
            EngineEventKind::Submitted => {
                let next_run_time = self.engine.get_job(job_id).await.map(|job| job.next_run_time);
                self.record(
                    job_id,
                    TaskUpdate {
                        status: Some(TaskStatus::Running),
                        last_run_time: Some(Utc::now()),
                        next_run_time,
                        ..Default::default()
                    },
                )
                .await;
            }
            EngineEventKind::Executed(result) => {
                let Some(job) = self.engine.get_job(job_id).await else {
                    debug!("Job {} finished after it was removed; ignoring", job_id);
                    return;
                };
                info!("Job executed: {}", job.definition());
                let status = match result {
                    Some(value) => {
                        let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                        for line in rendered.lines() {
                            info!("  {}", line);
                        }
                        TaskStatus::Completed
                    }
                    None => {
                        warn!("Job {} finished without a result", job_id);
                        TaskStatus::Failed
                    }
                };
                self.record(
                    job_id,
                    TaskUpdate {
                        status: Some(status),
                        next_run_time: Some(job.next_run_time),
                        ..Default::default()
                    },
                )
                .await;
            }
            EngineEventKind::Error(message) => {
                error!("Job {} raised an error: {}", job_id, message);
                self.record(
                    job_id,
                    TaskUpdate {
                        status: Some(TaskStatus::Failed),
                        ..Default::default()
                    },
                )
                .await;
            }
            EngineEventKind::Missed => {
                let scheduled = event
                    .scheduled_time
                    .map_or_else(|| "unknown".to_string(), |ts| ts.to_rfc3339());
                warn!("Job {} missed its run scheduled at {}", job_id, scheduled);
            }
        }
    }

    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.engine.subscribe();
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => scheduler.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Scheduler event listener lagged; {} events dropped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Scheduler event listener stopped");
        })
    }

    /// Brings the engine in line with the ledger after a cold start.
    pub async fn restore_from_ledger(&self) -> Result<RestoreReport> {
        let rows = self.ledger.list_tasks(None, true).await?;
        let active: HashSet<&str> = rows.iter().map(|row| row.task_id.as_str()).collect();
        let mut report = RestoreReport::default();

        for job_id in self.engine.job_ids().await {
            if !active.contains(job_id.as_str()) {
                self.engine.remove_job(&job_id).await?;
                report.removed += 1;
            }
        }

        for row in &rows {
            if self.engine.get_job(&row.task_id).await.is_some() {
                report.kept += 1;
                continue;
            }
            match self.restore_job(row).await {
                Ok(handle) => {
                    self.ledger
                        .update_job(
                            &row.task_id,
                            TaskUpdate {
                                next_run_time: Some(handle.next_run_time),
                                ..Default::default()
                            },
                        )
                        .await?;
                    report.restored += 1;
                }
                Err(e) => {
                    warn!("Could not restore job {} from the ledger: {:#}", row.task_id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Scheduler restored from ledger: {} kept, {} restored, {} removed, {} failed",
            report.kept, report.restored, report.removed, report.failed
        );
        Ok(report)
    }

    async fn restore_job(&self, row: &TaskRecord) -> Result<JobHandle> {
        let stored = row
            .job_state
            .as_deref()
            .and_then(|state| serde_json::from_str::<TriggerArgs>(state).ok());
        let trigger = match stored {
            Some(trigger) => trigger,
            None => TriggerArgs::Cron(parse_cron_pattern(&row.schedule)?),
        };
        self.engine
            .add_job(JobSpec {
                id: row.task_id.clone(),
                task: self.task.clone(),
                trigger,
                args: row.job_args.clone(),
                kwargs: JobKwargs {
                    webhook_url: Some(row.webhook_url.clone()),
                    payload: row.payload.clone(),
                    retry: row.retry,
                    backoff: row.backoff,
                },
                start_date: row.start_date,
                end_date: row.end_date,
                executor: ExecutorKind::Default,
            })
            .await
    }
}
