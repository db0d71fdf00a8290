//! The `scheduler` tool: lets tenants manage their own webhook jobs through
//! the regular dispatch surface.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::ledger::TaskRecord;
use crate::core::scheduler::{IntervalArgs, ScheduleRequest, Scheduler, SchedulerError, TriggerArgs};
use crate::tools::action::{Action, ActionSpec, AuthContext, ExecutionMeta};
use crate::tools::descriptor::{ToolBuilder, ToolDescriptor};
use crate::tools::global;
use crate::tools::schema::{FieldSpec, FieldType, ParsedRequest};

pub const TOOL_NAME: &str = "scheduler";

fn meta_required(action: &str) -> Result<Value> {
    bail!("{} must be called with tenant execution metadata", action)
}

/// Active row of the calling tenant. Other tenants' jobs look missing.
async fn owned_job(scheduler: &Scheduler, job_id: &str, tenant_id: &str) -> Result<TaskRecord> {
    match scheduler.job(job_id).await? {
        Some(record) if record.tenant_id == tenant_id && record.is_active => Ok(record),
        _ => Err(SchedulerError::JobNotFound(job_id.to_string()).into()),
    }
}

fn job_id_field() -> FieldSpec {
    FieldSpec::required("job_id", FieldType::String).describe("Id returned by schedule_job")
}

pub struct ScheduleJob {
    spec: ActionSpec,
    scheduler: Arc<Scheduler>,
}

impl ScheduleJob {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let spec = ActionSpec::new("ScheduleJob", "Schedule a webhook job")
            .description("Calls the webhook with the payload every time the cron pattern fires")
            .tags(["jobs"])
            .request(vec![
                FieldSpec::required("cron_pattern", FieldType::String)
                    .describe("Five fields: minute hour day month day_of_week"),
                FieldSpec::required("webhook_url", FieldType::String),
                FieldSpec::optional("payload", FieldType::Any).describe("JSON body posted to the webhook"),
                FieldSpec::optional("job_args", FieldType::Any),
                FieldSpec::optional("start_date", FieldType::String).describe("RFC 3339 timestamp"),
                FieldSpec::optional("end_date", FieldType::String).describe("RFC 3339 timestamp"),
                FieldSpec::optional("retry", FieldType::Integer),
                FieldSpec::optional("backoff", FieldType::Integer),
                FieldSpec::optional(
                    "executor",
                    FieldType::Enum {
                        name: "Executor".into(),
                        variants: vec!["default".into(), "isolated".into()],
                    },
                )
                .with_default(json!("default")),
            ])
            .response(vec![
                FieldSpec::required("message", FieldType::String),
                FieldSpec::required("job_id", FieldType::String),
            ])
            .with_execution_metadata();
        Self { spec, scheduler }
    }
}

#[async_trait]
impl Action for ScheduleJob {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        meta_required("schedule_job")
    }

    async fn execute_with_meta_data(
        &self,
        request: ParsedRequest,
        _auth: &AuthContext,
        meta: &ExecutionMeta,
    ) -> Result<Value> {
        let mut schedule: ScheduleRequest = request.deserialize()?;
        schedule.tenant_id = Some(meta.tenant_id.clone());
        let scheduled = self.scheduler.schedule(schedule).await?;
        Ok(serde_json::to_value(scheduled)?)
    }
}

#[derive(Debug, Deserialize)]
struct UpdateJobRequest {
    job_id: String,
    #[serde(flatten)]
    interval: IntervalArgs,
}

pub struct UpdateJob {
    spec: ActionSpec,
    scheduler: Arc<Scheduler>,
}

impl UpdateJob {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let mut request = vec![job_id_field()];
        for unit in ["weeks", "days", "hours", "minutes", "seconds"] {
            request.push(FieldSpec::optional(unit, FieldType::Integer).with_default(json!(0)));
        }
        let spec = ActionSpec::new("UpdateJob", "Reschedule a job")
            .description("Switches a job to a fixed interval")
            .tags(["jobs"])
            .request(request)
            .response(vec![
                FieldSpec::required("message", FieldType::String),
                FieldSpec::required("job_id", FieldType::String),
                FieldSpec::optional("next_run_time", FieldType::String),
            ])
            .with_execution_metadata();
        Self { spec, scheduler }
    }
}

#[async_trait]
impl Action for UpdateJob {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        meta_required("update_job")
    }

    async fn execute_with_meta_data(
        &self,
        request: ParsedRequest,
        _auth: &AuthContext,
        meta: &ExecutionMeta,
    ) -> Result<Value> {
        let update: UpdateJobRequest = request.deserialize()?;
        owned_job(&self.scheduler, &update.job_id, &meta.tenant_id).await?;
        let handle = self
            .scheduler
            .update(&update.job_id, TriggerArgs::Interval(update.interval))
            .await?;
        Ok(json!({
            "message": "Job updated successfully",
            "job_id": handle.id,
            "next_run_time": handle.next_run_time.map(|t| t.to_rfc3339()),
        }))
    }
}

pub struct DeleteJob {
    spec: ActionSpec,
    scheduler: Arc<Scheduler>,
}

impl DeleteJob {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let spec = ActionSpec::new("DeleteJob", "Delete a job")
            .tags(["jobs"])
            .request(vec![job_id_field()])
            .response(vec![
                FieldSpec::required("message", FieldType::String),
                FieldSpec::required("job_id", FieldType::String),
            ])
            .with_execution_metadata();
        Self { spec, scheduler }
    }
}

#[async_trait]
impl Action for DeleteJob {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        meta_required("delete_job")
    }

    async fn execute_with_meta_data(
        &self,
        request: ParsedRequest,
        _auth: &AuthContext,
        meta: &ExecutionMeta,
    ) -> Result<Value> {
        let job_id = request.str("job_id").unwrap_or_default().to_string();
        owned_job(&self.scheduler, &job_id, &meta.tenant_id).await?;
        self.scheduler.remove(&job_id).await?;
        Ok(json!({ "message": "Job deleted successfully", "job_id": job_id }))
    }
}

pub struct ListJobs {
    spec: ActionSpec,
    scheduler: Arc<Scheduler>,
}

impl ListJobs {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let spec = ActionSpec::new("ListJobs", "List jobs")
            .tags(["jobs"])
            .request(vec![
                FieldSpec::optional("active_only", FieldType::Boolean).with_default(json!(true)),
            ])
            .response(vec![FieldSpec::required(
                "jobs",
                FieldType::Array(Box::new(FieldType::Object)),
            )])
            .with_execution_metadata();
        Self { spec, scheduler }
    }
}

#[async_trait]
impl Action for ListJobs {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn execute(&self, _request: ParsedRequest, _auth: &AuthContext) -> Result<Value> {
        meta_required("list_jobs")
    }

    async fn execute_with_meta_data(
        &self,
        request: ParsedRequest,
        _auth: &AuthContext,
        meta: &ExecutionMeta,
    ) -> Result<Value> {
        let active_only = request.get("active_only").and_then(Value::as_bool).unwrap_or(true);
        let jobs: Vec<TaskRecord> = self
            .scheduler
            .jobs(&meta.tenant_id)
            .await?
            .into_iter()
            .filter(|job| job.is_active || !active_only)
            .collect();
        Ok(json!({ "jobs": jobs }))
    }
}

pub fn builder(scheduler: Arc<Scheduler>) -> ToolBuilder {
    let mut globals = BTreeMap::new();
    globals.insert(global::GET_TOOL_DESCRIPTION.to_string(), true);
    globals.insert(global::LIST_ALL_ACTIONS.to_string(), true);

    ToolDescriptor::builder(TOOL_NAME)
        .description("Schedule recurring webhook calls")
        .version(env!("CARGO_PKG_VERSION"))
        .action(Arc::new(ScheduleJob::new(scheduler.clone())))
        .action(Arc::new(UpdateJob::new(scheduler.clone())))
        .action(Arc::new(DeleteJob::new(scheduler.clone())))
        .action(Arc::new(ListJobs::new(scheduler)))
        .global_actions(global::enabled(&globals))
}
