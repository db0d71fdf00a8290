use serde_json::{Value, json};
use std::sync::Arc;

use super::{FakeEngine, NoopTask, scheduler_with};
use crate::core::ledger::{NewTask, TaskLedger, TaskStatus};
use crate::core::lifecycle::{LifecycleManager, LifecycleState};
use crate::core::scheduler::{
    ExecutionEngine, ExecutorKind, IntervalArgs, JobKwargs, JobSpec, RestoreReport, SchedulerService, TriggerArgs,
    parse_cron_pattern,
};

fn row(id: &str, schedule: &str, job_state: String) -> NewTask {
    NewTask {
        task_id: id.into(),
        tenant_id: "acme".into(),
        schedule: schedule.into(),
        status: TaskStatus::Completed,
        next_run_time: None,
        webhook_url: format!("https://hooks.example.com/{}", id),
        job_state,
        payload: json!({ "id": id }),
        job_args: Value::Null,
        start_date: None,
        end_date: None,
        retry: 5,
        backoff: 3,
    }
}

async fn seed(ledger: &TaskLedger, rows: Vec<NewTask>) {
    let tx = ledger.begin().await.unwrap();
    for row in &rows {
        tx.insert_job(row).unwrap();
    }
    tx.commit().unwrap();
}

#[tokio::test]
async fn ledger_wins_on_cold_start() {
    let engine = FakeEngine::new();
    let (scheduler, ledger) = scheduler_with(engine.clone()).await;
    let interval = TriggerArgs::Interval(IntervalArgs {
        minutes: 5,
        ..Default::default()
    });
    seed(
        &ledger,
        vec![
            row("interval-job", "interval[0:05:00]", serde_json::to_string(&interval).unwrap()),
            row("cron-job", "0 20 * * 1", String::new()),
            row("broken-job", "whenever", String::new()),
            row("retired-job", "0 8 * * *", String::new()),
        ],
    )
    .await;
    ledger.soft_delete_job("retired-job").await.unwrap();

    engine
        .add_job(JobSpec {
            id: "stale-job".into(),
            task: Arc::new(NoopTask),
            trigger: interval.clone(),
            args: Value::Null,
            kwargs: JobKwargs {
                webhook_url: None,
                payload: Value::Null,
                retry: 3,
                backoff: 2,
            },
            start_date: None,
            end_date: None,
            executor: ExecutorKind::Default,
        })
        .await
        .unwrap();

    let report = scheduler.restore_from_ledger().await.unwrap();
    assert_eq!(
        report,
        RestoreReport {
            kept: 0,
            restored: 2,
            removed: 1,
            failed: 1,
        }
    );
    assert!(!engine.contains("stale-job"));
    assert!(!engine.contains("retired-job"));
    assert_eq!(engine.trigger_of("interval-job"), Some(interval));
    assert_eq!(
        engine.trigger_of("cron-job"),
        Some(TriggerArgs::Cron(parse_cron_pattern("0 20 * * 1").unwrap()))
    );
    assert!(ledger.get_task("cron-job").await.unwrap().unwrap().next_run_time.is_some());

    let again = scheduler.restore_from_ledger().await.unwrap();
    assert_eq!(
        again,
        RestoreReport {
            kept: 2,
            restored: 0,
            removed: 0,
            failed: 1,
        }
    );
}

#[tokio::test]
async fn lifecycle_restore_phase_reconciles_the_engine() {
    let engine = FakeEngine::new();
    let (scheduler, ledger) = scheduler_with(engine.clone()).await;
    seed(&ledger, vec![row("cron-job", "0 20 * * 1", String::new())]).await;

    let mut lifecycle = LifecycleManager::new(engine.clone());
    lifecycle.attach(Arc::new(tokio::sync::Mutex::new(SchedulerService::new(scheduler))));
    assert!(!engine.contains("cron-job"));

    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.state(), &LifecycleState::Ready);
    assert!(engine.contains("cron-job"));

    let mut status = TaskStatus::Completed;
    for _ in 0..50 {
        status = ledger.get_task("cron-job").await.unwrap().unwrap().status;
        if status == TaskStatus::Pending {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, TaskStatus::Pending);

    lifecycle.shutdown().await.unwrap();
}
