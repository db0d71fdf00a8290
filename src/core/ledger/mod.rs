mod types;

pub use types::{NewTask, TaskRecord, TaskStatus, TaskUpdate, Transition, can_transition, never_run};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        task_id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        schedule TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'new',
        next_run_time TEXT,
        last_run_time TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        webhook_url TEXT NOT NULL,
        job_state TEXT,
        payload TEXT NOT NULL DEFAULT '{}',
        job_args TEXT NOT NULL DEFAULT 'null',
        start_date TEXT,
        end_date TEXT,
        retry INTEGER NOT NULL DEFAULT 3,
        backoff INTEGER NOT NULL DEFAULT 2,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_tenant ON tasks(tenant_id);
";

const COLUMNS: &str = "task_id, tenant_id, schedule, status, next_run_time, last_run_time, is_active, \
     webhook_url, job_state, payload, job_args, start_date, end_date, retry, backoff";

fn fmt_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{}' in tasks table", raw))?
        .with_timezone(&Utc))
}

fn parse_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

struct RawTask {
    task_id: String,
    tenant_id: String,
    schedule: String,
    status: String,
    next_run_time: Option<String>,
    last_run_time: String,
    is_active: bool,
    webhook_url: String,
    job_state: Option<String>,
    payload: String,
    job_args: String,
    start_date: Option<String>,
    end_date: Option<String>,
    retry: u32,
    backoff: u32,
}

impl RawTask {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            tenant_id: row.get(1)?,
            schedule: row.get(2)?,
            status: row.get(3)?,
            next_run_time: row.get(4)?,
            last_run_time: row.get(5)?,
            is_active: row.get(6)?,
            webhook_url: row.get(7)?,
            job_state: row.get(8)?,
            payload: row.get(9)?,
            job_args: row.get(10)?,
            start_date: row.get(11)?,
            end_date: row.get(12)?,
            retry: row.get(13)?,
            backoff: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        let status = TaskStatus::from_status(&self.status)
            .ok_or_else(|| anyhow!("unknown task status '{}'", self.status))?;
        Ok(TaskRecord {
            status,
            next_run_time: parse_opt_time(self.next_run_time)?,
            last_run_time: parse_time(&self.last_run_time)?,
            is_active: self.is_active,
            job_state: self.job_state,
            payload: serde_json::from_str(&self.payload)?,
            job_args: serde_json::from_str(&self.job_args)?,
            start_date: parse_opt_time(self.start_date)?,
            end_date: parse_opt_time(self.end_date)?,
            retry: self.retry,
            backoff: self.backoff,
            task_id: self.task_id,
            tenant_id: self.tenant_id,
            schedule: self.schedule,
            webhook_url: self.webhook_url,
        })
    }
}

/// Durable record of scheduled jobs. Survives restarts; the execution engine
/// is rebuilt from it on cold start.
#[derive(Clone)]
pub struct TaskLedger {
    db: Arc<Mutex<Connection>>,
}

impl TaskLedger {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open task ledger at {}", path.display()))?;
        let ledger = Self::new(Arc::new(Mutex::new(conn)));
        ledger.initialize().await?;
        info!("Task ledger opened at {}", path.display());
        Ok(ledger)
    }

    pub async fn in_memory() -> Result<Self> {
        let ledger = Self::new(Arc::new(Mutex::new(Connection::open_in_memory()?)));
        ledger.initialize().await?;
        Ok(ledger)
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Holds the connection until the transaction commits, rolls back or drops.
    pub async fn begin(&self) -> Result<LedgerTransaction> {
        let conn = self.db.clone().lock_owned().await;
        LedgerTransaction::begin(conn)
    }

    pub async fn update_job(&self, task_id: &str, update: TaskUpdate) -> Result<bool> {
        let db = self.db.lock().await;
        apply_update(&db, task_id, &update)
    }

    /// Validates the status change against the current row before applying it.
    pub async fn transition(&self, task_id: &str, update: TaskUpdate) -> Result<Transition> {
        let Some(to) = update.status else {
            return Ok(if self.update_job(task_id, update).await? {
                Transition::Applied
            } else {
                Transition::Missing
            });
        };
        let db = self.db.lock().await;
        let current: Option<String> = db
            .query_row(
                "SELECT status FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(Transition::Missing);
        };
        let from = TaskStatus::from_status(&current)
            .ok_or_else(|| anyhow!("unknown task status '{}'", current))?;
        if !can_transition(from, to) {
            return Ok(Transition::Rejected(from));
        }
        apply_update(&db, task_id, &update)?;
        Ok(Transition::Applied)
    }

    /// Clears the active flag and marks the row disabled. The row is kept.
    pub async fn soft_delete_job(&self, task_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE tasks SET is_active = 0, status = ?1 WHERE task_id = ?2",
            params![TaskStatus::Disabled.as_str(), task_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let db = self.db.lock().await;
        let raw = db
            .query_row(
                &format!("SELECT {} FROM tasks WHERE task_id = ?1", COLUMNS),
                params![task_id],
                RawTask::from_row,
            )
            .optional()?;
        raw.map(RawTask::into_record).transpose()
    }

    pub async fn list_tasks(&self, tenant_id: Option<&str>, active_only: bool) -> Result<Vec<TaskRecord>> {
        let db = self.db.lock().await;
        let mut sql = format!("SELECT {} FROM tasks WHERE 1 = 1", COLUMNS);
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(tenant) = tenant_id {
            sql.push_str(" AND tenant_id = ?");
            values.push(SqlValue::Text(tenant.to_string()));
        }
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY created_at, task_id");

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), RawTask::from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            match row.map_err(anyhow::Error::from).and_then(RawTask::into_record) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping unreadable task row: {}", e),
            }
        }
        Ok(tasks)
    }
}

fn apply_update(db: &Connection, task_id: &str, update: &TaskUpdate) -> Result<bool> {
    if update.is_empty() {
        return Ok(false);
    }
    let mut sets = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    if let Some(status) = update.status {
        sets.push("status = ?");
        values.push(SqlValue::Text(status.as_str().to_string()));
    }
    if let Some(schedule) = &update.schedule {
        sets.push("schedule = ?");
        values.push(SqlValue::Text(schedule.clone()));
    }
    if let Some(next) = &update.next_run_time {
        sets.push("next_run_time = ?");
        values.push(match next {
            Some(ts) => SqlValue::Text(fmt_time(ts)),
            None => SqlValue::Null,
        });
    }
    if let Some(last) = &update.last_run_time {
        sets.push("last_run_time = ?");
        values.push(SqlValue::Text(fmt_time(last)));
    }
    if let Some(state) = &update.job_state {
        sets.push("job_state = ?");
        values.push(SqlValue::Text(state.clone()));
    }
    if let Some(active) = update.is_active {
        sets.push("is_active = ?");
        values.push(SqlValue::Integer(i64::from(active)));
    }
    values.push(SqlValue::Text(task_id.to_string()));

    let sql = format!("UPDATE tasks SET {} WHERE task_id = ?", sets.join(", "));
    let changed = db.execute(&sql, params_from_iter(values))?;
    Ok(changed > 0)
}

/// An open `BEGIN IMMEDIATE` transaction on the ledger connection.
/// Dropping it without [`LedgerTransaction::commit`] rolls back.
pub struct LedgerTransaction {
    conn: OwnedMutexGuard<Connection>,
    open: bool,
}

impl LedgerTransaction {
    fn begin(conn: OwnedMutexGuard<Connection>) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, open: true })
    }

    pub fn insert_job(&self, task: &NewTask) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                COLUMNS
            ),
            params![
                task.task_id,
                task.tenant_id,
                task.schedule,
                task.status.as_str(),
                task.next_run_time.as_ref().map(fmt_time),
                fmt_time(&never_run()),
                task.webhook_url,
                task.job_state,
                serde_json::to_string(&task.payload)?,
                serde_json::to_string(&task.job_args)?,
                task.start_date.as_ref().map(fmt_time),
                task.end_date.as_ref().map(fmt_time),
                task.retry,
                task.backoff,
            ],
        )?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for LedgerTransaction {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back ledger transaction: {}", e);
            }
        }
    }
}
