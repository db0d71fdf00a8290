use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::parse_api_server_flags;
use crate::core::config::HubConfig;
use crate::core::ledger::TaskLedger;
use crate::core::lifecycle::LifecycleManager;
use crate::core::scheduler::{CallWebhook, CronEngine, ExecutionEngine, Scheduler, SchedulerService};
use crate::core::terminal::{self, print_link, print_status};
use crate::interfaces::web::{ApiServer, AppState};
use crate::platform::{NativePlatform, Platform};
use crate::tools::builtin::default_tools;
use crate::tools::manifest::CustomToolStore;
use crate::tools::{Registry, SharedRegistry};

pub(super) const DB_FILE: &str = "toolhub.db";
pub(super) const CUSTOM_TOOLS_DIR: &str = "custom_tools";

pub(super) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Built-in tools plus every tenant's installed manifests.
pub(super) async fn build_registry(
    scheduler: Arc<Scheduler>,
    store: &CustomToolStore,
    client: &reqwest::Client,
) -> Result<SharedRegistry> {
    let mut tools = default_tools(scheduler, client)?;
    let custom = store.load_all().await?;
    info!("Loaded {} custom tool(s) from {}", custom.len(), store.root().display());
    tools.extend(custom);
    let registry = Registry::init(tools);
    info!("Tool registry ready with {} tool(s)", registry.len());
    Ok(registry.into_shared())
}

fn ensure_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        NativePlatform::restrict_dir_permissions(data_dir);
    }
    Ok(())
}

pub async fn run_server(args: &[String]) -> Result<()> {
    let log_tx = crate::logging::init_tracing(false);

    let data_dir = NativePlatform::data_dir();
    ensure_data_dir(&data_dir)?;
    let config = HubConfig::load(&data_dir).await?;
    let (api_host, api_port) =
        parse_api_server_flags(args, 2, config.server.api_host.clone(), config.server.api_port);

    let db_path = data_dir.join(DB_FILE);
    let ledger = TaskLedger::open(&db_path).await?;
    NativePlatform::restrict_file_permissions(&db_path);

    let engine: Arc<dyn ExecutionEngine> =
        Arc::new(CronEngine::new(config.scheduler.engine_limits()).await?);
    let task = Arc::new(CallWebhook::new(config.scheduler.backoff_unit())?);
    let scheduler = Arc::new(Scheduler::new(
        engine.clone(),
        ledger,
        task,
        config.scheduler.delivery_defaults(),
    ));

    let client = http_client()?;
    let store = CustomToolStore::new(data_dir.join(CUSTOM_TOOLS_DIR), client.clone());
    let registry = build_registry(scheduler.clone(), &store, &client).await?;

    let state = AppState::new(registry, store, scheduler.clone(), log_tx, api_port);

    let mut lifecycle = LifecycleManager::new(engine);
    lifecycle.attach(Arc::new(Mutex::new(SchedulerService::new(scheduler))));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(state, api_host.clone()))));
    lifecycle.start().await?;

    terminal::print_banner();
    print_status("Data directory", &data_dir.display().to_string());
    print_link("API", &format!("http://{}:{}", api_host, api_port));
    print_status("Stop", "Ctrl+C");
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    if let Err(e) = lifecycle.shutdown().await {
        warn!("Shutdown finished with errors: {}", e);
    }
    Ok(())
}
