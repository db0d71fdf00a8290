use anyhow::Result;
use std::sync::Arc;

use super::ToolsCommandArgs;
use super::serve::{CUSTOM_TOOLS_DIR, build_registry, http_client};
use crate::core::config::HubConfig;
use crate::core::ledger::TaskLedger;
use crate::core::scheduler::{CallWebhook, CronEngine, Scheduler};
use crate::core::terminal::print_error;
use crate::platform::{NativePlatform, Platform};
use crate::tools::manifest::CustomToolStore;

/// Prints the schema documents a tenant can see. The scheduler is wired to an
/// in-memory ledger and never started.
pub async fn print_schemas(args: ToolsCommandArgs) -> Result<()> {
    let data_dir = NativePlatform::data_dir();
    let config = HubConfig::load(&data_dir).await?;

    let engine = Arc::new(CronEngine::new(config.scheduler.engine_limits()).await?);
    let scheduler = Arc::new(Scheduler::new(
        engine,
        TaskLedger::in_memory().await?,
        Arc::new(CallWebhook::new(config.scheduler.backoff_unit())?),
        config.scheduler.delivery_defaults(),
    ));

    let client = http_client()?;
    let store = CustomToolStore::new(data_dir.join(CUSTOM_TOOLS_DIR), client.clone());
    let registry = build_registry(scheduler, &store, &client).await?;

    let registry = registry.read().await;
    match registry.list_schemas(&args.tenant, args.tool.as_deref()) {
        Ok(schemas) => {
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
        Err(e) => print_error(&e.to_string()),
    }
    Ok(())
}
