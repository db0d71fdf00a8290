//! Tools registered into the `default` bucket at startup.

pub mod scheduler;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use super::descriptor::ToolDescriptor;
use super::manifest::embedded_tools;
use crate::core::scheduler::Scheduler;

/// Rust-implemented tools first, then the embedded manifests.
pub fn default_tools(scheduler: Arc<Scheduler>, client: &reqwest::Client) -> Result<Vec<ToolDescriptor>> {
    let mut tools = vec![scheduler::builder(scheduler).build()?];
    tools.extend(embedded_tools(client)?);
    info!(
        "Loaded {} built-in tools: {}",
        tools.len(),
        tools.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(tools)
}
