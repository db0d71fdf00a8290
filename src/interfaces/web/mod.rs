mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::scheduler::Scheduler;
use crate::tools::manifest::CustomToolStore;
use crate::tools::{Dispatcher, SharedRegistry, TriggerPipeline};

#[derive(Clone)]
pub struct AppState {
    pub(crate) registry: SharedRegistry,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) pipeline: TriggerPipeline,
    pub(crate) store: CustomToolStore,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

impl AppState {
    pub fn new(
        registry: SharedRegistry,
        store: CustomToolStore,
        scheduler: Arc<Scheduler>,
        log_tx: broadcast::Sender<String>,
        api_port: u16,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            pipeline: TriggerPipeline::new(registry.clone()),
            registry,
            store,
            scheduler,
            log_tx,
            api_port,
        }
    }
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
    server: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(state: AppState, api_host: String) -> Self {
        Self {
            state,
            api_host,
            server: None,
        }
    }
}

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.state.api_port);
        // Bind here so a taken port fails startup instead of a background task.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = router::build_api_router(self.state.clone());

        self.server = Some(tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        if let Some(server) = self.server.take() {
            server.abort();
        }
        Ok(())
    }
}
