use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::attachment_store::{AttachmentStore, MemoryAttachmentStore, SupabaseAttachmentStore};
use crate::inbox_store::{InboxStore, MemoryInboxStore, PostgresInboxStore};
use crate::job_queue::{JobQueue, MemoryJobQueue, PostgresJobQueue};
use crate::worker::{spawn_postman_consumer, ConsumerControl, WorkerContext};

use super::config::{InboxBackend, ServiceConfig};
use super::handlers::{health, ingest_postman};
use super::state::AppState;
use super::verify::build_verifier;
use super::BoxError;

/// Store, queue and blob storage shared by the processor and the worker.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn InboxStore>,
    pub queue: Arc<dyn JobQueue>,
    pub attachments: Arc<dyn AttachmentStore>,
}

impl Backends {
    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryInboxStore::new()),
            queue: Arc::new(MemoryJobQueue::new()),
            attachments: Arc::new(MemoryAttachmentStore::new()),
        }
    }

    pub fn worker_context(&self) -> WorkerContext {
        WorkerContext::new(self.store.clone(), self.attachments.clone())
    }
}

pub async fn build_backends(config: &ServiceConfig) -> Result<Backends, BoxError> {
    let attachments = build_attachment_store(config)?;
    match config.backend {
        InboxBackend::Memory => Ok(Backends {
            attachments,
            ..Backends::memory()
        }),
        InboxBackend::Postgres => {
            let db_url = config
                .db_url
                .clone()
                .ok_or("postgres backend requires a database url")?;
            let queue_url = db_url.clone();
            let table = config.queue_table.clone();
            let lease_secs = config.queue_lease_secs;
            let max_attempts = config.queue_max_attempts;

            let store: Arc<dyn InboxStore> = Arc::new(
                task::spawn_blocking(move || PostgresInboxStore::new(&db_url))
                    .await
                    .map_err(|err| -> BoxError { err.into() })??,
            );
            let queue: Arc<dyn JobQueue> = Arc::new(
                task::spawn_blocking(move || {
                    PostgresJobQueue::new(&queue_url, &table, lease_secs, max_attempts)
                })
                .await
                .map_err(|err| -> BoxError { err.into() })??,
            );
            Ok(Backends {
                store,
                queue,
                attachments,
            })
        }
    }
}

/// Durable rows must point at durable blobs, so the Postgres backend refuses
/// to start without storage credentials.
fn build_attachment_store(config: &ServiceConfig) -> Result<Arc<dyn AttachmentStore>, BoxError> {
    match (&config.supabase_project_url, &config.supabase_secret_key) {
        (Some(url), Some(key)) => Ok(Arc::new(SupabaseAttachmentStore::new(
            url,
            key,
            &config.storage_bucket,
        ))),
        _ if config.backend == InboxBackend::Postgres => Err(
            "postgres backend requires SUPABASE_PROJECT_URL and SUPABASE_SECRET_KEY for attachments"
                .into(),
        ),
        _ => Ok(Arc::new(MemoryAttachmentStore::new())),
    }
}

pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/postman", post(ingest_postman))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn stop_consumer(control: Option<ConsumerControl>) {
    if let Some(mut control) = control {
        let _ = task::spawn_blocking(move || control.stop_and_join()).await;
    }
}

pub async fn run_processor(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let backends = build_backends(&config).await?;
    serve_processor(&config, backends, shutdown).await
}

/// Serves the webhook on the given backends until `shutdown` resolves.
pub async fn serve_processor(
    config: &ServiceConfig,
    backends: Backends,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let verifier = build_verifier(config);

    let consumer = if config.embed_worker {
        info!("postman consumer embedded in processor");
        Some(spawn_postman_consumer(
            backends.worker_context(),
            backends.queue.clone(),
            config.worker_poll_interval,
        ))
    } else {
        None
    };

    let state = AppState {
        store: backends.store.clone(),
        queue: backends.queue.clone(),
        verifier,
    };
    let app = build_router(state, config.inbound_body_max_bytes);

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "leadmark processor listening on {} (backend={})",
        listener.local_addr()?,
        config.backend
    );

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    stop_consumer(consumer).await;
    serve_result?;
    Ok(())
}

pub async fn run_worker(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    if config.backend == InboxBackend::Memory {
        warn!("worker running with the memory backend only sees jobs queued in this process");
    }
    let backends = build_backends(&config).await?;
    info!(
        "leadmark worker polling every {:?} (backend={})",
        config.worker_poll_interval, config.backend
    );
    let consumer = spawn_postman_consumer(
        backends.worker_context(),
        backends.queue.clone(),
        config.worker_poll_interval,
    );

    shutdown.await;
    info!("leadmark worker shutting down");
    stop_consumer(Some(consumer)).await;
    Ok(())
}
