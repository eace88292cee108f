//! HTTP processor and worker process wiring.

mod config;
mod handlers;
mod server;
mod state;
mod verify;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{
    InboxBackend, ServiceConfig, DEFAULT_INBOUND_BODY_MAX_BYTES, DEFAULT_PROCESSOR_PORT,
    DEFAULT_STORAGE_BUCKET,
};
pub use server::{
    build_backends, build_router, run_processor, run_worker, serve_processor, Backends,
};
pub use state::AppState;
pub use verify::{
    build_verifier, AllowAllOrigins, BasicAuthVerifier, OriginVerifier, SharedTokenVerifier,
    VerifyError, POSTMARK_TOKEN_HEADER,
};

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
