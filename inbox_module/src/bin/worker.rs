use inbox_module::service::{run_worker, shutdown_signal, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let mut config = ServiceConfig::from_env()?;
    // This process is the consumer; the flag only matters to the processor.
    config.embed_worker = false;
    run_worker(config, shutdown_signal()).await
}
