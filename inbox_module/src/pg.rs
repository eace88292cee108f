use std::env;
use std::time::Duration;

use postgres_native_tls::MakeTlsConnector;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;

pub(crate) type PgManager = PostgresConnectionManager<MakeTlsConnector>;
pub(crate) type PgPool = Pool<PgManager>;

/// Custom error handler that logs the actual connection error
#[derive(Debug)]
struct LoggingErrorHandler {
    label: &'static str,
}

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("{} postgres pool error: {:?}", self.label, err);
    }
}

/// First non-empty of INBOX_DB_URL, SUPABASE_DB_URL, DATABASE_URL.
pub fn resolve_db_url() -> Option<String> {
    ["INBOX_DB_URL", "SUPABASE_DB_URL", "DATABASE_URL"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

pub(crate) fn build_pool<E>(
    db_url: &str,
    label: &'static str,
    max_size: u32,
    config_error: impl Fn(String) -> E,
) -> Result<PgPool, E>
where
    E: From<postgres::Error> + From<r2d2::Error>,
{
    let config: postgres::Config = db_url.parse()?;

    let mut tls_builder = native_tls::TlsConnector::builder();
    if resolve_bool_env("INBOX_DB_TLS_ALLOW_INVALID_CERTS") {
        tls_builder.danger_accept_invalid_certs(true);
        tls_builder.danger_accept_invalid_hostnames(true);
    }
    let tls_connector = tls_builder
        .build()
        .map_err(|err| config_error(err.to_string()))?;
    let tls = MakeTlsConnector::new(tls_connector);

    let manager = PostgresConnectionManager::new(config, tls);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(300)))
        .error_handler(Box::new(LoggingErrorHandler { label }))
        .build(manager)?;
    Ok(pool)
}

pub(crate) fn resolve_bool_env(key: &str) -> bool {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
