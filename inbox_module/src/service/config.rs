use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::job_queue::{DEFAULT_LEASE_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_TABLE};
use crate::pg::resolve_db_url;

use super::BoxError;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_PROCESSOR_PORT: u16 = 9200;
pub const DEFAULT_STORAGE_BUCKET: &str = "attachments";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const CONFIG_FILE_NAME: &str = "leadmark.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxBackend {
    Postgres,
    Memory,
}

impl fmt::Display for InboxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboxBackend::Postgres => f.write_str("postgres"),
            InboxBackend::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for InboxBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "supabase" => Ok(InboxBackend::Postgres),
            "memory" => Ok(InboxBackend::Memory),
            other => Err(format!("unknown inbox backend: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct ConfigFile {
    #[serde(default)]
    pub(super) server: ServerSection,
    #[serde(default)]
    pub(super) storage: StorageSection,
    #[serde(default)]
    pub(super) worker: WorkerSection,
    #[serde(default)]
    pub(super) attachments: AttachmentsSection,
    #[serde(default)]
    pub(super) postmark: PostmarkSection,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct ServerSection {
    pub(super) host: Option<String>,
    pub(super) port: Option<u16>,
    pub(super) max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct StorageSection {
    pub(super) backend: Option<String>,
    pub(super) db_url: Option<String>,
    pub(super) queue_table: Option<String>,
    pub(super) queue_lease_secs: Option<i64>,
    pub(super) queue_max_attempts: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct WorkerSection {
    pub(super) poll_interval_secs: Option<u64>,
    pub(super) embedded: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct AttachmentsSection {
    pub(super) project_url: Option<String>,
    pub(super) bucket: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct PostmarkSection {
    pub(super) inbound_token: Option<String>,
    pub(super) basic_auth_user: Option<String>,
    pub(super) basic_auth_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub inbound_body_max_bytes: usize,
    pub backend: InboxBackend,
    pub db_url: Option<String>,
    pub queue_table: String,
    pub queue_lease_secs: i64,
    pub queue_max_attempts: i32,
    pub worker_poll_interval: Duration,
    /// Run the queue consumer inside the processor process.
    pub embed_worker: bool,
    pub supabase_project_url: Option<String>,
    pub supabase_secret_key: Option<String>,
    pub storage_bucket: String,
    pub postmark_inbound_token: Option<String>,
    pub postmark_basic_auth: Option<(String, String)>,
}

impl ServiceConfig {
    /// Environment variables layered over the optional `leadmark.toml`.
    pub fn from_env() -> Result<Self, BoxError> {
        let file = match resolve_config_path()? {
            Some(path) => load_config_file(&path)?,
            None => ConfigFile::default(),
        };
        Self::from_sources(file)
    }

    pub(super) fn from_sources(file: ConfigFile) -> Result<Self, BoxError> {
        let host = env_string("PROCESSOR_HOST")
            .or(file.server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_parse::<u16>("PROCESSOR_PORT")?
            .or(file.server.port)
            .unwrap_or(DEFAULT_PROCESSOR_PORT);
        let inbound_body_max_bytes = env_parse::<usize>("POSTMAN_INBOUND_MAX_BYTES")?
            .or(file.server.max_body_bytes)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        let db_url = resolve_db_url().or(file
            .storage
            .db_url
            .filter(|value| !value.trim().is_empty()));
        let backend = match env_string("INBOX_BACKEND").or(file.storage.backend) {
            Some(raw) => raw.parse::<InboxBackend>()?,
            None if db_url.is_some() => InboxBackend::Postgres,
            None => InboxBackend::Memory,
        };
        if backend == InboxBackend::Postgres && db_url.is_none() {
            return Err("postgres backend requires INBOX_DB_URL, SUPABASE_DB_URL or DATABASE_URL".into());
        }

        let queue_table = env_string("POSTMAN_QUEUE_TABLE")
            .or(file.storage.queue_table)
            .unwrap_or_else(|| DEFAULT_QUEUE_TABLE.to_string());
        let queue_lease_secs = env_parse::<i64>("POSTMAN_QUEUE_LEASE_SECS")?
            .or(file.storage.queue_lease_secs)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_LEASE_SECS);
        let queue_max_attempts = env_parse::<i32>("POSTMAN_QUEUE_MAX_ATTEMPTS")?
            .or(file.storage.queue_max_attempts)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let poll_secs = env_parse::<u64>("WORKER_POLL_INTERVAL_SECS")?
            .or(file.worker.poll_interval_secs)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let embed_worker = env_parse_bool("PROCESSOR_EMBED_WORKER")?
            .or(file.worker.embedded)
            .unwrap_or(backend == InboxBackend::Memory);

        let supabase_project_url = env_string("SUPABASE_PROJECT_URL")
            .or(file.attachments.project_url)
            .map(|value| value.trim_end_matches('/').to_string());
        let supabase_secret_key = env_string("SUPABASE_SECRET_KEY");
        let storage_bucket = env_string("SUPABASE_STORAGE_BUCKET")
            .or(file.attachments.bucket)
            .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string());

        let postmark_inbound_token =
            env_string("POSTMARK_INBOUND_TOKEN").or(file.postmark.inbound_token);
        let basic_user = env_string("POSTMARK_BASIC_AUTH_USER").or(file.postmark.basic_auth_user);
        let basic_password =
            env_string("POSTMARK_BASIC_AUTH_PASSWORD").or(file.postmark.basic_auth_password);
        let postmark_basic_auth = match (basic_user, basic_password) {
            (Some(user), Some(password)) => Some((user, password)),
            (None, None) => None,
            _ => {
                return Err(
                    "POSTMARK_BASIC_AUTH_USER and POSTMARK_BASIC_AUTH_PASSWORD must be set together"
                        .into(),
                )
            }
        };

        Ok(Self {
            host,
            port,
            inbound_body_max_bytes,
            backend,
            db_url,
            queue_table,
            queue_lease_secs,
            queue_max_attempts,
            worker_poll_interval: Duration::from_secs(poll_secs),
            embed_worker,
            supabase_project_url,
            supabase_secret_key,
            storage_bucket,
            postmark_inbound_token,
            postmark_basic_auth,
        })
    }

    /// In-memory config for tests and local runs.
    pub fn memory() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            inbound_body_max_bytes: DEFAULT_INBOUND_BODY_MAX_BYTES,
            backend: InboxBackend::Memory,
            db_url: None,
            queue_table: DEFAULT_QUEUE_TABLE.to_string(),
            queue_lease_secs: DEFAULT_LEASE_SECS,
            queue_max_attempts: DEFAULT_MAX_ATTEMPTS,
            worker_poll_interval: Duration::from_millis(50),
            embed_worker: true,
            supabase_project_url: None,
            supabase_secret_key: None,
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            postmark_inbound_token: None,
            postmark_basic_auth: None,
        }
    }
}

pub(super) fn resolve_config_path() -> Result<Option<PathBuf>, BoxError> {
    if let Some(path) = env_string("LEADMARK_CONFIG_PATH") {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("LEADMARK_CONFIG_PATH {} does not exist", path.display()).into());
        }
        return Ok(Some(path));
    }

    let direct = env::current_dir()?.join(CONFIG_FILE_NAME);
    Ok(direct.exists().then_some(direct))
}

pub(super) fn load_config_file(path: &Path) -> Result<ConfigFile, BoxError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
    let file = toml::from_str::<ConfigFile>(&content)
        .map_err(|err| format!("failed to parse {}: {}", path.display(), err))?;
    Ok(file)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, BoxError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| -> BoxError { format!("invalid {}={}: {}", key, raw, err).into() }),
        None => Ok(None),
    }
}

fn env_parse_bool(key: &str) -> Result<Option<bool>, BoxError> {
    match env_string(key).map(|value| value.to_ascii_lowercase()) {
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("invalid {}={}", key, value).into()),
        },
        None => Ok(None),
    }
}
