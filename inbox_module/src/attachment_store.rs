use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

const FALLBACK_FILENAME: &str = "attachment";

#[derive(Debug, thiserror::Error)]
pub enum AttachmentStoreError {
    #[error("supabase storage error: {0}")]
    Storage(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("attachment store lock poisoned")]
    LockPoisoned,
    #[error("object not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path inside the bucket.
    pub file_path: String,
    pub full_url: String,
}

pub trait AttachmentStore: Send + Sync {
    fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredObject, AttachmentStoreError>;

    fn get(&self, path: &str) -> Result<Vec<u8>, AttachmentStoreError>;
}

/// `{namespace}/attachments/{owner_id}/{filename}`
pub fn attachment_path(namespace: &str, owner_id: Uuid, filename: &str) -> String {
    format!(
        "{}/attachments/{}/{}",
        namespace,
        owner_id,
        sanitize_filename(filename)
    )
}

pub fn sanitize_filename(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.trim_matches('_').is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Uploads attachments to a Supabase Storage bucket.
///
/// The HTTP client is built on first use so the store can be constructed
/// inside an async runtime and used from a worker thread.
pub struct SupabaseAttachmentStore {
    client: OnceLock<Client>,
    base_url: String,
    service_key: String,
    bucket: String,
    bucket_ready: OnceLock<()>,
}

impl SupabaseAttachmentStore {
    pub fn new(base_url: &str, service_key: &str, bucket: &str) -> Self {
        Self {
            client: OnceLock::new(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            service_key: service_key.trim().to_string(),
            bucket: bucket.trim().to_string(),
            bucket_ready: OnceLock::new(),
        }
    }

    fn client(&self) -> &Client {
        self.client.get_or_init(Client::new)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        )
    }

    fn ensure_bucket_ready(&self) -> Result<(), AttachmentStoreError> {
        if self.bucket_ready.get().is_some() {
            return Ok(());
        }

        let response = self
            .client()
            .post(format!("{}/storage/v1/bucket", self.base_url))
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .json(&json!({
                "id": self.bucket,
                "name": self.bucket,
                "public": false
            }))
            .send()?;

        match response.status() {
            status if status.is_success() || status == StatusCode::CONFLICT => {
                let _ = self.bucket_ready.set(());
                Ok(())
            }
            status => {
                let body = response.text().unwrap_or_default();
                Err(AttachmentStoreError::Storage(format!(
                    "bucket create failed (status {}): {}",
                    status, body
                )))
            }
        }
    }
}

impl AttachmentStore for SupabaseAttachmentStore {
    fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredObject, AttachmentStoreError> {
        self.ensure_bucket_ready()?;

        let url = self.object_url(path);
        let response = self
            .client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .header("x-upsert", "true")
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AttachmentStoreError::Storage(format!(
                "upload failed (status {}): {}",
                status, body
            )));
        }

        Ok(StoredObject {
            file_path: path.to_string(),
            full_url: url,
        })
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, AttachmentStoreError> {
        let response = self
            .client()
            .get(self.object_url(path))
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .send()?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AttachmentStoreError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AttachmentStoreError::Storage(format!(
                "download failed (status {}): {}",
                status, body
            )));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Keeps objects in process memory.
#[derive(Default)]
pub struct MemoryAttachmentStore {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Result<Vec<String>, AttachmentStoreError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| AttachmentStoreError::LockPoisoned)?;
        let mut paths: Vec<String> = objects.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    pub fn content_type(&self, path: &str) -> Result<Option<String>, AttachmentStoreError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| AttachmentStoreError::LockPoisoned)?;
        Ok(objects.get(path).map(|(content_type, _)| content_type.clone()))
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn put(
        &self,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredObject, AttachmentStoreError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| AttachmentStoreError::LockPoisoned)?;
        objects.insert(path.to_string(), (content_type.to_string(), bytes.to_vec()));
        Ok(StoredObject {
            file_path: path.to_string(),
            full_url: format!("memory://{}", path),
        })
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, AttachmentStoreError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| AttachmentStoreError::LockPoisoned)?;
        objects
            .get(path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| AttachmentStoreError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn sanitize_filename_strips_paths_and_odd_chars() {
        assert_eq!(sanitize_filename("quote.pdf"), "quote.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\My Scan (1).png"), "My_Scan__1_.png");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("  "), "attachment");
        assert_eq!(sanitize_filename("日本"), "attachment");
    }

    #[test]
    fn attachment_path_layout() {
        let owner = Uuid::nil();
        assert_eq!(
            attachment_path("support@acme.com:jane@example.com", owner, "a b.txt"),
            format!("support@acme.com:jane@example.com/attachments/{}/a_b.txt", owner)
        );
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryAttachmentStore::new();
        let stored = store.put("ns/attachments/o/a.txt", "text/plain", b"hi").unwrap();
        assert_eq!(stored.file_path, "ns/attachments/o/a.txt");
        assert_eq!(store.get("ns/attachments/o/a.txt").unwrap(), b"hi");
        assert_eq!(
            store.content_type("ns/attachments/o/a.txt").unwrap().as_deref(),
            Some("text/plain")
        );
        assert!(matches!(
            store.get("missing"),
            Err(AttachmentStoreError::NotFound(_))
        ));
    }

    #[test]
    fn supabase_put_creates_bucket_and_uploads() {
        let mut server = mockito::Server::new();
        let bucket_mock = server
            .mock("POST", "/storage/v1/bucket")
            .match_header("apikey", "service-key")
            .with_status(409)
            .expect(1)
            .create();
        let upload_mock = server
            .mock(
                "POST",
                "/storage/v1/object/attachments/support%40acme.com%3Ajane%40example.com/attachments/owner/a.pdf",
            )
            .match_header("authorization", "Bearer service-key")
            .match_header("x-upsert", "true")
            .match_header("content-type", "application/pdf")
            .match_body(Matcher::Exact("pdf-bytes".to_string()))
            .with_status(200)
            .with_body(r#"{"Key":"attachments/a.pdf"}"#)
            .expect(2)
            .create();

        let store = SupabaseAttachmentStore::new(&server.url(), "service-key", "attachments");
        let path = "support@acme.com:jane@example.com/attachments/owner/a.pdf";
        let stored = store.put(path, "application/pdf", b"pdf-bytes").unwrap();
        store.put(path, "application/pdf", b"pdf-bytes").unwrap();

        assert_eq!(stored.file_path, path);
        assert!(stored
            .full_url
            .starts_with(&format!("{}/storage/v1/object/attachments/", server.url())));
        bucket_mock.assert();
        upload_mock.assert();
    }

    #[test]
    fn supabase_put_surfaces_upload_failure() {
        let mut server = mockito::Server::new();
        let _bucket = server
            .mock("POST", "/storage/v1/bucket")
            .with_status(200)
            .create();
        let _upload = server
            .mock("POST", "/storage/v1/object/attachments/ns/a.txt")
            .with_status(500)
            .with_body("nope")
            .create();

        let store = SupabaseAttachmentStore::new(&server.url(), "key", "attachments");
        let err = store.put("ns/a.txt", "text/plain", b"x").unwrap_err();
        assert!(matches!(err, AttachmentStoreError::Storage(ref msg) if msg.contains("500")));
    }

    #[test]
    fn supabase_get_maps_not_found() {
        let mut server = mockito::Server::new();
        let _missing = server
            .mock("GET", "/storage/v1/object/attachments/ns/missing.txt")
            .with_status(404)
            .create();
        let store = SupabaseAttachmentStore::new(&server.url(), "key", "attachments");
        assert!(matches!(
            store.get("ns/missing.txt"),
            Err(AttachmentStoreError::NotFound(_))
        ));
    }
}
