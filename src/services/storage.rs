use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::config::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("object store returned {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the bytes under a fresh name and return a public URL.
    async fn upload(&self, upload: Upload) -> Result<String, StorageError>;
}

fn object_name(file_name: Option<&str>) -> String {
    let extension = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
        None => Uuid::new_v4().to_string(),
    }
}

pub struct SupabaseObjectStore {
    client: Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    async fn upload(&self, upload: Upload) -> Result<String, StorageError> {
        let name = object_name(upload.file_name.as_deref());
        let content_type = upload
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let response = self
            .client
            .post(format!("{}/storage/v1/object/{}/{name}", self.base_url, self.bucket))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(upload.bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %detail, "Error uploading file to object storage");
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(format!(
            "{}/storage/v1/object/public/{}/{name}",
            self.base_url, self.bucket
        ))
    }
}
