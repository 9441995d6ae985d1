use std::{io, path::Path, sync::Arc};

use futures_util::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("blob store url cannot carry path segments: {0}")]
    InvalidBase(String),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

/// Durable handle the blob store returns for an accepted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub reference: String,
}

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub upload_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

#[derive(Clone)]
pub struct BlobClient {
    http: Client,
    base_url: Url,
    upload_limit: Arc<Semaphore>,
}

impl BlobClient {
    pub fn new(base_url: &str) -> Result<Self, TransferError> {
        Self::with_config(base_url, TransferConfig::default())
    }

    pub fn with_config(base_url: &str, config: TransferConfig) -> Result<Self, TransferError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            upload_limit: Arc::new(Semaphore::new(config.upload_concurrency.max(1))),
        })
    }

    /// Streams `source` to the blob store. `on_progress` receives the running
    /// count of bytes handed to the connection.
    pub async fn upload<F>(
        &self,
        source: &Path,
        name: &str,
        mime_type: &str,
        license_type: &str,
        on_progress: F,
    ) -> Result<BlobRef, TransferError>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let _permit = self
            .upload_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let mut url = self.endpoint(&["v1", "blobs"])?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("license", license_type);

        let file = tokio::fs::File::open(source).await?;
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                on_progress(sent);
            }
        });
        let body = reqwest::Body::wrap_stream(stream);
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<BlobRef>().await?)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransferError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransferError::InvalidBase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}
