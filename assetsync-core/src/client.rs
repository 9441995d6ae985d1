use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::rows::{AssetRow, FolderRow, ProjectRow};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBase(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Row-oriented access to the authoritative project store.
///
/// Every call is issued and awaited independently; the store offers no
/// transactions or joins across them.
#[derive(Clone)]
pub struct RemoteStoreClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl RemoteStoreClient {
    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
        })
    }

    pub async fn get_project(&self, project_id: &str) -> Result<ProjectRow, RemoteError> {
        let url = self.endpoint(&["v1", "projects", project_id])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_root_assets(&self, project_id: &str) -> Result<Vec<AssetRow>, RemoteError> {
        let mut url = self.endpoint(&["v1", "projects", project_id, "assets"])?;
        url.query_pairs_mut().append_pair("folder", "root");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_folders(&self, project_id: &str) -> Result<Vec<FolderRow>, RemoteError> {
        let url = self.endpoint(&["v1", "projects", project_id, "folders"])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_folder_assets(&self, folder_id: &str) -> Result<Vec<AssetRow>, RemoteError> {
        let url = self.endpoint(&["v1", "folders", folder_id, "assets"])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn insert_asset(&self, row: &AssetRow) -> Result<AssetRow, RemoteError> {
        self.post_row(&["v1", "assets"], row).await
    }

    pub async fn insert_folder(&self, row: &FolderRow) -> Result<FolderRow, RemoteError> {
        self.post_row(&["v1", "folders"], row).await
    }

    async fn post_row<T>(&self, segments: &[&str], row: &T) -> Result<T, RemoteError>
    where
        T: Serialize + serde::de::DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(row)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidBase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Api { status, body })
        }
    }
}

impl RemoteError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Request(_) => true,
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
