//! Google Drive storage client using the REST API

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{header, multipart, Client, Response};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DriveupError, Result};
use crate::oauth::Authenticator;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// A folder on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// Operations the uploader needs from a remote store.
///
/// A `parent_id` of `None` means the root of the store.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Folders matching `query`, across all result pages
    async fn list_folders(&self, query: &str) -> Result<Vec<RemoteFolder>>;

    /// Create a folder and return its id
    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String>;

    /// Upload a local file and return the remote file id.
    ///
    /// `direct` sends metadata and content in one request; otherwise a
    /// resumable session is opened first.
    async fn upload_file(
        &self,
        path: &Path,
        parent_id: Option<&str>,
        mime_type: &str,
        direct: bool,
    ) -> Result<String>;
}

/// Drive query clause selecting items named exactly `name`
pub fn name_equals(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!("name = '{}'", escaped)
}

/// Drive file response
#[derive(Debug, Deserialize)]
struct DriveFileResponse {
    id: Option<String>,
    name: Option<String>,
}

/// Drive files list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFilesListResponse {
    #[serde(default)]
    files: Vec<DriveFileResponse>,
    next_page_token: Option<String>,
}

/// Google Drive v3 client
pub struct DriveClient<A: Authenticator> {
    client: Client,
    auth: A,
    api_base: String,
    upload_base: String,
}

impl<A: Authenticator> DriveClient<A> {
    const API_BASE: &'static str = "https://www.googleapis.com/drive/v3";
    const UPLOAD_BASE: &'static str = "https://www.googleapis.com/upload/drive/v3";
    const PAGE_SIZE: &'static str = "1000";

    pub fn new(auth: A) -> Self {
        Self::with_endpoints(auth, Client::new(), Self::API_BASE, Self::UPLOAD_BASE)
    }

    /// Client talking to custom API endpoints
    pub fn with_endpoints(auth: A, client: Client, api_base: &str, upload_base: &str) -> Self {
        Self {
            client,
            auth,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    /// Turn a non-success status into a Drive error carrying the body
    async fn check(response: Response, action: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error = response.text().await.unwrap_or_default();
        Err(DriveupError::Drive(format!(
            "{} failed ({}): {}",
            action, status, error
        )))
    }

    async fn parse_file(response: Response, action: &str) -> Result<String> {
        let file: DriveFileResponse = response
            .json()
            .await
            .map_err(|e| DriveupError::Drive(format!("Failed to parse response: {}", e)))?;

        file.id
            .ok_or_else(|| DriveupError::Drive(format!("{}: no file ID returned", action)))
    }

    fn metadata(name: &str, parent_id: Option<&str>, mime_type: &str) -> serde_json::Value {
        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": mime_type,
        });
        if let Some(parent) = parent_id {
            metadata["parents"] = serde_json::json!([parent]);
        }
        metadata
    }

    fn progress_bar(len: u64, file_name: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Uploading {}", file_name));
        pb
    }

    async fn upload_direct(
        &self,
        token: &str,
        path: &Path,
        metadata: serde_json::Value,
        mime_type: &str,
    ) -> Result<Response> {
        let content = tokio::fs::read(path).await?;

        let form = multipart::Form::new()
            .part(
                "metadata",
                multipart::Part::text(metadata.to_string()).mime_str("application/json")?,
            )
            .part("file", multipart::Part::bytes(content).mime_str(mime_type)?);

        self.client
            .post(format!("{}/files", self.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", "id,name")])
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DriveupError::Drive(format!("Failed to upload file: {}", e)))
    }

    async fn upload_resumable(
        &self,
        token: &str,
        path: &Path,
        metadata: serde_json::Value,
        mime_type: &str,
        size: u64,
    ) -> Result<Response> {
        let response = self
            .client
            .post(format!("{}/files", self.upload_base))
            .query(&[("uploadType", "resumable"), ("fields", "id,name")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", size)
            .json(&metadata)
            .send()
            .await
            .map_err(|e| DriveupError::Drive(format!("Failed to start upload session: {}", e)))?;
        let response = Self::check(response, "Start upload session").await?;

        let session_uri = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveupError::Drive("No upload session URI returned".to_string()))?
            .to_string();
        debug!("Resumable session for {:?}: {}", path, session_uri);

        let file = tokio::fs::File::open(path).await?;
        self.client
            .put(&session_uri)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, mime_type)
            .header(header::CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| DriveupError::Drive(format!("Failed to upload file: {}", e)))
    }
}

#[async_trait]
impl<A: Authenticator> RemoteStorage for DriveClient<A> {
    async fn list_folders(&self, query: &str) -> Result<Vec<RemoteFolder>> {
        let token = self.auth.access_token().await?;
        let mut q = format!("mimeType='{}' and trashed=false", FOLDER_MIME_TYPE);
        if !query.is_empty() {
            q.push_str(&format!(" and ({})", query));
        }

        let mut folders = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/files", self.api_base))
                .bearer_auth(&token)
                .query(&[
                    ("q", q.as_str()),
                    ("fields", "nextPageToken,files(id,name)"),
                    ("pageSize", Self::PAGE_SIZE),
                ]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| DriveupError::Drive(format!("Failed to list folders: {}", e)))?;
            let response = Self::check(response, "List folders").await?;

            let page: DriveFilesListResponse = response
                .json()
                .await
                .map_err(|e| DriveupError::Drive(format!("Failed to parse response: {}", e)))?;

            folders.extend(page.files.into_iter().filter_map(|f| {
                Some(RemoteFolder {
                    id: f.id?,
                    name: f.name.unwrap_or_default(),
                })
            }));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!("Query {:?} matched {} folder(s)", query, folders.len());
        Ok(folders)
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        let token = self.auth.access_token().await?;
        let metadata = Self::metadata(name, parent_id, FOLDER_MIME_TYPE);

        let response = self
            .client
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", "id,name")])
            .bearer_auth(&token)
            .json(&metadata)
            .send()
            .await
            .map_err(|e| DriveupError::Drive(format!("Failed to create folder: {}", e)))?;
        let response = Self::check(response, "Create folder").await?;

        let folder_id = Self::parse_file(response, "Create folder").await?;
        info!("Created folder '{}' with ID: {}", name, folder_id);
        Ok(folder_id)
    }

    async fn upload_file(
        &self,
        path: &Path,
        parent_id: Option<&str>,
        mime_type: &str,
        direct: bool,
    ) -> Result<String> {
        let file_name = path
            .file_name()
            .ok_or_else(|| DriveupError::Drive(format!("Not a file path: {:?}", path)))?
            .to_string_lossy()
            .to_string();
        let size = tokio::fs::metadata(path).await?.len();

        let token = self.auth.access_token().await?;
        let metadata = Self::metadata(&file_name, parent_id, mime_type);

        let pb = Self::progress_bar(size, &file_name);
        let response = if direct {
            self.upload_direct(&token, path, metadata, mime_type).await
        } else {
            self.upload_resumable(&token, path, metadata, mime_type, size)
                .await
        };
        let response = match response {
            Ok(response) => Self::check(response, "Upload").await,
            Err(e) => Err(e),
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                pb.abandon_with_message(format!("Failed {}", file_name));
                return Err(e);
            }
        };

        pb.set_position(size);
        let file_id = Self::parse_file(response, "Upload").await?;
        pb.finish_with_message(format!("Uploaded {}", file_name));

        info!(
            "Uploaded {} ({} bytes, {}) to Drive as {}",
            file_name, size, mime_type, file_id
        );
        Ok(file_id)
    }
}
