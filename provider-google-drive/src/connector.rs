//! Google Drive API connector implementation
//!
//! Implements the `RemoteSource` trait for Google Drive API v3.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::remote::{RemoteItem, RemoteSource, FOLDER_MIME_TYPE};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::GoogleDriveError;
use crate::types::{ApiErrorEnvelope, DriveFile, FilesListResponse, UploadResponse};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upload endpoint (separate host path from metadata calls)
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Maximum results per page (Google Drive API limit)
const MAX_PAGE_SIZE: u32 = 1000;

/// Fields to request for file resources
const FILE_FIELDS: &str =
    "id,name,mimeType,createdTime,modifiedTime,imageMediaMetadata(width,height,rotation,time)";

/// `403` reasons that mean "slow down" rather than "you are not allowed".
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Google Drive API connector
///
/// # Features
///
/// - Paginated folder listing including shared drives
/// - Whole-file downloads
/// - Multipart uploads
/// - Exponential backoff for rate limiting and 5xx responses
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::GoogleDriveConnector;
/// use bridge_traits::RemoteSource;
///
/// let connector = GoogleDriveConnector::new(http_client, access_token);
/// let children = connector.list_children("root-folder-id").await?;
/// ```
pub struct GoogleDriveConnector {
    http_client: Arc<dyn HttpClient>,

    /// OAuth 2.0 access token
    access_token: String,

    retry_policy: RetryPolicy,
}

impl GoogleDriveConnector {
    /// Create a new Google Drive connector
    ///
    /// `access_token` needs the `drive.readonly` scope for mirroring and
    /// `drive.file` for uploads.
    pub fn new(http_client: Arc<dyn HttpClient>, access_token: String) -> Self {
        Self {
            http_client,
            access_token,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn parse_timestamp(rfc3339: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// EXIF timestamps carry no zone; they are taken as UTC.
    fn parse_exif_timestamp(exif: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(exif, "%Y:%m:%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    fn convert_file(drive_file: DriveFile) -> RemoteItem {
        let meta = drive_file.image_media_metadata.unwrap_or_default();

        // Drive reports sensor dimensions; a quarter turn swaps them.
        let (width, height) = match meta.rotation {
            Some(1) | Some(3) => (meta.height, meta.width),
            _ => (meta.width, meta.height),
        };

        let created_time = meta
            .time
            .as_deref()
            .and_then(Self::parse_exif_timestamp)
            .or_else(|| drive_file.created_time.as_deref().and_then(Self::parse_timestamp));

        RemoteItem {
            id: drive_file.id,
            name: drive_file.name,
            is_folder: drive_file.mime_type == FOLDER_MIME_TYPE,
            mime_type: drive_file.mime_type,
            modified_time: drive_file
                .modified_time
                .as_deref()
                .and_then(Self::parse_timestamp),
            created_time,
            width,
            height,
        }
    }

    /// Map a non-success response to the provider error taxonomy.
    fn classify_failure(response: &HttpResponse, file_id: Option<&str>) -> GoogleDriveError {
        let envelope: Option<ApiErrorEnvelope> = serde_json::from_slice(&response.body).ok();
        let message = envelope
            .as_ref()
            .map(|e| e.error.message.clone())
            .unwrap_or_else(|| response.text_snippet(200));
        let rate_limited = envelope.as_ref().is_some_and(|e| {
            e.error
                .errors
                .iter()
                .any(|d| RATE_LIMIT_REASONS.contains(&d.reason.as_str()))
        });

        match response.status {
            401 => GoogleDriveError::AuthenticationFailed(message),
            403 if rate_limited => GoogleDriveError::RateLimitExceeded {
                retry_after_seconds: Self::retry_after(response),
            },
            403 => GoogleDriveError::AuthenticationFailed(message),
            404 => GoogleDriveError::FileNotFound {
                file_id: file_id.unwrap_or_default().to_string(),
            },
            429 => GoogleDriveError::RateLimitExceeded {
                retry_after_seconds: Self::retry_after(response),
            },
            status if (500..600).contains(&status) => GoogleDriveError::ServerError {
                status_code: status,
            },
            status => GoogleDriveError::ApiError {
                status_code: status,
                message,
            },
        }
    }

    fn retry_after(response: &HttpResponse) -> u64 {
        response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, v)| v.trim().parse().ok())
            .unwrap_or(1)
    }

    /// Execute API request with retry logic
    ///
    /// Rate limits and 5xx are retried with exponential backoff; everything
    /// else is classified on the first failure.
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        file_id: Option<&str>,
    ) -> Result<HttpResponse> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let request = request.clone().bearer_token(&self.access_token);
            attempt += 1;

            let failure = match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => {
                    debug!(status = response.status, "API request succeeded");
                    return Ok(response);
                }
                Ok(response) => {
                    let error = Self::classify_failure(&response, file_id);
                    let retryable = matches!(
                        error,
                        GoogleDriveError::RateLimitExceeded { .. }
                            | GoogleDriveError::ServerError { .. }
                    );
                    if !retryable {
                        warn!(status = response.status, error = %error, "API request failed");
                        return Err(error.into());
                    }
                    error.into()
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %failure, "API request failed after retries");
                return Err(failure);
            }

            let backoff = self.retry_policy.delay_for(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "API request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn multipart_body(
        boundary: &str,
        metadata: &serde_json::Value,
        mime_type: &str,
        bytes: &[u8],
    ) -> Bytes {
        let mut body = BytesMut::with_capacity(bytes.len() + 512);
        body.put_slice(format!("--{}\r\n", boundary).as_bytes());
        body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.put_slice(metadata.to_string().as_bytes());
        body.put_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        body.put_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
        body.put_slice(bytes);
        body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body.freeze()
    }
}

#[async_trait]
impl RemoteSource for GoogleDriveConnector {
    #[instrument(skip(self), fields(folder_id = %folder_id))]
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteItem>> {
        let query = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/files?q={}&pageSize={}&fields=nextPageToken,files({})&supportsAllDrives=true&includeItemsFromAllDrives=true",
                DRIVE_API_BASE,
                urlencoding::encode(&query),
                MAX_PAGE_SIZE,
                FILE_FIELDS
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let request = HttpRequest::new(HttpMethod::Get, url)
                .header("Accept", "application/json")
                .timeout(Duration::from_secs(30));
            let response = self.execute_with_retry(request, Some(folder_id)).await?;

            let page: FilesListResponse = serde_json::from_slice(&response.body).map_err(|e| {
                GoogleDriveError::ParseError(format!("Failed to parse files list response: {}", e))
            })?;

            items.extend(page.files.into_iter().map(Self::convert_file));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = items.len(), "Listed folder children");
        Ok(items)
    }

    #[instrument(skip(self), fields(file_id = %file_id))]
    async fn download_bytes(&self, file_id: &str) -> Result<Bytes> {
        let url = format!(
            "{}/files/{}?alt=media&supportsAllDrives=true",
            DRIVE_API_BASE,
            urlencoding::encode(file_id)
        );
        let request = HttpRequest::new(HttpMethod::Get, url).timeout(Duration::from_secs(120));

        let response = self.execute_with_retry(request, Some(file_id)).await?;
        debug!(bytes = response.body.len(), "Downloaded file");
        Ok(response.body)
    }

    #[instrument(skip(self, bytes), fields(folder_id = %folder_id, name = %name, len = bytes.len()))]
    async fn upload_bytes(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        bytes: Bytes,
    ) -> Result<String> {
        let boundary = format!("drive-mirror-{}", uuid::Uuid::new_v4().simple());
        let metadata = serde_json::json!({ "name": name, "parents": [folder_id] });
        let body = Self::multipart_body(&boundary, &metadata, mime_type, &bytes);

        let url = format!(
            "{}/files?uploadType=multipart&supportsAllDrives=true&fields=id",
            DRIVE_UPLOAD_BASE
        );
        let request = HttpRequest::new(HttpMethod::Post, url)
            .body(format!("multipart/related; boundary={}", boundary), body)
            .timeout(Duration::from_secs(120));

        let response = self.execute_with_retry(request, None).await?;
        let uploaded: UploadResponse = serde_json::from_slice(&response.body).map_err(|e| {
            GoogleDriveError::ParseError(format!("Failed to parse upload response: {}", e))
        })?;

        info!(file_id = %uploaded.id, "Uploaded file");
        Ok(uploaded.id)
    }
}
