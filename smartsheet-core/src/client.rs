use std::time::{Duration, SystemTime};

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Body, Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::model::{ApiErrorBody, Attachment, IndexResult, ResultEnvelope, Sheet};

const DEFAULT_BASE_URL: &str = "https://api.smartsheet.com";
const API_PREFIX: &str = "/2.0";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const ATTACHMENT_PAGE_SIZE: u32 = 100;

/// Smartsheet error code for "rate limit exceeded".
const RATE_LIMIT_ERROR_CODE: i64 = 4003;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SmartsheetError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {message}")]
    Api {
        status: StatusCode,
        code: Option<i64>,
        message: String,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Headers sent along with an uploaded attachment body.
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub content_length: u64,
}

/// Socket timeouts applied to every request, API calls and pre-signed
/// attachment downloads alike. The read timeout bounds each read, not the
/// whole transfer, so large files still stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct SmartsheetClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl SmartsheetClient {
    pub fn new(token: impl Into<String>) -> Result<Self, SmartsheetError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, SmartsheetError> {
        Self::with_timeouts(base_url, token, Timeouts::default())
    }

    pub fn with_timeouts(
        base_url: &str,
        token: impl Into<String>,
        timeouts: Timeouts,
    ) -> Result<Self, SmartsheetError> {
        let http = Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client, for requests outside the API such as
    /// pre-signed download urls. Carries the same timeouts.
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn get_sheet(
        &self,
        sheet_id: i64,
        include_attachments: bool,
    ) -> Result<Sheet, SmartsheetError> {
        let mut url = self.endpoint(&format!("/sheets/{sheet_id}"))?;
        if include_attachments {
            url.query_pairs_mut().append_pair("include", "attachments");
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_row_attachments(
        &self,
        sheet_id: i64,
        row_id: i64,
    ) -> Result<Vec<Attachment>, SmartsheetError> {
        let mut page = 1u32;
        let mut items = Vec::new();
        loop {
            let mut url = self.endpoint(&format!("/sheets/{sheet_id}/rows/{row_id}/attachments"))?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("pageSize", &ATTACHMENT_PAGE_SIZE.to_string());
            let response = self
                .http
                .get(url)
                .header("Authorization", self.auth_header_value())
                .send()
                .await?;
            let result: IndexResult<Attachment> = Self::handle_response(response).await?;
            let received = result.data.len();
            items.extend(result.data);
            if received == 0 || page >= result.total_pages {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    /// Fetches a single attachment, including its short-lived download url.
    pub async fn get_attachment(
        &self,
        sheet_id: i64,
        attachment_id: i64,
    ) -> Result<Attachment, SmartsheetError> {
        let url = self.endpoint(&format!("/sheets/{sheet_id}/attachments/{attachment_id}"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn attach_file_to_row(
        &self,
        sheet_id: i64,
        row_id: i64,
        metadata: &UploadMetadata,
        body: impl Into<Body>,
    ) -> Result<Attachment, SmartsheetError> {
        let url = self.endpoint(&format!("/sheets/{sheet_id}/rows/{row_id}/attachments"))?;
        let mime_type = metadata
            .mime_type
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header(CONTENT_TYPE, mime_type)
            .header(CONTENT_LENGTH, metadata.content_length)
            .header(
                CONTENT_DISPOSITION,
                content_disposition(&metadata.file_name),
            )
            .body(body)
            .send()
            .await?;
        let envelope: ResultEnvelope<Attachment> = Self::handle_response(response).await?;
        Ok(envelope.result)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, SmartsheetError> {
        Ok(self.base_url.join(&format!("{API_PREFIX}{path}"))?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SmartsheetError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
            Err(SmartsheetError::Api {
                status,
                code: parsed.error_code,
                message: parsed.message.unwrap_or(body),
                retry_after,
            })
        }
    }
}

impl SmartsheetError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            SmartsheetError::Api { status, code, .. } => Some(classify_api_status(*status, *code)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SmartsheetError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SmartsheetError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode, code: Option<i64>) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS || code == Some(RATE_LIMIT_ERROR_CODE) {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

fn content_disposition(file_name: &str) -> String {
    let plain = file_name
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\');
    if plain {
        format!("attachment; filename=\"{file_name}\"")
    } else {
        format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(file_name)
        )
    }
}
