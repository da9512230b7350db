use std::future::Future;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use smartsheet_core::{Attachment, Sheet, SmartsheetClient, SmartsheetError, UploadMetadata};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::sync::executor::TransferError;

/// Sheet retrieval collaborator.
pub trait SheetSource {
    /// Loads a sheet with its cells and row-level attachment metadata.
    fn fetch_sheet(&self, sheet_id: i64) -> impl Future<Output = Result<Sheet, SmartsheetError>> + Send;

    /// Lists every attachment of one row, all kinds included.
    fn fetch_row_attachments(
        &self,
        sheet_id: i64,
        row_id: i64,
    ) -> impl Future<Output = Result<Vec<Attachment>, SmartsheetError>> + Send;
}

/// Attachment download/upload collaborator.
pub trait AttachmentTransport {
    fn download_attachment(
        &self,
        sheet_id: i64,
        attachment: &Attachment,
        dest: &Path,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;

    fn upload_attachment(
        &self,
        sheet_id: i64,
        row_id: i64,
        attachment: &Attachment,
        src: &Path,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;
}

/// Both collaborators backed by the Smartsheet REST API.
#[derive(Clone)]
pub struct SmartsheetService {
    client: SmartsheetClient,
    http: Client,
}

impl SmartsheetService {
    pub fn new(client: SmartsheetClient) -> Self {
        let http = client.http().clone();
        Self { client, http }
    }

    /// Streams `href` into `target`, going through a `.partial` sibling so a
    /// broken download never leaves a complete-looking file behind.
    async fn download_to_path(&self, href: &str, target: &Path) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?.error_for_status()?;

        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        tokio::fs::rename(partial, target).await?;
        Ok(())
    }
}

impl SheetSource for SmartsheetService {
    async fn fetch_sheet(&self, sheet_id: i64) -> Result<Sheet, SmartsheetError> {
        self.client.get_sheet(sheet_id, true).await
    }

    async fn fetch_row_attachments(
        &self,
        sheet_id: i64,
        row_id: i64,
    ) -> Result<Vec<Attachment>, SmartsheetError> {
        self.client.list_row_attachments(sheet_id, row_id).await
    }
}

impl AttachmentTransport for SmartsheetService {
    async fn download_attachment(
        &self,
        sheet_id: i64,
        attachment: &Attachment,
        dest: &Path,
    ) -> Result<(), TransferError> {
        // the sheet payload carries no url; ask for a fresh short-lived one
        let detail = self.client.get_attachment(sheet_id, attachment.id).await?;
        let href = detail.url.ok_or(TransferError::MissingUrl {
            attachment_id: attachment.id,
        })?;
        tracing::debug!("downloading '{}' to {}", attachment.name, dest.display());
        self.download_to_path(&href, dest).await
    }

    async fn upload_attachment(
        &self,
        sheet_id: i64,
        row_id: i64,
        attachment: &Attachment,
        src: &Path,
    ) -> Result<(), TransferError> {
        let file = tokio::fs::File::open(src).await?;
        let metadata = UploadMetadata {
            file_name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            content_length: file.metadata().await?.len(),
        };
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.client
            .attach_file_to_row(sheet_id, row_id, &metadata, body)
            .await?;
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
