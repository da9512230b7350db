use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Sheet {
    pub fn column(&self, column_id: i64) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == column_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: i64,
    #[serde(default)]
    pub row_number: Option<u32>,
    #[serde(default)]
    pub cells: Vec<Cell>,
    /// Row-level attachments. `None` when the payload carried no
    /// `attachments` key, which the API also does for rows without any.
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

impl Row {
    pub fn cell(&self, column_id: i64) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.column_id == column_id)
    }

    pub fn value(&self, column_id: i64) -> Option<&CellValue> {
        self.cell(column_id).and_then(|cell| cell.value.as_ref())
    }

    pub fn file_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().flatten().filter(|att| att.is_file())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub column_id: i64,
    #[serde(default)]
    pub value: Option<CellValue>,
    #[serde(default)]
    pub display_value: Option<String>,
}

/// Raw cell value as the API reports it. Integral JSON numbers land in
/// `Integer`, anything with a fraction or outside the i64 range in `Decimal`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: i64,
    pub name: String,
    pub attachment_type: AttachmentType,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_in_kb: Option<u64>,
    /// Temporary download url, only returned by the single-attachment endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_expires_in_millis: Option<u64>,
}

impl Attachment {
    pub fn is_file(&self) -> bool {
        self.attachment_type == AttachmentType::File
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentType {
    File,
    Link,
    GoogleDrive,
    BoxCom,
    Dropbox,
    Evernote,
    Egnyte,
    Onedrive,
    Trello,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResult<T> {
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_count: u32,
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResultEnvelope<T> {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result_code: i64,
    pub result: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}
