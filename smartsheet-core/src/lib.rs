mod client;
mod model;

pub use client::{ApiErrorClass, SmartsheetClient, SmartsheetError, Timeouts, UploadMetadata};
pub use model::{
    Attachment, AttachmentType, Cell, CellValue, Column, IndexResult, Row, Sheet,
};
