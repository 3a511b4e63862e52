//! Input checks run by the handlers before anything touches the database or
//! the upload directory.

use bytes::Bytes;
use thiserror::Error;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("page and limit must be valid positive numbers")]
    InvalidPagination,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("file is not provided")]
    MissingFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// Absent or blank parameters fall back to page 1, limit 10.
pub fn parse_page_request(
    page: Option<&str>,
    limit: Option<&str>,
) -> Result<PageRequest, ValidationError> {
    Ok(PageRequest {
        page: parse_positive(page, DEFAULT_PAGE)?,
        limit: parse_positive(limit, DEFAULT_LIMIT)?,
    })
}

fn parse_positive(raw: Option<&str>, default: i64) -> Result<i64, ValidationError> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(default);
    };
    match value.parse::<i64>() {
        Ok(parsed) if parsed >= 1 => Ok(parsed),
        _ => Err(ValidationError::InvalidPagination),
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub bytes: Bytes,
}

/// Raw fields collected from a multipart document form.
#[derive(Debug, Default)]
pub struct DocumentForm {
    pub title: Option<String>,
    pub file: Option<UploadedFile>,
}

#[derive(Debug)]
pub struct CreateDocumentInput {
    pub title: String,
    pub file: UploadedFile,
}

#[derive(Debug, Default)]
pub struct UpdateDocumentInput {
    pub title: Option<String>,
    pub file: Option<UploadedFile>,
}

impl UpdateDocumentInput {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.file.is_none()
    }
}

impl DocumentForm {
    pub fn into_create(self) -> Result<CreateDocumentInput, ValidationError> {
        let title = self
            .title
            .as_deref()
            .and_then(normalize_title)
            .ok_or(ValidationError::EmptyTitle)?;
        let file = attached(self.file).ok_or(ValidationError::MissingFile)?;
        Ok(CreateDocumentInput { title, file })
    }

    pub fn into_update(self) -> Result<UpdateDocumentInput, ValidationError> {
        let title = match self.title.as_deref() {
            Some(raw) => Some(normalize_title(raw).ok_or(ValidationError::EmptyTitle)?),
            None => None,
        };
        Ok(UpdateDocumentInput {
            title,
            file: attached(self.file),
        })
    }
}

fn normalize_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// browsers submit an empty, unnamed part when no file was picked
fn attached(file: Option<UploadedFile>) -> Option<UploadedFile> {
    file.filter(|file| !file.bytes.is_empty())
}
