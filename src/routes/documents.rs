use std::path::Path as FsPath;

use axum::async_trait;
use axum::extract::{FromRequestParts, Json, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::state::AppState;
use crate::store::StoreError;
use crate::validation::{parse_page_request, DocumentForm, UploadedFile};

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteDocumentResponse {
    pub message: String,
}

/// `:id` path segment; malformed ids are rejected with the usual JSON error body.
pub struct DocumentId(pub i32);

#[async_trait]
impl<S> FromRequestParts<S> for DocumentId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<i32>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
        Ok(Self(id))
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<Document>>> {
    let page = parse_page_request(params.page.as_deref(), params.limit.as_deref())?;
    let documents = state
        .documents
        .find_page(page)
        .map_err(store_failure("fetching documents"))?;
    Ok(Json(documents))
}

pub async fn get_document(
    State(state): State<AppState>,
    DocumentId(document_id): DocumentId,
) -> AppResult<Json<Document>> {
    let document = state
        .documents
        .find_by_id(document_id)
        .map_err(store_failure("fetching document"))?;
    Ok(Json(document))
}

pub async fn create_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Document>)> {
    let input = read_document_form(multipart)
        .await?
        .into_create()
        .map_err(|err| {
            warn!(error = %err, "document create rejected");
            AppError::from(err)
        })?;

    let document = state
        .documents
        .insert(input)
        .await
        .map_err(store_failure("creating document"))?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn update_document(
    State(state): State<AppState>,
    DocumentId(document_id): DocumentId,
    multipart: Multipart,
) -> AppResult<Json<Document>> {
    let input = read_document_form(multipart)
        .await?
        .into_update()
        .map_err(|err| {
            warn!(document_id, error = %err, "document update rejected");
            AppError::from(err)
        })?;

    let document = state
        .documents
        .update_fields(document_id, input)
        .await
        .map_err(store_failure("updating document"))?;
    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    DocumentId(document_id): DocumentId,
) -> AppResult<Json<DeleteDocumentResponse>> {
    state
        .documents
        .delete(document_id)
        .await
        .map_err(store_failure("deleting document"))?;
    Ok(Json(DeleteDocumentResponse {
        message: format!("Document with ID {document_id} deleted successfully."),
    }))
}

/// Plain-text-ish files come back decoded as text, anything else as raw bytes.
pub async fn get_document_content(
    State(state): State<AppState>,
    DocumentId(document_id): DocumentId,
) -> AppResult<Response> {
    let (document, bytes) = state
        .documents
        .read_content(document_id)
        .await
        .map_err(store_failure("retrieving file content"))?;
    let file_path = FsPath::new(&document.file_path);

    if let Some(content_type) = text_content_type(file_path) {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        return Ok(([(header::CONTENT_TYPE, content_type)], text).into_response());
    }

    let mime = mime_guess::from_path(file_path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(AppError::internal)?,
    );
    if let Some(disposition) = file_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(inline_content_disposition)
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((headers, bytes).into_response())
}

async fn read_document_form(mut multipart: Multipart) -> AppResult<DocumentForm> {
    let mut form = DocumentForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("title") => {
                let value = field.text().await.map_err(|err| {
                    let msg = format!("invalid title: {err}");
                    error!(error = %err, "invalid title field");
                    AppError::bad_request(msg)
                })?;
                form.title = Some(value);
            }
            Some("file") => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|err| {
                    let msg = format!("failed to read file bytes: {err}");
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(msg)
                })?;
                form.file = Some(UploadedFile {
                    original_name,
                    bytes,
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

fn store_failure(action: &'static str) -> impl Fn(StoreError) -> AppError {
    move |err| match err {
        StoreError::NotFound(_) | StoreError::FileMissing(_) => AppError::from(err),
        other => {
            error!(error = %other, "error {action}");
            AppError::internal(format!("Error {action}: {other}"))
        }
    }
}

fn text_content_type(path: &FsPath) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "txt" => Some("text/plain; charset=utf-8"),
        "json" => Some("application/json; charset=utf-8"),
        "html" => Some("text/html; charset=utf-8"),
        _ => None,
    }
}

fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}
