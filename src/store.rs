use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use diesel::r2d2::PoolError;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::{PgPool, PgPooledConnection};
use crate::models::{Document, DocumentChangeset, NewDocument};
use crate::repository::{self, RepositoryError};
use crate::storage::{FileStorage, StoredFile};
use crate::validation::{CreateDocumentInput, PageRequest, UpdateDocumentInput};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document with ID {0} not found.")]
    NotFound(i32),
    #[error("File for document with ID {0} not found on disk.")]
    FileMissing(i32),
    #[error("database pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Database(diesel::result::Error),
    #[error("file storage error: {0:#}")]
    Storage(anyhow::Error),
    #[error("document {id} was updated but its previous file {path} could not be removed: {cause:#}")]
    Cleanup {
        id: i32,
        path: String,
        cause: anyhow::Error,
    },
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => StoreError::NotFound(id),
            RepositoryError::Database(err) => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keeps `document` rows and their files on disk in step.
///
/// Files are written before the row that references them and removed only
/// after the row stops referencing them (update) or right before the row goes
/// away (delete). A failed removal during delete leaves the row in place so
/// the delete can be retried.
#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
    storage: Arc<dyn FileStorage>,
}

impl DocumentStore {
    pub fn new(pool: PgPool, storage: Arc<dyn FileStorage>) -> Self {
        Self { pool, storage }
    }

    fn conn(&self) -> StoreResult<PgPooledConnection> {
        Ok(self.pool.get()?)
    }

    pub fn find_page(&self, page: PageRequest) -> StoreResult<Vec<Document>> {
        let mut conn = self.conn()?;
        Ok(repository::find_page(&mut conn, page.offset(), page.limit)?)
    }

    pub fn find_by_id(&self, id: i32) -> StoreResult<Document> {
        let mut conn = self.conn()?;
        Ok(repository::find_by_id(&mut conn, id)?)
    }

    pub async fn insert(&self, input: CreateDocumentInput) -> StoreResult<Document> {
        let CreateDocumentInput { title, file } = input;
        let stored = self.store_file(&title, &file.original_name, &file.bytes).await?;

        let record = NewDocument {
            title,
            file_path: stored.path.clone(),
        };
        let inserted = self
            .conn()
            .and_then(|mut conn| Ok(repository::insert(&mut conn, &record)?));

        match inserted {
            Ok(document) => {
                info!(
                    document_id = document.id,
                    file_path = %document.file_path,
                    size_bytes = stored.size_bytes,
                    "document created"
                );
                Ok(document)
            }
            Err(err) => {
                error!(error = %err, file_path = %stored.path, "failed to insert document row");
                self.discard(&stored.path).await;
                Err(err)
            }
        }
    }

    pub async fn update_fields(
        &self,
        id: i32,
        input: UpdateDocumentInput,
    ) -> StoreResult<Document> {
        let existing = self.find_by_id(id)?;
        if input.is_empty() {
            debug!(document_id = id, "update without changes");
            return Ok(existing);
        }

        let UpdateDocumentInput { title, file } = input;
        let replacement = match file {
            Some(file) => {
                let name_title = title.as_deref().unwrap_or(&existing.title);
                Some(
                    self.store_file(name_title, &file.original_name, &file.bytes)
                        .await?,
                )
            }
            None => None,
        };

        let changeset = DocumentChangeset {
            title,
            file_path: replacement.as_ref().map(|stored| stored.path.clone()),
        };
        let updated = self
            .conn()
            .and_then(|mut conn| Ok(repository::update_fields(&mut conn, id, &changeset)?));

        let updated = match updated {
            Ok(document) => document,
            Err(err) => {
                error!(document_id = id, error = %err, "failed to update document row");
                if let Some(stored) = &replacement {
                    self.discard(&stored.path).await;
                }
                return Err(err);
            }
        };

        if replacement.is_some() && existing.file_path != updated.file_path {
            match self.storage.remove(&existing.file_path).await {
                Ok(true) => {}
                Ok(false) => warn!(
                    document_id = id,
                    file_path = %existing.file_path,
                    "previous file was already missing"
                ),
                Err(cause) => {
                    error!(
                        document_id = id,
                        file_path = %existing.file_path,
                        error = %cause,
                        "document updated but previous file could not be removed"
                    );
                    return Err(StoreError::Cleanup {
                        id,
                        path: existing.file_path,
                        cause,
                    });
                }
            }
        }

        info!(
            document_id = id,
            file_replaced = replacement.is_some(),
            "document updated"
        );
        Ok(updated)
    }

    pub async fn delete(&self, id: i32) -> StoreResult<()> {
        let existing = self.find_by_id(id)?;

        match self.storage.remove(&existing.file_path).await {
            Ok(true) => {}
            Ok(false) => warn!(
                document_id = id,
                file_path = %existing.file_path,
                "file was already missing, deleting row anyway"
            ),
            Err(err) => {
                error!(
                    document_id = id,
                    file_path = %existing.file_path,
                    error = %err,
                    "failed to remove document file, keeping row"
                );
                return Err(StoreError::Storage(err));
            }
        }

        let mut conn = self.conn()?;
        repository::delete(&mut conn, id)?;
        info!(document_id = id, file_path = %existing.file_path, "document deleted");
        Ok(())
    }

    pub async fn read_content(&self, id: i32) -> StoreResult<(Document, Vec<u8>)> {
        let document = self.find_by_id(id)?;
        if !self.storage.is_file(&document.file_path).await {
            warn!(
                document_id = id,
                file_path = %document.file_path,
                "document file not found on disk"
            );
            return Err(StoreError::FileMissing(id));
        }

        let bytes = self
            .storage
            .read(&document.file_path)
            .await
            .map_err(StoreError::Storage)?;
        Ok((document, bytes))
    }

    /// Files in the upload directory that no row references. Both sides are
    /// compared as canonical paths, so a differently spelled upload directory
    /// still matches the stored `filePath` values.
    pub async fn orphaned_files(&self) -> StoreResult<Vec<String>> {
        let recorded = {
            let mut conn = self.conn()?;
            repository::all_file_paths(&mut conn)?
        };
        let mut referenced = HashSet::with_capacity(recorded.len());
        for path in &recorded {
            if let Some(resolved) = canonical_path(path).await {
                referenced.insert(resolved);
            }
        }

        let stored = self.storage.list().await.map_err(StoreError::Storage)?;
        let mut orphans = Vec::new();
        for path in stored {
            match canonical_path(&path).await {
                Some(resolved) if !referenced.contains(&resolved) => orphans.push(path),
                Some(_) => {}
                None => debug!(file_path = %path, "file vanished while scanning uploads"),
            }
        }
        Ok(orphans)
    }

    pub async fn remove_file(&self, path: &str) -> StoreResult<bool> {
        self.storage.remove(path).await.map_err(StoreError::Storage)
    }

    async fn store_file(
        &self,
        title: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> StoreResult<StoredFile> {
        self.storage
            .store(title, original_name, bytes)
            .await
            .map_err(|err| {
                error!(error = %err, original_name, "failed to store uploaded file");
                StoreError::Storage(err)
            })
    }

    async fn discard(&self, path: &str) {
        if let Err(err) = self.storage.remove(path).await {
            warn!(file_path = %path, error = %err, "failed to discard unreferenced file");
        }
    }
}

async fn canonical_path(path: &str) -> Option<PathBuf> {
    tokio::fs::canonicalize(path).await.ok()
}
