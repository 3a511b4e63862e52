use diesel::dsl::now;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;

use crate::models::{Document, DocumentChangeset, NewDocument};
use crate::schema::document;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document with ID {0} not found")]
    NotFound(i32),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Loads `count` documents after skipping `offset`, in insertion order.
pub fn find_page(
    conn: &mut PgConnection,
    offset: i64,
    count: i64,
) -> RepositoryResult<Vec<Document>> {
    let rows = document::table
        .order(document::id.asc())
        .offset(offset)
        .limit(count)
        .select(Document::as_select())
        .load(conn)?;
    Ok(rows)
}

pub fn find_by_id(conn: &mut PgConnection, id: i32) -> RepositoryResult<Document> {
    document::table
        .find(id)
        .select(Document::as_select())
        .first(conn)
        .optional()?
        .ok_or(RepositoryError::NotFound(id))
}

pub fn insert(conn: &mut PgConnection, record: &NewDocument) -> RepositoryResult<Document> {
    let created = diesel::insert_into(document::table)
        .values(record)
        .returning(Document::as_returning())
        .get_result(conn)?;
    Ok(created)
}

pub fn update_fields(
    conn: &mut PgConnection,
    id: i32,
    changeset: &DocumentChangeset,
) -> RepositoryResult<Document> {
    diesel::update(document::table.find(id))
        .set((changeset, document::updated_at.eq(now)))
        .returning(Document::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(RepositoryError::NotFound(id))
}

pub fn delete(conn: &mut PgConnection, id: i32) -> RepositoryResult<()> {
    let deleted = diesel::delete(document::table.find(id)).execute(conn)?;
    if deleted == 0 {
        return Err(RepositoryError::NotFound(id));
    }
    Ok(())
}

pub fn all_file_paths(conn: &mut PgConnection) -> RepositoryResult<Vec<String>> {
    let paths = document::table.select(document::file_path).load(conn)?;
    Ok(paths)
}
