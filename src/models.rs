use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::*;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = document)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i32,
    pub title: String,
    pub file_path: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document)]
pub struct NewDocument {
    pub title: String,
    pub file_path: String,
}

/// Partial update of a document row. `None` leaves the column untouched;
/// `updatedAt` is refreshed by the repository on every update.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = document)]
pub struct DocumentChangeset {
    pub title: Option<String>,
    pub file_path: Option<String>,
}
