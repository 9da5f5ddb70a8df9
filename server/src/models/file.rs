//! Stored file blobs and their metadata
//!
//! Blobs live in the database and are immutable once written. Metadata
//! reads never touch `file_data`, so listings stay cheap.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::{files, request_files};

/// Per-file size ceiling for uploads (15 MB).
pub const MAX_FILE_SIZE: usize = 15 * 1024 * 1024;

/// Metadata without the blob itself.
#[derive(Debug, Clone, Serialize, Queryable)]
pub struct FileMeta {
    pub id: i32,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = files)]
pub struct NewFile {
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_data: Vec<u8>,
}

type FileMetaColumns = (
    files::id,
    files::file_name,
    files::mime_type,
    files::file_size,
    files::created_at,
);

const FILE_META_COLUMNS: FileMetaColumns = (
    files::id,
    files::file_name,
    files::mime_type,
    files::file_size,
    files::created_at,
);

impl FileMeta {
    pub fn find(conn: &mut PgConnection, file_id: i32) -> QueryResult<FileMeta> {
        files::table
            .find(file_id)
            .select(FILE_META_COLUMNS)
            .first(conn)
    }

    pub fn list_for_request(
        conn: &mut PgConnection,
        request_id: i32,
    ) -> QueryResult<Vec<FileMeta>> {
        request_files::table
            .inner_join(files::table)
            .filter(request_files::request_id.eq(request_id))
            .select(FILE_META_COLUMNS)
            .order(files::id.asc())
            .load(conn)
    }
}

/// Insert a blob and return its id.
pub fn insert_file(conn: &mut PgConnection, new_file: NewFile) -> QueryResult<i32> {
    diesel::insert_into(files::table)
        .values(&new_file)
        .returning(files::id)
        .get_result(conn)
}

/// Fetch the raw bytes for a stored file.
pub fn file_data(conn: &mut PgConnection, file_id: i32) -> QueryResult<Vec<u8>> {
    files::table
        .find(file_id)
        .select(files::file_data)
        .first(conn)
}
