//! Metadata for blobs written to the file store.

use rusqlite::params;

use crate::codec::{get_ts, ts};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::StoredFile;

const FILE_COLUMNS: &str =
    "path, container, original_name, content_type, size, blake3_hash, uploaded_by, created_date";

impl Database {
    /// Record a stored blob.  Re-uploading to the same path replaces the row.
    pub fn insert_file(&self, file: &StoredFile) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO files ({FILE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                file.path,
                file.container,
                file.original_name,
                file.content_type,
                file.size,
                file.blake3_hash,
                file.uploaded_by,
                ts(&file.created_date),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<StoredFile> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1"),
                params![path],
                row_to_file,
            )
            .map_err(not_found)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredFile> {
    Ok(StoredFile {
        path: row.get("path")?,
        container: row.get("container")?,
        original_name: row.get("original_name")?,
        content_type: row.get("content_type")?,
        size: row.get("size")?,
        blake3_hash: row.get("blake3_hash")?,
        uploaded_by: row.get("uploaded_by")?,
        created_date: get_ts(row, "created_date")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use chrono::Utc;

    #[test]
    fn insert_replaces_same_path() {
        let db = Database::open_in_memory().unwrap();
        let mut f = StoredFile {
            path: "lessons/abc.pdf".into(),
            container: "lesson-files".into(),
            original_name: "abc.pdf".into(),
            content_type: Some("application/pdf".into()),
            size: 10,
            blake3_hash: "00".into(),
            uploaded_by: Some("t@x.com".into()),
            created_date: Utc::now(),
        };
        db.insert_file(&f).unwrap();
        f.size = 20;
        db.insert_file(&f).unwrap();

        assert_eq!(db.get_file("lessons/abc.pdf").unwrap().size, 20);
        assert!(matches!(db.get_file("missing"), Err(StoreError::NotFound)));
    }
}
