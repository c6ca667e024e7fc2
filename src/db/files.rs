use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Db;
use crate::store::{FileIndexRecord, StoreResult};

fn map_record(row: &Row<'_>) -> rusqlite::Result<FileIndexRecord> {
    Ok(FileIndexRecord {
        repo_id: row.get(0)?,
        file_path: row.get(1)?,
        file_hash: row.get(2)?,
        chunk_count: row.get::<_, i64>(3)? as usize,
        last_indexed: row.get(4)?,
    })
}

/// Insert or replace the record for `(repo_id, file_path)`.
pub(crate) fn upsert_record(conn: &Connection, record: &FileIndexRecord) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO file_hashes (repo_id, file_path, file_hash, chunk_count, last_indexed)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(repo_id, file_path) DO UPDATE SET
            file_hash = excluded.file_hash,
            chunk_count = excluded.chunk_count,
            last_indexed = excluded.last_indexed
        "#,
        params![
            record.repo_id,
            record.file_path,
            record.file_hash,
            record.chunk_count as i64,
            record.last_indexed,
        ],
    )?;
    Ok(())
}

impl Db {
    pub fn get_file_record(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> StoreResult<Option<FileIndexRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT repo_id, file_path, file_hash, chunk_count, last_indexed \
                 FROM file_hashes WHERE repo_id = ? AND file_path = ?",
                params![repo_id, file_path],
                map_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records of a repository, ordered by path.
    pub fn list_file_records(&self, repo_id: &str) -> StoreResult<Vec<FileIndexRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT repo_id, file_path, file_hash, chunk_count, last_indexed \
             FROM file_hashes WHERE repo_id = ? ORDER BY file_path",
        )?;
        let rows = stmt.query_map(params![repo_id], map_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
