use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, Transaction, params};

use super::{CHUNK_COLUMNS, Db, map_chunk_row, serialize_vector};
use crate::store::{ChunkDocument, ChunkHit, ClearSummary, IndexStats, StoreError, StoreResult, WriteBatch};

fn delete_file_chunks(tx: &Transaction<'_>, repo_id: &str, file_path: &str) -> StoreResult<usize> {
    // Virtual table rows go first; vec0 has no cascade
    tx.execute(
        "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM code_chunks WHERE repo_id = ? AND file_path = ?)",
        params![repo_id, file_path],
    )?;
    let rows = tx.execute(
        "DELETE FROM code_chunks WHERE repo_id = ? AND file_path = ?",
        params![repo_id, file_path],
    )?;
    Ok(rows)
}

fn insert_document(tx: &Transaction<'_>, doc: &ChunkDocument, dimensions: usize) -> StoreResult<()> {
    let chunk = &doc.chunk;
    if let Some(vector) = &doc.embedding {
        if vector.len() != dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: dimensions,
                actual: vector.len(),
            });
        }
    }

    // Same id re-emitted: replace the old row and its vector
    tx.execute(
        "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM code_chunks WHERE repo_id = ? AND chunk_id = ?)",
        params![doc.repo_id, chunk.chunk_id],
    )?;
    tx.execute(
        "DELETE FROM code_chunks WHERE repo_id = ? AND chunk_id = ?",
        params![doc.repo_id, chunk.chunk_id],
    )?;

    tx.execute(
        r#"
        INSERT INTO code_chunks (
            chunk_id, repo_id, file_path, relative_path, chunk_type, name, parent_name,
            language, signature, content, doc_comment, start_line, end_line,
            imports, calls, bases, indexed_at, file_hash, searchable_text, has_embedding
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            chunk.chunk_id,
            doc.repo_id,
            chunk.file_path,
            chunk.relative_path,
            chunk.kind.as_str(),
            chunk.name,
            chunk.parent_name,
            chunk.language,
            chunk.signature,
            chunk.content,
            chunk.doc_comment,
            chunk.start_line as i64,
            chunk.end_line as i64,
            serde_json::to_string(&chunk.imports)?,
            serde_json::to_string(&chunk.calls)?,
            serde_json::to_string(&chunk.bases)?,
            doc.indexed_at,
            doc.file_hash,
            doc.searchable_text,
            doc.embedding.is_some(),
        ],
    )?;
    let row_id = tx.last_insert_rowid();

    if let Some(vector) = &doc.embedding {
        tx.execute(
            "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
            params![row_id, serialize_vector(vector)],
        )?;
    }
    Ok(())
}

impl Db {
    /// Apply a [`WriteBatch`] in one transaction.
    pub fn apply_batch(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for (repo_id, file_path) in &batch.replaced_files {
            delete_file_chunks(&tx, repo_id, file_path)?;
        }
        for doc in &batch.documents {
            insert_document(&tx, doc, self.dimensions)?;
        }
        for record in &batch.records {
            super::files::upsert_record(&tx, record)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Deletes a file's chunks and its hash record.
    pub fn remove_file(&self, repo_id: &str, file_path: &str) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let deleted = delete_file_chunks(&tx, repo_id, file_path)?;
        tx.execute(
            "DELETE FROM file_hashes WHERE repo_id = ? AND file_path = ?",
            params![repo_id, file_path],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    pub fn chunk_by_id(&self, repo_id: &str, chunk_id: &str) -> StoreResult<Option<ChunkHit>> {
        let conn = self.conn()?;
        let hit = conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS}, 1.0 AS score FROM code_chunks c WHERE c.repo_id = ? AND c.chunk_id = ?"
                ),
                params![repo_id, chunk_id],
                map_chunk_row,
            )
            .optional()?;
        Ok(hit)
    }

    pub fn list_file_chunks(&self, repo_id: &str, file_path: &str) -> StoreResult<Vec<ChunkHit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS}, 1.0 AS score FROM code_chunks c \
             WHERE c.repo_id = ? AND c.file_path = ? ORDER BY c.start_line, c.chunk_id"
        ))?;
        let rows = stmt.query_map(params![repo_id, file_path], map_chunk_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Deletes every chunk and file record of a repository.
    pub fn clear_repo(&self, repo_id: &str) -> StoreResult<ClearSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM code_chunks WHERE repo_id = ?)",
            params![repo_id],
        )?;
        let chunks_deleted = tx.execute("DELETE FROM code_chunks WHERE repo_id = ?", params![repo_id])?;
        let files_deleted = tx.execute("DELETE FROM file_hashes WHERE repo_id = ?", params![repo_id])?;
        tx.commit()?;
        Ok(ClearSummary {
            chunks_deleted,
            files_deleted,
        })
    }

    pub fn collect_stats(&self, repo_id: Option<&str>) -> StoreResult<IndexStats> {
        let conn = self.conn()?;
        let (clause, args): (&str, Vec<&str>) = match repo_id {
            Some(r) => ("WHERE repo_id = ?", vec![r]),
            None => ("", Vec::new()),
        };

        let (total_chunks, total_lines, total_files, with_embedding): (i64, i64, i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), IFNULL(SUM(end_line - start_line + 1), 0), \
                     COUNT(DISTINCT repo_id || ':' || file_path), IFNULL(SUM(has_embedding), 0) \
                     FROM code_chunks {clause}"
                ),
                rusqlite::params_from_iter(args.iter()),
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let group = |column: &str| -> StoreResult<BTreeMap<String, usize>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {column}, COUNT(*) FROM code_chunks {clause} GROUP BY {column}"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?;
            let mut out = BTreeMap::new();
            for row in rows {
                let (key, count) = row?;
                out.insert(key, count);
            }
            Ok(out)
        };

        Ok(IndexStats {
            total_chunks: total_chunks as usize,
            total_lines: total_lines as usize,
            total_files: total_files as usize,
            chunks_with_embedding: with_embedding as usize,
            by_language: group("language")?,
            by_type: group("chunk_type")?,
            by_repo: group("repo_id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkKind;
    use crate::db::test_document;
    use crate::store::FileIndexRecord;
    use chrono::Utc;

    fn vector(seed: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[0] = seed;
        v[1] = 1.0;
        v
    }

    #[test]
    fn test_batch_insert_and_replace() {
        let db = Db::open_in_memory(8).unwrap();
        let mut batch = WriteBatch::default();
        batch.replaced_files.push(("r".into(), "/repo/a.py".into()));
        batch.documents.push(test_document("r", "/repo/a.py", "alpha", ChunkKind::Function, 1, Some(vector(0.1))));
        batch.documents.push(test_document("r", "/repo/a.py", "beta", ChunkKind::Function, 10, None));
        batch.records.push(FileIndexRecord {
            repo_id: "r".into(),
            file_path: "/repo/a.py".into(),
            file_hash: "h1".into(),
            chunk_count: 2,
            last_indexed: Utc::now(),
        });
        db.apply_batch(&batch).unwrap();

        let chunks = db.list_file_chunks("r", "/repo/a.py").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk.name, "alpha");

        let stats = db.collect_stats(Some("r")).unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.chunks_with_embedding, 1);
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_lines, 12);
        assert_eq!(stats.by_type.get("function"), Some(&2));

        // Replacing the file drops both old chunks and their vectors
        let mut second = WriteBatch::default();
        second.replaced_files.push(("r".into(), "/repo/a.py".into()));
        second.documents.push(test_document("r", "/repo/a.py", "gamma", ChunkKind::Class, 3, Some(vector(0.2))));
        db.apply_batch(&second).unwrap();

        let chunks = db.list_file_chunks("r", "/repo/a.py").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk.kind, ChunkKind::Class);
        let vec_rows: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM vec_chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(vec_rows, 1);
    }

    #[test]
    fn test_dimension_checked_on_insert() {
        let db = Db::open_in_memory(8).unwrap();
        let mut batch = WriteBatch::default();
        batch.documents.push(test_document("r", "/repo/a.py", "alpha", ChunkKind::Function, 1, Some(vec![1.0; 3])));
        assert!(matches!(
            db.apply_batch(&batch),
            Err(StoreError::DimensionMismatch { expected: 8, actual: 3 })
        ));
        // nothing from the failed batch is visible
        assert!(db.list_file_chunks("r", "/repo/a.py").unwrap().is_empty());
    }

    #[test]
    fn test_chunk_by_id_and_remove_file() {
        let db = Db::open_in_memory(8).unwrap();
        let doc = test_document("r", "/repo/a.py", "alpha", ChunkKind::Function, 1, Some(vector(0.5)));
        let id = doc.chunk.chunk_id.clone();
        let mut batch = WriteBatch::default();
        batch.documents.push(doc);
        db.apply_batch(&batch).unwrap();

        let hit = db.chunk_by_id("r", &id).unwrap().expect("stored chunk");
        assert_eq!(hit.chunk.name, "alpha");
        assert_eq!(hit.chunk.signature.as_deref(), Some("def alpha()"));
        assert!(db.chunk_by_id("other", &id).unwrap().is_none());

        assert_eq!(db.remove_file("r", "/repo/a.py").unwrap(), 1);
        assert!(db.chunk_by_id("r", &id).unwrap().is_none());
    }

    #[test]
    fn test_clear_repo_is_scoped() {
        let db = Db::open_in_memory(8).unwrap();
        let mut batch = WriteBatch::default();
        batch.documents.push(test_document("one", "/repo/a.py", "alpha", ChunkKind::Function, 1, Some(vector(0.1))));
        batch.documents.push(test_document("two", "/repo/a.py", "alpha", ChunkKind::Function, 1, Some(vector(0.1))));
        db.apply_batch(&batch).unwrap();

        let summary = db.clear_repo("one").unwrap();
        assert_eq!(summary.chunks_deleted, 1);
        let stats = db.collect_stats(None).unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.by_repo.get("two"), Some(&1));
        assert!(!stats.by_repo.contains_key("one"));
    }
}
