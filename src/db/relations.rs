use rusqlite::types::Value;

use super::{CHUNK_COLUMNS, Db};
use crate::store::{ChunkHit, StoreResult};

impl Db {
    /// Chunks whose recorded calls include `name`.
    pub fn find_callers(
        &self,
        name: &str,
        repo_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        let mut params = vec![Value::Text(name.to_string())];
        let mut sql = format!(
            "SELECT {CHUNK_COLUMNS}, 1.0 AS score FROM code_chunks c \
             WHERE EXISTS (SELECT 1 FROM json_each(c.calls) WHERE json_each.value = ?)"
        );
        if let Some(repo) = repo_id {
            sql.push_str(" AND c.repo_id = ?");
            params.push(Value::Text(repo.to_string()));
        }
        sql.push_str(" ORDER BY c.repo_id, c.file_path, c.start_line LIMIT ?");
        params.push(Value::Integer(limit as i64));

        self.query_hits(&sql, &params)
    }

    /// Methods and nested units recorded under `parent_name`.
    pub fn find_members(
        &self,
        repo_id: &str,
        parent_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}, 1.0 AS score FROM code_chunks c \
             WHERE c.repo_id = ? AND c.parent_name = ? \
             ORDER BY c.file_path, c.start_line LIMIT ?"
        );
        self.query_hits(
            &sql,
            &[
                Value::Text(repo_id.to_string()),
                Value::Text(parent_name.to_string()),
                Value::Integer(limit as i64),
            ],
        )
    }

    /// Chunks of one file overlapping the inclusive line range.
    pub fn find_in_range(
        &self,
        repo_id: &str,
        relative_path: &str,
        start: usize,
        end: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}, 1.0 AS score FROM code_chunks c \
             WHERE c.repo_id = ? AND c.relative_path = ? \
             AND c.start_line <= ? AND c.end_line >= ? \
             ORDER BY c.start_line, c.end_line"
        );
        self.query_hits(
            &sql,
            &[
                Value::Text(repo_id.to_string()),
                Value::Text(relative_path.to_string()),
                Value::Integer(end as i64),
                Value::Integer(start as i64),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkKind;
    use crate::db::test_document;
    use crate::store::WriteBatch;

    fn seeded_db() -> Db {
        let db = Db::open_in_memory(4).unwrap();
        let mut batch = WriteBatch::default();

        let mut login = test_document("r", "/repo/auth.py", "login", ChunkKind::Function, 1, None);
        login.chunk.calls = vec!["validate_token".into(), "load_user".into()];
        batch.documents.push(login);

        let mut refresh = test_document("r", "/repo/session.py", "refresh", ChunkKind::Method, 10, None);
        refresh.chunk.calls = vec!["validate_token".into()];
        refresh.chunk.parent_name = Some("Session".into());
        batch.documents.push(refresh);

        let mut close = test_document("r", "/repo/session.py", "close", ChunkKind::Method, 20, None);
        close.chunk.parent_name = Some("Session".into());
        batch.documents.push(close);

        let mut foreign = test_document("x", "/repo/auth.py", "login", ChunkKind::Function, 1, None);
        foreign.chunk.calls = vec!["validate_token".into()];
        batch.documents.push(foreign);

        db.apply_batch(&batch).unwrap();
        db
    }

    #[test]
    fn test_find_callers() {
        let db = seeded_db();
        let callers = db.find_callers("validate_token", Some("r"), 10).unwrap();
        let names: Vec<_> = callers.iter().map(|h| h.chunk.name.as_str()).collect();
        assert_eq!(names, vec!["login", "refresh"]);

        assert_eq!(db.find_callers("validate_token", None, 10).unwrap().len(), 3);
        assert!(db.find_callers("validate", Some("r"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_find_members() {
        let db = seeded_db();
        let members = db.find_members("r", "Session", 10).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].chunk.name, "refresh");
        assert!(db.find_members("x", "Session", 10).unwrap().is_empty());
    }

    #[test]
    fn test_find_in_range_overlap() {
        let db = seeded_db();
        // refresh spans 10-15, close spans 20-25
        let hits = db.find_in_range("r", "session.py", 14, 21).unwrap();
        assert_eq!(hits.len(), 2);
        let hits = db.find_in_range("r", "session.py", 16, 19).unwrap();
        assert!(hits.is_empty());
        let hits = db.find_in_range("r", "session.py", 25, 40).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.name, "close");
    }
}
