use rusqlite::types::Value;

use super::{CHUNK_COLUMNS, Db, like_escape, map_chunk_row, serialize_vector};
use crate::store::{ChunkFilter, ChunkHit, StoreError, StoreResult};

/// Field weights for lexical scoring.
const NAME_WEIGHT: f64 = 3.0;
const SIGNATURE_WEIGHT: f64 = 2.0;
const DOC_WEIGHT: f64 = 2.0;
const CONTENT_WEIGHT: f64 = 1.0;

/// Symbol match tiers, best first.
const EXACT_SCORE: f64 = 3.0;
const CASELESS_SCORE: f64 = 2.0;
const NAME_SUBSTRING_SCORE: f64 = 1.0;
const SIGNATURE_SUBSTRING_SCORE: f64 = 0.5;

pub(crate) fn push_filter(filter: &ChunkFilter, clauses: &mut Vec<String>, params: &mut Vec<Value>) {
    if let Some(repo) = &filter.repo_id {
        clauses.push("c.repo_id = ?".to_string());
        params.push(Value::Text(repo.clone()));
    }
    if let Some(lang) = &filter.language {
        clauses.push("c.language = ?".to_string());
        params.push(Value::Text(lang.clone()));
    }
    if let Some(kind) = filter.chunk_type {
        clauses.push("c.chunk_type = ?".to_string());
        params.push(Value::Text(kind.as_str().to_string()));
    }
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

impl Db {
    pub(crate) fn query_hits(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<ChunkHit>> {
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_chunk_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Vector similarity search using cosine distance; score is `1 - d/2`.
    pub fn search_vectors(
        &self,
        query_vector: &[f32],
        filter: &ChunkFilter,
        top_k: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut clauses = Vec::new();
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(query_vector))];
        push_filter(filter, &mut clauses, &mut params);

        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}, 1.0 - (vec_distance_cosine(v.embedding, ?) / 2.0) AS score
            FROM vec_chunks v
            JOIN code_chunks c ON v.rowid = c.id
            {}
            ORDER BY score DESC LIMIT ?
            "#,
            where_sql(&clauses)
        );
        params.push(Value::Integer(top_k as i64));

        self.query_hits(&sql, &params)
    }

    /// Weighted term search over name, signature, doc comment and content.
    pub fn search_terms(
        &self,
        terms: &[String],
        filter: &ChunkFilter,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        let terms: Vec<String> = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut params: Vec<Value> = Vec::new();
        let mut parts = Vec::new();
        for term in &terms {
            let pattern = format!("%{}%", like_escape(term));
            parts.push(format!(
                "(LOWER(c.name) LIKE ? ESCAPE '\\') * {NAME_WEIGHT} \
                 + (LOWER(IFNULL(c.signature, '')) LIKE ? ESCAPE '\\') * {SIGNATURE_WEIGHT} \
                 + (LOWER(IFNULL(c.doc_comment, '')) LIKE ? ESCAPE '\\') * {DOC_WEIGHT} \
                 + (LOWER(c.content) LIKE ? ESCAPE '\\') * {CONTENT_WEIGHT}"
            ));
            for _ in 0..4 {
                params.push(Value::Text(pattern.clone()));
            }
        }

        let mut clauses = Vec::new();
        push_filter(filter, &mut clauses, &mut params);
        let sql = format!(
            "SELECT * FROM (SELECT {CHUNK_COLUMNS}, ({}) AS score FROM code_chunks c{}) \
             WHERE score > 0 ORDER BY score DESC, start_line ASC LIMIT ?",
            parts.join(" + "),
            where_sql(&clauses)
        );
        params.push(Value::Integer(limit as i64));

        self.query_hits(&sql, &params)
    }

    /// Exact-then-fuzzy symbol lookup.
    ///
    /// Exact name 3.0, case-insensitive name 2.0, name substring 1.0,
    /// signature substring 0.5. `exact` keeps only the first two tiers.
    pub fn search_symbol(
        &self,
        name: &str,
        filter: &ChunkFilter,
        exact: bool,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Rejected("empty symbol name".to_string()));
        }
        let lowered = name.to_lowercase();
        let pattern = format!("%{}%", like_escape(&lowered));

        let score_sql = format!(
            "CASE WHEN c.name = ? THEN {EXACT_SCORE} \
             WHEN LOWER(c.name) = ? THEN {CASELESS_SCORE} \
             WHEN LOWER(c.name) LIKE ? ESCAPE '\\' THEN {NAME_SUBSTRING_SCORE} \
             WHEN LOWER(IFNULL(c.signature, '')) LIKE ? ESCAPE '\\' THEN {SIGNATURE_SUBSTRING_SCORE} \
             ELSE 0 END"
        );
        let mut params = vec![
            Value::Text(name.to_string()),
            Value::Text(lowered.clone()),
            Value::Text(pattern.clone()),
            Value::Text(pattern),
        ];

        let mut clauses = Vec::new();
        push_filter(filter, &mut clauses, &mut params);
        let threshold = if exact { CASELESS_SCORE } else { 0.0 };
        let sql = format!(
            "SELECT * FROM (SELECT {CHUNK_COLUMNS}, ({score_sql}) AS score FROM code_chunks c{}) \
             WHERE score > 0 AND score >= {threshold} \
             ORDER BY score DESC, LENGTH(name) ASC, start_line ASC LIMIT ?",
            where_sql(&clauses)
        );
        params.push(Value::Integer(limit as i64));

        self.query_hits(&sql, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkKind;
    use crate::db::test_document;
    use crate::store::WriteBatch;

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[..values.len()].copy_from_slice(values);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    fn seeded_db() -> Db {
        let db = Db::open_in_memory(8).unwrap();
        let mut batch = WriteBatch::default();
        let mut validate =
            test_document("r", "/repo/auth.py", "validate_token", ChunkKind::Function, 3, Some(unit(&[1.0, 0.0])));
        validate.chunk.doc_comment = Some("Check a bearer token".into());
        batch.documents.push(validate);
        batch.documents.push(test_document(
            "r",
            "/repo/auth.py",
            "TokenValidator",
            ChunkKind::Class,
            20,
            Some(unit(&[0.8, 0.6])),
        ));
        let mut render =
            test_document("r", "/repo/ui.js", "render_chart", ChunkKind::Function, 1, Some(unit(&[0.0, 1.0])));
        render.chunk.language = "javascript".into();
        batch.documents.push(render);
        batch.documents.push(test_document(
            "other",
            "/repo/auth.py",
            "validate_token",
            ChunkKind::Function,
            3,
            Some(unit(&[1.0, 0.0])),
        ));
        db.apply_batch(&batch).unwrap();
        db
    }

    #[test]
    fn test_vector_search_orders_by_similarity() {
        let db = seeded_db();
        let hits = db
            .search_vectors(&unit(&[1.0, 0.0]), &ChunkFilter::repo("r"), 10)
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.name, "validate_token");
        assert!(hits[0].score > 0.99);
        assert_eq!(hits[2].chunk.name, "render_chart");
        assert!(hits.iter().all(|h| h.repo_id == "r"));
    }

    #[test]
    fn test_vector_search_filters() {
        let db = seeded_db();
        let filter = ChunkFilter {
            repo_id: Some("r".into()),
            language: Some("javascript".into()),
            chunk_type: None,
        };
        let hits = db.search_vectors(&unit(&[1.0, 0.0]), &filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.name, "render_chart");

        let classes = ChunkFilter {
            chunk_type: Some(ChunkKind::Class),
            ..ChunkFilter::default()
        };
        let hits = db.search_vectors(&unit(&[1.0, 0.0]), &classes, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.name, "TokenValidator");
    }

    #[test]
    fn test_vector_search_rejects_wrong_dimensions() {
        let db = seeded_db();
        assert!(matches!(
            db.search_vectors(&[1.0, 0.0], &ChunkFilter::default(), 5),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_lexical_weights() {
        let db = seeded_db();
        let hits = db
            .search_terms(&["token".to_string()], &ChunkFilter::repo("r"), 10)
            .unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.chunk.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        // name + signature + doc + content beats name + signature + content
        assert_eq!(names[0], "validate_token");
        assert!((hits[0].score - 8.0).abs() < 1e-9);
        assert!((hits[1].score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_lexical_escapes_wildcards() {
        let db = seeded_db();
        let hits = db
            .search_terms(&["%".to_string()], &ChunkFilter::default(), 10)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_symbol_tiers() {
        let db = seeded_db();
        let filter = ChunkFilter::repo("r");

        let hits = db.search_symbol("validate_token", &filter, false, 10).unwrap();
        assert_eq!(hits[0].chunk.name, "validate_token");
        assert!((hits[0].score - EXACT_SCORE).abs() < 1e-9);

        let hits = db.search_symbol("tokenvalidator", &filter, false, 10).unwrap();
        assert_eq!(hits[0].chunk.name, "TokenValidator");
        assert!((hits[0].score - CASELESS_SCORE).abs() < 1e-9);

        let hits = db.search_symbol("token", &filter, false, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| (h.score - NAME_SUBSTRING_SCORE).abs() < 1e-9));

        let hits = db.search_symbol("token", &filter, true, 10).unwrap();
        assert!(hits.is_empty());

        assert!(matches!(
            db.search_symbol("  ", &filter, false, 10),
            Err(StoreError::Rejected(_))
        ));
    }
}
