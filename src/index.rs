//! Keyword and vector index interfaces with SQLite implementations.
//!
//! Both indices are addressed by `document_uuid` and carry denormalized
//! filterable scalars (doc type, project, status, tags) so filtered queries
//! never join the catalog per hit.
//!
//! - **Keyword** — FTS5 full-text search using BM25 scoring.
//! - **Vector** — brute-force cosine similarity over stored vectors.
//! - **Hybrid** — weighted merge of both with min-max normalization;
//!   the vector weight defaults to 0.5 and is overridable per query.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::ai::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{HermesError, Result};

/// Denormalized document pushed to the keyword index.
#[derive(Debug, Clone)]
pub struct SearchableDoc {
    pub document_uuid: Uuid,
    pub title: String,
    pub body: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub doc_type: String,
    pub project_uuid: Uuid,
    pub status: String,
}

/// Denormalized document pushed to the vector index.
#[derive(Debug, Clone)]
pub struct VectorDoc {
    pub document_uuid: Uuid,
    pub model_id: String,
    pub vector: Vec<f32>,
    pub title: String,
    pub doc_type: String,
    pub project_uuid: Uuid,
    pub status: String,
    pub tags: Vec<String>,
}

/// Scalar filters applied to both indices.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub project_uuid: Option<Uuid>,
    pub doc_type: Option<String>,
    pub status: Option<String>,
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_uuid: Uuid,
    /// Normalized relevance in `[0.0, 1.0]`.
    pub score: f64,
    pub title: String,
    pub doc_type: String,
    pub project_uuid: Uuid,
    pub status: String,
    pub snippet: String,
}

/// Keyword index contract.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, doc: &SearchableDoc) -> Result<()>;
    async fn delete(&self, document_uuid: Uuid) -> Result<()>;
    async fn query(&self, text: &str, filters: &SearchFilters, limit: i64)
        -> Result<Vec<SearchHit>>;
}

/// Vector index contract.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, doc: &VectorDoc) -> Result<()>;
    async fn delete(&self, document_uuid: Uuid) -> Result<()>;
    async fn search_similar(
        &self,
        vector: &[f32],
        limit: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;
}

// ============ SQLite keyword index ============

#[derive(Clone)]
pub struct SqliteSearchIndex {
    pool: SqlitePool,
}

impl SqliteSearchIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn upsert(&self, doc: &SearchableDoc) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE document_uuid = ?")
            .bind(doc.document_uuid.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO search_index
                (document_uuid, title, body, summary, tags, doc_type, project_uuid, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc.document_uuid.to_string())
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.summary)
        .bind(doc.tags.join(" "))
        .bind(&doc.doc_type)
        .bind(doc.project_uuid.to_string())
        .bind(&doc.status)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, document_uuid: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM search_index WHERE document_uuid = ?")
            .bind(document_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            r#"
            SELECT document_uuid, title, doc_type, project_uuid, status, rank,
                   snippet(search_index, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM search_index
            WHERE search_index MATCH ?
            "#,
        );
        if filters.project_uuid.is_some() {
            sql.push_str(" AND project_uuid = ?");
        }
        if filters.doc_type.is_some() {
            sql.push_str(" AND doc_type = ?");
        }
        if filters.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut query = sqlx::query(&sql).bind(text);
        if let Some(project_uuid) = filters.project_uuid {
            query = query.bind(project_uuid.to_string());
        }
        if let Some(doc_type) = &filters.doc_type {
            query = query.bind(doc_type);
        }
        if let Some(status) = &filters.status {
            query = query.bind(status);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Ok(SearchHit {
                    document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
                    // FTS5 rank is negative, lower is better.
                    score: -rank,
                    title: row.get("title"),
                    doc_type: row.get("doc_type"),
                    project_uuid: parse_uuid(row.get::<String, _>("project_uuid").as_str())?,
                    status: row.get("status"),
                    snippet: row.get("snippet"),
                })
            })
            .collect()
    }
}

// ============ SQLite vector index ============

#[derive(Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, doc: &VectorDoc) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vector_index
                (document_uuid, model_id, vector, title, doc_type, project_uuid, status, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_uuid) DO UPDATE SET
                model_id = excluded.model_id,
                vector = excluded.vector,
                title = excluded.title,
                doc_type = excluded.doc_type,
                project_uuid = excluded.project_uuid,
                status = excluded.status,
                tags = excluded.tags
            "#,
        )
        .bind(doc.document_uuid.to_string())
        .bind(&doc.model_id)
        .bind(vec_to_blob(&doc.vector))
        .bind(&doc.title)
        .bind(&doc.doc_type)
        .bind(doc.project_uuid.to_string())
        .bind(&doc.status)
        .bind(serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".into()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, document_uuid: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM vector_index WHERE document_uuid = ?")
            .bind(document_uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_similar(
        &self,
        vector: &[f32],
        limit: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let mut sql = String::from(
            "SELECT document_uuid, vector, title, doc_type, project_uuid, status FROM vector_index WHERE 1=1",
        );
        if filters.project_uuid.is_some() {
            sql.push_str(" AND project_uuid = ?");
        }
        if filters.doc_type.is_some() {
            sql.push_str(" AND doc_type = ?");
        }
        if filters.status.is_some() {
            sql.push_str(" AND status = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(project_uuid) = filters.project_uuid {
            query = query.bind(project_uuid.to_string());
        }
        if let Some(doc_type) = &filters.doc_type {
            query = query.bind(doc_type);
        }
        if let Some(status) = &filters.status {
            query = query.bind(status);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let stored = blob_to_vec(&blob);
                let similarity = cosine_similarity(vector, &stored) as f64;
                Ok(SearchHit {
                    document_uuid: parse_uuid(row.get::<String, _>("document_uuid").as_str())?,
                    score: similarity,
                    title: row.get("title"),
                    doc_type: row.get("doc_type"),
                    project_uuid: parse_uuid(row.get::<String, _>("project_uuid").as_str())?,
                    status: row.get("status"),
                    snippet: String::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }
}

// ============ Hybrid merge ============

/// Combine keyword and vector hits into one ranked list.
///
/// 1. Fetch up to `candidate_k` candidates from each index.
/// 2. Min-max normalize both score sets to `[0, 1]`.
/// 3. Merge: `score = (1 - w) × keyword + w × vector`.
/// 4. Sort by score desc, uuid asc; truncate to `limit`.
#[allow(clippy::too_many_arguments)]
pub async fn hybrid_search(
    search: &dyn SearchIndex,
    vector_index: &dyn VectorIndex,
    text: &str,
    query_vector: Option<&[f32]>,
    vector_weight: f64,
    filters: &SearchFilters,
    candidate_k: i64,
    limit: i64,
) -> Result<Vec<SearchHit>> {
    let keyword_hits = if vector_weight < 1.0 {
        search.query(text, filters, candidate_k).await?
    } else {
        Vec::new()
    };

    let vector_hits = match query_vector {
        Some(vec) if vector_weight > 0.0 => {
            vector_index.search_similar(vec, candidate_k, filters).await?
        }
        _ => Vec::new(),
    };

    Ok(merge_hits(keyword_hits, vector_hits, vector_weight, limit))
}

/// The pure merge step, separated for testability.
pub fn merge_hits(
    keyword: Vec<SearchHit>,
    vector: Vec<SearchHit>,
    vector_weight: f64,
    limit: i64,
) -> Vec<SearchHit> {
    let kw_norm = normalize_scores(&keyword);
    let vec_norm = normalize_scores(&vector);

    let kw_map: HashMap<Uuid, f64> = keyword
        .iter()
        .zip(kw_norm.iter())
        .map(|(hit, score)| (hit.document_uuid, *score))
        .collect();
    let vec_map: HashMap<Uuid, f64> = vector
        .iter()
        .zip(vec_norm.iter())
        .map(|(hit, score)| (hit.document_uuid, *score))
        .collect();

    let mut by_uuid: HashMap<Uuid, SearchHit> = HashMap::new();
    for hit in keyword.into_iter().chain(vector.into_iter()) {
        by_uuid.entry(hit.document_uuid).or_insert(hit);
    }

    let mut merged: Vec<SearchHit> = by_uuid
        .into_values()
        .map(|mut hit| {
            let k = kw_map.get(&hit.document_uuid).copied().unwrap_or(0.0);
            let v = vec_map.get(&hit.document_uuid).copied().unwrap_or(0.0);
            hit.score = (1.0 - vector_weight) * k + vector_weight * v;
            hit
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_uuid.cmp(&b.document_uuid))
    });
    merged.truncate(limit as usize);
    merged
}

/// Min-max normalize raw scores to `[0.0, 1.0]`; all-equal sets collapse
/// to `1.0`.
fn normalize_scores(hits: &[SearchHit]) -> Vec<f64> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let max = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|h| {
            if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (h.score - min) / (max - min)
            }
        })
        .collect()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| HermesError::PermanentBackend(format!("corrupt uuid in index: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(uuid: Uuid, score: f64) -> SearchHit {
        SearchHit {
            document_uuid: uuid,
            score,
            title: String::new(),
            doc_type: String::new(),
            project_uuid: Uuid::nil(),
            status: String::new(),
            snippet: String::new(),
        }
    }

    fn u(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let scores = normalize_scores(&[hit(u(1), 5.0)]);
        assert!((scores[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let hits = vec![hit(u(1), 10.0), hit(u(2), 5.0), hit(u(3), 0.0)];
        let scores = normalize_scores(&hits);
        assert!((scores[0] - 1.0).abs() < 1e-9);
        assert!((scores[1] - 0.5).abs() < 1e-9);
        assert!((scores[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_weight_zero_is_keyword_order() {
        let keyword = vec![hit(u(1), 10.0), hit(u(2), 5.0), hit(u(3), 1.0)];
        let vector = vec![hit(u(3), 0.99), hit(u(1), 0.01)];
        let merged = merge_hits(keyword, vector, 0.0, 10);
        let order: Vec<Uuid> = merged.iter().map(|h| h.document_uuid).collect();
        assert_eq!(order[0], u(1));
        assert_eq!(order[1], u(2));
    }

    #[test]
    fn test_merge_weight_one_is_vector_order() {
        let keyword = vec![hit(u(1), 10.0), hit(u(2), 5.0)];
        let vector = vec![hit(u(3), 0.99), hit(u(2), 0.5)];
        let merged = merge_hits(keyword, vector, 1.0, 10);
        assert_eq!(merged[0].document_uuid, u(3));
        assert_eq!(merged[1].document_uuid, u(2));
    }

    #[test]
    fn test_merge_scores_in_unit_interval() {
        let keyword = vec![hit(u(1), -3.0), hit(u(2), 100.0)];
        let vector = vec![hit(u(2), 0.7), hit(u(3), 0.2)];
        for h in merge_hits(keyword, vector, 0.5, 10) {
            assert!((0.0..=1.0).contains(&h.score), "score {}", h.score);
        }
    }

    #[test]
    fn test_merge_truncates() {
        let keyword = (0..20).map(|i| hit(u(i as u128 + 1), i as f64)).collect();
        let merged = merge_hits(keyword, Vec::new(), 0.0, 5);
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn test_merge_deterministic_tiebreak() {
        let keyword = vec![hit(u(2), 1.0), hit(u(1), 1.0)];
        let merged = merge_hits(keyword, Vec::new(), 0.0, 10);
        assert_eq!(merged[0].document_uuid, u(1));
    }
}
