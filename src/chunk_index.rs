//! SQLite-backed [`ChunkIndex`]. Keyword search queries the
//! `chunks_fts` FTS5 virtual table for BM25 ranking; vector search loads
//! candidate embeddings from `chunk_vectors` and ranks by
//! [`crate::embedding::cosine_similarity`] in memory, scoped to one
//! document-agnostic chunk set rather than per-source tables.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{CoreError, CoreResult};
use crate::models::Chunk;
use crate::search::ScoredChunk;
use crate::storage::ChunkIndex;

pub struct SqliteChunkIndex {
    pool: SqlitePool,
}

impl SqliteChunkIndex {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteChunkIndex { pool }
    }
}

#[async_trait]
impl ChunkIndex for SqliteChunkIndex {
    async fn index_chunks(&self, document_id: &str, chunks: &[Chunk]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (chunk_id, document_id, text, page, offset_chars) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .bind(chunk.page.map(|p| p as i64))
            .bind(chunk.offset as i64)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.chunk_id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await
                .map_err(CoreError::from)?;

            if let Some(embedding) = &chunk.embedding {
                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&chunk.chunk_id)
                .bind(&chunk.document_id)
                .bind("unspecified")
                .bind(embedding.len() as i64)
                .bind(vec_to_blob(embedding))
                .execute(&mut *tx)
                .await
                .map_err(CoreError::from)?;
            }
        }

        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    async fn delete_chunks(&self, document_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    async fn chunk_count(&self, document_id: &str) -> CoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(count as u64)
    }

    async fn keyword_search(&self, query: &str, limit: i64) -> CoreResult<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT chunks.chunk_id AS chunk_id, chunks.document_id AS document_id,
                   chunks.text AS text, chunks.page AS page, bm25(chunks_fts) AS rank
            FROM chunks_fts
            JOIN chunks ON chunks.chunk_id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(escape_fts_query(query))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;

        rows.into_iter()
            .map(|row| {
                let rank: f64 = row.try_get("rank").map_err(CoreError::from)?;
                Ok(ScoredChunk {
                    chunk_id: row.try_get("chunk_id").map_err(CoreError::from)?,
                    document_id: row.try_get("document_id").map_err(CoreError::from)?,
                    text: row.try_get("text").map_err(CoreError::from)?,
                    page: row.try_get::<Option<i64>, _>("page").map_err(CoreError::from)?.map(|p| p as u32),
                    // bm25() returns lower-is-better; negate so higher is better,
                    // matching vector search's cosine-similarity convention.
                    score: -rank,
                })
            })
            .collect()
    }

    async fn vector_search(&self, query_embedding: &[f32], limit: i64) -> CoreResult<Vec<ScoredChunk>> {
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT chunks.chunk_id AS chunk_id, chunks.document_id AS document_id,
                   chunks.text AS text, chunks.page AS page, chunk_vectors.embedding AS embedding
            FROM chunk_vectors
            JOIN chunks ON chunks.chunk_id = chunk_vectors.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;

        let mut scored: Vec<ScoredChunk> = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(CoreError::from)?;
            let embedding = blob_to_vec(&blob);
            let score = cosine_similarity(query_embedding, &embedding) as f64;
            scored.push(ScoredChunk {
                chunk_id: row.try_get("chunk_id").map_err(CoreError::from)?,
                document_id: row.try_get("document_id").map_err(CoreError::from)?,
                text: row.try_get("text").map_err(CoreError::from)?,
                page: row.try_get::<Option<i64>, _>("page").map_err(CoreError::from)?.map(|p| p as u32),
                score,
            });
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);
        Ok(scored)
    }
}

/// FTS5 query syntax treats several ASCII punctuation characters specially;
/// wrapping the whole query in double quotes makes it a single phrase match
/// instead of failing to parse on user-supplied punctuation.
fn escape_fts_query(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations_on;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();
        pool
    }

    fn chunk(id: &str, doc: &str, text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: doc.to_string(),
            text: text.to_string(),
            page: Some(1),
            offset: 0,
            embedding,
        }
    }

    #[tokio::test]
    async fn index_then_keyword_search_finds_matching_text() {
        let index = SqliteChunkIndex::new(test_pool().await);
        index
            .index_chunks("doc-1", &[chunk("c1", "doc-1", "fryer oil boil-out procedure", None)])
            .await
            .unwrap();
        let results = index.keyword_search("boil-out", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn index_chunks_replaces_atomically() {
        let index = SqliteChunkIndex::new(test_pool().await);
        index.index_chunks("doc-1", &[chunk("c1", "doc-1", "first version", None)]).await.unwrap();
        index.index_chunks("doc-1", &[chunk("c2", "doc-1", "second version", None)]).await.unwrap();
        assert_eq!(index.chunk_count("doc-1").await.unwrap(), 1);
        let results = index.keyword_search("first", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine_similarity() {
        let index = SqliteChunkIndex::new(test_pool().await);
        index
            .index_chunks(
                "doc-1",
                &[
                    chunk("c1", "doc-1", "near", Some(vec![1.0, 0.0, 0.0])),
                    chunk("c2", "doc-1", "far", Some(vec![0.0, 1.0, 0.0])),
                ],
            )
            .await
            .unwrap();
        let results = index.vector_search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn delete_chunks_empties_all_three_tables() {
        let index = SqliteChunkIndex::new(test_pool().await);
        index
            .index_chunks("doc-1", &[chunk("c1", "doc-1", "text", Some(vec![1.0, 0.0]))])
            .await
            .unwrap();
        index.delete_chunks("doc-1").await.unwrap();
        assert_eq!(index.chunk_count("doc-1").await.unwrap(), 0);
        assert!(index.keyword_search("text", 10).await.unwrap().is_empty());
        assert!(index.vector_search(&[1.0, 0.0], 10).await.unwrap().is_empty());
    }
}
