//! Database schema migrations.
//!
//! Creates all required tables (documents, entities, relationships, chunks,
//! chunks_fts, chunk_vectors, visual_citations) and ensures idempotent
//! execution. Run via `qsr init`.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations_on(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            blob_path TEXT NOT NULL,
            page_count INTEGER,
            uploaded_at INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            executive_summary TEXT NOT NULL DEFAULT '',
            qsr_category TEXT NOT NULL DEFAULT 'general',
            document_type TEXT NOT NULL DEFAULT 'reference',
            hierarchical_sections TEXT NOT NULL DEFAULT '[]',
            degraded INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            canonical_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            surface_form TEXT NOT NULL,
            hierarchy_level INTEGER NOT NULL,
            parent_entity TEXT,
            source_document_ids TEXT NOT NULL DEFAULT '[]',
            page_references TEXT NOT NULL DEFAULT '[]',
            qsr_context TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL,
            PRIMARY KEY (canonical_name, entity_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            src_canonical TEXT NOT NULL,
            src_entity_type TEXT NOT NULL,
            dst_canonical TEXT NOT NULL,
            dst_entity_type TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            source_document_ids TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL,
            PRIMARY KEY (src_canonical, src_entity_type, dst_canonical, dst_entity_type, relationship_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            text TEXT NOT NULL,
            page INTEGER,
            offset_chars INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visual_citations (
            citation_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            citation_type TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            reference_text TEXT NOT NULL,
            bbox TEXT,
            xref TEXT,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(uploaded_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relationships_src ON relationships(src_canonical, src_entity_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relationships_dst ON relationships(dst_canonical, dst_entity_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_visual_citations_document_id ON visual_citations(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
