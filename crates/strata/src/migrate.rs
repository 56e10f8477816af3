//! Idempotent schema creation.
//!
//! `strata init` runs this explicitly; [`crate::backends::Backends::open`]
//! runs it again on every start so a fresh database is always usable.

use anyhow::Result;
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        source_id TEXT NOT NULL,
        source_url TEXT,
        title TEXT,
        content_type TEXT NOT NULL DEFAULT 'text/plain',
        body TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(source, source_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(document_id, chunk_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        source TEXT NOT NULL,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entity_vectors (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        source TEXT NOT NULL,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        confidence REAL NOT NULL,
        source_document_id TEXT NOT NULL,
        source_chunk_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entity_mentions (
        entity_id TEXT NOT NULL,
        chunk_id TEXT NOT NULL,
        PRIMARY KEY (entity_id, chunk_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relations (
        id TEXT PRIMARY KEY,
        subject_id TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object_id TEXT NOT NULL,
        confidence REAL NOT NULL,
        source_document_id TEXT NOT NULL,
        source_chunk_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS extraction_status (
        chunk_id TEXT PRIMARY KEY,
        state TEXT NOT NULL DEFAULT 'pending',
        entity_count INTEGER NOT NULL DEFAULT 0,
        relation_count INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_source ON chunk_vectors(source)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document ON chunk_vectors(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_entity_vectors_document ON entity_vectors(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_entities_document ON entities(source_document_id)",
    "CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name COLLATE NOCASE)",
    "CREATE INDEX IF NOT EXISTS idx_mentions_chunk ON entity_mentions(chunk_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_object ON relations(object_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_document ON relations(source_document_id)",
    "CREATE INDEX IF NOT EXISTS idx_status_state ON extraction_status(state)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    // FTS5 has no IF NOT EXISTS for virtual tables on older SQLite builds.
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

    Ok(())
}
