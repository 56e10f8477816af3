//! SQLite-backed [`MetadataStore`] and [`KnowledgeStore`].
//!
//! Entity and relation merges happen inside a single
//! `INSERT … ON CONFLICT DO UPDATE` so concurrent extraction workers never
//! lose a confidence increase. The extraction claim is a conditional
//! `UPDATE … WHERE state = 'pending'`; SQLite's write lock makes it the
//! single point of mutual exclusion per chunk.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use strata_core::models::{
    Chunk, ChunkContext, ClaimOutcome, Document, Entity, EntityType, ExtractionBacklog,
    ExtractionState, ExtractionStatus, MergeOutcome, Predicate, Relation, RemovedRows,
};
use strata_core::store::{KnowledgeStore, MetadataStore, StoredDocument};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `?, ?, ?` for an `IN (...)` list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Escape `%`, `_` and `\` for a `LIKE … ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `%term%`, escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    format!("%{}%", escape_like(term))
}

/// Per-term name relevance, mirroring
/// [`entity_match_rank`](strata_core::kag::entity_match_rank): exact name 4,
/// name prefix 3, name substring 2, description only 1.
const ENTITY_TERM_RANK: &str = "CASE \
    WHEN lower(name) = ? THEN 4 \
    WHEN name LIKE ? ESCAPE '\\' THEN 3 \
    WHEN name LIKE ? ESCAPE '\\' THEN 2 \
    WHEN description LIKE ? ESCAPE '\\' THEN 1 \
    ELSE 0 END";

fn context_from_row(row: &SqliteRow) -> Result<ChunkContext> {
    Ok(ChunkContext {
        chunk_id: row.try_get("chunk_id")?,
        document_id: row.try_get("document_id")?,
        source: row.try_get("source")?,
        path: row.try_get("source_id")?,
        title: row.try_get("title")?,
        text: row.try_get("text")?,
    })
}

fn entity_from_row(row: &SqliteRow) -> Result<Entity> {
    let entity_type: String = row.try_get("entity_type")?;
    Ok(Entity {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        entity_type: EntityType::normalize(&entity_type),
        description: row.try_get("description")?,
        confidence: row.try_get("confidence")?,
        source_document_id: row.try_get("source_document_id")?,
        source_chunk_id: row.try_get("source_chunk_id")?,
    })
}

fn relation_from_row(row: &SqliteRow) -> Result<Relation> {
    let predicate: String = row.try_get("predicate")?;
    Ok(Relation {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        predicate: Predicate::normalize(&predicate),
        object_id: row.try_get("object_id")?,
        confidence: row.try_get("confidence")?,
        source_document_id: row.try_get("source_document_id")?,
        source_chunk_id: row.try_get("source_chunk_id")?,
    })
}

fn status_from_row(row: &SqliteRow) -> Result<ExtractionStatus> {
    let state: String = row.try_get("state")?;
    Ok(ExtractionStatus {
        chunk_id: row.try_get("chunk_id")?,
        state: state.parse()?,
        entity_count: row.try_get("entity_count")?,
        relation_count: row.try_get("relation_count")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Outcome of merging `incoming` over a row that had `(confidence, description)`.
fn merge_outcome(
    existing: Option<(f64, String)>,
    confidence: f64,
    description: &str,
) -> MergeOutcome {
    match existing {
        None => MergeOutcome::Inserted,
        Some((_, old_desc)) if old_desc.is_empty() && !description.is_empty() => {
            MergeOutcome::DescriptionFilled
        }
        Some((old_conf, _)) if confidence > old_conf => MergeOutcome::Reinforced,
        Some(_) => MergeOutcome::Unchanged,
    }
}

const CONTEXT_SELECT: &str = r#"
    SELECT c.id AS chunk_id, c.document_id, d.source, d.source_id, d.title, c.text
    FROM chunks c
    JOIN documents d ON d.id = c.document_id
"#;

const ENTITY_COLUMNS: &str =
    "id, name, entity_type, description, confidence, source_document_id, source_chunk_id";

const RELATION_COLUMNS: &str =
    "id, subject_id, predicate, object_id, confidence, source_document_id, source_chunk_id";

const SOURCE_DOCS: &str = "SELECT id FROM documents WHERE source = ?";

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn find_document(&self, source: &str, source_id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, content_hash FROM documents WHERE source = ? AND source_id = ?",
        )
        .bind(source)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<StoredDocument> {
            Ok(StoredDocument {
                id: r.try_get("id")?,
                content_hash: r.try_get("content_hash")?,
            })
        })
        .transpose()
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, source_id, source_url, title, content_type,
                                   body, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_id) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                content_type = excluded.content_type,
                body = excluded.body,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source)
        .bind(&doc.source_id)
        .bind(&doc.source_url)
        .bind(&doc.title)
        .bind(&doc.content_type)
        .bind(&doc.body)
        .bind(&doc.content_hash)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let old: Vec<String> = sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&mut *tx)
            .await?;

        for table_sql in [
            "DELETE FROM extraction_status WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
            "DELETE FROM entity_mentions WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
            "DELETE FROM chunks_fts WHERE document_id = ?",
            "DELETE FROM chunks WHERE document_id = ?",
        ] {
            sqlx::query(table_sql)
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
        }

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(old)
    }

    async fn chunk_contexts(&self, chunk_ids: &[String]) -> Result<HashMap<String, ChunkContext>> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "{} WHERE c.id IN ({})",
            CONTEXT_SELECT,
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| context_from_row(row).map(|ctx| (ctx.chunk_id.clone(), ctx)))
            .collect()
    }

    async fn chunks_missing_vectors(&self, limit: usize) -> Result<Vec<ChunkContext>> {
        let sql = format!(
            "{} LEFT JOIN chunk_vectors v ON v.id = c.id \
             WHERE v.id IS NULL \
             ORDER BY d.updated_at ASC, c.document_id, c.chunk_index LIMIT ?",
            CONTEXT_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(context_from_row).collect()
    }

    async fn source_document_ids(&self, source: &str) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(SOURCE_DOCS)
            .bind(source)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn sources(&self) -> Result<Vec<(String, u64)>> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS n FROM documents GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<(String, u64)> {
                let n: i64 = row.try_get("n")?;
                Ok((row.try_get("source")?, n as u64))
            })
            .collect()
    }

    async fn mark_pending(&self, chunk_ids: &[String]) -> Result<u64> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;
        let mut added = 0;
        for id in chunk_ids {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO extraction_status (chunk_id, state, updated_at)
                SELECT id, 'pending', ? FROM chunks WHERE id = ?
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    async fn try_claim(&self, chunk_id: &str) -> Result<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_status
            SET state = 'extracting', attempts = attempts + 1, updated_at = ?
            WHERE chunk_id = ? AND state = 'pending'
            "#,
        )
        .bind(now_ts())
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM extraction_status WHERE chunk_id = ?")
                .bind(chunk_id)
                .fetch_optional(&self.pool)
                .await?;
        match state {
            Some(s) => Ok(ClaimOutcome::NotPending(s.parse()?)),
            None => Ok(ClaimOutcome::Missing),
        }
    }

    async fn complete_extraction(
        &self,
        chunk_id: &str,
        entities: usize,
        relations: usize,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE extraction_status
            SET state = 'completed', entity_count = ?, relation_count = ?,
                last_error = NULL, updated_at = ?
            WHERE chunk_id = ?
            "#,
        )
        .bind(entities as i64)
        .bind(relations as i64)
        .bind(now_ts())
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_extraction(&self, chunk_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE extraction_status SET state = 'failed', last_error = ?, updated_at = ? WHERE chunk_id = ?",
        )
        .bind(error)
        .bind(now_ts())
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_claim(&self, chunk_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE extraction_status
            SET state = 'pending', attempts = MAX(attempts - 1, 0), updated_at = ?
            WHERE chunk_id = ? AND state = 'extracting'
            "#,
        )
        .bind(now_ts())
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_failed(&self, max_attempts: u32) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE extraction_status SET state = 'pending', updated_at = ? WHERE state = 'failed' AND attempts < ?",
        )
        .bind(now_ts())
        .bind(max_attempts as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_stale_claims(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE extraction_status SET state = 'pending', updated_at = ? WHERE state = 'extracting'",
        )
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_chunks(&self, limit: usize) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT chunk_id FROM extraction_status WHERE state = 'pending' ORDER BY updated_at, chunk_id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn extraction_status(&self, chunk_id: &str) -> Result<Option<ExtractionStatus>> {
        let row = sqlx::query(
            r#"
            SELECT chunk_id, state, entity_count, relation_count, attempts, last_error, updated_at
            FROM extraction_status WHERE chunk_id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(status_from_row).transpose()
    }

    async fn extraction_backlog(&self) -> Result<ExtractionBacklog> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM extraction_status GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        let mut backlog = ExtractionBacklog::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            match state.parse::<ExtractionState>()? {
                ExtractionState::Pending => backlog.pending = n as u64,
                ExtractionState::Extracting => backlog.extracting = n as u64,
                ExtractionState::Completed => backlog.completed = n as u64,
                ExtractionState::Failed => backlog.failed = n as u64,
            }
        }
        Ok(backlog)
    }

    async fn purge_source(&self, source: &str) -> Result<RemovedRows> {
        let mut tx = self.pool.begin().await?;
        let mut removed = RemovedRows::default();

        let docs = format!("({})", SOURCE_DOCS);
        let chunks = format!("(SELECT id FROM chunks WHERE document_id IN {})", docs);
        let entities = format!(
            "(SELECT id FROM entities WHERE source_document_id IN {})",
            docs
        );

        sqlx::query(&format!(
            "DELETE FROM entity_mentions WHERE entity_id IN {} OR chunk_id IN {}",
            entities, chunks
        ))
        .bind(source)
        .bind(source)
        .execute(&mut *tx)
        .await?;

        removed.relations = sqlx::query(&format!(
            "DELETE FROM relations WHERE source_document_id IN {}",
            docs
        ))
        .bind(source)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        removed.entities = sqlx::query(&format!(
            "DELETE FROM entities WHERE source_document_id IN {}",
            docs
        ))
        .bind(source)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(&format!(
            "DELETE FROM extraction_status WHERE chunk_id IN {}",
            chunks
        ))
        .bind(source)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "DELETE FROM chunks_fts WHERE document_id IN {}",
            docs
        ))
        .bind(source)
        .execute(&mut *tx)
        .await?;

        removed.chunks = sqlx::query(&format!(
            "DELETE FROM chunks WHERE document_id IN {}",
            docs
        ))
        .bind(source)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        removed.documents = sqlx::query("DELETE FROM documents WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<MergeOutcome> {
        let existing = sqlx::query("SELECT confidence, description FROM entities WHERE id = ?")
            .bind(&entity.id)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| -> Result<(f64, String)> {
                Ok((r.try_get("confidence")?, r.try_get("description")?))
            })
            .transpose()?;

        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO entities (id, name, entity_type, description, confidence,
                                  source_document_id, source_chunk_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                confidence = MAX(entities.confidence, excluded.confidence),
                description = CASE WHEN entities.description = ''
                                   THEN excluded.description
                                   ELSE entities.description END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(entity.entity_type.as_str())
        .bind(&entity.description)
        .bind(entity.confidence)
        .bind(&entity.source_document_id)
        .bind(&entity.source_chunk_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(merge_outcome(
            existing,
            entity.confidence,
            &entity.description,
        ))
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<MergeOutcome> {
        let existing: Option<f64> =
            sqlx::query_scalar("SELECT confidence FROM relations WHERE id = ?")
                .bind(&relation.id)
                .fetch_optional(&self.pool)
                .await?;

        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO relations (id, subject_id, predicate, object_id, confidence,
                                   source_document_id, source_chunk_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                confidence = MAX(relations.confidence, excluded.confidence),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&relation.id)
        .bind(&relation.subject_id)
        .bind(relation.predicate.as_str())
        .bind(&relation.object_id)
        .bind(relation.confidence)
        .bind(&relation.source_document_id)
        .bind(&relation.source_chunk_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(merge_outcome(
            existing.map(|c| (c, "-".to_string())),
            relation.confidence,
            "",
        ))
    }

    async fn record_mention(&self, entity_id: &str, chunk_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO entity_mentions (entity_id, chunk_id) VALUES (?, ?)")
            .bind(entity_id)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM entities WHERE id IN ({})",
            ENTITY_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        let mut by_id: HashMap<String, Entity> = rows
            .iter()
            .map(|row| entity_from_row(row).map(|e| (e.id.clone(), e)))
            .collect::<Result<_>>()?;
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn search_entities(
        &self,
        terms: &[String],
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let clauses = vec![
            "(name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')";
            terms.len()
        ]
        .join(" OR ");
        let source_clause = if source.is_some() {
            format!(" AND source_document_id IN ({})", SOURCE_DOCS)
        } else {
            String::new()
        };
        let relevance = vec![ENTITY_TERM_RANK; terms.len()].join(" + ");
        // Rank before LIMIT so an exact name is never crowded out by
        // description mentions.
        let sql = format!(
            "SELECT {} FROM entities WHERE ({}){} ORDER BY ({}) DESC, confidence DESC, id LIMIT ?",
            ENTITY_COLUMNS, clauses, source_clause, relevance
        );

        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let mut query = sqlx::query(&sql);
        for term in &terms {
            let pattern = like_pattern(term);
            query = query.bind(pattern.clone()).bind(pattern);
        }
        if let Some(s) = source {
            query = query.bind(s);
        }
        for term in &terms {
            query = query
                .bind(term.clone())
                .bind(format!("{}%", escape_like(term)))
                .bind(like_pattern(term))
                .bind(like_pattern(term));
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn relations_touching(&self, entity_ids: &[String]) -> Result<Vec<Relation>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = placeholders(entity_ids.len());
        let sql = format!(
            "SELECT {} FROM relations WHERE subject_id IN ({}) OR object_id IN ({})",
            RELATION_COLUMNS, list, list
        );
        let mut query = sqlx::query(&sql);
        for _ in 0..2 {
            for id in entity_ids {
                query = query.bind(id);
            }
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(relation_from_row).collect()
    }

    async fn mentions(&self, entity_ids: &[String]) -> Result<Vec<(String, String)>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT entity_id, chunk_id FROM entity_mentions WHERE entity_id IN ({}) ORDER BY entity_id, chunk_id",
            placeholders(entity_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in entity_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<(String, String)> {
                Ok((row.try_get("entity_id")?, row.try_get("chunk_id")?))
            })
            .collect()
    }

    async fn entities_missing_vectors(&self, limit: usize) -> Result<Vec<Entity>> {
        let sql = format!(
            "SELECT {} FROM entities e LEFT JOIN entity_vectors v ON v.id = e.id \
             WHERE v.id IS NULL ORDER BY e.created_at, e.id LIMIT ?",
            ENTITY_COLUMNS
                .split(", ")
                .map(|c| format!("e.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn all_relations(&self) -> Result<Vec<Relation>> {
        let sql = format!("SELECT {} FROM relations ORDER BY id", RELATION_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(relation_from_row).collect()
    }

    async fn entity_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }

    #[test]
    fn test_merge_outcome() {
        assert_eq!(merge_outcome(None, 0.5, ""), MergeOutcome::Inserted);
        assert_eq!(
            merge_outcome(Some((0.5, String::new())), 0.4, "filled"),
            MergeOutcome::DescriptionFilled
        );
        assert_eq!(
            merge_outcome(Some((0.5, "x".into())), 0.9, "y"),
            MergeOutcome::Reinforced
        );
        assert_eq!(
            merge_outcome(Some((0.9, "x".into())), 0.5, "y"),
            MergeOutcome::Unchanged
        );
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
