//! SQLite-backed [`VectorIndex`]: brute-force cosine over f32 BLOBs.
//!
//! Each collection is its own table (`chunk_vectors`, `entity_vectors`)
//! carrying the `document_id` and `source` payload, so deletes can be
//! issued as one filtered statement instead of point by point.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use strata_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use strata_core::store::{Collection, VectorFilter, VectorIndex, VectorMatch, VectorPayload};

use crate::sqlite_store::placeholders;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn table(collection: Collection) -> &'static str {
    match collection {
        Collection::Chunks => "chunk_vectors",
        Collection::Entities => "entity_vectors",
    }
}

/// `WHERE` clause and its bind values for a filter.
fn where_clause(filter: &VectorFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    if let Some(source) = &filter.source {
        clauses.push("source = ?".to_string());
        binds.push(source.clone());
    }
    if !filter.document_ids.is_empty() {
        clauses.push(format!(
            "document_id IN ({})",
            placeholders(filter.document_ids.len())
        ));
        binds.extend(filter.document_ids.iter().cloned());
    }
    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: &[f32],
        payload: &VectorPayload,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, document_id, source, dims, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                source = excluded.source,
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
            table(collection)
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(&payload.document_id)
            .bind(&payload.source)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        let (clause, binds) = where_clause(filter);
        let sql = format!(
            "SELECT id, document_id, source, embedding FROM {}{}",
            table(collection),
            clause
        );
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
            matches.push(VectorMatch {
                id: row.try_get("id")?,
                score,
                payload: VectorPayload {
                    document_id: row.try_get("document_id")?,
                    source: row.try_get("source")?,
                },
            });
        }
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_by_filter(&self, collection: Collection, filter: &VectorFilter) -> Result<u64> {
        if filter.is_empty() {
            bail!("refusing to delete {} with an empty filter", table(collection));
        }
        let (clause, binds) = where_clause(filter);
        let sql = format!("DELETE FROM {}{}", table(collection), clause);
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn count(&self, collection: Collection, filter: &VectorFilter) -> Result<u64> {
        let (clause, binds) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM {}{}", table(collection), clause);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        Ok(query.fetch_one(&self.pool).await? as u64)
    }

    async fn vectors(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT id, embedding FROM {} WHERE id IN ({})",
            table(collection),
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<(String, Vec<f32>)> {
                let blob: Vec<u8> = row.try_get("embedding")?;
                Ok((row.try_get("id")?, blob_to_vec(&blob)))
            })
            .collect()
    }
}
