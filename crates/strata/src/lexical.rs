//! FTS5-backed [`LexicalIndex`].
//!
//! User input never reaches FTS5 syntax directly: queries are tokenized to
//! alphanumeric terms and each term is re-quoted, so operators, quotes,
//! and column filters in the query text are inert.
//!
//! | Mode | FTS5 expression | Score |
//! |------|-----------------|-------|
//! | `Phrase` | `"a b" AND "c d"` | `-bm25` |
//! | `Relaxed` | `"a"* OR "b"*` | `-bm25` |
//! | `Stemmed` | `"stem(a)"* OR …` | `-bm25` |
//! | `Substring` | `LIKE '%term%'` per term (no FTS) | matched-term count |

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use strata_core::search::RankedChunk;
use strata_core::store::{LexicalIndex, LexicalMode, LexicalQuery};
use strata_core::text::{content_terms, stem, tokenize, truncate_chars};

use crate::sqlite_store::like_pattern;

const SNIPPET_CHARS: usize = 240;

pub struct SqliteLexicalIndex {
    pool: SqlitePool,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Build the FTS5 MATCH expression for a non-substring mode.
///
/// Returns `None` when the query has no usable terms.
pub fn fts_expression(query: &LexicalQuery) -> Option<String> {
    let expr = match query.mode {
        LexicalMode::Phrase => {
            let sources: Vec<&str> = if query.phrases.is_empty() {
                vec![query.text.as_str()]
            } else {
                query.phrases.iter().map(String::as_str).collect()
            };
            sources
                .into_iter()
                .map(tokenize)
                .filter(|tokens| !tokens.is_empty())
                .map(|tokens| format!("\"{}\"", tokens.join(" ")))
                .collect::<Vec<_>>()
                .join(" AND ")
        }
        LexicalMode::Relaxed => content_terms(&query.text)
            .iter()
            .map(|t| format!("\"{}\"*", t))
            .collect::<Vec<_>>()
            .join(" OR "),
        LexicalMode::Stemmed => {
            let mut stems: Vec<String> = content_terms(&query.text).iter().map(|t| stem(t)).collect();
            stems.dedup();
            stems
                .iter()
                .map(|t| format!("\"{}\"*", t))
                .collect::<Vec<_>>()
                .join(" OR ")
        }
        LexicalMode::Substring => return None,
    };
    (!expr.is_empty()).then_some(expr)
}

/// Terms for the substring pass: stemmed, at least three characters.
fn substring_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = content_terms(text)
        .iter()
        .map(|t| stem(t))
        .filter(|t| t.chars().count() >= 3)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

impl SqliteLexicalIndex {
    async fn fts_search(
        &self,
        expr: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<RankedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id AS chunk_id,
                   chunks_fts.document_id AS document_id,
                   chunks_fts.text AS text,
                   bm25(chunks_fts) AS rank_score,
                   snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM chunks_fts
            JOIN documents d ON d.id = chunks_fts.document_id
            WHERE chunks_fts MATCH ? AND (? IS NULL OR d.source = ?)
            ORDER BY rank_score, chunk_id
            LIMIT ?
            "#,
        )
        .bind(expr)
        .bind(source)
        .bind(source)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RankedChunk> {
                let rank: f64 = row.try_get("rank_score")?;
                Ok(RankedChunk {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    score: -rank,
                    snippet: row.try_get("snippet")?,
                    text: row.try_get("text")?,
                })
            })
            .collect()
    }

    async fn substring_search(
        &self,
        text: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<RankedChunk>> {
        let terms = substring_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let score_expr = vec!["(CASE WHEN c.text LIKE ? ESCAPE '\\' THEN 1 ELSE 0 END)"; terms.len()]
            .join(" + ");
        let sql = format!(
            r#"
            SELECT chunk_id, document_id, text, score FROM (
                SELECT c.id AS chunk_id, c.document_id AS document_id, c.text AS text,
                       ({}) AS score
                FROM chunks c
                JOIN documents d ON d.id = c.document_id
                WHERE (? IS NULL OR d.source = ?)
            )
            WHERE score > 0
            ORDER BY score DESC, chunk_id
            LIMIT ?
            "#,
            score_expr
        );

        let mut query = sqlx::query(&sql);
        for term in &terms {
            query = query.bind(like_pattern(term));
        }
        let rows = query
            .bind(source)
            .bind(source)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RankedChunk> {
                let score: i64 = row.try_get("score")?;
                let text: String = row.try_get("text")?;
                Ok(RankedChunk {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    score: score as f64,
                    snippet: truncate_chars(&text, SNIPPET_CHARS),
                    text,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn search(
        &self,
        query: &LexicalQuery,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<RankedChunk>> {
        if query.mode == LexicalMode::Substring {
            return self.substring_search(&query.text, limit, source).await;
        }
        match fts_expression(query) {
            Some(expr) => self.fts_search(&expr, limit, source).await,
            None => Ok(Vec::new()),
        }
    }
}
