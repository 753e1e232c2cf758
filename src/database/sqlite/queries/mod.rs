
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use itertools::Itertools;
use sqlx::SqlitePool;
use tracing::debug;

const DOCUMENT_COLUMNS: &str = "id, external_id, title, description, created_at, updated_at";
const INGESTION_COLUMNS: &str = "external_id, status, chunks_processed, total_chunks, error_message, started_at, completed_at, updated_at";

fn placeholders(count: usize) -> String {
    std::iter::repeat_n("?", count).join(", ")
}

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a document or update the title and description of an existing one
    #[inline]
    pub async fn upsert(pool: &SqlitePool, document: &NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO documents (external_id, title, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.external_id)
        .bind(&document.title)
        .bind(&document.description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert document")?;

        Self::get_by_external_id(pool, &document.external_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve upserted document"))
    }

    #[inline]
    pub async fn get_by_external_id(
        pool: &SqlitePool,
        external_id: &str,
    ) -> Result<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE external_id = ?");
        sqlx::query_as::<_, Document>(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by external id")
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Commit one chunk and its embedding together
    #[inline]
    pub async fn insert_with_embedding(
        pool: &SqlitePool,
        document_id: i64,
        position: i64,
        content: &str,
        model_id: &str,
        vector: &[u8],
        dimension: i64,
    ) -> Result<i64> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;
        let now = Utc::now().naive_utc();

        let chunk_id = sqlx::query(
            "INSERT INTO chunks (document_id, content, position, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(document_id)
        .bind(content)
        .bind(position)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert chunk")?
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO embeddings (chunk_id, model_id, dimension, vector, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chunk_id)
        .bind(model_id)
        .bind(dimension)
        .bind(vector)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert embedding")?;

        tx.commit().await.context("Failed to commit chunk")?;

        debug!("Committed chunk {} at position {}", chunk_id, position);
        Ok(chunk_id)
    }

    /// Delete every chunk of a document; embeddings follow by cascade
    #[inline]
    pub async fn delete_for_document(pool: &SqlitePool, document_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(pool)
            .await
            .context("Failed to delete chunks for document")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn delete_by_ids(pool: &SqlitePool, chunk_ids: &[i64]) -> Result<u64> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "DELETE FROM chunks WHERE id IN ({})",
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&query);
        for id in chunk_ids {
            query = query.bind(id);
        }

        let result = query
            .execute(pool)
            .await
            .context("Failed to delete chunks")?;
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn list_for_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<Chunk>> {
        sqlx::query_as::<_, Chunk>(
            "SELECT id, document_id, content, position, created_at FROM chunks WHERE document_id = ? ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for document")
    }

    #[inline]
    pub async fn count_for_document(pool: &SqlitePool, document_id: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")
    }

    /// Fetch chunks with their document; ids that no longer exist are skipped
    #[inline]
    pub async fn get_with_documents(
        pool: &SqlitePool,
        chunk_ids: &[i64],
    ) -> Result<Vec<ChunkWithDocument>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            SELECT c.id, c.content, c.position, d.external_id, d.title
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id IN ({})
            "#,
            placeholders(chunk_ids.len())
        );

        let mut query = sqlx::query_as::<_, ChunkWithDocument>(&query);
        for id in chunk_ids {
            query = query.bind(id);
        }

        query
            .fetch_all(pool)
            .await
            .context("Failed to fetch chunks with documents")
    }
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<StoredEmbedding>> {
        sqlx::query_as::<_, StoredEmbedding>(
            r#"
            SELECT e.chunk_id, d.external_id, e.model_id, e.dimension, e.vector
            FROM embeddings e
            JOIN chunks c ON c.id = e.chunk_id
            JOIN documents d ON d.id = c.document_id
            ORDER BY e.chunk_id
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to list embeddings")
    }
}

pub struct IngestionQueries;

impl IngestionQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool, external_id: &str) -> Result<Option<IngestionRecord>> {
        let query =
            format!("SELECT {INGESTION_COLUMNS} FROM ingestion_status WHERE external_id = ?");
        sqlx::query_as::<_, IngestionRecord>(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get ingestion status")
    }

    /// Start a fresh `pending` record, discarding any previous run's state
    #[inline]
    pub async fn reset(pool: &SqlitePool, external_id: &str) -> Result<IngestionRecord> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO ingestion_status
                (external_id, status, chunks_processed, total_chunks, error_message, started_at, completed_at, updated_at)
            VALUES (?, 'pending', 0, 0, NULL, ?, NULL, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                status = 'pending',
                chunks_processed = 0,
                total_chunks = 0,
                error_message = NULL,
                started_at = excluded.started_at,
                completed_at = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(external_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to reset ingestion status")?;

        Self::get(pool, external_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve ingestion status"))
    }

    /// Start a pending run; returns false when it is no longer pending
    #[inline]
    pub async fn mark_processing(
        pool: &SqlitePool,
        external_id: &str,
        total_chunks: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingestion_status SET status = 'processing', chunks_processed = 0, total_chunks = ?, updated_at = ? WHERE external_id = ? AND status = 'pending'",
        )
        .bind(total_chunks)
        .bind(Utc::now().naive_utc())
        .bind(external_id)
        .execute(pool)
        .await
        .context("Failed to mark ingestion as processing")?;

        Ok(result.rows_affected() > 0)
    }

    /// Record progress of a processing run; the stored count never decreases.
    ///
    /// Returns false when the run is no longer processing, e.g. because it was
    /// cancelled from another process.
    #[inline]
    pub async fn update_progress(
        pool: &SqlitePool,
        external_id: &str,
        chunks_processed: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingestion_status SET chunks_processed = MAX(chunks_processed, ?), updated_at = ? WHERE external_id = ? AND status = 'processing'",
        )
        .bind(chunks_processed)
        .bind(Utc::now().naive_utc())
        .bind(external_id)
        .execute(pool)
        .await
        .context("Failed to update ingestion progress")?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the run was no longer processing
    #[inline]
    pub async fn mark_completed(pool: &SqlitePool, external_id: &str) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE ingestion_status SET status = 'completed', error_message = NULL, completed_at = ?, updated_at = ? WHERE external_id = ? AND status = 'processing'",
        )
        .bind(now)
        .bind(now)
        .bind(external_id)
        .execute(pool)
        .await
        .context("Failed to mark ingestion as completed")?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failure of an active run, keeping the progress reached so far
    #[inline]
    pub async fn mark_failed(pool: &SqlitePool, external_id: &str, reason: &str) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "UPDATE ingestion_status SET status = 'failed', error_message = ?, completed_at = ?, updated_at = ? WHERE external_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(external_id)
        .execute(pool)
        .await
        .context("Failed to mark ingestion as failed")?;

        Ok(())
    }

    /// Record a failure and zero the progress counters
    #[inline]
    pub async fn mark_failed_and_cleared(
        pool: &SqlitePool,
        external_id: &str,
        reason: &str,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE ingestion_status
            SET status = 'failed', error_message = ?, chunks_processed = 0, total_chunks = 0,
                completed_at = ?, updated_at = ?
            WHERE external_id = ?
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(external_id)
        .execute(pool)
        .await
        .context("Failed to clear ingestion status")?;

        Ok(())
    }

    /// Fail runs still pending or processing that made no progress since `updated_before`
    #[inline]
    pub async fn fail_active(
        pool: &SqlitePool,
        reason: &str,
        updated_before: NaiveDateTime,
    ) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE ingestion_status SET status = 'failed', error_message = ?, completed_at = ?, updated_at = ? WHERE status IN ('pending', 'processing') AND updated_at < ?",
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(updated_before)
        .execute(pool)
        .await
        .context("Failed to fail interrupted ingestions")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<IngestionRecord>> {
        let query =
            format!("SELECT {INGESTION_COLUMNS} FROM ingestion_status ORDER BY updated_at DESC");
        sqlx::query_as::<_, IngestionRecord>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list ingestion statuses")
    }
}

pub struct SessionQueries;

impl SessionQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, user_id: &str) -> Result<QaSession> {
        let id = sqlx::query("INSERT INTO qa_sessions (user_id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(Utc::now().naive_utc())
            .execute(pool)
            .await
            .context("Failed to create session")?
            .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created session"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<QaSession>> {
        sqlx::query_as::<_, QaSession>(
            "SELECT id, user_id, created_at FROM qa_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get session")
    }

    /// Sessions for a user, newest first
    #[inline]
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QaSession>> {
        sqlx::query_as::<_, QaSession>(
            r#"
            SELECT id, user_id, created_at
            FROM qa_sessions
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to list sessions for user")
    }
}

pub struct QuestionQueries;

impl QuestionQueries {
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        session_id: i64,
        text: &str,
        document_ids: Option<&[String]>,
    ) -> Result<Question> {
        let document_ids = document_ids
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode document ids")?;

        let id = sqlx::query(
            "INSERT INTO questions (session_id, text, document_ids, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(text)
        .bind(document_ids)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .context("Failed to record question")?
        .last_insert_rowid();

        sqlx::query_as::<_, Question>(
            "SELECT id, session_id, text, document_ids, created_at FROM questions WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to retrieve recorded question")
    }

    #[inline]
    pub async fn list_for_session(pool: &SqlitePool, session_id: i64) -> Result<Vec<Question>> {
        sqlx::query_as::<_, Question>(
            "SELECT id, session_id, text, document_ids, created_at FROM questions WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list questions for session")
    }

    #[inline]
    pub async fn count_for_session(pool: &SqlitePool, session_id: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(pool)
            .await
            .context("Failed to count questions")
    }
}

pub struct AnswerQueries;

impl AnswerQueries {
    /// Store an answer and its ranked sources in one transaction
    #[inline]
    pub async fn create_with_sources(
        pool: &SqlitePool,
        question_id: i64,
        text: &str,
        outcome: AnswerOutcome,
        sources: &[NewSource],
    ) -> Result<Answer> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let answer_id = sqlx::query(
            "INSERT INTO answers (question_id, text, outcome, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(question_id)
        .bind(text)
        .bind(outcome)
        .bind(Utc::now().naive_utc())
        .execute(&mut *tx)
        .await
        .context("Failed to record answer")?
        .last_insert_rowid();

        for (rank, source) in sources.iter().enumerate() {
            sqlx::query(
                "INSERT INTO sources (answer_id, chunk_id, relevance_score, rank) VALUES (?, ?, ?, ?)",
            )
            .bind(answer_id)
            .bind(source.chunk_id)
            .bind(source.relevance_score)
            .bind(rank as i64)
            .execute(&mut *tx)
            .await
            .context("Failed to record source")?;
        }

        tx.commit().await.context("Failed to commit answer")?;

        sqlx::query_as::<_, Answer>(
            "SELECT id, question_id, text, outcome, created_at FROM answers WHERE id = ?",
        )
        .bind(answer_id)
        .fetch_one(pool)
        .await
        .context("Failed to retrieve recorded answer")
    }

    #[inline]
    pub async fn list_for_session(pool: &SqlitePool, session_id: i64) -> Result<Vec<Answer>> {
        sqlx::query_as::<_, Answer>(
            r#"
            SELECT a.id, a.question_id, a.text, a.outcome, a.created_at
            FROM answers a
            JOIN questions q ON q.id = a.question_id
            WHERE q.session_id = ?
            ORDER BY a.id
            "#,
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list answers for session")
    }

    /// Sources of every answer in a session, with whatever chunk data survives
    #[inline]
    pub async fn list_sources_for_session(
        pool: &SqlitePool,
        session_id: i64,
    ) -> Result<Vec<SourceDetail>> {
        sqlx::query_as::<_, SourceDetail>(
            r#"
            SELECT s.answer_id, s.chunk_id, s.relevance_score,
                   c.content, d.external_id, d.title
            FROM sources s
            JOIN answers a ON a.id = s.answer_id
            JOIN questions q ON q.id = a.question_id
            LEFT JOIN chunks c ON c.id = s.chunk_id
            LEFT JOIN documents d ON d.id = c.document_id
            WHERE q.session_id = ?
            ORDER BY s.answer_id, s.rank
            "#,
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list sources for session")
    }
}

pub struct SelectionQueries;

impl SelectionQueries {
    /// Replace a user's selection wholesale
    #[inline]
    pub async fn replace(
        pool: &SqlitePool,
        user_id: &str,
        document_ids: &[String],
    ) -> Result<DocumentSelection> {
        let encoded =
            serde_json::to_string(document_ids).context("Failed to encode document ids")?;

        sqlx::query(
            r#"
            INSERT INTO document_selections (user_id, document_ids, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                document_ids = excluded.document_ids,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(encoded)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .context("Failed to store document selection")?;

        Self::get(pool, user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve document selection"))
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, user_id: &str) -> Result<Option<DocumentSelection>> {
        sqlx::query_as::<_, DocumentSelection>(
            "SELECT user_id, document_ids, updated_at FROM document_selections WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document selection")
    }
}
