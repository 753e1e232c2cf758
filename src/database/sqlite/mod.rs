use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    Answer, AnswerOutcome, Chunk, ChunkWithDocument, Document, DocumentSelection,
    IngestionRecord, NewDocument, NewSource, QaSession, Question, SourceDetail, StoredEmbedding,
};
use crate::database::sqlite::queries::{
    AnswerQueries, ChunkQueries, DocumentQueries, EmbeddingQueries, IngestionQueries,
    QuestionQueries, SelectionQueries, SessionQueries,
};
use crate::{RagError, Result};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

fn db_error(err: anyhow::Error) -> RagError {
    RagError::Database(format!("{:#}", err))
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")
            .map_err(db_error)?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")
            .map_err(db_error)?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open the database file inside `base_dir`, creating the directory if needed
    #[inline]
    pub async fn initialize_in_dir(base_dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(base_dir)
            .with_context(|| format!("Failed to create data directory: {}", base_dir.display()))
            .map_err(db_error)?;

        Self::new(base_dir.join(file_name)).await
    }

    // Document operations
    #[inline]
    pub async fn upsert_document(&self, document: &NewDocument) -> Result<Document> {
        DocumentQueries::upsert(&self.pool, document)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn get_document(&self, external_id: &str) -> Result<Option<Document>> {
        DocumentQueries::get_by_external_id(&self.pool, external_id)
            .await
            .map_err(db_error)
    }

    // Chunk operations
    #[inline]
    pub async fn insert_chunk_with_embedding(
        &self,
        document_id: i64,
        position: i64,
        content: &str,
        model_id: &str,
        vector: &[f32],
    ) -> Result<i64> {
        let blob = crate::embeddings::vec_to_blob(vector);
        ChunkQueries::insert_with_embedding(
            &self.pool,
            document_id,
            position,
            content,
            model_id,
            &blob,
            vector.len() as i64,
        )
        .await
        .map_err(db_error)
    }

    /// Explicit cascade: drop a document's chunks and, with them, its embeddings
    #[inline]
    pub async fn delete_document_chunks(&self, document_id: i64) -> Result<u64> {
        ChunkQueries::delete_for_document(&self.pool, document_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn delete_chunks(&self, chunk_ids: &[i64]) -> Result<u64> {
        ChunkQueries::delete_by_ids(&self.pool, chunk_ids)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_chunks(&self, document_id: i64) -> Result<Vec<Chunk>> {
        ChunkQueries::list_for_document(&self.pool, document_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn count_chunks(&self, document_id: i64) -> Result<i64> {
        ChunkQueries::count_for_document(&self.pool, document_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn get_chunks_with_documents(
        &self,
        chunk_ids: &[i64],
    ) -> Result<Vec<ChunkWithDocument>> {
        ChunkQueries::get_with_documents(&self.pool, chunk_ids)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_embeddings(&self) -> Result<Vec<StoredEmbedding>> {
        EmbeddingQueries::list_all(&self.pool)
            .await
            .map_err(db_error)
    }

    // Ingestion status operations
    #[inline]
    pub async fn get_ingestion_status(&self, external_id: &str) -> Result<Option<IngestionRecord>> {
        IngestionQueries::get(&self.pool, external_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn reset_ingestion_status(&self, external_id: &str) -> Result<IngestionRecord> {
        IngestionQueries::reset(&self.pool, external_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn mark_ingestion_processing(&self, external_id: &str, total: i64) -> Result<bool> {
        IngestionQueries::mark_processing(&self.pool, external_id, total)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn update_ingestion_progress(
        &self,
        external_id: &str,
        processed: i64,
    ) -> Result<bool> {
        IngestionQueries::update_progress(&self.pool, external_id, processed)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn mark_ingestion_completed(&self, external_id: &str) -> Result<bool> {
        IngestionQueries::mark_completed(&self.pool, external_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn mark_ingestion_failed(&self, external_id: &str, reason: &str) -> Result<()> {
        IngestionQueries::mark_failed(&self.pool, external_id, reason)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn mark_ingestion_cancelled(&self, external_id: &str, reason: &str) -> Result<()> {
        IngestionQueries::mark_failed_and_cleared(&self.pool, external_id, reason)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn fail_active_ingestions(
        &self,
        reason: &str,
        updated_before: chrono::NaiveDateTime,
    ) -> Result<u64> {
        IngestionQueries::fail_active(&self.pool, reason, updated_before)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_ingestion_statuses(&self) -> Result<Vec<IngestionRecord>> {
        IngestionQueries::list_all(&self.pool)
            .await
            .map_err(db_error)
    }

    // Question answering operations
    #[inline]
    pub async fn create_session(&self, user_id: &str) -> Result<QaSession> {
        SessionQueries::create(&self.pool, user_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn get_session(&self, session_id: i64) -> Result<Option<QaSession>> {
        SessionQueries::get_by_id(&self.pool, session_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_sessions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QaSession>> {
        SessionQueries::list_for_user(&self.pool, user_id, limit, offset)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn record_question(
        &self,
        session_id: i64,
        text: &str,
        document_ids: Option<&[String]>,
    ) -> Result<Question> {
        QuestionQueries::create(&self.pool, session_id, text, document_ids)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_questions(&self, session_id: i64) -> Result<Vec<Question>> {
        QuestionQueries::list_for_session(&self.pool, session_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn count_questions(&self, session_id: i64) -> Result<i64> {
        QuestionQueries::count_for_session(&self.pool, session_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn record_answer(
        &self,
        question_id: i64,
        text: &str,
        outcome: AnswerOutcome,
        sources: &[NewSource],
    ) -> Result<Answer> {
        AnswerQueries::create_with_sources(&self.pool, question_id, text, outcome, sources)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_answers(&self, session_id: i64) -> Result<Vec<Answer>> {
        AnswerQueries::list_for_session(&self.pool, session_id)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn list_source_details(&self, session_id: i64) -> Result<Vec<SourceDetail>> {
        AnswerQueries::list_sources_for_session(&self.pool, session_id)
            .await
            .map_err(db_error)
    }

    // Selection operations
    #[inline]
    pub async fn replace_selection(
        &self,
        user_id: &str,
        document_ids: &[String],
    ) -> Result<DocumentSelection> {
        SelectionQueries::replace(&self.pool, user_id, document_ids)
            .await
            .map_err(db_error)
    }

    #[inline]
    pub async fn get_selection(&self, user_id: &str) -> Result<Option<DocumentSelection>> {
        SelectionQueries::get(&self.pool, user_id)
            .await
            .map_err(db_error)
    }
}
