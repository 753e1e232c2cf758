
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub content: String,
    pub position: i64,
    pub created_at: NaiveDateTime,
}

/// A chunk joined with its owning document, as shown next to answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkWithDocument {
    pub id: i64,
    pub content: String,
    pub position: i64,
    pub external_id: String,
    pub title: String,
}

/// A persisted vector with enough context to rebuild the in-memory index
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredEmbedding {
    pub chunk_id: i64,
    pub external_id: String,
    pub model_id: String,
    pub dimension: i64,
    pub vector: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl IngestionStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Processing => "processing",
            IngestionStatus::Completed => "completed",
            IngestionStatus::Failed => "failed",
        }
    }

    /// Pending and processing runs may still change state
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, IngestionStatus::Pending | IngestionStatus::Processing)
    }
}

impl std::fmt::Display for IngestionStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IngestionRecord {
    pub external_id: String,
    pub status: IngestionStatus,
    pub chunks_processed: i64,
    pub total_chunks: i64,
    pub error_message: Option<String>,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl IngestionRecord {
    #[inline]
    pub fn progress_percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        (self.chunks_processed as f64 / self.total_chunks as f64) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QaSession {
    pub id: i64,
    pub user_id: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: i64,
    pub session_id: i64,
    pub text: String,
    /// JSON array of document external ids, absent when unrestricted
    pub document_ids: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Question {
    #[inline]
    pub fn document_id_list(&self) -> Vec<String> {
        self.document_ids
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Generated,
    InsufficientContext,
    GenerationUnavailable,
}

impl std::fmt::Display for AnswerOutcome {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            AnswerOutcome::Generated => write!(f, "generated"),
            AnswerOutcome::InsufficientContext => write!(f, "insufficient context"),
            AnswerOutcome::GenerationUnavailable => write!(f, "generation unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub outcome: AnswerOutcome,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewSource {
    pub chunk_id: i64,
    pub relevance_score: f64,
}

/// A source row left-joined to its chunk and document, which may be gone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SourceDetail {
    pub answer_id: i64,
    pub chunk_id: i64,
    pub relevance_score: f64,
    pub content: Option<String>,
    pub external_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentSelection {
    pub user_id: String,
    pub document_ids: String,
    pub updated_at: NaiveDateTime,
}

impl DocumentSelection {
    #[inline]
    pub fn document_id_list(&self) -> Vec<String> {
        serde_json::from_str(&self.document_ids).unwrap_or_default()
    }
}
