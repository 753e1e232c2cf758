// Question answering
// Retrieves relevant chunks, bounds them into a context and records answers with their sources

pub mod context;


use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::database::Database;
use crate::database::models::{
    AnswerOutcome, ChunkWithDocument, NewSource, QaSession, Question, SourceDetail,
};
use crate::embeddings::{Embedder, check_dimension};
use crate::generation::{Generator, SYSTEM_INSTRUCTION, build_prompt};
use crate::index::{ScoredChunk, VectorIndex};
use crate::selection::SelectionService;
use crate::{RagError, Result};

pub use context::assemble_context;

pub const INSUFFICIENT_INFORMATION_ANSWER: &str =
    "I don't have enough information to answer that question.";
pub const GENERATION_UNAVAILABLE_ANSWER: &str =
    "Sorry, I couldn't generate an answer right now. Please try again later.";
pub const NO_ANSWER_PRODUCED: &str =
    "I couldn't generate a proper response based on the information provided.";
pub const SOURCE_UNAVAILABLE: &str = "source unavailable";

const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub text: String,
    pub user_id: String,
    pub session_id: Option<i64>,
    pub document_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub external_id: String,
    pub title: String,
    pub excerpt: String,
}

/// A source as shown to the caller; `document` is absent once the chunk is gone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceView {
    pub chunk_id: i64,
    pub relevance_score: f64,
    pub document: Option<SourceDocument>,
}

impl SourceView {
    fn resolved(chunk_id: i64, relevance_score: f64, chunk: Option<&ChunkWithDocument>) -> Self {
        Self {
            chunk_id,
            relevance_score,
            document: chunk.map(|chunk| SourceDocument {
                external_id: chunk.external_id.clone(),
                title: chunk.title.clone(),
                excerpt: excerpt(&chunk.content),
            }),
        }
    }
}

impl From<SourceDetail> for SourceView {
    #[inline]
    fn from(detail: SourceDetail) -> Self {
        let document = match (detail.external_id, detail.title, detail.content) {
            (Some(external_id), Some(title), Some(content)) => Some(SourceDocument {
                external_id,
                title,
                excerpt: excerpt(&content),
            }),
            _ => None,
        };
        Self {
            chunk_id: detail.chunk_id,
            relevance_score: detail.relevance_score,
            document,
        }
    }
}

impl fmt::Display for SourceView {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.document {
            Some(document) => write!(
                f,
                "[{:.3}] {} ({})",
                self.relevance_score, document.title, document.external_id
            ),
            None => write!(
                f,
                "[{:.3}] {} (chunk {})",
                self.relevance_score, SOURCE_UNAVAILABLE, self.chunk_id
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub text: String,
    pub sources: Vec<SourceView>,
    pub session_id: i64,
    pub question_id: i64,
    pub outcome: AnswerOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub question_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerView {
    pub text: String,
    pub outcome: AnswerOutcome,
    pub created_at: NaiveDateTime,
    pub sources: Vec<SourceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub question_id: i64,
    pub question: String,
    pub document_ids: Vec<String>,
    pub asked_at: NaiveDateTime,
    /// Absent when answering was interrupted before the answer was stored
    pub answer: Option<AnswerView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: i64,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub exchanges: Vec<Exchange>,
}

/// Answers questions against the vector index and records every exchange
pub struct AnswerOrchestrator {
    database: Database,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    selection: SelectionService,
    retrieval: RetrievalConfig,
    generation_timeout: Duration,
}

struct Drafted {
    text: String,
    outcome: AnswerOutcome,
    hits: Vec<ScoredChunk>,
    chunks: HashMap<i64, ChunkWithDocument>,
}

impl Drafted {
    fn without_sources(text: &str, outcome: AnswerOutcome) -> Self {
        Self {
            text: text.to_string(),
            outcome,
            hits: Vec::new(),
            chunks: HashMap::new(),
        }
    }
}

impl AnswerOrchestrator {
    #[inline]
    pub fn new(
        database: Database,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        retrieval: RetrievalConfig,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            selection: SelectionService::new(database.clone()),
            database,
            index,
            embedder,
            generator,
            retrieval,
            generation_timeout,
        }
    }

    /// Answer a question, creating a session when none is given.
    ///
    /// Backend failures degrade to a fixed answer; the session, question and
    /// answer are recorded either way.
    #[inline]
    pub async fn answer(&self, request: QuestionRequest) -> Result<AnswerResponse> {
        let question_text = request.text.trim();
        if question_text.is_empty() {
            return Err(RagError::InvalidInput(
                "question text must not be empty".to_string(),
            ));
        }
        if request.user_id.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "user_id must not be empty".to_string(),
            ));
        }

        let session = self
            .resolve_session(&request.user_id, request.session_id)
            .await?;
        let question = self
            .database
            .record_question(session.id, question_text, request.document_ids.as_deref())
            .await?;
        debug!("Recorded question {} in session {}", question.id, session.id);

        let filter = self
            .document_filter(&request.user_id, request.document_ids)
            .await?;
        let drafted = self.draft(question_text, filter.as_deref()).await?;

        let new_sources: Vec<NewSource> = drafted
            .hits
            .iter()
            .map(|hit| NewSource {
                chunk_id: hit.chunk_id,
                relevance_score: clamp_score(hit.score),
            })
            .collect();

        let answer = self
            .database
            .record_answer(question.id, &drafted.text, drafted.outcome, &new_sources)
            .await?;
        info!(
            "Answered question {} ({}) with {} sources",
            question.id,
            answer.outcome,
            new_sources.len()
        );

        let sources = new_sources
            .iter()
            .map(|source| {
                SourceView::resolved(
                    source.chunk_id,
                    source.relevance_score,
                    drafted.chunks.get(&source.chunk_id),
                )
            })
            .collect();

        Ok(AnswerResponse {
            text: answer.text,
            sources,
            session_id: session.id,
            question_id: question.id,
            outcome: answer.outcome,
        })
    }

    /// Sessions of a user, newest first
    #[inline]
    pub async fn history(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SessionSummary>> {
        if user_id.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "user_id must not be empty".to_string(),
            ));
        }

        let sessions = self
            .database
            .list_sessions(user_id, i64::from(limit), i64::from(offset))
            .await?;

        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            let question_count = self.database.count_questions(session.id).await?;
            summaries.push(SessionSummary {
                id: session.id,
                user_id: session.user_id,
                created_at: session.created_at,
                question_count,
            });
        }
        Ok(summaries)
    }

    /// A session with every question, its answer and resolved sources
    #[inline]
    pub async fn session(&self, session_id: i64) -> Result<SessionView> {
        let session = self
            .database
            .get_session(session_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("Session {} not found", session_id)))?;

        let questions = self.database.list_questions(session_id).await?;
        let mut answers: HashMap<i64, _> = self
            .database
            .list_answers(session_id)
            .await?
            .into_iter()
            .map(|answer| (answer.question_id, answer))
            .collect();
        let mut sources = self
            .database
            .list_source_details(session_id)
            .await?
            .into_iter()
            .into_group_map_by(|detail| detail.answer_id);

        let exchanges = questions
            .into_iter()
            .map(|question| {
                let answer = answers.remove(&question.id).map(|answer| AnswerView {
                    sources: sources
                        .remove(&answer.id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(SourceView::from)
                        .collect(),
                    text: answer.text,
                    outcome: answer.outcome,
                    created_at: answer.created_at,
                });
                exchange(question, answer)
            })
            .collect();

        Ok(SessionView {
            id: session.id,
            user_id: session.user_id,
            created_at: session.created_at,
            exchanges,
        })
    }

    async fn resolve_session(&self, user_id: &str, session_id: Option<i64>) -> Result<QaSession> {
        let Some(session_id) = session_id else {
            let session = self.database.create_session(user_id).await?;
            info!("Started session {} for {}", session.id, user_id);
            return Ok(session);
        };

        let session = self
            .database
            .get_session(session_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("Session {} not found", session_id)))?;
        if session.user_id != user_id {
            return Err(RagError::InvalidInput(format!(
                "Session {} belongs to another user",
                session_id
            )));
        }
        Ok(session)
    }

    /// Explicit ids win, then the user's selection; an empty list means no restriction
    async fn document_filter(
        &self,
        user_id: &str,
        requested: Option<Vec<String>>,
    ) -> Result<Option<Vec<String>>> {
        if let Some(ids) = requested.filter(|ids| !ids.is_empty()) {
            return Ok(Some(ids));
        }

        let selected = self
            .selection
            .get_selected_documents(user_id)
            .await?
            .document_ids;
        if selected.is_empty() {
            Ok(None)
        } else {
            debug!("Restricting question to {} selected documents", selected.len());
            Ok(Some(selected))
        }
    }

    async fn draft(&self, question: &str, filter: Option<&[String]>) -> Result<Drafted> {
        let query = match self.embed_question(question).await {
            Ok(query) => query,
            Err(e) => {
                warn!("Could not embed question: {}", e);
                return Ok(Drafted::without_sources(
                    GENERATION_UNAVAILABLE_ANSWER,
                    AnswerOutcome::GenerationUnavailable,
                ));
            }
        };

        let hits = self.index.search(&query, self.retrieval.top_k, filter)?;
        if hits.is_empty() {
            info!("No chunks retrieved, answering without generation");
            return Ok(Drafted::without_sources(
                INSUFFICIENT_INFORMATION_ANSWER,
                AnswerOutcome::InsufficientContext,
            ));
        }

        let chunk_ids: Vec<i64> = hits.iter().map(|hit| hit.chunk_id).collect();
        let chunks: HashMap<i64, ChunkWithDocument> = self
            .database
            .get_chunks_with_documents(&chunk_ids)
            .await?
            .into_iter()
            .map(|chunk| (chunk.id, chunk))
            .collect();

        let ranked: Vec<&str> = hits
            .iter()
            .filter_map(|hit| chunks.get(&hit.chunk_id))
            .map(|chunk| chunk.content.as_str())
            .collect();
        if ranked.len() < hits.len() {
            warn!(
                "{} retrieved chunks vanished before context assembly",
                hits.len() - ranked.len()
            );
        }

        let (text, outcome) = if ranked.is_empty() {
            (
                INSUFFICIENT_INFORMATION_ANSWER.to_string(),
                AnswerOutcome::InsufficientContext,
            )
        } else {
            let context = assemble_context(&ranked, self.retrieval.max_context_chars);
            debug!(
                "Context holds {} of {} chunks ({} chars)",
                context.chunks_used,
                ranked.len(),
                context.text.chars().count()
            );
            self.generate(&context.text, question).await
        };

        Ok(Drafted {
            text,
            outcome,
            hits,
            chunks,
        })
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>> {
        let query = self.embedder.embed(question).await?;
        check_dimension(self.embedder.dimension(), &query)?;
        Ok(query)
    }

    async fn generate(&self, context: &str, question: &str) -> (String, AnswerOutcome) {
        let prompt = build_prompt(context, question);
        let call = self.generator.generate(SYSTEM_INSTRUCTION, &prompt);

        match tokio::time::timeout(self.generation_timeout, call).await {
            Ok(Ok(text)) if text.trim().is_empty() => {
                warn!("Generator {} returned an empty answer", self.generator.model_id());
                (NO_ANSWER_PRODUCED.to_string(), AnswerOutcome::Generated)
            }
            Ok(Ok(text)) => (text.trim().to_string(), AnswerOutcome::Generated),
            Ok(Err(e)) => {
                warn!("Generation failed: {}", e);
                (
                    GENERATION_UNAVAILABLE_ANSWER.to_string(),
                    AnswerOutcome::GenerationUnavailable,
                )
            }
            Err(_) => {
                warn!(
                    "Generation timed out after {:?}",
                    self.generation_timeout
                );
                (
                    GENERATION_UNAVAILABLE_ANSWER.to_string(),
                    AnswerOutcome::GenerationUnavailable,
                )
            }
        }
    }
}

fn exchange(question: Question, answer: Option<AnswerView>) -> Exchange {
    Exchange {
        question_id: question.id,
        document_ids: question.document_id_list(),
        question: question.text,
        asked_at: question.created_at,
        answer,
    }
}

/// Relevance scores are stored in [0, 1]; negative similarity counts as irrelevant
fn clamp_score(score: f32) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    f64::from(score).clamp(0.0, 1.0)
}

fn excerpt(content: &str) -> String {
    if content.chars().count() <= EXCERPT_CHARS {
        return content.to_string();
    }
    let mut excerpt: String = content.chars().take(EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}
