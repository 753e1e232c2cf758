use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::config::settings::DATABASE_FILE_NAME;
use crate::database::Database;
use crate::database::models::{IngestionRecord, IngestionStatus};
use crate::embeddings::{Embedder, build_embedder};
use crate::generation::build_generator;
use crate::index::VectorIndex;
use crate::ingestion::{IngestRequest, IngestionPipeline};
use crate::qa::{AnswerOrchestrator, AnswerResponse, QuestionRequest, SourceView};
use crate::selection::SelectionService;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Everything a command needs, opened once per invocation
pub struct AppContext {
    pub config: Config,
    pub database: Database,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: IngestionPipeline,
}

impl AppContext {
    /// Open the database, load the vector index and recover interrupted runs
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let database = Database::initialize_in_dir(config.get_base_dir(), DATABASE_FILE_NAME)
            .await
            .context("Failed to initialize database")?;

        let embedder = build_embedder(&config).context("Failed to create embedding backend")?;
        embedder
            .health_check()
            .await
            .context("Embedding backend is not ready")?;
        let index = Arc::new(
            VectorIndex::load(&database, embedder.model_id(), embedder.dimension())
                .await
                .context("Failed to load vector index")?,
        );

        let pipeline = IngestionPipeline::new(
            database.clone(),
            Arc::clone(&index),
            Arc::clone(&embedder),
            config.chunking.clone(),
            config.ingestion.clone(),
        );
        pipeline
            .recover_interrupted()
            .await
            .context("Failed to recover interrupted ingestions")?;

        Ok(Self {
            config,
            database,
            index,
            embedder,
            pipeline,
        })
    }

    #[inline]
    pub fn orchestrator(&self) -> Result<AnswerOrchestrator> {
        let generator =
            build_generator(&self.config).context("Failed to create generation backend")?;
        Ok(AnswerOrchestrator::new(
            self.database.clone(),
            Arc::clone(&self.index),
            Arc::clone(&self.embedder),
            generator,
            self.config.retrieval.clone(),
            self.config.generation.timeout(),
        ))
    }
}

/// Ingest a text file and follow the run until it ends; Ctrl+C cancels it
#[inline]
pub async fn ingest_file(
    app: &AppContext,
    file: &Path,
    external_id: String,
    title: String,
    description: Option<String>,
    callback_url: Option<String>,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read document: {}", file.display()))?;

    let response = app
        .pipeline
        .ingest(IngestRequest {
            external_id: external_id.clone(),
            title,
            description,
            content,
            callback_url,
        })
        .await?;
    println!(
        "{} {} ({})",
        style("📥").bold(),
        response.message,
        style(&response.external_id).cyan()
    );

    let progress = ProgressBar::new(0).with_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} chunks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message(external_id.clone());

    let wait = app.pipeline.wait(&external_id);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    let record = loop {
        tokio::select! {
            record = &mut wait => break record?,
            _ = ticker.tick() => {
                match app.pipeline.status(&external_id).await {
                    Ok(record) => {
                        progress.set_length(u64::try_from(record.total_chunks).unwrap_or(0));
                        progress.set_position(u64::try_from(record.chunks_processed).unwrap_or(0));
                    }
                    Err(e) => warn!("Failed to poll ingestion status: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                progress.set_message("cancelling");
                info!("Interrupt received, cancelling ingestion of {}", external_id);
                break app.pipeline.cancel(&external_id).await?;
            }
        }
    };
    progress.finish_and_clear();

    print_ingestion(&record);
    Ok(())
}

/// Show one run, or every known run when no id is given
#[inline]
pub async fn show_status(app: &AppContext, external_id: Option<&str>) -> Result<()> {
    if let Some(external_id) = external_id {
        let record = app.pipeline.status(external_id).await?;
        print_ingestion(&record);
        return Ok(());
    }

    let records = app.database.list_ingestion_statuses().await?;
    if records.is_empty() {
        println!("No documents have been ingested yet.");
        println!("Use 'docs-rag ingest <file> --id <id> --title <title>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", records.len());
    println!();
    for record in &records {
        print_ingestion(record);
    }

    let completed = records
        .iter()
        .filter(|r| r.status == IngestionStatus::Completed)
        .count();
    let active = records.iter().filter(|r| r.status.is_active()).count();
    let failed = records
        .iter()
        .filter(|r| r.status == IngestionStatus::Failed)
        .count();

    println!("Summary:");
    println!("  Completed: {}", completed);
    println!("  In progress: {}", active);
    println!("  Failed: {}", failed);
    println!("  Indexed chunks: {}", app.index.len());
    Ok(())
}

#[inline]
pub async fn cancel_ingestion(app: &AppContext, external_id: &str) -> Result<()> {
    let record = app.pipeline.cancel(external_id).await?;
    print_ingestion(&record);
    Ok(())
}

#[inline]
pub async fn ask_question(
    app: &AppContext,
    text: String,
    user_id: String,
    session_id: Option<i64>,
    document_ids: Vec<String>,
) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let response = orchestrator
        .answer(QuestionRequest {
            text,
            user_id,
            session_id,
            document_ids: (!document_ids.is_empty()).then_some(document_ids),
        })
        .await;
    spinner.finish_and_clear();

    print_answer(&response?);
    Ok(())
}

#[inline]
pub async fn select_documents(
    app: &AppContext,
    user_id: &str,
    document_ids: &[String],
) -> Result<()> {
    let selection = SelectionService::new(app.database.clone())
        .select_documents(user_id, document_ids)
        .await?;

    if selection.document_ids.is_empty() {
        println!("Cleared document selection for {}", style(user_id).cyan());
    } else {
        println!(
            "Selected {} documents for {}:",
            selection.document_ids.len(),
            style(user_id).cyan()
        );
        for id in &selection.document_ids {
            println!("  • {}", id);
        }
    }
    Ok(())
}

#[inline]
pub async fn show_selection(app: &AppContext, user_id: &str) -> Result<()> {
    let selection = SelectionService::new(app.database.clone())
        .get_selected_documents(user_id)
        .await?;

    if selection.document_ids.is_empty() {
        println!("No documents selected; questions search every document.");
        return Ok(());
    }

    println!("Selected documents for {}:", style(user_id).cyan());
    for id in &selection.document_ids {
        println!("  • {}", id);
    }
    if let Some(updated_at) = selection.updated_at {
        println!(
            "Updated: {}",
            style(updated_at.format("%Y-%m-%d %H:%M:%S")).dim()
        );
    }
    Ok(())
}

#[inline]
pub async fn show_history(app: &AppContext, user_id: &str, limit: u32, offset: u32) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let sessions = orchestrator.history(user_id, limit, offset).await?;

    if sessions.is_empty() {
        println!("No question sessions for {}.", user_id);
        return Ok(());
    }

    for session in &sessions {
        println!(
            "💬 Session {} - {} questions - {}",
            style(session.id).bold(),
            session.question_count,
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

#[inline]
pub async fn show_session(app: &AppContext, session_id: i64) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let session = orchestrator.session(session_id).await?;

    println!(
        "Session {} for {} ({})",
        style(session.id).bold(),
        style(&session.user_id).cyan(),
        session.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    for exchange in &session.exchanges {
        println!();
        println!("{} {}", style("Q:").bold().yellow(), exchange.question);
        if !exchange.document_ids.is_empty() {
            println!(
                "   {}",
                style(format!("documents: {}", exchange.document_ids.join(", "))).dim()
            );
        }
        match &exchange.answer {
            Some(answer) => {
                println!("{} {}", style("A:").bold().green(), answer.text);
                print_sources(&answer.sources);
            }
            None => println!("{}", style("A: (no answer recorded)").dim()),
        }
    }
    Ok(())
}

fn print_ingestion(record: &IngestionRecord) {
    let status = match record.status {
        IngestionStatus::Completed => style(record.status.as_str()).green(),
        IngestionStatus::Failed => style(record.status.as_str()).red(),
        IngestionStatus::Pending | IngestionStatus::Processing => {
            style(record.status.as_str()).yellow()
        }
    };

    println!("📄 {}", style(&record.external_id).bold());
    println!("   Status: {}", status);
    if record.total_chunks > 0 {
        println!(
            "   Progress: {}/{} chunks ({:.0}%)",
            record.chunks_processed,
            record.total_chunks,
            record.progress_percentage()
        );
    }
    if let Some(error) = &record.error_message {
        println!("   ⚠️  Error: {}", error);
    }
    println!(
        "   Started: {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(completed_at) = record.completed_at {
        println!("   Finished: {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
}

fn print_answer(response: &AnswerResponse) {
    println!("{}", response.text);
    println!();
    println!(
        "{}",
        style(format!(
            "session {} · question {} · {}",
            response.session_id, response.question_id, response.outcome
        ))
        .dim()
    );
    print_sources(&response.sources);
}

fn print_sources(sources: &[SourceView]) {
    if sources.is_empty() {
        return;
    }
    println!("{}", style("Sources:").bold());
    for (rank, source) in sources.iter().enumerate() {
        println!("  {}. {}", rank + 1, source);
        if let Some(document) = &source.document {
            println!("     {}", style(&document.excerpt).dim());
        }
    }
}
