use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docs_rag::commands::{
    AppContext, ask_question, cancel_ingestion, ingest_file, select_documents, show_history,
    show_selection, show_session, show_status,
};
use docs_rag::config::{Config, init_config, show_config};

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Document ingestion and question answering over embedded chunks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
    /// Ingest a text document, replacing any previous version with the same id
    Ingest {
        /// Path of the UTF-8 text file to ingest
        file: PathBuf,
        /// External identifier of the document
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// URL that receives JSON status notifications
        #[arg(long)]
        callback_url: Option<String>,
    },
    /// Show ingestion status of one document, or of all documents
    Status {
        /// External identifier of the document
        id: Option<String>,
    },
    /// Cancel an active ingestion and discard its chunks
    Cancel {
        /// External identifier of the document
        id: String,
    },
    /// Ask a question about the ingested documents
    Ask {
        question: String,
        #[arg(long)]
        user: String,
        /// Continue an existing session
        #[arg(long)]
        session: Option<i64>,
        /// Restrict retrieval to these documents (repeatable)
        #[arg(long = "doc")]
        docs: Vec<String>,
    },
    /// Replace the documents that scope a user's questions
    Select {
        #[arg(long)]
        user: String,
        /// Document ids; none clears the selection
        docs: Vec<String>,
    },
    /// Show a user's selected documents
    Selected {
        #[arg(long)]
        user: String,
    },
    /// List a user's question sessions, newest first
    History {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Show every question and answer of a session
    Session {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(Config::config_dir()?)?;

    if let Commands::Config { show, init } = cli.command {
        if init && !show {
            init_config(&config)?;
        } else {
            show_config(&config)?;
        }
        return Ok(());
    }

    let app = AppContext::open(config).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Ingest {
            file,
            id,
            title,
            description,
            callback_url,
        } => {
            ingest_file(&app, &file, id, title, description, callback_url).await?;
        }
        Commands::Status { id } => {
            show_status(&app, id.as_deref()).await?;
        }
        Commands::Cancel { id } => {
            cancel_ingestion(&app, &id).await?;
        }
        Commands::Ask {
            question,
            user,
            session,
            docs,
        } => {
            ask_question(&app, question, user, session, docs).await?;
        }
        Commands::Select { user, docs } => {
            select_documents(&app, &user, &docs).await?;
        }
        Commands::Selected { user } => {
            show_selection(&app, &user).await?;
        }
        Commands::History {
            user,
            limit,
            offset,
        } => {
            show_history(&app, &user, limit, offset).await?;
        }
        Commands::Session { id } => {
            show_session(&app, id).await?;
        }
    }

    Ok(())
}
