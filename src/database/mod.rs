// Database module
// SQLite persistence for documents, chunks, embeddings, ingestion state and QA history

pub mod sqlite;

pub use sqlite::*;
