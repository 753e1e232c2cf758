// Document selection
// Per-user working set of documents that scopes questions without an explicit filter

#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionView {
    pub user_id: String,
    pub document_ids: Vec<String>,
    /// Absent when the user never selected anything
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct SelectionService {
    database: Database,
}

impl SelectionService {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Replace the user's selection with `document_ids`
    #[inline]
    pub async fn select_documents(
        &self,
        user_id: &str,
        document_ids: &[String],
    ) -> Result<SelectionView> {
        validate_user(user_id)?;

        let document_ids: Vec<String> = document_ids
            .iter()
            .map(|id| id.trim())
            .unique()
            .map(str::to_string)
            .collect();
        if document_ids.iter().any(String::is_empty) {
            return Err(RagError::InvalidInput(
                "document ids must not be empty".to_string(),
            ));
        }

        for id in &document_ids {
            if self.database.get_document(id).await?.is_none() {
                debug!("Selected document {} is not ingested yet", id);
            }
        }

        let selection = self
            .database
            .replace_selection(user_id, &document_ids)
            .await?;
        info!(
            "User {} selected {} documents",
            user_id,
            document_ids.len()
        );

        Ok(SelectionView {
            user_id: selection.user_id.clone(),
            document_ids: selection.document_id_list(),
            updated_at: Some(selection.updated_at),
        })
    }

    /// The user's selection, or an empty one
    #[inline]
    pub async fn get_selected_documents(&self, user_id: &str) -> Result<SelectionView> {
        validate_user(user_id)?;

        let view = match self.database.get_selection(user_id).await? {
            Some(selection) => SelectionView {
                document_ids: selection.document_id_list(),
                user_id: selection.user_id,
                updated_at: Some(selection.updated_at),
            },
            None => SelectionView {
                user_id: user_id.to_string(),
                document_ids: Vec::new(),
                updated_at: None,
            },
        };
        Ok(view)
    }
}

fn validate_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(RagError::InvalidInput(
            "user_id must not be empty".to_string(),
        ));
    }
    Ok(())
}
