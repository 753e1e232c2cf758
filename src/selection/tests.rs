use super::*;
use crate::test_support::temp_database;

#[tokio::test]
async fn unknown_user_has_empty_selection() {
    let (_temp_dir, database) = temp_database().await;
    let service = SelectionService::new(database);

    let view = service
        .get_selected_documents("alice")
        .await
        .expect("selection");

    assert_eq!(view.user_id, "alice");
    assert!(view.document_ids.is_empty());
    assert!(view.updated_at.is_none());
}

#[tokio::test]
async fn selection_is_replaced_not_merged() {
    let (_temp_dir, database) = temp_database().await;
    let service = SelectionService::new(database);

    service
        .select_documents("alice", &["doc-1".to_string(), "doc-2".to_string()])
        .await
        .expect("first selection");
    let view = service
        .select_documents("alice", &["doc-3".to_string()])
        .await
        .expect("second selection");

    assert_eq!(view.document_ids, vec!["doc-3".to_string()]);
    assert_eq!(
        service
            .get_selected_documents("alice")
            .await
            .expect("selection")
            .document_ids,
        vec!["doc-3".to_string()]
    );
}

#[tokio::test]
async fn selection_is_trimmed_and_deduplicated() {
    let (_temp_dir, database) = temp_database().await;
    let service = SelectionService::new(database);

    let view = service
        .select_documents(
            "alice",
            &[
                " doc-1".to_string(),
                "doc-2".to_string(),
                "doc-1 ".to_string(),
            ],
        )
        .await
        .expect("selection");

    assert_eq!(view.document_ids, vec!["doc-1".to_string(), "doc-2".to_string()]);
}

#[tokio::test]
async fn selections_are_per_user() {
    let (_temp_dir, database) = temp_database().await;
    let service = SelectionService::new(database);

    service
        .select_documents("alice", &["doc-1".to_string()])
        .await
        .expect("alice");
    service
        .select_documents("bob", &["doc-2".to_string()])
        .await
        .expect("bob");

    let alice = service.get_selected_documents("alice").await.expect("alice");
    assert_eq!(alice.document_ids, vec!["doc-1".to_string()]);
}

#[tokio::test]
async fn empty_selection_clears_working_set() {
    let (_temp_dir, database) = temp_database().await;
    let service = SelectionService::new(database);

    service
        .select_documents("alice", &["doc-1".to_string()])
        .await
        .expect("select");
    let view = service.select_documents("alice", &[]).await.expect("clear");

    assert!(view.document_ids.is_empty());
    assert!(view.updated_at.is_some());
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let (_temp_dir, database) = temp_database().await;
    let service = SelectionService::new(database);

    let error = service
        .select_documents(" ", &["doc-1".to_string()])
        .await
        .expect_err("empty user");
    assert!(matches!(error, RagError::InvalidInput(_)));

    let error = service
        .select_documents("alice", &["  ".to_string()])
        .await
        .expect_err("empty document id");
    assert!(matches!(error, RagError::InvalidInput(_)));

    let error = service
        .get_selected_documents("")
        .await
        .expect_err("empty user");
    assert!(matches!(error, RagError::InvalidInput(_)));
}
