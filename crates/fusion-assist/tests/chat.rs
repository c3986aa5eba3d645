mod common;

use std::sync::atomic::Ordering;
use uuid::Uuid;

use common::{harness, order, seed_user, Harness};
use fusion_assist::chat::{
    FrameId, ERROR_NOTICE, INVALID_MESSAGE_NOTICE, SESSION_LOST_NOTICE,
};
use fusion_core::completion::{PromptMessage, Role};
use fusion_core::prompt::NO_ORDERS_SUMMARY;
use fusion_core::Error;

async fn history_of(h: &Harness, connection: Uuid) -> Vec<PromptMessage> {
    let session = h.app.chat.registry().get(connection).await.unwrap();
    let session = session.lock().await;
    session.history().to_vec()
}

fn system_prompt(messages: &[PromptMessage]) -> &str {
    assert_eq!(messages[0].role, Role::System);
    &messages[0].content
}

#[tokio::test]
async fn test_open_unknown_user_fails() {
    let h = harness().await;
    let err = h.app.chat.open(404).await.unwrap_err();
    assert!(matches!(err, Error::UserNotFound(404)));
    assert!(h.app.chat.registry().is_empty().await);
}

#[tokio::test]
async fn test_open_replays_last_ten_messages_with_roles() {
    let h = harness().await;
    seed_user(h.store(), 7, Some("Maya"), false).await;
    for i in 0..12 {
        h.store()
            .append_message(7, &format!("m{}", i), i % 2 == 1)
            .await
            .unwrap();
    }

    let session = h.app.chat.open(7).await.unwrap();
    let history = history_of(&h, session.connection).await;
    assert_eq!(history.len(), 10);
    assert_eq!(history[0].content, "m2");
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[9].content, "m11");
}

#[tokio::test]
async fn test_open_with_no_past_messages() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;
    let session = h.app.chat.open(7).await.unwrap();
    assert!(history_of(&h, session.connection).await.is_empty());
    assert_eq!(h.app.chat.registry().len().await, 1);
}

#[tokio::test]
async fn test_document_question_uses_retrieved_context() {
    let h = harness().await;
    seed_user(h.store(), 7, Some("Maya"), false).await;
    h.app
        .upload_document(1, "warranty.txt", b"Every device carries a two year warranty.")
        .await
        .unwrap();
    h.app.jobs.wait_idle().await;

    h.completer.set_label("DOCUMENT_QUESTION");
    let session = h.app.chat.open(7).await.unwrap();
    let frame = h
        .app
        .chat
        .handle(session.connection, r#"{"message": "What is the warranty?"}"#)
        .await;

    assert!(!frame.is_error());
    assert!(matches!(frame.id, FrameId::Message(_)));
    assert_eq!(frame.user, "FusionBot");

    let prompt = h.completer.last_reply_prompt();
    let system = system_prompt(&prompt);
    assert!(system.contains("two year warranty"));
    assert!(system.contains("ONLY the context"));
    assert_eq!(prompt.last().unwrap().content, "What is the warranty?");

    let history = history_of(&h, session.connection).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "What is the warranty?");
    assert_eq!(history[1].content, frame.message);
}

#[tokio::test]
async fn test_malformed_label_routes_to_order_context() {
    let h = harness().await;
    seed_user(h.store(), 7, Some("Maya"), false).await;
    h.completer.set_label("I think this is about documents");

    let session = h.app.chat.open(7).await.unwrap();
    let frame = h.app.chat.handle_message(session.connection, "hello").await;
    assert!(!frame.is_error());

    let prompt = h.completer.last_reply_prompt();
    let system = system_prompt(&prompt);
    assert!(system.contains("RECENT ORDER HISTORY"));
    assert!(system.contains("Maya"));
}

#[tokio::test]
async fn test_user_without_orders_gets_no_orders_notice() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;

    let session = h.app.chat.open(7).await.unwrap();
    h.app
        .chat
        .handle_message(session.connection, "what did I buy?")
        .await;

    let prompt = h.completer.last_reply_prompt();
    let system = system_prompt(&prompt);
    assert!(system.contains(NO_ORDERS_SUMMARY));
    assert!(system.contains("user7"), "display name falls back to the email local part");
}

#[tokio::test]
async fn test_order_question_includes_summary_and_details() {
    let h = harness().await;
    seed_user(h.store(), 7, Some("Maya"), false).await;
    h.app.record_order(&order(7, "Laptop", 1, 999.0)).await.unwrap();
    h.app.record_order(&order(7, "Headphones", 2, 50.0)).await.unwrap();
    h.app.jobs.wait_idle().await;

    let session = h.app.chat.open(7).await.unwrap();
    h.app
        .chat
        .handle_message(session.connection, "What was my previous order?")
        .await;

    let prompt = h.completer.last_reply_prompt();
    let system = system_prompt(&prompt);
    assert!(system.contains("Buys mostly electronics."));
    assert!(system.contains("DETAILED ORDER HISTORY"));
    assert!(system.contains("Headphones"));
}

#[tokio::test]
async fn test_general_message_skips_detailed_orders() {
    let h = harness().await;
    seed_user(h.store(), 7, Some("Maya"), false).await;
    h.app.record_order(&order(7, "Laptop", 1, 999.0)).await.unwrap();
    h.app.jobs.wait_idle().await;

    let session = h.app.chat.open(7).await.unwrap();
    h.app.chat.handle_message(session.connection, "hi there").await;

    let system = h.completer.last_reply_prompt()[0].content.clone();
    assert!(!system.contains("DETAILED ORDER HISTORY"));
}

#[tokio::test]
async fn test_provider_failure_yields_error_frame_and_keeps_history() {
    let h = harness().await;
    seed_user(h.store(), 7, Some("Maya"), false).await;
    let session = h.app.chat.open(7).await.unwrap();
    h.app.chat.handle_message(session.connection, "first").await;
    let before = history_of(&h, session.connection).await;

    h.completer.fail.store(true, Ordering::SeqCst);
    let frame = h.app.chat.handle_message(session.connection, "second").await;

    assert!(frame.is_error());
    assert_eq!(frame.user, "System");
    assert_eq!(frame.message, ERROR_NOTICE);
    assert_eq!(history_of(&h, session.connection).await, before);

    let persisted = h.store().recent_messages(7, 10).await.unwrap();
    let last = persisted.last().unwrap();
    assert_eq!(last.message, "second", "inbound message is persisted before generation");
    assert!(!last.is_from_ai);
}

#[tokio::test]
async fn test_reply_save_failure_keeps_history() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;
    let session = h.app.chat.open(7).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_ai_messages BEFORE INSERT ON chat_messages \
         WHEN NEW.is_from_ai = 1 BEGIN SELECT RAISE(ABORT, 'replies disabled'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let frame = h.app.chat.handle_message(session.connection, "hello").await;
    assert!(frame.is_error());
    assert_eq!(frame.message, ERROR_NOTICE);
    assert!(history_of(&h, session.connection).await.is_empty());

    let persisted = h.store().recent_messages(7, 10).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert!(!persisted[0].is_from_ai);
}

#[tokio::test]
async fn test_turn_persists_both_messages() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;
    let session = h.app.chat.open(7).await.unwrap();
    let frame = h.app.chat.handle_message(session.connection, "hello").await;

    let persisted = h.store().recent_messages(7, 10).await.unwrap();
    assert_eq!(persisted.len(), 2);
    assert!(!persisted[0].is_from_ai);
    assert!(persisted[1].is_from_ai);
    assert_eq!(frame.id, FrameId::Message(persisted[1].id));
    assert_eq!(h.completer.classification_calls(), 1);
}

#[tokio::test]
async fn test_unknown_connection_is_session_lost() {
    let h = harness().await;
    let frame = h.app.chat.handle_message(Uuid::new_v4(), "hello").await;
    assert!(frame.is_error());
    assert_eq!(frame.message, SESSION_LOST_NOTICE);
    assert!(h.completer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_session_is_session_lost() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;
    let session = h.app.chat.open(7).await.unwrap();
    h.app.chat.close(session.connection).await;

    let frame = h.app.chat.handle_message(session.connection, "hello").await;
    assert_eq!(frame.message, SESSION_LOST_NOTICE);
    assert!(h.store().recent_messages(7, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_json_frame() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;
    let session = h.app.chat.open(7).await.unwrap();
    let frame = h.app.chat.handle(session.connection, "not json").await;
    assert_eq!(frame.message, INVALID_MESSAGE_NOTICE);
    assert!(history_of(&h, session.connection).await.is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let h = harness().await;
    seed_user(h.store(), 7, None, false).await;
    seed_user(h.store(), 8, None, false).await;
    let a = h.app.chat.open(7).await.unwrap();
    let b = h.app.chat.open(8).await.unwrap();
    assert_ne!(a.connection, b.connection);

    let (fa, fb) = tokio::join!(
        h.app.chat.handle_message(a.connection, "from seven"),
        h.app.chat.handle_message(b.connection, "from eight"),
    );
    assert!(!fa.is_error() && !fb.is_error());
    assert_eq!(history_of(&h, a.connection).await[0].content, "from seven");
    assert_eq!(history_of(&h, b.connection).await[0].content, "from eight");
}
