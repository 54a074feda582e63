//! End-to-end dispatch flow tests against an in-memory session store and a
//! mock upstream server.

use async_trait::async_trait;
use mockito::Matcher;
use std::collections::HashMap;
use switchboard_bot::bot::dispatch::{CommandDispatcher, DirectInput};
use switchboard_bot::bot::views;
use switchboard_bot::config::{ServiceRegistry, Settings};
use switchboard_bot::llm::AiClient;
use switchboard_bot::storage::{get_session, SessionStore, StorageError, UserSession};
use tokio::sync::Mutex;

const USER: i64 = 1001;

#[derive(Default)]
struct MemoryStore {
    sessions: Mutex<HashMap<i64, UserSession>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, user_id: i64) -> Result<Option<UserSession>, StorageError> {
        Ok(self.sessions.lock().await.get(&user_id).cloned())
    }

    async fn store(&self, user_id: i64, session: &UserSession) -> Result<(), StorageError> {
        self.sessions.lock().await.insert(user_id, session.clone());
        Ok(())
    }
}

/// A store whose every operation fails, for the degrade-to-default paths.
struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    async fn load(&self, _user_id: i64) -> Result<Option<UserSession>, StorageError> {
        Err(StorageError::Config("store offline".into()))
    }

    async fn store(&self, _user_id: i64, _session: &UserSession) -> Result<(), StorageError> {
        Err(StorageError::Config("store offline".into()))
    }
}

fn two_service_registry(base_url: &str) -> ServiceRegistry {
    ServiceRegistry::from_json(&format!(
        r#"{{
            "demo": {{"baseUrl": "{base_url}", "apiKey": "k1", "models": ["m1", "m2"], "type": "openai"}},
            "anth": {{"baseUrl": "{base_url}", "apiKey": "k2", "models": ["a1"], "type": "anthropic"}}
        }}"#
    ))
    .expect("registry json must parse")
}

fn dispatcher<'a>(
    registry: &'a ServiceRegistry,
    store: &'a dyn SessionStore,
    ai: &'a AiClient,
) -> CommandDispatcher<'a> {
    CommandDispatcher {
        registry,
        store,
        ai,
        system_message: None,
    }
}

fn text_input(text: &str) -> DirectInput {
    DirectInput {
        text: text.to_string(),
        quoted_text: None,
        image: None,
    }
}

#[tokio::test]
async fn test_missing_session_defaults_to_first_service_and_model() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();

    let session = get_session(&store, USER, &registry).await;
    assert_eq!(session.current_service, "demo");
    assert_eq!(session.current_model, "m1");

    // A failing store degrades to the same defaults instead of erroring
    let session = get_session(&BrokenStore, USER, &registry).await;
    assert_eq!(session.current_service, "demo");
    assert_eq!(session.current_model, "m1");
}

#[tokio::test]
async fn test_use_then_model_selects_pair_and_is_idempotent() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    for _ in 0..2 {
        let items = dispatch.direct_message(USER, text_input("/use demo")).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].title.contains("Switched to demo"));

        let items = dispatch.direct_message(USER, text_input("/model m2")).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].reply_text.contains("m2"));

        let stored = store.sessions.lock().await.get(&USER).cloned();
        assert_eq!(
            stored,
            Some(UserSession {
                current_service: "demo".into(),
                current_model: "m2".into(),
            })
        );
    }
}

#[tokio::test]
async fn test_switching_service_resets_model_to_its_first() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    dispatch.direct_message(USER, text_input("/model m2")).await;
    dispatch.direct_message(USER, text_input("/use anth")).await;

    let stored = store.sessions.lock().await.get(&USER).cloned();
    assert_eq!(
        stored,
        Some(UserSession {
            current_service: "anth".into(),
            current_model: "a1".into(),
        })
    );
}

#[tokio::test]
async fn test_unknown_targets_never_mutate_the_session() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    dispatch.direct_message(USER, text_input("/use anth")).await;
    let before = store.sessions.lock().await.get(&USER).cloned();

    // Direct surface: silent no-op
    let items = dispatch
        .direct_message(USER, text_input("/use nonexistent"))
        .await;
    assert!(items.is_empty());
    let items = dispatch
        .direct_message(USER, text_input("/model nonexistent"))
        .await;
    assert!(items.is_empty());

    // Inline surface: the unknown-command fallback, still no mutation
    let items = dispatch.inline_query(USER, "/use nonexistent").await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "unknown");

    let after = store.sessions.lock().await.get(&USER).cloned();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_empty_inline_query_yields_help_with_current_selection() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    let items = dispatch.inline_query(USER, "").await;
    assert_eq!(items.len(), 4);
    assert!(items[0].reply_text.contains("demo"));
    assert!(items[0].reply_text.contains("m1"));
}

#[tokio::test]
async fn test_service_listing_marks_current_selection() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    let items = dispatch.inline_query(USER, "/s").await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "svc:demo");
    assert!(items[0].title.starts_with("✅"));
    assert!(items[1].title.starts_with("⬜"));
    assert_eq!(items[0].reply_text, "/use demo");

    let items = dispatch.inline_query(USER, "/m").await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "mdl:m1");
    assert_eq!(items[1].reply_text, "/model m2");
}

#[tokio::test]
async fn test_callback_tokens_mutate_like_commands() {
    let registry = two_service_registry("https://unused.example");
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    let ack = dispatch
        .selection_callback(USER, "svc:anth")
        .await
        .expect("known service must ack");
    assert!(ack.toast.contains("anth"));
    assert!(ack.confirmation.contains("a1"));

    let stored = store.sessions.lock().await.get(&USER).cloned();
    assert_eq!(
        stored,
        Some(UserSession {
            current_service: "anth".into(),
            current_model: "a1".into(),
        })
    );

    // Unknown model for the current service, and a foreign token: no ack,
    // no mutation
    assert!(dispatch.selection_callback(USER, "mdl:m2").await.is_none());
    assert!(dispatch.selection_callback(USER, "other:x").await.is_none());
    let after = store.sessions.lock().await.get(&USER).cloned();
    assert_eq!(after, stored);
}

#[tokio::test]
async fn test_whitelist_gate_and_denial_shape() {
    let settings = Settings {
        telegram_token: "dummy".into(),
        whitelist_str: Some("1".into()),
        ai_services: "{}".into(),
        system_message: None,
        r2_access_key_id: None,
        r2_secret_access_key: None,
        r2_endpoint_url: None,
        r2_bucket_name: None,
    };
    assert!(settings.is_allowed(1));
    assert!(!settings.is_allowed(2));

    let denial = views::denied_item();
    assert!(denial.title.contains("Access denied"));
    assert!(!denial.reply_text.is_empty());
}

#[tokio::test]
async fn test_prompt_round_trip_through_openai_upstream() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer k1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"content": "Hello!"}}]}"#)
        .create_async()
        .await;

    let registry = two_service_registry(&server.url());
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    let items = dispatch
        .direct_message(USER, text_input("say hello"))
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reply_text, "Hello!");
    assert!(items[0].markdown);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_quoted_reply_reaches_upstream_with_both_texts() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("Quoted content".to_string()),
            Matcher::Regex("hello".to_string()),
            Matcher::Regex("translate".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"content": "ok"}}]}"#)
        .create_async()
        .await;

    let registry = two_service_registry(&server.url());
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    let items = dispatch
        .direct_message(
            USER,
            DirectInput {
                text: "translate".into(),
                quoted_text: Some("hello".into()),
                image: None,
            },
        )
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reply_text, "ok");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_upstream_failure_yields_error_item_and_keeps_session() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("upstream down")
        .create_async()
        .await;

    let registry = two_service_registry(&server.url());
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    dispatch.direct_message(USER, text_input("/model m2")).await;
    let before = store.sessions.lock().await.get(&USER).cloned();

    let items = dispatch.direct_message(USER, text_input("ask me")).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "error");
    assert!(items[0].title.contains("Request failed"));
    assert!(items[0].reply_text.contains("503"));

    let after = store.sessions.lock().await.get(&USER).cloned();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_missing_content_field_downgrades_to_placeholder() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let registry = two_service_registry(&server.url());
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &store, &ai);

    let items = dispatch.direct_message(USER, text_input("anyone?")).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reply_text, "No response");
}

#[tokio::test]
async fn test_anthropic_dialect_sends_system_field_and_version_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .match_header("x-api-key", "k2")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""system":"be brief""#.to_string()),
            Matcher::Regex(r#""max_tokens":1000"#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content": [{"type": "text", "text": "fine"}]}"#)
        .create_async()
        .await;

    let registry = two_service_registry(&server.url());
    let store = MemoryStore::default();
    let ai = AiClient::new();
    let dispatch = CommandDispatcher {
        registry: &registry,
        store: &store,
        ai: &ai,
        system_message: Some("be brief"),
    };

    // Move the session onto the anthropic-dialect service first
    dispatch.direct_message(USER, text_input("/use anth")).await;

    let items = dispatch.direct_message(USER, text_input("hello")).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reply_text, "fine");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_broken_store_still_answers_with_defaults() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"content": "still here"}}]}"#)
        .create_async()
        .await;

    let registry = two_service_registry(&server.url());
    let ai = AiClient::new();
    let dispatch = dispatcher(&registry, &BrokenStore, &ai);

    // Selection writes fail silently; the confirmation still renders
    let items = dispatch.direct_message(USER, text_input("/use anth")).await;
    assert_eq!(items.len(), 1);

    // Prompts run against the default session
    let items = dispatch.direct_message(USER, text_input("hi")).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reply_text, "still here");
}
