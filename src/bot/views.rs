//! User-facing texts, result items, and keyboards.
//!
//! Everything the formatter renders lives here so the dispatcher stays free
//! of wording and the wording stays in one place.

use crate::bot::commands::{MODEL_TOKEN_PREFIX, SERVICE_TOKEN_PREFIX};
use crate::bot::dispatch::ResultItem;
use crate::config::ServiceRegistry;
use crate::storage::UserSession;
use crate::utils::truncate_str;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use uuid::Uuid;

/// Characters kept when a reply is shown as an inline result description
pub const PREVIEW_CHARS: usize = 100;

fn marker(current: bool) -> &'static str {
    if current {
        "✅"
    } else {
        "⬜"
    }
}

/// Bounded preview of a reply, with an ellipsis when cut.
#[must_use]
pub fn preview(text: &str) -> String {
    let cut = truncate_str(text, PREVIEW_CHARS);
    if cut.len() < text.len() {
        format!("{cut}…")
    } else {
        cut
    }
}

/// The single item answering an inline query from a denied user.
#[must_use]
pub fn denied_item() -> ResultItem {
    ResultItem {
        id: "denied".into(),
        title: "⛔ Access denied".into(),
        description: None,
        reply_text: "You are not allowed to use this bot".into(),
        markdown: false,
    }
}

/// Fallback item for slash input matching no command.
#[must_use]
pub fn unknown_command_item() -> ResultItem {
    ResultItem {
        id: "unknown".into(),
        title: "❓ Unknown command".into(),
        description: None,
        reply_text: "Unknown command. Send an empty query to see help.".into(),
        markdown: false,
    }
}

/// Help/summary result set: current selection plus command hints.
#[must_use]
pub fn help_items(session: &UserSession) -> Vec<ResultItem> {
    vec![
        ResultItem {
            id: "help-status".into(),
            title: format!(
                "📊 {} / {}",
                session.current_service, session.current_model
            ),
            description: Some("Current service and model".into()),
            reply_text: format!(
                "Current: {} / {}",
                session.current_service, session.current_model
            ),
            markdown: false,
        },
        ResultItem {
            id: "help-services".into(),
            title: "🔄 /services or /s".into(),
            description: Some("List and switch AI services".into()),
            reply_text: "Send /s to list services".into(),
            markdown: false,
        },
        ResultItem {
            id: "help-models".into(),
            title: "🤖 /models or /m".into(),
            description: Some("List and switch models".into()),
            reply_text: "Send /m to list models".into(),
            markdown: false,
        },
        ResultItem {
            id: "help-ask".into(),
            title: "💬 Type a question".into(),
            description: Some("Ask the AI directly".into()),
            reply_text: "Type any text to ask the AI".into(),
            markdown: false,
        },
    ]
}

/// One selectable item per configured service, current one marked.
#[must_use]
pub fn service_items(registry: &ServiceRegistry, session: &UserSession) -> Vec<ResultItem> {
    registry
        .iter()
        .map(|(name, config)| {
            let current = name == session.current_service;
            ResultItem {
                id: format!("{SERVICE_TOKEN_PREFIX}{name}"),
                title: format!("{} {name}", marker(current)),
                description: Some(format!("{} - {} models", config.dialect, config.models.len())),
                reply_text: format!("/use {name}"),
                markdown: false,
            }
        })
        .collect()
}

/// One selectable item per model of the current service.
#[must_use]
pub fn model_items(models: &[String], session: &UserSession) -> Vec<ResultItem> {
    models
        .iter()
        .map(|model| {
            let current = *model == session.current_model;
            ResultItem {
                id: format!("{MODEL_TOKEN_PREFIX}{model}"),
                title: format!("{} {model}", marker(current)),
                description: Some(format!("Service: {}", session.current_service)),
                reply_text: format!("/model {model}"),
                markdown: false,
            }
        })
        .collect()
}

/// Current selection as a single informational item.
#[must_use]
pub fn status_item(session: &UserSession) -> ResultItem {
    ResultItem {
        id: "status".into(),
        title: "📊 Current status".into(),
        description: Some(format!(
            "{} / {}",
            session.current_service, session.current_model
        )),
        reply_text: format!(
            "Current service: {}\nCurrent model: {}",
            session.current_service, session.current_model
        ),
        markdown: false,
    }
}

#[must_use]
pub fn service_confirmation(name: &str, model: &str) -> String {
    format!("Switched to service: {name}\nModel: {model}")
}

#[must_use]
pub fn model_confirmation(name: &str) -> String {
    format!("Switched to model: {name}")
}

#[must_use]
pub fn selection_toast(name: &str) -> String {
    format!("✅ {name}")
}

/// Confirmation item after a successful `/use`.
#[must_use]
pub fn service_switched_item(name: &str, model: &str) -> ResultItem {
    ResultItem {
        id: "switched".into(),
        title: format!("✅ Switched to {name}"),
        description: None,
        reply_text: service_confirmation(name, model),
        markdown: false,
    }
}

/// Confirmation item after a successful `/model`.
#[must_use]
pub fn model_switched_item(name: &str) -> ResultItem {
    ResultItem {
        id: "model-switched".into(),
        title: format!("✅ Switched to {name}"),
        description: None,
        reply_text: model_confirmation(name),
        markdown: false,
    }
}

/// Error item when the stored session points at a service that no longer
/// exists in the configuration.
#[must_use]
pub fn stale_service_item(name: &str) -> ResultItem {
    ResultItem {
        id: "stale-service".into(),
        title: "❌ Service not configured".into(),
        description: Some(name.to_string()),
        reply_text: format!("Service '{name}' is no longer configured. Send /s to pick another."),
        markdown: false,
    }
}

/// Successful AI reply: full text as the payload, bounded preview as the
/// description.
#[must_use]
pub fn ai_reply_item(text: &str) -> ResultItem {
    ResultItem {
        id: format!("ai-{}", Uuid::new_v4()),
        title: "💬 AI reply".into(),
        description: Some(preview(text)),
        reply_text: text.to_string(),
        markdown: true,
    }
}

/// Visible error item for a failed backend call.
#[must_use]
pub fn ai_error_item(error: &str) -> ResultItem {
    ResultItem {
        id: "error".into(),
        title: "❌ Request failed".into(),
        description: Some(preview(error)),
        reply_text: format!("Request failed: {error}"),
        markdown: false,
    }
}

/// Static usage text for `/start` and `/help` on the direct surface.
#[must_use]
pub fn usage_item(session: &UserSession) -> ResultItem {
    ResultItem {
        id: "usage".into(),
        title: "🤖 Usage".into(),
        description: None,
        reply_text: format!(
            "🤖 AI switchboard\n\n\
             Current service: {}\n\
             Current model: {}\n\n\
             Commands:\n\
             /services (/s) - list and switch AI services\n\
             /models (/m) - list and switch models\n\
             /status (/st) - show the current selection\n\n\
             Any other text is sent to the AI. Reply to a message to quote it.",
            session.current_service, session.current_model
        ),
        markdown: false,
    }
}

/// True when an item carries a selection token and can be a button.
#[must_use]
pub fn is_selection_item(item: &ResultItem) -> bool {
    item.id.starts_with(SERVICE_TOKEN_PREFIX) || item.id.starts_with(MODEL_TOKEN_PREFIX)
}

/// Prompt line shown above a selection button grid.
#[must_use]
pub fn choice_prompt(items: &[ResultItem]) -> &'static str {
    if items
        .first()
        .is_some_and(|i| i.id.starts_with(MODEL_TOKEN_PREFIX))
    {
        "Select a model:"
    } else {
        "Select a service:"
    }
}

/// One button per item, the item id as the opaque callback token.
#[must_use]
pub fn selection_keyboard(items: &[ResultItem]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        items
            .iter()
            .map(|item| vec![InlineKeyboardButton::callback(item.title.clone(), item.id.clone())]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UserSession {
        UserSession {
            current_service: "demo".into(),
            current_model: "m1".into(),
        }
    }

    #[test]
    fn test_preview_bounds_and_ellipsis() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with('…'));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
    }

    #[test]
    fn test_help_items_lead_with_current_selection() {
        let items = help_items(&session());
        assert_eq!(items.len(), 4);
        assert!(items[0].reply_text.contains("demo"));
        assert!(items[0].reply_text.contains("m1"));

        // ids unique within the batch
        let mut ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_model_items_mark_current() {
        let models = vec!["m1".to_string(), "m2".to_string()];
        let items = model_items(&models, &session());
        assert_eq!(items.len(), 2);
        assert!(items[0].title.starts_with("✅"));
        assert!(items[1].title.starts_with("⬜"));
        assert_eq!(items[0].id, "mdl:m1");
        assert_eq!(items[0].reply_text, "/model m1");
        assert!(is_selection_item(&items[0]));
    }

    #[test]
    fn test_choice_prompt_distinguishes_grids() {
        let models = vec!["m1".to_string()];
        let model_grid = model_items(&models, &session());
        assert_eq!(choice_prompt(&model_grid), "Select a model:");
    }
}
