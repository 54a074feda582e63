//! Session-addressed command dispatcher.
//!
//! Interprets the command grammar against the caller's stored session,
//! mutates the session for selection commands, and produces the structured
//! result sets the per-surface formatters render.

use crate::bot::commands::{parse_token, Command, SelectionToken};
use crate::bot::views;
use crate::config::ServiceRegistry;
use crate::llm::{AiClient, Prompt};
use crate::storage::{get_session, save_session, SessionStore};
use crate::utils::wrap_quoted;
use tracing::{info, warn};

/// One unit of dispatcher output, consumed within a single response batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultItem {
    /// Unique within one response batch
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// The content delivered back to the conversation
    pub reply_text: String,
    /// Render the reply as Markdown
    pub markdown: bool,
}

/// A direct message, reduced to the fields the dispatcher consumes
#[derive(Debug, Clone, Default)]
pub struct DirectInput {
    /// Message text or caption, possibly empty
    pub text: String,
    /// Text or caption of the message this one replies to
    pub quoted_text: Option<String>,
    /// Image attached to this message, or to the quoted one; never both
    pub image: Option<crate::llm::ImageRef>,
}

/// The two-stage reply to a selection callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionAck {
    /// Short toast shown on the button tap
    pub toast: String,
    /// Full confirmation message for the originating conversation
    pub confirmation: String,
}

/// Shared dependencies for one update's dispatch
pub struct CommandDispatcher<'a> {
    pub registry: &'a ServiceRegistry,
    pub store: &'a dyn SessionStore,
    pub ai: &'a AiClient,
    pub system_message: Option<&'a str>,
}

impl CommandDispatcher<'_> {
    /// Handle an inline query's text, returning the result list to answer
    /// with. Never empty: commands that match nothing produce the
    /// unknown-command fallback on this surface.
    pub async fn inline_query(&self, user_id: i64, raw: &str) -> Vec<ResultItem> {
        match Command::parse(raw) {
            Command::Help => self.help_items(user_id).await,
            Command::Prompt(text) => self.ai_items(user_id, Prompt::TextOnly(text)).await,
            command => {
                let items = self.command_items(user_id, &command).await;
                if items.is_empty() {
                    vec![views::unknown_command_item()]
                } else {
                    items
                }
            }
        }
    }

    /// Handle a direct message. An empty result set means no reply at all.
    pub async fn direct_message(&self, user_id: i64, input: DirectInput) -> Vec<ResultItem> {
        match Command::parse(&input.text) {
            Command::Prompt(text) => {
                let prompt = build_prompt(text, input.quoted_text, input.image);
                self.ai_items(user_id, prompt).await
            }
            // A bare image with no caption is still a question for the AI
            Command::Help if input.image.is_some() => {
                let prompt = build_prompt(String::new(), input.quoted_text, input.image);
                self.ai_items(user_id, prompt).await
            }
            Command::Help | Command::Start => {
                let session = get_session(self.store, user_id, self.registry).await;
                vec![views::usage_item(&session)]
            }
            // Unknown slash commands stay silent on this surface
            Command::UnknownSlash => Vec::new(),
            command => self.command_items(user_id, &command).await,
        }
    }

    /// Apply a `svc:`/`mdl:` selection token from a callback button. Returns
    /// `None` when the token is unknown or targets nothing in the registry;
    /// the tap is then acknowledged without any state change.
    pub async fn selection_callback(&self, user_id: i64, data: &str) -> Option<SelectionAck> {
        let token = parse_token(data)?;
        let mut session = get_session(self.store, user_id, self.registry).await;

        match token {
            SelectionToken::Service(name) => {
                let config = self.registry.get(&name)?;
                session.current_service = name.clone();
                session.current_model = config.models.first().cloned().unwrap_or_default();
                save_session(self.store, user_id, &session).await;
                info!("User {} switched to service {}", user_id, name);
                Some(SelectionAck {
                    toast: views::selection_toast(&name),
                    confirmation: views::service_confirmation(&name, &session.current_model),
                })
            }
            SelectionToken::Model(name) => {
                let config = self.registry.get(&session.current_service)?;
                if !config.models.iter().any(|m| m == &name) {
                    return None;
                }
                session.current_model = name.clone();
                save_session(self.store, user_id, &session).await;
                info!("User {} switched to model {}", user_id, name);
                Some(SelectionAck {
                    toast: views::selection_toast(&name),
                    confirmation: views::model_confirmation(&name),
                })
            }
        }
    }

    /// Shared command handling for both text surfaces. Unknown `/use` and
    /// `/model` targets return an empty set without touching the session.
    async fn command_items(&self, user_id: i64, command: &Command) -> Vec<ResultItem> {
        let mut session = get_session(self.store, user_id, self.registry).await;

        match command {
            Command::Services => views::service_items(self.registry, &session),
            Command::Models => match self.registry.get(&session.current_service) {
                Some(config) => views::model_items(&config.models, &session),
                None => vec![views::stale_service_item(&session.current_service)],
            },
            Command::Status => vec![views::status_item(&session)],
            Command::Use(name) => match self.registry.get(name) {
                Some(config) => {
                    session.current_service = name.clone();
                    session.current_model = config.models.first().cloned().unwrap_or_default();
                    save_session(self.store, user_id, &session).await;
                    info!("User {} switched to service {}", user_id, name);
                    vec![views::service_switched_item(name, &session.current_model)]
                }
                None => Vec::new(),
            },
            Command::Model(name) => {
                let known = self
                    .registry
                    .get(&session.current_service)
                    .is_some_and(|config| config.models.iter().any(|m| m == name));
                if known {
                    session.current_model = name.clone();
                    save_session(self.store, user_id, &session).await;
                    info!("User {} switched to model {}", user_id, name);
                    vec![views::model_switched_item(name)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    async fn help_items(&self, user_id: i64) -> Vec<ResultItem> {
        let session = get_session(self.store, user_id, self.registry).await;
        views::help_items(&session)
    }

    /// Forward free text to the selected backend and shape the outcome.
    async fn ai_items(&self, user_id: i64, prompt: Prompt) -> Vec<ResultItem> {
        let session = get_session(self.store, user_id, self.registry).await;

        let Some(config) = self.registry.get(&session.current_service) else {
            return vec![views::stale_service_item(&session.current_service)];
        };

        match self
            .ai
            .complete(config, &session.current_model, &prompt, self.system_message)
            .await
        {
            Ok(text) => vec![views::ai_reply_item(&text)],
            Err(e) => {
                warn!(
                    "Backend call failed for user {} ({} / {}): {}",
                    user_id, session.current_service, session.current_model, e
                );
                vec![views::ai_error_item(&e.to_string())]
            }
        }
    }
}

/// Assemble the outgoing prompt: quote wrapper first, then the optional
/// image attachment.
fn build_prompt(
    text: String,
    quoted_text: Option<String>,
    image: Option<crate::llm::ImageRef>,
) -> Prompt {
    let text = match quoted_text {
        Some(quoted) if !quoted.is_empty() => wrap_quoted(&quoted, &text),
        _ => text,
    };
    match image {
        Some(image) => Prompt::TextWithImage { text, image },
        None => Prompt::TextOnly(text),
    }
}
