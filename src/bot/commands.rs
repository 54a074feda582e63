//! The restricted command grammar embedded in free-text input.
//!
//! Aliases are exact matches, not prefixes: `/s` switches services but
//! `/some text` is an unknown command.

/// Opaque callback token prefix for a service selection
pub const SERVICE_TOKEN_PREFIX: &str = "svc:";
/// Opaque callback token prefix for a model selection
pub const MODEL_TOKEN_PREFIX: &str = "mdl:";

/// One parsed unit of incoming text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty input: show the help/summary result set
    Help,
    /// `/services` or `/s`
    Services,
    /// `/models` or `/m`
    Models,
    /// `/use <name>`
    Use(String),
    /// `/model <name>`
    Model(String),
    /// `/status` or `/st`
    Status,
    /// `/start` or `/help` (meaningful on the direct-message surface only)
    Start,
    /// Any non-slash text: forward to the AI backend
    Prompt(String),
    /// Slash-prefixed text matching nothing above
    UnknownSlash,
}

impl Command {
    /// Parse trimmed input into a command.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let text = input.trim();
        if text.is_empty() {
            return Self::Help;
        }
        if !text.starts_with('/') {
            return Self::Prompt(text.to_string());
        }

        match text {
            "/services" | "/s" => Self::Services,
            "/models" | "/m" => Self::Models,
            "/status" | "/st" => Self::Status,
            "/start" | "/help" => Self::Start,
            _ => {
                if let Some(name) = text.strip_prefix("/use ") {
                    let name = name.trim();
                    if !name.is_empty() {
                        return Self::Use(name.to_string());
                    }
                }
                if let Some(name) = text.strip_prefix("/model ") {
                    let name = name.trim();
                    if !name.is_empty() {
                        return Self::Model(name.to_string());
                    }
                }
                Self::UnknownSlash
            }
        }
    }
}

/// A selection carried by a callback button's opaque data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionToken {
    Service(String),
    Model(String),
}

/// Parse `svc:<name>` / `mdl:<name>` callback data.
#[must_use]
pub fn parse_token(data: &str) -> Option<SelectionToken> {
    if let Some(name) = data.strip_prefix(SERVICE_TOKEN_PREFIX) {
        return Some(SelectionToken::Service(name.to_string()));
    }
    if let Some(name) = data.strip_prefix(MODEL_TOKEN_PREFIX) {
        return Some(SelectionToken::Model(name.to_string()));
    }
    None
}
