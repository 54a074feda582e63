//! Per-surface update handlers and reply shaping.
//!
//! Each handler runs the same sequence: whitelist gate, session-aware
//! dispatch, then shaping the result set into the surface's reply calls.

use crate::bot::dispatch::{CommandDispatcher, DirectInput, ResultItem};
use crate::bot::views;
use crate::config::{ServiceRegistry, Settings};
use crate::llm::{AiClient, ImageRef};
use crate::storage::R2Storage;
use crate::utils::{retry_telegram_operation, split_long_message};
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineQuery, InlineQueryResult, InlineQueryResultArticle,
    InputMessageContent, InputMessageContentText, ParseMode,
};
use tracing::info;

/// Maximum message length for Telegram with safety margin.
/// Telegram's official limit is 4096; 4000 leaves room for formatting.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

fn dispatcher<'a>(
    settings: &'a Settings,
    registry: &'a ServiceRegistry,
    storage: &'a R2Storage,
    ai: &'a AiClient,
) -> CommandDispatcher<'a> {
    CommandDispatcher {
        registry,
        store: storage,
        ai,
        system_message: settings.system_message.as_deref(),
    }
}

/// Handle an inline query.
///
/// Denied users get a visible denial item on this surface: inline results
/// render per keystroke, so silence would look like breakage.
///
/// # Errors
///
/// Returns an error if the inline answer cannot be delivered.
pub async fn inline_query(
    bot: Bot,
    q: InlineQuery,
    settings: Arc<Settings>,
    registry: Arc<ServiceRegistry>,
    storage: Arc<R2Storage>,
    ai: Arc<AiClient>,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();

    if !settings.is_allowed(user_id) {
        info!("Denied inline query from user {}", user_id);
        return answer_inline(&bot, &q, vec![views::denied_item()]).await;
    }

    let items = dispatcher(&settings, &registry, &storage, &ai)
        .inline_query(user_id, &q.query)
        .await;
    answer_inline(&bot, &q, items).await
}

/// Handle a direct message: commands, or free text forwarded to the AI with
/// reply-quote and image resolution.
///
/// Denied users get no reply on this surface.
///
/// # Errors
///
/// Returns an error if image resolution or reply delivery fails.
pub async fn direct_message(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    registry: Arc<ServiceRegistry>,
    storage: Arc<R2Storage>,
    ai: Arc<AiClient>,
) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0.cast_signed();

    if !settings.is_allowed(user_id) {
        info!("Discarded direct message from user {}", user_id);
        return Ok(());
    }

    let text = msg
        .text()
        .or_else(|| msg.caption())
        .unwrap_or_default()
        .to_string();
    let quoted_text = msg
        .reply_to_message()
        .and_then(|quoted| quoted.text().or_else(|| quoted.caption()))
        .map(ToString::to_string);
    let image = resolve_image(&bot, &msg).await?;

    let items = dispatcher(&settings, &registry, &storage, &ai)
        .direct_message(
            user_id,
            DirectInput {
                text,
                quoted_text,
                image,
            },
        )
        .await;
    send_direct_reply(&bot, msg.chat.id, items).await
}

/// Handle a selection button press: apply the token, then the two-stage
/// acknowledgment (toast on the tap, confirmation in the chat).
///
/// # Errors
///
/// Returns an error if the acknowledgment or confirmation cannot be sent.
pub async fn selection_callback(
    bot: Bot,
    q: CallbackQuery,
    settings: Arc<Settings>,
    registry: Arc<ServiceRegistry>,
    storage: Arc<R2Storage>,
    ai: Arc<AiClient>,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();

    if !settings.is_allowed(user_id) {
        info!("Discarded callback from user {}", user_id);
        return Ok(());
    }

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };

    let outcome = dispatcher(&settings, &registry, &storage, &ai)
        .selection_callback(user_id, data)
        .await;

    match outcome {
        Some(ack) => {
            bot.answer_callback_query(q.id.clone())
                .text(ack.toast)
                .await?;
            if let Some(chat_id) = q.message.as_ref().map(|m| m.chat().id) {
                bot.send_message(chat_id, ack.confirmation).await?;
            }
        }
        None => {
            // Nothing changed; still release the button spinner
            let _ = bot.answer_callback_query(q.id.clone()).await;
        }
    }
    Ok(())
}

/// The attached image wins over the quoted one; the two are never combined.
async fn resolve_image(bot: &Bot, msg: &Message) -> Result<Option<ImageRef>> {
    if let Some(image) = photo_image_ref(bot, msg).await? {
        return Ok(Some(image));
    }
    if let Some(quoted) = msg.reply_to_message() {
        return photo_image_ref(bot, quoted).await;
    }
    Ok(None)
}

/// Resolve a message's largest photo size to a fetchable file URL.
async fn photo_image_ref(bot: &Bot, msg: &Message) -> Result<Option<ImageRef>> {
    let Some(photo) = msg.photo().and_then(<[_]>::last) else {
        return Ok(None);
    };

    let file = retry_telegram_operation(|| async {
        Ok(bot.get_file(photo.file.id.clone()).await?)
    })
    .await?;

    Ok(Some(ImageRef {
        url: format!(
            "https://api.telegram.org/file/bot{}/{}",
            bot.token(),
            file.path
        ),
    }))
}

/// Answer an inline query with the result list; zero cache time because
/// results depend on the caller's session.
async fn answer_inline(bot: &Bot, q: &InlineQuery, items: Vec<ResultItem>) -> Result<()> {
    let results: Vec<InlineQueryResult> = items.into_iter().map(article_result).collect();
    bot.answer_inline_query(q.id.clone(), results)
        .cache_time(0)
        .await?;
    Ok(())
}

fn article_result(item: ResultItem) -> InlineQueryResult {
    let mut content = InputMessageContentText::new(item.reply_text);
    if item.markdown {
        content = content.parse_mode(ParseMode::Markdown);
    }

    let mut article =
        InlineQueryResultArticle::new(item.id, item.title, InputMessageContent::Text(content));
    if let Some(description) = item.description {
        article = article.description(description);
    }
    InlineQueryResult::Article(article)
}

/// Shape a dispatcher result set for the direct surface: selection sets
/// become a button grid, everything else goes out as messages.
async fn send_direct_reply(bot: &Bot, chat_id: ChatId, items: Vec<ResultItem>) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }

    if items.iter().all(views::is_selection_item) {
        bot.send_message(chat_id, views::choice_prompt(&items))
            .reply_markup(views::selection_keyboard(&items))
            .await?;
        return Ok(());
    }

    for item in items {
        send_item(bot, chat_id, item).await?;
    }
    Ok(())
}

async fn send_item(bot: &Bot, chat_id: ChatId, item: ResultItem) -> Result<()> {
    for part in split_long_message(&item.reply_text, TELEGRAM_MESSAGE_LIMIT) {
        let mut request = bot.send_message(chat_id, part);
        if item.markdown {
            request = request.parse_mode(ParseMode::Markdown);
        }
        request.await?;
    }
    Ok(())
}
