//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Text sends and edits retry transient network failures using exponential
//! backoff with jitter. Media uploads do not go through here.
//!
//! # Usage
//!
//! ```ignore
//! use reel_relay::bot::resilient::{send_message_resilient, edit_message_safe_resilient};
//!
//! let msg = send_message_resilient(&bot, chat_id, "⏳ Downloading…").await?;
//! edit_message_safe_resilient(&bot, chat_id, msg.id, "❌ Something went wrong.").await?;
//! ```

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId};
use tracing::debug;

/// Telegram's hard limit is 4096 characters
const MAX_TEXT_CHARS: usize = 4000;

const ERROR_NOT_MODIFIED: &str = "message is not modified";

fn clamp_text(text: &str) -> String {
    if text.chars().count() > MAX_TEXT_CHARS {
        format!("{}…", crate::utils::truncate_str(text, MAX_TEXT_CHARS))
    } else {
        text.to_string()
    }
}

/// Send a message with automatic retry on network failures.
///
/// Uses [`crate::utils::retry_telegram_operation`] with exponential backoff
/// to handle transient network errors.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
) -> Result<Message> {
    let text = clamp_text(&text.into());
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
) -> Result<Message> {
    let text = clamp_text(&text.into());
    crate::utils::retry_telegram_operation(|| async {
        bot.edit_message_text(chat_id, msg_id, text.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await
}

/// Edit a message, treating "message is not modified" as success.
///
/// # Errors
///
/// Returns an error if the message is gone or the edit failed after retries,
/// so the caller can fall back to sending a new message.
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> Result<()> {
    match edit_message_resilient(bot, chat_id, msg_id, text).await {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => {
            debug!("Message update skipped: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
