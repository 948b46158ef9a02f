use crate::bot::resilient::send_message_resilient;
use crate::bot::TelegramMediaTransport;
use crate::config::Settings;
use crate::dispatch::{DispatchHandler, DownloadRequest};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Reply to `/start`
pub const START_TEXT: &str = "👋 Hi! Send me a link to a video or a photo post and I'll send the media back here.\n\nType /help to see which sites are supported.";

fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Rate-limit identity for a message: the sender's user id, or the chat id
/// for messages without a sender (channel posts).
#[must_use]
pub fn requester_id(msg: &Message) -> i64 {
    msg.from
        .as_ref()
        .map_or(msg.chat.id.0, |u| u.id.0.cast_signed())
}

/// Bot commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage and supported sites
    #[command(description = "How to use the bot.")]
    Help,
}

/// Help text listing the accepted sites
#[must_use]
pub fn help_text(settings: &Settings) -> String {
    let hosts = settings.allowed_hosts();
    let sites = if hosts.is_empty() {
        "any public site yt-dlp understands".to_string()
    } else {
        hosts.join(", ")
    };
    format!(
        "📥 Send a link and I'll download the video, or the photos if the post has no video.\n\n\
         Supported: {sites}\n\
         Limits: videos up to {} MB, up to {} photos per post, {} requests per {} min.\n\n{}",
        settings.max_video_bytes / (1024 * 1024),
        settings.max_images,
        settings.rate_limit_count,
        settings.rate_limit_window_secs.div_ceil(60),
        Command::descriptions()
    )
}

/// Handles `/start`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    info!(
        user_id = requester_id(&msg),
        user_name = %get_user_name(&msg),
        "User initiated /start"
    );
    send_message_resilient(&bot, msg.chat.id, START_TEXT).await?;
    Ok(())
}

/// Handles `/help`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn help(bot: Bot, msg: Message, settings: Arc<Settings>) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, help_text(&settings)).await?;
    Ok(())
}

/// Handles a plain text message by running a download flow in the background.
///
/// The flow is tracked so shutdown can wait for it; the update loop is never
/// blocked by an extraction.
pub fn handle_text(bot: Bot, msg: Message, handler: Arc<DispatchHandler>, tracker: &TaskTracker) {
    let Some(text) = msg.text() else {
        return;
    };
    let request = DownloadRequest::new(requester_id(&msg), text);
    let chat_id = msg.chat.id;

    tracker.spawn(async move {
        let transport = TelegramMediaTransport::new(bot, chat_id);
        let report = handler.handle(&request, &transport).await;
        debug!(
            requester_id = request.requester_id,
            state = ?report.state,
            elapsed_ms = (chrono::Utc::now() - request.received_at).num_milliseconds(),
            "Flow finished"
        );
    });
}
