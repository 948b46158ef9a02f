use crate::bot::resilient::{edit_message_safe_resilient, send_message_resilient};
use crate::dispatch::{ChatActionKind, MediaTransport, MessageRef};
use crate::media::MediaFile;
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, InputFile, InputMedia, InputMediaPhoto, MessageId};
use tracing::debug;

/// Telegram-backed [`MediaTransport`] for one chat.
#[derive(Clone)]
pub struct TelegramMediaTransport {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramMediaTransport {
    /// Create a transport replying into `chat_id`.
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

fn input_file(file: &MediaFile) -> InputFile {
    InputFile::file(file.path.clone()).file_name(file.file_name())
}

#[async_trait]
impl MediaTransport for TelegramMediaTransport {
    async fn send_text(&self, text: &str) -> Result<MessageRef> {
        let msg = send_message_resilient(&self.bot, self.chat_id, text).await?;
        Ok(MessageRef(msg.id.0))
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        edit_message_safe_resilient(&self.bot, self.chat_id, MessageId(message.0), text).await
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.bot
            .delete_message(self.chat_id, MessageId(message.0))
            .await?;
        Ok(())
    }

    async fn send_action(&self, action: ChatActionKind) -> Result<()> {
        let action = match action {
            ChatActionKind::UploadVideo => ChatAction::UploadVideo,
            ChatActionKind::UploadPhoto => ChatAction::UploadPhoto,
        };
        self.bot.send_chat_action(self.chat_id, action).await?;
        Ok(())
    }

    async fn send_video(&self, file: &MediaFile, supports_streaming: bool) -> Result<()> {
        debug!(path = %file.path.display(), size = file.size, "Uploading video");
        self.bot
            .send_video(self.chat_id, input_file(file))
            .supports_streaming(supports_streaming)
            .await?;
        Ok(())
    }

    async fn send_photo_group(&self, files: &[MediaFile]) -> Result<()> {
        debug!(count = files.len(), "Uploading photo album");
        // Albums need at least two items
        if let [single] = files {
            self.bot.send_photo(self.chat_id, input_file(single)).await?;
            return Ok(());
        }
        let media: Vec<InputMedia> = files
            .iter()
            .map(|file| InputMedia::Photo(InputMediaPhoto::new(input_file(file))))
            .collect();
        self.bot.send_media_group(self.chat_id, media).await?;
        Ok(())
    }
}
