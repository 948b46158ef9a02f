//! Per-message orchestration.
//!
//! A [`DispatchHandler`] takes one [`DownloadRequest`] through validation,
//! rate limiting, extraction and transmission, talking to the chat only
//! through a [`MediaTransport`].

mod handler;

pub use handler::{DispatchHandler, PROGRESS_TEXT};

use crate::media::{MediaFile, PipelineError};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One incoming message that may contain a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Rate-limit identity (user id, chat id as fallback)
    pub requester_id: i64,
    /// Raw message text
    pub source_text: String,
    /// When the message arrived
    pub received_at: DateTime<Utc>,
}

impl DownloadRequest {
    /// Request received now
    #[must_use]
    pub fn new(requester_id: i64, source_text: impl Into<String>) -> Self {
        Self {
            requester_id,
            source_text: source_text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Stage of a download flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Checking the link
    Validating,
    /// Checking the requester's quota
    RateChecking,
    /// Extractor running
    Extracting,
    /// Uploading to the chat
    Transmitting,
    /// Media delivered
    Done,
    /// Flow ended with an error reply
    Failed,
}

/// Outcome of one flow
#[derive(Debug)]
pub struct FlowReport {
    /// Terminal state, `Done` or `Failed`
    pub state: FlowState,
    /// Stage at which the flow failed
    pub failed_at: Option<FlowState>,
    /// Why the flow failed
    pub error: Option<PipelineError>,
}

impl FlowReport {
    pub(crate) const fn done() -> Self {
        Self {
            state: FlowState::Done,
            failed_at: None,
            error: None,
        }
    }

    pub(crate) const fn failed(stage: FlowState, error: PipelineError) -> Self {
        Self {
            state: FlowState::Failed,
            failed_at: Some(stage),
            error: Some(error),
        }
    }

    /// Whether the media reached the chat
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, FlowState::Done)
    }
}

/// Handle to a sent text message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef(pub i32);

/// Chat activity indicator shown while the bot works
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatActionKind {
    /// "sending video…"
    UploadVideo,
    /// "sending photo…"
    UploadPhoto,
}

/// Chat-side operations a flow needs, bound to a single chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Send a text message.
    async fn send_text(&self, text: &str) -> Result<MessageRef>;

    /// Replace the text of a message sent earlier.
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()>;

    /// Delete a message sent earlier.
    async fn delete_message(&self, message: MessageRef) -> Result<()>;

    /// Show an activity indicator.
    async fn send_action(&self, action: ChatActionKind) -> Result<()>;

    /// Upload a single video.
    async fn send_video(&self, file: &MediaFile, supports_streaming: bool) -> Result<()>;

    /// Upload images as one album.
    async fn send_photo_group(&self, files: &[MediaFile]) -> Result<()>;
}
