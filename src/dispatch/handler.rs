use super::{ChatActionKind, DownloadRequest, FlowReport, FlowState, MediaTransport, MessageRef};
use crate::media::{
    Admission, MediaArtifact, MediaExtractor, MediaKind, PipelineError, RateLimiter, UrlGuard,
    UrlRejection,
};
use crate::utils::extract_first_url;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Progress message shown while the extractor runs
pub const PROGRESS_TEXT: &str = "⏳ Downloading…";

/// Runs download flows; shared by every chat.
#[derive(Clone)]
pub struct DispatchHandler {
    guard: UrlGuard,
    limiter: RateLimiter,
    extractor: MediaExtractor,
}

impl DispatchHandler {
    /// Assemble a handler from its pipeline stages
    #[must_use]
    pub const fn new(guard: UrlGuard, limiter: RateLimiter, extractor: MediaExtractor) -> Self {
        Self {
            guard,
            limiter,
            extractor,
        }
    }

    /// Take one request through the pipeline.
    ///
    /// Sends exactly one reply on failure. Never retries; a failed
    /// transmission still deletes the downloaded files.
    #[instrument(skip_all, fields(requester_id = request.requester_id))]
    pub async fn handle<T>(&self, request: &DownloadRequest, transport: &T) -> FlowReport
    where
        T: MediaTransport + ?Sized,
    {
        let url = match self.validate(request).await {
            Ok(url) => url,
            Err(e) => return reject(transport, FlowState::Validating, e).await,
        };

        if let Admission::Rejected { retry_after } = self.limiter.check(request.requester_id).await
        {
            let e = PipelineError::RateLimited { retry_after };
            return reject(transport, FlowState::RateChecking, e).await;
        }

        if let Err(e) = transport.send_action(ChatActionKind::UploadVideo).await {
            warn!(error = %e, "Failed to send chat action");
        }
        let progress = match transport.send_text(PROGRESS_TEXT).await {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Failed to send progress message");
                None
            }
        };

        let artifact = match self.extractor.extract(&url).await {
            Ok(artifact) => artifact,
            Err(e) => return fail(transport, progress, FlowState::Extracting, e).await,
        };

        let sent = transmit(transport, &artifact).await;
        // Files go away here whatever the upload outcome
        drop(artifact);

        match sent {
            Ok(()) => {
                if let Some(message) = progress {
                    if let Err(e) = transport.delete_message(message).await {
                        warn!(error = %e, "Failed to delete progress message");
                    }
                }
                info!("Media delivered");
                FlowReport::done()
            }
            Err(e) => fail(transport, progress, FlowState::Transmitting, e).await,
        }
    }

    async fn validate(&self, request: &DownloadRequest) -> Result<Url, PipelineError> {
        let raw = extract_first_url(&request.source_text).ok_or(UrlRejection::Missing)?;
        self.guard.validate_resolved(raw).await.map_err(Into::into)
    }
}

async fn transmit<T>(transport: &T, artifact: &MediaArtifact) -> Result<(), PipelineError>
where
    T: MediaTransport + ?Sized,
{
    let action = match artifact.kind() {
        MediaKind::Video => ChatActionKind::UploadVideo,
        MediaKind::ImageSet => ChatActionKind::UploadPhoto,
    };
    if let Err(e) = transport.send_action(action).await {
        warn!(error = %e, "Failed to send chat action");
    }

    let upload = match (artifact.kind(), artifact.files()) {
        (MediaKind::Video, [video, ..]) => transport.send_video(video, true).await,
        (MediaKind::ImageSet, images) if !images.is_empty() => {
            transport.send_photo_group(images).await
        }
        _ => return Err(PipelineError::NoMediaFound),
    };

    upload.map_err(|e| PipelineError::TransmissionFailed(e.to_string()))
}

/// Rejection before any extraction: one plain reply
async fn reject<T>(transport: &T, stage: FlowState, error: PipelineError) -> FlowReport
where
    T: MediaTransport + ?Sized,
{
    info!(stage = ?stage, kind = error.kind(), detail = %error, "Request rejected");
    if let Err(e) = transport.send_text(&error.user_message()).await {
        warn!(error = %e, "Failed to send rejection reply");
    }
    FlowReport::failed(stage, error)
}

/// Failure after the progress message: turn it into the error reply
async fn fail<T>(
    transport: &T,
    progress: Option<MessageRef>,
    stage: FlowState,
    error: PipelineError,
) -> FlowReport
where
    T: MediaTransport + ?Sized,
{
    error!(stage = ?stage, kind = error.kind(), detail = %error, "Download flow failed");

    let text = error.user_message();
    let edited = match progress {
        Some(message) => match transport.edit_text(message, &text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to edit progress message, sending a new one");
                false
            }
        },
        None => false,
    };
    if !edited {
        if let Err(e) = transport.send_text(&text).await {
            warn!(error = %e, "Failed to send error reply");
        }
    }

    FlowReport::failed(stage, error)
}
