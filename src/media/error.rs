//! Pipeline error taxonomy.
//!
//! Every stage returns one of these; the dispatch handler turns each kind
//! into a single user-facing message and logs the detail.

use std::time::Duration;
use thiserror::Error;

/// Reasons a source URL is refused before any extraction happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UrlRejection {
    /// The message did not contain a link at all.
    #[error("no URL in message")]
    Missing,
    /// The link could not be parsed.
    #[error("malformed URL")]
    Malformed,
    /// Only http and https are accepted.
    #[error("unsupported URL scheme")]
    InvalidScheme,
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The host is not on the allow-list.
    #[error("host is not supported")]
    HostNotAllowed,
    /// The host is (or resolves to) loopback, private or link-local space.
    #[error("private network address blocked")]
    PrivateNetworkBlocked,
}

/// Errors produced while handling one download request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The URL was rejected by validation.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlRejection),
    /// The requester exceeded the rate limit.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the oldest admission leaves the window.
        retry_after: Duration,
    },
    /// The extractor did not finish in time.
    #[error("extraction timed out after {secs}s")]
    ExtractionTimeout {
        /// Configured timeout.
        secs: u64,
    },
    /// The extractor could not be run at all.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    /// Neither the video nor the image attempt produced anything.
    #[error("no downloadable media found")]
    NoMediaFound,
    /// The video exceeds the upload limit.
    #[error("artifact too large: {size} > {limit} bytes")]
    ArtifactTooLarge {
        /// Observed size, 0 when the extractor aborted before writing.
        size: u64,
        /// Configured limit.
        limit: u64,
    },
    /// Files were produced but none passed validation.
    #[error("artifact invalid: {0}")]
    ArtifactInvalid(String),
    /// The chat platform refused the upload.
    #[error("transmission failed: {0}")]
    TransmissionFailed(String),
    /// Anything unexpected.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Text shown to the user for this failure.
    ///
    /// Never includes paths, process output or other internal detail.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidUrl(UrlRejection::Missing) => {
                "🔗 Send me a link to a post and I'll download it.".to_string()
            }
            Self::InvalidUrl(UrlRejection::HostNotAllowed) => {
                "🚫 This site is not supported yet.".to_string()
            }
            Self::InvalidUrl(UrlRejection::PrivateNetworkBlocked) => {
                "🚫 This address is not allowed.".to_string()
            }
            Self::InvalidUrl(_) => {
                "🔗 That doesn't look like a valid http(s) link.".to_string()
            }
            Self::RateLimited { retry_after } => {
                let minutes = retry_after.as_secs().div_ceil(60).max(1);
                format!("⏳ Too many requests. Try again in {minutes} min.")
            }
            Self::ExtractionTimeout { .. } => {
                "⌛ The download took too long. Try again later.".to_string()
            }
            Self::NoMediaFound => {
                "🤷 No video or images found at this link. Try another one.".to_string()
            }
            Self::ArtifactTooLarge { limit, .. } => {
                format!(
                    "📦 The video is larger than {} and can't be sent.",
                    human_size(*limit)
                )
            }
            Self::ArtifactInvalid(_) => {
                "⚠️ The downloaded media looks broken. Try another link.".to_string()
            }
            Self::TransmissionFailed(_) => {
                "⚠️ Failed to send the media. Try again.".to_string()
            }
            Self::ExtractionFailed(_) | Self::Internal(_) => {
                "❌ Something went wrong. Try again later.".to_string()
            }
        }
    }

    /// Short label for structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::RateLimited { .. } => "rate_limited",
            Self::ExtractionTimeout { .. } => "extraction_timeout",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::NoMediaFound => "no_media_found",
            Self::ArtifactTooLarge { .. } => "artifact_too_large",
            Self::ArtifactInvalid(_) => "artifact_invalid",
            Self::TransmissionFailed(_) => "transmission_failed",
            Self::Internal(_) => "internal",
        }
    }
}

/// Whole MB from 1 MiB up, whole KB below; always rounded up
fn human_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{} MB", bytes.div_ceil(MIB))
    } else {
        format!("{} KB", bytes.div_ceil(1024).max(1))
    }
}
