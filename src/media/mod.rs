//! Media pipeline building blocks.
//!
//! Leaves first: URL validation, rate limiting, process spawning, artifact
//! validation, extraction and temp-file cleanup. The [`crate::dispatch`]
//! module wires them together per incoming message.

/// Temp-file ownership guards and the stale-file sweeper.
pub mod cleanup;
/// Pipeline error taxonomy.
pub mod error;
/// Extractor invocation (video first, images as fallback).
pub mod extractor;
/// External process runner.
pub mod process;
/// Per-identity sliding-window rate limiter.
pub mod rate_limit;
/// Source URL validation.
pub mod url_guard;
/// Downloaded artifact validation.
pub mod validator;

pub use cleanup::{spawn_sweeper, sweep_stale, with_cleanup_on_error, ScratchSpace};
pub use error::{PipelineError, UrlRejection};
pub use extractor::MediaExtractor;
pub use process::{CommandOutput, CommandRunner, ProcessRunner, RunError};
pub use rate_limit::{Admission, RateLimiter};
pub use url_guard::{HostResolver, SystemResolver, UrlGuard};
pub use validator::{ArtifactValidator, VideoVerdict};

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Size and time bounds applied to every extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    /// Largest video that will be relayed
    pub max_video_bytes: u64,
    /// Largest single image that will be relayed
    pub max_image_bytes: u64,
    /// Images kept from one post
    pub max_images: usize,
    /// Hard timeout for one extractor run
    pub timeout: Duration,
    /// Hard timeout for one probe run
    pub probe_timeout: Duration,
    /// Anything smaller is an error placeholder, not a video
    pub min_video_bytes: u64,
    /// Anything smaller is not a usable image
    pub min_image_bytes: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        use crate::config::{
            DOWNLOAD_TIMEOUT_SECS, MAX_IMAGES, MAX_IMAGE_BYTES, MAX_VIDEO_BYTES, MIN_IMAGE_BYTES,
            MIN_VIDEO_BYTES, PROBE_TIMEOUT_SECS,
        };

        Self {
            max_video_bytes: MAX_VIDEO_BYTES,
            max_image_bytes: MAX_IMAGE_BYTES,
            max_images: MAX_IMAGES,
            timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            min_video_bytes: MIN_VIDEO_BYTES,
            min_image_bytes: MIN_IMAGE_BYTES,
        }
    }
}

/// Shape of a downloaded post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A single video stream
    Video,
    /// One or more still images (carousel or thumbnail)
    ImageSet,
}

/// One file produced by an extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Location inside the download directory
    pub path: PathBuf,
    /// Size in bytes at validation time
    pub size: u64,
}

impl MediaFile {
    /// File name used when uploading
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "media".to_string(), |n| n.to_string_lossy().to_string())
    }
}

/// Validated output of one extraction.
///
/// The artifact owns its files: they are deleted when it is dropped, so a
/// flow cannot forget to clean up after transmission.
#[derive(Debug)]
pub struct MediaArtifact {
    kind: MediaKind,
    files: Vec<MediaFile>,
}

impl MediaArtifact {
    /// Wrap a single validated video
    #[must_use]
    pub fn video(file: MediaFile) -> Self {
        Self {
            kind: MediaKind::Video,
            files: vec![file],
        }
    }

    /// Wrap a non-empty set of validated images
    #[must_use]
    pub fn images(files: Vec<MediaFile>) -> Self {
        Self {
            kind: MediaKind::ImageSet,
            files,
        }
    }

    /// Artifact kind
    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Files owned by the artifact
    #[must_use]
    pub fn files(&self) -> &[MediaFile] {
        &self.files
    }

    /// Paths owned by the artifact
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }

    /// Total size of all files
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

impl Drop for MediaArtifact {
    fn drop(&mut self) {
        for file in &self.files {
            match std::fs::remove_file(&file.path) {
                Ok(()) => debug!(path = %file.path.display(), "Artifact file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Failed to remove artifact file");
                }
            }
        }
    }
}
