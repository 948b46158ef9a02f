//! Downloaded artifact validation.
//!
//! Videos are checked for size bounds and then probed for a decodable video
//! stream; images are checked by size and extension only.

use super::process::{CommandRunner, RunError};
use super::ExtractionLimits;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Extensions the chat platform accepts as photos
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Outcome of inspecting a video file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoVerdict {
    /// Passed all checks; carries the size in bytes
    Valid(u64),
    /// No file at the path
    Missing,
    /// Below the placeholder threshold
    TooSmall(u64),
    /// Above the upload limit
    TooLarge(u64),
    /// The probe found no video stream
    Undecodable,
}

impl VideoVerdict {
    /// Whether the file can be sent
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

/// Checks extractor output before it is handed to the transport
#[derive(Clone)]
pub struct ArtifactValidator {
    limits: ExtractionLimits,
    runner: Arc<dyn CommandRunner>,
    ffprobe_path: String,
}

impl ArtifactValidator {
    /// Creates a validator probing videos with `ffprobe_path`
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ffprobe_path: impl Into<String>,
        limits: ExtractionLimits,
    ) -> Self {
        Self {
            limits,
            runner,
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Limits this validator enforces
    #[must_use]
    pub const fn limits(&self) -> &ExtractionLimits {
        &self.limits
    }

    /// Whether `path` is a sendable video
    pub async fn validate_video(&self, path: &Path) -> bool {
        self.inspect_video(path).await.is_valid()
    }

    /// Classify a video file.
    ///
    /// Size bounds are checked before the probe runs, so oversize files are
    /// reported as [`VideoVerdict::TooLarge`] without spawning anything.
    pub async fn inspect_video(&self, path: &Path) -> VideoVerdict {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "Video file doesn't exist");
                return VideoVerdict::Missing;
            }
        };

        if size < self.limits.min_video_bytes {
            warn!(path = %path.display(), size, "Video too small");
            return VideoVerdict::TooSmall(size);
        }
        if size > self.limits.max_video_bytes {
            warn!(
                path = %path.display(),
                size,
                limit = self.limits.max_video_bytes,
                "Video exceeds limit"
            );
            return VideoVerdict::TooLarge(size);
        }

        if self.has_video_stream(path).await {
            VideoVerdict::Valid(size)
        } else {
            VideoVerdict::Undecodable
        }
    }

    async fn has_video_stream(&self, path: &Path) -> bool {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=codec_type".to_string(),
            "-of".to_string(),
            "json".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        match self
            .runner
            .run(&self.ffprobe_path, args, self.limits.probe_timeout)
            .await
        {
            Ok(output) if output.success() => {
                let found = serde_json::from_str::<ProbeReport>(&output.stdout)
                    .map(|report| {
                        report
                            .streams
                            .iter()
                            .any(|s| s.codec_type.as_deref() == Some("video"))
                    })
                    .unwrap_or(false);
                if !found {
                    warn!(path = %path.display(), "Probe found no video stream");
                }
                found
            }
            Ok(output) => {
                warn!(
                    path = %path.display(),
                    exit_code = ?output.exit_code,
                    stderr = %crate::utils::truncate_str(output.stderr.trim(), 200),
                    "Probe rejected file"
                );
                false
            }
            Err(RunError::Timeout(_)) => {
                warn!(path = %path.display(), "Probe timed out");
                false
            }
            Err(RunError::Cancelled) => false,
            Err(e @ (RunError::NotFound(_) | RunError::Io(_))) => {
                warn!(error = %e, "Probe unavailable, accepting video on size alone");
                true
            }
        }
    }

    /// Whether `path` is a sendable image
    #[must_use]
    pub fn validate_image(&self, path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }

        let size = meta.len();
        if size < self.limits.min_image_bytes || size > self.limits.max_image_bytes {
            debug!(path = %path.display(), size, "Image size out of bounds");
            return false;
        }

        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !supported {
            debug!(path = %path.display(), "Unsupported image extension");
        }
        supported
    }
}
