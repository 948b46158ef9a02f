//! Extractor invocation
//!
//! One request makes at most two extractor runs: a video download, then (if
//! no usable video came out) a thumbnail/carousel image download. Every file
//! is written under the request's media id so [`ScratchSpace`] can find it.

use super::cleanup::{with_cleanup_on_error, ScratchSpace};
use super::process::{CommandOutput, CommandRunner, RunError};
use super::validator::{ArtifactValidator, VideoVerdict};
use super::{ExtractionLimits, MediaArtifact, MediaFile, PipelineError};
use lazy_regex::regex_captures;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Extractor messages meaning the post itself is unavailable
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is private",
    "This video is not available",
    "Sign in to confirm your age",
    "age-restricted",
    "removed by the uploader",
    "no longer available",
    "blocked it in your country",
    "geo-restricted",
    "copyright",
    "terminated account",
    "Unsupported URL",
    "is not a valid URL",
    "Unable to extract",
    "HTTP Error 403",
    "HTTP Error 404",
    "login required",
    "Requested content is not available",
];

/// Extractor messages meaning the failure is likely transient
const TRANSIENT_PATTERNS: &[&str] = &[
    "Connection reset",
    "Connection timed out",
    "Unable to download webpage",
    "HTTP Error 429",
    "HTTP Error 503",
    "Read timed out",
    "network is unreachable",
    "Temporary failure in name resolution",
];

/// Log label for an extractor failure message
fn classify_failure(stderr: &str) -> &'static str {
    let lower = stderr.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(&p.to_lowercase()));

    if matches(UNAVAILABLE_PATTERNS) {
        "unavailable"
    } else if matches(TRANSIENT_PATTERNS) {
        "transient"
    } else {
        "unknown"
    }
}

/// Size reported by the extractor's "larger than max-filesize" abort
fn oversize_abort(output: &CommandOutput) -> Option<u64> {
    [output.stderr.as_str(), output.stdout.as_str()]
        .into_iter()
        .find_map(|text| {
            if let Some((_, size)) = regex_captures!(r"larger than max-filesize \((\d+) bytes", text)
            {
                return Some(size.parse().unwrap_or(0));
            }
            text.contains("larger than max-filesize").then_some(0)
        })
}

/// `<unix seconds>_<8 hex chars>`
#[must_use]
pub fn new_media_id() -> String {
    let mut suffix = uuid::Uuid::new_v4().simple().to_string();
    suffix.truncate(8);
    format!("{}_{suffix}", chrono::Utc::now().timestamp())
}

/// yt-dlp format selector capped at the upload limit
fn format_selector(max_video_bytes: u64) -> String {
    let mb = (max_video_bytes / (1024 * 1024)).max(1);
    format!("bv*[filesize<?{mb}M]+ba/b[filesize<?{mb}M]/best[filesize<?{mb}M]")
}

enum VideoAttempt {
    Found(MediaFile),
    /// No video here; carries whether a file was produced and rejected
    Unavailable { rejected: bool },
}

/// Runs the extractor and validates what it writes
#[derive(Clone)]
pub struct MediaExtractor {
    runner: Arc<dyn CommandRunner>,
    validator: ArtifactValidator,
    download_dir: PathBuf,
    ytdlp_path: String,
}

impl MediaExtractor {
    /// Creates an extractor writing into `download_dir`
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        validator: ArtifactValidator,
        download_dir: impl Into<PathBuf>,
        ytdlp_path: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            validator,
            download_dir: download_dir.into(),
            ytdlp_path: ytdlp_path.into(),
        }
    }

    /// Limits applied to each extraction
    #[must_use]
    pub const fn limits(&self) -> &ExtractionLimits {
        self.validator.limits()
    }

    /// Download the media behind `url`.
    ///
    /// On success the returned artifact owns every file it lists; nothing
    /// else from this request is left on disk. On failure nothing is left.
    ///
    /// # Errors
    ///
    /// `ExtractionTimeout`, `ExtractionFailed`, `NoMediaFound`,
    /// `ArtifactTooLarge` or `ArtifactInvalid`.
    #[instrument(skip_all, fields(media_id))]
    pub async fn extract(&self, url: &Url) -> Result<MediaArtifact, PipelineError> {
        let media_id = new_media_id();
        tracing::Span::current().record("media_id", media_id.as_str());
        info!(url = %crate::utils::truncate_str(url.as_str(), 100), "Starting extraction");

        let scratch = ScratchSpace::new(&self.download_dir, media_id);
        with_cleanup_on_error(&scratch, self.extract_into(url, &scratch)).await
    }

    async fn extract_into(
        &self,
        url: &Url,
        scratch: &ScratchSpace,
    ) -> Result<MediaArtifact, PipelineError> {
        let video_rejected = match self.try_video(url, scratch).await? {
            VideoAttempt::Found(file) => {
                info!(size = file.size, "Video downloaded");
                return Ok(MediaArtifact::video(file));
            }
            VideoAttempt::Unavailable { rejected } => rejected,
        };

        let (images, image_rejected) = self.try_images(url, scratch).await?;
        if !images.is_empty() {
            info!(count = images.len(), "Images downloaded");
            return Ok(MediaArtifact::images(images));
        }

        if video_rejected || image_rejected {
            Err(PipelineError::ArtifactInvalid(format!(
                "no valid files for {}",
                scratch.media_id()
            )))
        } else {
            Err(PipelineError::NoMediaFound)
        }
    }

    async fn run_extractor(&self, args: Vec<String>) -> Result<CommandOutput, PipelineError> {
        let timeout = self.limits().timeout;
        let output = self
            .runner
            .run(&self.ytdlp_path, args, timeout)
            .await
            .map_err(|e| match e {
                RunError::Timeout(t) => PipelineError::ExtractionTimeout { secs: t.as_secs() },
                other => PipelineError::ExtractionFailed(other.to_string()),
            })?;

        if !output.success() {
            warn!(
                exit_code = ?output.exit_code,
                failure = classify_failure(&output.stderr),
                stderr = %crate::utils::truncate_str(output.stderr.trim(), 200),
                "Extractor exited with failure"
            );
        }
        Ok(output)
    }

    pub(crate) fn video_args(&self, url: &Url, output: &Path) -> Vec<String> {
        let max = self.limits().max_video_bytes;
        vec![
            "-f".to_string(),
            format_selector(max),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--remux-video".to_string(),
            "mp4".to_string(),
            "--max-filesize".to_string(),
            max.to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            // The max-filesize abort is only reported on stdout, which --quiet mutes
            "--no-progress".to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--".to_string(),
            url.to_string(),
        ]
    }

    pub(crate) fn image_args(&self, url: &Url, scratch: &ScratchSpace) -> Vec<String> {
        let template = scratch
            .dir()
            .join(format!("{}_%(autonumber)s.%(ext)s", scratch.media_id()));
        vec![
            "--skip-download".to_string(),
            "--write-thumbnail".to_string(),
            "--convert-thumbnails".to_string(),
            "jpg".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--".to_string(),
            url.to_string(),
        ]
    }

    async fn try_video(
        &self,
        url: &Url,
        scratch: &ScratchSpace,
    ) -> Result<VideoAttempt, PipelineError> {
        let video_path = scratch.path_for("mp4");
        debug!("Attempting video download");

        let output = self.run_extractor(self.video_args(url, &video_path)).await?;
        let limit = self.limits().max_video_bytes;

        if let Some(size) = oversize_abort(&output) {
            scratch.purge();
            return Err(PipelineError::ArtifactTooLarge { size, limit });
        }

        if !output.success() {
            scratch.purge();
            return Ok(VideoAttempt::Unavailable { rejected: false });
        }

        match self.validator.inspect_video(&video_path).await {
            VideoVerdict::Valid(size) => {
                // Formats yt-dlp merged from are not needed any more
                scratch.retain_only(&[video_path.as_path()]);
                Ok(VideoAttempt::Found(MediaFile {
                    path: video_path,
                    size,
                }))
            }
            VideoVerdict::TooLarge(size) => {
                scratch.purge();
                Err(PipelineError::ArtifactTooLarge { size, limit })
            }
            VideoVerdict::Missing => {
                warn!("Extractor succeeded but no video file was written");
                scratch.purge();
                Ok(VideoAttempt::Unavailable { rejected: false })
            }
            verdict @ (VideoVerdict::TooSmall(_) | VideoVerdict::Undecodable) => {
                warn!(?verdict, "Video rejected, falling back to images");
                scratch.purge();
                Ok(VideoAttempt::Unavailable { rejected: true })
            }
        }
    }

    /// Returns the kept images and whether any candidate was rejected
    async fn try_images(
        &self,
        url: &Url,
        scratch: &ScratchSpace,
    ) -> Result<(Vec<MediaFile>, bool), PipelineError> {
        debug!("Attempting image download");

        let output = self.run_extractor(self.image_args(url, scratch)).await?;
        if !output.success() {
            info!("Image download failed, collecting whatever was written");
        }

        let candidates = scratch.files();
        let mut rejected = false;
        let mut valid = Vec::new();
        for path in candidates {
            if self.validator.validate_image(&path) {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                valid.push(MediaFile { path, size });
            } else {
                rejected = true;
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to delete invalid image");
                }
            }
        }

        // scratch.files() is already sorted by name
        let max_images = self.limits().max_images;
        if valid.len() > max_images {
            for excess in valid.split_off(max_images) {
                if let Err(e) = std::fs::remove_file(&excess.path) {
                    warn!(path = %excess.path.display(), error = %e, "Failed to delete excess image");
                }
            }
        }

        Ok((valid, rejected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::process::MockCommandRunner;
    use crate::media::MediaKind;
    use std::time::Duration;

    const VIDEO_JSON: &str = r#"{"streams":[{"codec_type":"video"}]}"#;

    fn limits() -> ExtractionLimits {
        ExtractionLimits {
            max_video_bytes: 4096,
            max_image_bytes: 2048,
            max_images: 3,
            min_video_bytes: 1024,
            min_image_bytes: 512,
            timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
        }
    }

    fn extractor(runner: MockCommandRunner, dir: &Path) -> MediaExtractor {
        let runner: Arc<dyn CommandRunner> = Arc::new(runner);
        let validator = ArtifactValidator::new(runner.clone(), "ffprobe", limits());
        MediaExtractor::new(runner, validator, dir, "yt-dlp")
    }

    fn url() -> Url {
        Url::parse("https://www.tiktok.com/@user/video/123").unwrap_or_else(|_| unreachable!())
    }

    fn output_target(args: &[String]) -> PathBuf {
        args.iter()
            .position(|a| a == "-o")
            .and_then(|i| args.get(i + 1))
            .map(PathBuf::from)
            .unwrap_or_default()
    }

    fn is_video_run(args: &[String]) -> bool {
        args.iter().any(|a| a == "--max-filesize")
    }

    fn is_image_run(args: &[String]) -> bool {
        args.iter().any(|a| a == "--write-thumbnail")
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    /// Writes `count` images of `size` bytes following the extractor's template
    fn write_images(args: &[String], count: usize, size: usize, ext: &str) {
        let template = output_target(args).to_string_lossy().into_owned();
        for n in 1..=count {
            let path = template
                .replace("%(autonumber)s", &format!("{n:05}"))
                .replace("%(ext)s", ext);
            let _ = std::fs::write(path, vec![0u8; size]);
        }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).map_or(true, |mut entries| entries.next().is_none())
    }

    #[test]
    fn test_media_id_format() {
        let id = new_media_id();
        let (secs, hex) = id.split_once('_').unwrap_or_default();
        assert!(secs.parse::<i64>().is_ok());
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_media_id(), new_media_id());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(classify_failure("ERROR: [TikTok] 123: Private video"), "unavailable");
        assert_eq!(classify_failure("ERROR: Unsupported URL: https://x"), "unavailable");
        assert_eq!(classify_failure("HTTP Error 429: Too Many Requests"), "transient");
        assert_eq!(classify_failure("something odd"), "unknown");
    }

    #[test]
    fn test_video_args_end_with_url() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let extractor = extractor(MockCommandRunner::new(), dir.path());
        let args = extractor.video_args(&url(), &dir.path().join("1_a.mp4"));

        assert!(args.contains(&"bv*[filesize<?1M]+ba/b[filesize<?1M]/best[filesize<?1M]".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--max-filesize" && w[1] == "4096"));
        assert!(args.iter().any(|a| a == "--no-progress"));
        assert!(!args.iter().any(|a| a == "--quiet"));
        assert_eq!(args.len(), 15);
        assert_eq!(args[13], "--");
        assert_eq!(args[14], url().to_string());
        Ok(())
    }

    #[tokio::test]
    async fn test_video_success() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "yt-dlp" && is_video_run(args))
            .times(1)
            .returning(|_, args, _| {
                let target = output_target(&args);
                let _ = std::fs::write(&target, vec![0u8; 2000]);
                // leftover intermediate format
                let _ = std::fs::write(target.with_extension("f137.mp4"), b"x");
                Ok(ok(""))
            });
        runner
            .expect_run()
            .withf(|program, _, _| program == "ffprobe")
            .times(1)
            .returning(|_, _, _| Ok(ok(VIDEO_JSON)));

        let artifact = extractor(runner, dir.path())
            .extract(&url())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        assert_eq!(artifact.kind(), MediaKind::Video);
        assert_eq!(artifact.total_size(), 2000);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

        drop(artifact);
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_oversize_video_is_not_sent_and_skips_images() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "yt-dlp" && is_video_run(args))
            .times(1)
            .returning(|_, args, _| {
                let _ = std::fs::write(output_target(&args), vec![0u8; 5000]);
                Ok(ok(""))
            });

        let res = extractor(runner, dir.path()).extract(&url()).await;

        assert!(matches!(
            res,
            Err(PipelineError::ArtifactTooLarge { size: 5000, limit: 4096 })
        ));
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_max_filesize_abort_is_too_large() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        // yt-dlp exits 0 without writing the file; the notice is all there is
        runner
            .expect_run()
            .withf(|_, args, _| {
                is_video_run(args)
                    && args.iter().any(|a| a == "--no-progress")
                    && !args.iter().any(|a| a == "--quiet")
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(ok(concat!(
                    "[TikTok] Extracting URL: https://www.tiktok.com/@user/video/123\n",
                    "[TikTok] 123: Downloading webpage\n",
                    "[info] 123: Downloading 1 format(s): download\n",
                    "[download] File is larger than max-filesize (60000000 bytes > 4096 bytes). Aborting.\n",
                )))
            });
        runner
            .expect_run()
            .withf(|_, args, _| is_image_run(args))
            .never();

        let res = extractor(runner, dir.path()).extract(&url()).await;
        assert!(matches!(
            res,
            Err(PipelineError::ArtifactTooLarge { size: 60_000_000, limit: 4096 })
        ));
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_falls_back_to_images_and_caps_count() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| is_video_run(args))
            .times(1)
            .returning(|_, _, _| Ok(failed("ERROR: Requested format is not available")));
        runner
            .expect_run()
            .withf(|_, args, _| is_image_run(args))
            .times(1)
            .returning(|_, args, _| {
                write_images(&args, 5, 600, "jpg");
                Ok(ok(""))
            });

        let artifact = extractor(runner, dir.path())
            .extract(&url())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        assert_eq!(artifact.kind(), MediaKind::ImageSet);
        let names: Vec<String> = artifact.files().iter().map(MediaFile::file_name).collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].ends_with("_00001.jpg"));
        assert!(names[2].ends_with("_00003.jpg"));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 3);

        drop(artifact);
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_images_are_dropped() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| is_video_run(args))
            .returning(|_, _, _| Ok(failed("")));
        runner
            .expect_run()
            .withf(|_, args, _| is_image_run(args))
            .returning(|_, args, _| {
                write_images(&args, 1, 600, "png");
                write_images(&args, 1, 10, "webp");
                Ok(ok(""))
            });

        let artifact = extractor(runner, dir.path())
            .extract(&url())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        assert_eq!(artifact.files().len(), 1);
        assert!(artifact.files()[0].file_name().ends_with(".png"));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_nothing_found() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, _, _| program == "yt-dlp")
            .times(2)
            .returning(|_, _, _| Ok(failed("ERROR: Unsupported URL")));

        let res = extractor(runner, dir.path()).extract(&url()).await;

        assert!(matches!(res, Err(PipelineError::NoMediaFound)));
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_all_candidates_rejected_is_invalid() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| is_video_run(args))
            .returning(|_, _, _| Ok(failed("")));
        runner
            .expect_run()
            .withf(|_, args, _| is_image_run(args))
            .returning(|_, args, _| {
                write_images(&args, 2, 600, "gif");
                Ok(ok(""))
            });

        let res = extractor(runner, dir.path()).extract(&url()).await;

        assert!(matches!(res, Err(PipelineError::ArtifactInvalid(_))));
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_undecodable_video_falls_back() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "yt-dlp" && is_video_run(args))
            .returning(|_, args, _| {
                let _ = std::fs::write(output_target(&args), vec![0u8; 2000]);
                Ok(ok(""))
            });
        runner
            .expect_run()
            .withf(|program, _, _| program == "ffprobe")
            .returning(|_, _, _| Ok(ok(r#"{"streams":[]}"#)));
        runner
            .expect_run()
            .withf(|program, args, _| program == "yt-dlp" && is_image_run(args))
            .returning(|_, _, _| Ok(ok("")));

        let res = extractor(runner, dir.path()).extract(&url()).await;

        assert!(matches!(res, Err(PipelineError::ArtifactInvalid(_))));
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_has_no_fallback_and_cleans_partials() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, args, timeout| {
                let partial = output_target(&args).with_extension("mp4.part");
                let _ = std::fs::write(partial, b"partial");
                Err(RunError::Timeout(timeout))
            });

        let res = extractor(runner, dir.path()).extract(&url()).await;

        assert!(matches!(res, Err(PipelineError::ExtractionTimeout { secs: 5 })));
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_extractor_binary() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|program, _, _| Err(RunError::NotFound(program.to_string())));

        let res = extractor(runner, dir.path()).extract(&url()).await;
        assert!(matches!(res, Err(PipelineError::ExtractionFailed(_))));
        Ok(())
    }
}
