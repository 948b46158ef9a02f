//! Hand-written fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use reel_relay::dispatch::{ChatActionKind, DispatchHandler, MediaTransport, MessageRef};
use reel_relay::media::{
    ArtifactValidator, CommandOutput, CommandRunner, ExtractionLimits, MediaExtractor, MediaFile,
    RateLimiter, RunError, UrlGuard,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const VIDEO_PROBE: &str = r#"{"streams":[{"codec_type":"video"}]}"#;

type Script = dyn Fn(&str, &[String]) -> Result<CommandOutput, RunError> + Send + Sync;

/// Scripted stand-in for yt-dlp and ffprobe
pub struct FakeRunner {
    script: Box<Script>,
    extractor_calls: AtomicUsize,
    probe_calls: AtomicUsize,
}

impl FakeRunner {
    pub fn new(
        script: impl Fn(&str, &[String]) -> Result<CommandOutput, RunError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            extractor_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
        })
    }

    pub fn extractor_calls(&self) -> usize {
        self.extractor_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        _timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        if program == "ffprobe" {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.extractor_calls.fetch_add(1, Ordering::SeqCst);
        }
        (self.script)(program, &args)
    }
}

pub fn success(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failure(stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Value following `-o`
pub fn output_target(args: &[String]) -> PathBuf {
    args.iter()
        .position(|a| a == "-o")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_default()
}

pub fn is_video_run(args: &[String]) -> bool {
    args.iter().any(|a| a == "--max-filesize")
}

/// Writes `count` images following the extractor's output template
pub fn write_images(args: &[String], count: usize, size: usize) {
    let template = output_target(args).to_string_lossy().into_owned();
    for n in 1..=count {
        let path = template
            .replace("%(autonumber)s", &format!("{n:05}"))
            .replace("%(ext)s", "jpg");
        let _ = std::fs::write(path, vec![0u8; size]);
    }
}

/// Extractor that writes a video of `size` bytes and a probe that accepts it
pub fn video_runner(size: usize) -> Arc<FakeRunner> {
    FakeRunner::new(move |program, args| {
        if program == "ffprobe" {
            return Ok(success(VIDEO_PROBE));
        }
        if is_video_run(args) {
            std::fs::write(output_target(args), vec![0u8; size])?;
            return Ok(success(""));
        }
        Ok(failure("ERROR: unexpected image run"))
    })
}

/// Everything the chat saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Text(String),
    Edit(i32, String),
    Delete(i32),
    Action(ChatActionKind),
    Video {
        name: String,
        size: u64,
        streaming: bool,
        on_disk: bool,
    },
    Photos {
        count: usize,
        all_on_disk: bool,
    },
}

/// Transport recording every call
#[derive(Default)]
pub struct FakeTransport {
    events: Mutex<Vec<Event>>,
    next_id: AtomicI32,
    fail_uploads: bool,
}

impl FakeTransport {
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::Text(t) | Event::Edit(_, t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, event: Event) {
        self.events.lock().await.push(event);
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn send_text(&self, text: &str) -> anyhow::Result<MessageRef> {
        self.record(Event::Text(text.to_string())).await;
        Ok(MessageRef(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> anyhow::Result<()> {
        self.record(Event::Edit(message.0, text.to_string())).await;
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()> {
        self.record(Event::Delete(message.0)).await;
        Ok(())
    }

    async fn send_action(&self, action: ChatActionKind) -> anyhow::Result<()> {
        self.record(Event::Action(action)).await;
        Ok(())
    }

    async fn send_video(&self, file: &MediaFile, supports_streaming: bool) -> anyhow::Result<()> {
        self.record(Event::Video {
            name: file.file_name(),
            size: file.size,
            streaming: supports_streaming,
            on_disk: file.path.exists(),
        })
        .await;
        if self.fail_uploads {
            anyhow::bail!("Bad Request: upload rejected");
        }
        Ok(())
    }

    async fn send_photo_group(&self, files: &[MediaFile]) -> anyhow::Result<()> {
        self.record(Event::Photos {
            count: files.len(),
            all_on_disk: files.iter().all(|f| f.path.exists()),
        })
        .await;
        if self.fail_uploads {
            anyhow::bail!("Bad Request: upload rejected");
        }
        Ok(())
    }
}

pub fn test_limits() -> ExtractionLimits {
    ExtractionLimits {
        timeout: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(1),
        ..ExtractionLimits::default()
    }
}

/// Pipeline over a fake runner, allowing TikTok links only
pub fn pipeline(
    runner: Arc<FakeRunner>,
    dir: &Path,
    limits: ExtractionLimits,
    limiter: RateLimiter,
) -> DispatchHandler {
    let runner: Arc<dyn CommandRunner> = runner;
    let validator = ArtifactValidator::new(runner.clone(), "ffprobe", limits);
    DispatchHandler::new(
        UrlGuard::new(vec!["tiktok.com".to_string()], false),
        limiter,
        MediaExtractor::new(runner, validator, dir, "yt-dlp"),
    )
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, Iterator::count)
}
