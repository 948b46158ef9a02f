use crate::bot;
use crate::bot::handlers::Command;
use crate::config::Settings;
use crate::dispatch::DispatchHandler;
use crate::media::{
    spawn_sweeper, sweep_stale, ArtifactValidator, CommandRunner, MediaExtractor, ProcessRunner,
    RateLimiter, UrlGuard,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// Wire the pipeline stages from settings.
///
/// Every subprocess spawned by the returned handler is killed when
/// `shutdown` is cancelled.
#[must_use]
pub fn build_dispatch_handler(settings: &Settings, shutdown: CancellationToken) -> DispatchHandler {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(shutdown));
    let limits = settings.limits();
    let validator = ArtifactValidator::new(runner.clone(), settings.ffprobe_path.clone(), limits);
    let extractor = MediaExtractor::new(
        runner,
        validator,
        settings.download_dir.clone(),
        settings.ytdlp_path.clone(),
    );

    DispatchHandler::new(
        UrlGuard::new(settings.allowed_hosts(), settings.resolve_hosts),
        RateLimiter::new(settings.rate_limit_count, settings.rate_limit_window()),
        extractor,
    )
}

/// Run the Telegram bot until Ctrl-C.
///
/// On shutdown running extractions are cancelled, in-flight flows are
/// drained and the download directory is swept once more.
///
/// # Errors
///
/// Returns an error if the download directory cannot be created.
pub async fn run_bot(settings: Arc<Settings>) -> Result<()> {
    tokio::fs::create_dir_all(&settings.download_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create download dir {}",
                settings.download_dir.display()
            )
        })?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let cleanup_age = Duration::from_secs(settings.cleanup_age_secs);

    let sweeper = spawn_sweeper(
        settings.download_dir.clone(),
        cleanup_age,
        Duration::from_secs(settings.sweep_interval_secs),
        shutdown.clone(),
    );

    let handler = Arc::new(build_dispatch_handler(&settings, shutdown.clone()));
    info!(
        download_dir = %settings.download_dir.display(),
        allowed_hosts = ?settings.allowed_hosts(),
        rate_limit = settings.rate_limit_count,
        rate_window_secs = settings.rate_limit_window_secs,
        "Dispatch handler initialized"
    );

    let bot = Bot::new(settings.telegram_token.clone());

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![settings.clone(), handler, tracker.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!(in_flight = tracker.len(), "Shutting down, cancelling extractions");
    shutdown.cancel();
    tracker.close();
    tracker.wait().await;
    if let Err(e) = sweeper.await {
        error!(error = %e, "Sweeper task failed");
    }
    sweep_stale(&settings.download_dir, cleanup_age).await;
    info!("Shutdown complete");

    Ok(())
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg).await,
        Command::Help => bot::handlers::help(bot, msg, settings).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    handler: Arc<DispatchHandler>,
    tracker: TaskTracker,
) -> Result<(), teloxide::RequestError> {
    bot::handlers::handle_text(bot, msg, handler, &tracker);
    respond(())
}
