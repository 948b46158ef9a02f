//! Utility functions for message text and Telegram API retries.
//!
//! Regexes come from the `lazy-regex` crate: patterns are validated at compile
//! time and built on first use.

use anyhow::Result;
use lazy_regex::regex_find;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

/// Telegram errors that will not go away on retry
const PERMANENT_TELEGRAM_ERRORS: &[&str] = &[
    "message is not modified",
    "message to edit not found",
    "message to delete not found",
    "message can't be deleted",
    "chat not found",
    "bot was blocked by the user",
];

/// Trailing characters that belong to the sentence, not the link
const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '>', '"', '\''];

/// Returns the first http(s) link in a message.
///
/// # Examples
///
/// ```
/// use reel_relay::utils::extract_first_url;
///
/// assert_eq!(
///     extract_first_url("look (https://vm.tiktok.com/ZM123/)."),
///     Some("https://vm.tiktok.com/ZM123/")
/// );
/// assert_eq!(extract_first_url("no links here"), None);
/// ```
#[must_use]
pub fn extract_first_url(text: &str) -> Option<&str> {
    regex_find!(r"(?i)https?://\S+", text)
        .map(|found| found.trim_end_matches(URL_TRAILING_PUNCTUATION))
        .filter(|url| !url.is_empty())
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use reel_relay::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Whether a Telegram error is worth retrying
#[must_use]
pub fn is_retryable_telegram_error(error: &anyhow::Error) -> bool {
    let message = error.to_string();
    !PERMANENT_TELEGRAM_ERRORS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Used for small text operations (send, edit) that may fail due to transient
/// network errors. Media uploads are never retried.
///
/// The retry strategy uses exponential backoff with jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (constants in `config.rs`)
///
/// Errors matched by [`is_retryable_telegram_error`] as permanent are
/// returned immediately.
///
/// # Errors
///
/// Returns the last error if all attempts fail.
///
/// # Examples
///
/// ```no_run
/// use reel_relay::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn send() -> Result<i32> {
///     Ok(1)
/// }
///
/// # async fn example() -> Result<()> {
/// let id = retry_telegram_operation(|| async { send().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TELEGRAM_API_MAX_RETRIES);

    RetryIf::start(retry_strategy, operation, is_retryable_telegram_error)
        .await
        .map_err(|e| {
            warn!(
                "Telegram API operation failed after {} attempts: {}",
                TELEGRAM_API_MAX_RETRIES, e
            );
            e
        })
}
