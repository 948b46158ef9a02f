#![deny(missing_docs)]
//! Reel Relay library.
//!
//! Download-and-validate pipeline for social-media posts, with the Telegram
//! transport that relays the results back to chat.

/// Telegram bot handlers and transport.
pub mod bot;
/// Configuration management.
pub mod config;
/// Per-message orchestration of the media pipeline.
pub mod dispatch;
/// Media extraction, validation, rate limiting and cleanup.
pub mod media;
/// Telegram runtime entrypoint.
pub mod runner;
/// Utility functions.
pub mod utils;
