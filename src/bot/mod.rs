/// Command and message handlers
pub mod handlers;
/// Telegram API calls with retry
pub mod resilient;
/// Chat transport used by download flows
pub mod transport;

pub use transport::TelegramMediaTransport;
