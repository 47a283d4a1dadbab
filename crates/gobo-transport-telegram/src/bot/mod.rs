/// Command and message handlers
pub mod handlers;
/// Attachment download and outbound media
pub mod media;
/// Long message splitting and formatting
pub mod messaging;
/// Relay presenter that renders turns as Telegram messages
pub mod presenter;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;

pub use presenter::{PresenterStyle, TelegramPresenter};
