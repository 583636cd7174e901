pub mod telegram;
pub mod telegram_types;
pub mod traits;

pub use telegram::TelegramChannel;
pub use traits::{Button, Channel, ChannelMessage, MessageKind, OutboundMessage};
