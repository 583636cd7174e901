pub mod bot;
pub mod channels;
pub mod config;
pub mod crm;
pub mod flows;
pub mod gateway;
pub mod observability;
pub mod templates;

pub use bot::Bot;
pub use config::Config;
pub use crm::{Crm, Dispatcher};
pub use flows::engine::ConversationEngine;
