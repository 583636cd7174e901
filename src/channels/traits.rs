use async_trait::async_trait;

/// What kind of inbound event a [`ChannelMessage`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Typed text, including `/commands`.
    Text,
    /// A pressed button; `content` holds its selection token.
    Selection,
    /// The user left or blocked the chat.
    Disconnected,
}

/// A message received from a channel
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub chat_id: String,
    /// Display identity of the sender (username, or numeric id when unset)
    pub sender: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: u64,
}

/// A selectable button shown under a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: String,
}

/// A message to deliver through a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A question the user is expected to answer, optionally with buttons.
    Prompt {
        chat_id: String,
        text: String,
        buttons: Vec<Button>,
    },
    /// Informational text: validation failures, timeouts, confirmations.
    Notice { chat_id: String, text: String },
}

impl OutboundMessage {
    pub fn notice(chat_id: &str, text: impl Into<String>) -> Self {
        Self::Notice {
            chat_id: chat_id.to_string(),
            text: text.into(),
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Self::Prompt { chat_id, .. } | Self::Notice { chat_id, .. } => chat_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Prompt { text, .. } | Self::Notice { text, .. } => text,
        }
    }
}

/// Transport a conversation runs over
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message through this channel
    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}
