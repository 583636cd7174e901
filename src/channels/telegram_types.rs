use serde::{Deserialize, Serialize};

/// A single inline keyboard button
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// Long-poll wait passed to `getUpdates`
pub const POLL_TIMEOUT_SECS: u64 = 30;

/// Client-wide request timeout, slightly longer than the long-poll wait
pub const CLIENT_TIMEOUT_SECS: u64 = POLL_TIMEOUT_SECS + 5;

/// Timeout for sends and other short Bot API calls
pub const SEND_TIMEOUT_SECS: u64 = 10;

/// Pause before retrying after a failed poll
pub const POLL_RETRY_SECS: u64 = 5;

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default)]
    pub my_chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: u64,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// `@username` without the `@`, or the numeric id when no username is set.
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Identities checked against the allowlist.
    pub fn identities(&self) -> Vec<String> {
        let mut ids = vec![self.id.to_string()];
        if let Some(ref name) = self.username {
            ids.push(name.clone());
        }
        ids
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    #[serde(default)]
    pub date: u64,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
}

impl ChatMember {
    /// The bot was blocked or removed from the chat.
    pub fn is_gone(&self) -> bool {
        matches!(self.status.as_str(), "kicked" | "left")
    }
}
