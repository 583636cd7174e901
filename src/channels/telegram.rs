use super::telegram_types::{
    ApiResponse, InlineButton, Update, User, CLIENT_TIMEOUT_SECS, POLL_RETRY_SECS,
    POLL_TIMEOUT_SECS, SEND_TIMEOUT_SECS,
};
use super::traits::{Button, Channel, ChannelMessage, MessageKind, OutboundMessage};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Maximum number of update_ids to track for dedup (bounded FIFO).
const MAX_SEEN_UPDATES: usize = 10_000;

/// Bounded seen-set for Telegram update_id dedup.
struct SeenUpdates {
    set: HashSet<i64>,
    order: VecDeque<i64>,
}

impl SeenUpdates {
    fn new() -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert an update_id. Returns `true` if new, `false` if duplicate.
    fn insert(&mut self, uid: i64) -> bool {
        if !self.set.insert(uid) {
            return false;
        }
        self.order.push_back(uid);
        while self.order.len() > MAX_SEEN_UPDATES {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// An update translated for the bot, plus the callback query to acknowledge.
#[derive(Debug)]
pub struct ParsedUpdate {
    pub message: Option<ChannelMessage>,
    pub callback_query_id: Option<String>,
}

/// Telegram channel -- long-polls the Bot API for updates
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    seen_update_ids: Arc<Mutex<SeenUpdates>>,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client for TelegramChannel")?;
        Ok(Self {
            bot_token,
            allowed_users,
            client,
            seen_update_ids: Arc::new(Mutex::new(SeenUpdates::new())),
        })
    }

    pub fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    pub fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    fn is_sender_allowed(&self, user: &User) -> bool {
        let identities = user.identities();
        self.is_any_user_allowed(identities.iter().map(String::as_str))
    }

    /// Build the JSON body for `sendMessage` (for testing without network).
    pub fn build_send_json(
        chat_id: &str,
        text: &str,
        buttons: &[Button],
        parse_mode: Option<&str>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }
        if !buttons.is_empty() {
            // One button per row.
            let keyboard: Vec<Vec<InlineButton>> = buttons
                .iter()
                .map(|b| {
                    vec![InlineButton {
                        text: b.label.clone(),
                        callback_data: b.token.clone(),
                    }]
                })
                .collect();
            body["reply_markup"] = serde_json::json!({ "inline_keyboard": keyboard });
        }
        body
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> anyhow::Result<()> {
        let html_body = Self::build_send_json(chat_id, text, buttons, Some("HTML"));
        let html_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&html_body)
            .send()
            .await?;

        if html_resp.status().is_success() {
            return Ok(());
        }

        let html_status = html_resp.status();
        let html_err = html_resp.text().await.unwrap_or_default();
        tracing::warn!(
            status = ?html_status,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        // Retry without parse_mode as a compatibility fallback.
        let plain_body = Self::build_send_json(chat_id, text, buttons, None);
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&plain_body)
            .send()
            .await?;

        if !plain_resp.status().is_success() {
            let plain_status = plain_resp.status();
            let plain_err = plain_resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Telegram sendMessage failed (html {}: {}; plain {}: {})",
                html_status,
                html_err,
                plain_status,
                plain_err
            );
        }

        Ok(())
    }

    /// Dismiss the loading spinner on a pressed button.
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "callback_query_id": callback_query_id });
        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram answerCallbackQuery failed: {err}");
        }

        Ok(())
    }

    /// Translate one update into a channel message.
    ///
    /// Updates from users outside the allowlist, duplicates and update types
    /// the bot does not handle yield no message.
    pub fn parse_update(&self, update: Update) -> ParsedUpdate {
        let mut parsed = ParsedUpdate {
            message: None,
            callback_query_id: None,
        };

        // Dedup: skip if we've already processed this update_id
        if !self
            .seen_update_ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(update.update_id)
        {
            tracing::debug!("Duplicate update_id {}, skipping", update.update_id);
            return parsed;
        }

        if let Some(cb) = update.callback_query {
            parsed.callback_query_id = Some(cb.id.clone());
            let Some(chat_id) = cb.message.as_ref().map(|m| m.chat.id) else {
                return parsed;
            };
            if !self.is_sender_allowed(&cb.from) {
                tracing::warn!(
                    "Telegram: ignoring button press from unauthorized user {}",
                    cb.from.display_name()
                );
                return parsed;
            }
            parsed.message = Some(ChannelMessage {
                id: Uuid::new_v4().to_string(),
                chat_id: chat_id.to_string(),
                sender: cb.from.display_name(),
                content: cb.data.unwrap_or_default(),
                kind: MessageKind::Selection,
                timestamp: cb.message.map(|m| m.date).unwrap_or_default(),
            });
            return parsed;
        }

        if let Some(member) = update.my_chat_member {
            if member.new_chat_member.is_gone() {
                parsed.message = Some(ChannelMessage {
                    id: Uuid::new_v4().to_string(),
                    chat_id: member.chat.id.to_string(),
                    sender: member.from.display_name(),
                    content: String::new(),
                    kind: MessageKind::Disconnected,
                    timestamp: member.date,
                });
            }
            return parsed;
        }

        let Some(message) = update.message else {
            return parsed;
        };
        let Some(from) = message.from.as_ref() else {
            return parsed;
        };
        if !self.is_sender_allowed(from) {
            tracing::warn!(
                "Telegram: ignoring message from unauthorized user: username={}, user_id={}. \
Add the @username or numeric user ID to telegram.allowed_users.",
                from.username.as_deref().unwrap_or("unknown"),
                from.id
            );
            return parsed;
        }
        let Some(text) = message.text.clone() else {
            return parsed;
        };

        parsed.message = Some(ChannelMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: message.chat.id.to_string(),
            sender: from.display_name(),
            content: text,
            kind: MessageKind::Text,
            timestamp: message.date,
        });
        parsed
    }

    async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "callback_query", "my_chat_member"]
        });
        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .context("Telegram poll request")?;
        let data: ApiResponse<Vec<Update>> =
            resp.json().await.context("Telegram poll response")?;
        if !data.ok {
            anyhow::bail!(
                "Telegram getUpdates failed: {}",
                data.description.unwrap_or_default()
            );
        }
        Ok(data.result.unwrap_or_default())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        match message {
            OutboundMessage::Prompt {
                chat_id,
                text,
                buttons,
            } => self.send_message(chat_id, text, buttons).await,
            OutboundMessage::Notice { chat_id, text } => {
                self.send_message(chat_id, text, &[]).await
            }
        }
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e:#}");
                    tokio::time::sleep(Duration::from_secs(POLL_RETRY_SECS)).await;
                    continue;
                }
            };

            for update in updates {
                // Advance offset past this update
                offset = offset.max(update.update_id + 1);

                let parsed = self.parse_update(update);
                if let Some(ref cb_id) = parsed.callback_query_id {
                    if let Err(e) = self.answer_callback_query(cb_id).await {
                        tracing::debug!("failed to answer callback query: {e:#}");
                    }
                }
                if let Some(msg) = parsed.message {
                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: serde_json::Value) -> Update {
        serde_json::from_value(json).unwrap()
    }

    fn text_update(update_id: i64, username: &str, text: &str) -> Update {
        update(serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": 1,
                "from": {"id": 77, "username": username},
                "chat": {"id": 500},
                "date": 1700000000,
                "text": text
            }
        }))
    }

    #[test]
    fn telegram_channel_name() {
        let ch = TelegramChannel::new("fake-token".into(), vec!["*".into()]).unwrap();
        assert_eq!(ch.name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let ch = TelegramChannel::new("123:ABC".into(), vec![]).unwrap();
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn telegram_user_allowed_wildcard() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]).unwrap();
        assert!(ch.is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let ch = TelegramChannel::new("t".into(), vec!["alice".into()]).unwrap();
        assert!(ch.is_user_allowed("alice"));
        assert!(!ch.is_user_allowed("alice_bot"));
        assert!(!ch.is_user_allowed("malice"));
        assert!(!ch.is_user_allowed(""));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id_identity() {
        let ch = TelegramChannel::new("t".into(), vec!["77".into()]).unwrap();
        assert!(ch.is_any_user_allowed(["someone", "77"]));
        assert!(!ch.is_any_user_allowed(["someone", "78"]));
    }

    #[test]
    fn send_json_with_buttons() {
        let buttons = vec![
            Button {
                label: "compensation".into(),
                token: "compensation".into(),
            },
            Button {
                label: "payment".into(),
                token: "payment".into(),
            },
        ];
        let json = TelegramChannel::build_send_json("500", "Choose", &buttons, Some("HTML"));
        assert_eq!(json["chat_id"], "500");
        assert_eq!(json["text"], "Choose");
        assert_eq!(json["parse_mode"], "HTML");
        let rows = json["reply_markup"]["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0]["text"], "payment");
        assert_eq!(rows[1][0]["callback_data"], "payment");
    }

    #[test]
    fn send_json_plain_without_buttons() {
        let json = TelegramChannel::build_send_json("500", "Hi", &[], None);
        assert!(json.get("parse_mode").is_none());
        assert!(json.get("reply_markup").is_none());
    }

    #[test]
    fn parse_text_message() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]).unwrap();
        let parsed = ch.parse_update(text_update(1, "alice", "/appeal"));
        let msg = parsed.message.unwrap();
        assert_eq!(msg.chat_id, "500");
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.content, "/appeal");
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(parsed.callback_query_id.is_none());
    }

    #[test]
    fn parse_duplicate_update_is_dropped() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]).unwrap();
        assert!(ch.parse_update(text_update(9, "alice", "hi")).message.is_some());
        assert!(ch.parse_update(text_update(9, "alice", "hi")).message.is_none());
    }

    #[test]
    fn parse_unauthorized_message_is_dropped() {
        let ch = TelegramChannel::new("t".into(), vec!["bob".into()]).unwrap();
        assert!(ch.parse_update(text_update(2, "eve", "/appeal")).message.is_none());
    }

    #[test]
    fn parse_callback_query_is_selection() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]).unwrap();
        let parsed = ch.parse_update(update(serde_json::json!({
            "update_id": 3,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 77, "username": "alice"},
                "message": {"message_id": 4, "chat": {"id": 500}, "date": 5},
                "data": "compensation"
            }
        })));
        assert_eq!(parsed.callback_query_id.as_deref(), Some("cb-1"));
        let msg = parsed.message.unwrap();
        assert_eq!(msg.kind, MessageKind::Selection);
        assert_eq!(msg.content, "compensation");
        assert_eq!(msg.chat_id, "500");
    }

    #[test]
    fn parse_unauthorized_callback_still_answered() {
        let ch = TelegramChannel::new("t".into(), vec!["bob".into()]).unwrap();
        let parsed = ch.parse_update(update(serde_json::json!({
            "update_id": 4,
            "callback_query": {
                "id": "cb-2",
                "from": {"id": 66, "username": "eve"},
                "message": {"message_id": 4, "chat": {"id": 500}, "date": 5},
                "data": "payment"
            }
        })));
        assert!(parsed.message.is_none());
        assert_eq!(parsed.callback_query_id.as_deref(), Some("cb-2"));
    }

    #[test]
    fn parse_blocked_bot_is_disconnect() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]).unwrap();
        let parsed = ch.parse_update(update(serde_json::json!({
            "update_id": 5,
            "my_chat_member": {
                "chat": {"id": 500},
                "from": {"id": 77, "username": "alice"},
                "date": 6,
                "new_chat_member": {"status": "kicked"}
            }
        })));
        let msg = parsed.message.unwrap();
        assert_eq!(msg.kind, MessageKind::Disconnected);
        assert_eq!(msg.chat_id, "500");
    }

    #[test]
    fn seen_updates_bounded() {
        let mut seen = SeenUpdates::new();
        for uid in 0..(MAX_SEEN_UPDATES as i64 + 5) {
            assert!(seen.insert(uid));
        }
        assert_eq!(seen.order.len(), MAX_SEEN_UPDATES);
        // The oldest ids were evicted and count as new again.
        assert!(seen.insert(0));
        assert!(!seen.insert(MAX_SEEN_UPDATES as i64));
    }
}
