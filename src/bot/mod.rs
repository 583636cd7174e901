//! Inbound event routing and the bot's run loop.
//!
//! Each chat gets its own queue and worker task, so events from one chat are
//! handled strictly in arrival order while chats proceed independently.
//! Commands are matched against a fixed route table; everything else is a
//! reply to the chat's active conversation.

use crate::channels::traits::{Channel, ChannelMessage, MessageKind, OutboundMessage};
use crate::flows::engine::{ConversationEngine, EngineError};
use crate::flows::session::Reply;
use crate::templates;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const INBOX_CAPACITY: usize = 100;

/// A chat worker exits after this long without events.
const CHAT_IDLE_SECS: u64 = 60;

type ChatQueue = mpsc::UnboundedSender<ChannelMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Greeting,
    Usage,
    Ping,
    /// Start the flow bound to the route's command.
    StartFlow,
    Cancel,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub command: &'static str,
    pub description: &'static str,
    pub action: Action,
}

pub const ROUTES: &[Route] = &[
    Route {
        command: "start",
        description: "Greeting and the list of commands",
        action: Action::Greeting,
    },
    Route {
        command: "help",
        description: "List of commands",
        action: Action::Usage,
    },
    Route {
        command: "ping",
        description: "Check that the bot is alive",
        action: Action::Ping,
    },
    Route {
        command: "appeal",
        description: "Create a compensation or payment request",
        action: Action::StartFlow,
    },
    Route {
        command: "cancel",
        description: "Cancel the request in progress",
        action: Action::Cancel,
    },
];

/// Split `/command@botname args` into `command`. `None` for non-commands.
pub fn parse_command(text: &str) -> Option<&str> {
    let first = text.trim_start().split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    let command = command.split('@').next().unwrap_or(command);
    if command.is_empty() {
        return None;
    }
    Some(command)
}

pub struct Bot {
    channel: Arc<dyn Channel>,
    engine: Arc<ConversationEngine>,
    routes: &'static [Route],
    queues: Mutex<HashMap<String, ChatQueue>>,
}

impl Bot {
    pub fn new(channel: Arc<dyn Channel>, engine: Arc<ConversationEngine>) -> Self {
        for route in ROUTES.iter().filter(|r| r.action == Action::StartFlow) {
            if !engine.commands().contains(&route.command) {
                tracing::warn!("/{} has no flow loaded", route.command);
            }
        }
        Self {
            channel,
            engine,
            routes: ROUTES,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ConversationEngine> {
        &self.engine
    }

    fn route(&self, command: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.command == command)
    }

    fn usage(&self) -> String {
        templates::usage(self.routes.iter().map(|r| (r.command, r.description)))
    }

    /// Chats that currently have a worker.
    pub fn active_chats(&self) -> usize {
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Queue an event behind earlier events from the same chat, starting the
    /// chat's worker if it has none.
    pub fn enqueue(self: &Arc<Self>, msg: ChannelMessage) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let msg = match queues.get(&msg.chat_id) {
            Some(queue) => match queue.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let chat_id = msg.chat_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(msg).is_err() {
            return;
        }
        queues.insert(chat_id.clone(), tx);
        tokio::spawn(Arc::clone(self).drain(chat_id, rx));
    }

    /// Worker for one chat: handle its events in order until it goes idle.
    async fn drain(
        self: Arc<Self>,
        chat_id: String,
        mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    ) {
        let idle = Duration::from_secs(CHAT_IDLE_SECS);
        loop {
            let msg = match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => return,
                Err(_) => {
                    // Pushes happen under this lock; an empty queue stays empty.
                    let next = {
                        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
                        let next = rx.try_recv().ok();
                        if next.is_none() {
                            queues.remove(&chat_id);
                        }
                        next
                    };
                    match next {
                        Some(msg) => msg,
                        None => {
                            tracing::debug!(chat_id = %chat_id, "chat worker idle, exiting");
                            return;
                        }
                    }
                }
            };
            self.handle(msg).await;
        }
    }

    /// Handle one inbound event to completion.
    pub async fn handle(&self, msg: ChannelMessage) {
        let chat_id = msg.chat_id.as_str();
        match msg.kind {
            MessageKind::Disconnected => {
                if self.engine.disconnect(chat_id).await {
                    tracing::info!(chat_id, "chat disconnected, session dropped");
                }
            }
            MessageKind::Selection => self.reply(chat_id, Reply::Selection(&msg.content)).await,
            MessageKind::Text => match parse_command(&msg.content) {
                Some(command) => self.command(&msg, command).await,
                None => self.reply(chat_id, Reply::Text(&msg.content)).await,
            },
        }
    }

    async fn command(&self, msg: &ChannelMessage, command: &str) {
        let chat_id = msg.chat_id.as_str();
        let Some(route) = self.route(command).copied() else {
            if self.engine.has_session(chat_id) {
                self.reply(chat_id, Reply::Text(&msg.content)).await;
            } else {
                self.notify(chat_id, self.usage()).await;
            }
            return;
        };

        tracing::debug!(chat_id, command, "command received");
        match route.action {
            Action::Greeting => {
                let text = format!("{}\n\n{}", templates::greeting(&msg.sender), self.usage());
                self.notify(chat_id, text).await;
            }
            Action::Usage => self.notify(chat_id, self.usage()).await,
            Action::Ping => self.notify(chat_id, templates::PING).await,
            Action::StartFlow => {
                if let Err(e) = self.engine.start(chat_id, &msg.sender, route.command).await {
                    self.report(chat_id, e).await;
                }
            }
            Action::Cancel => match self.engine.cancel(chat_id).await {
                Ok(()) => {}
                Err(EngineError::NoActiveSession(_)) => {
                    self.notify(chat_id, templates::NOTHING_TO_CANCEL).await;
                }
                Err(e) => self.report(chat_id, e).await,
            },
        }
    }

    async fn reply(&self, chat_id: &str, reply: Reply<'_>) {
        match self.engine.handle_reply(chat_id, reply).await {
            Ok(outcome) => tracing::debug!(chat_id, ?outcome, "reply handled"),
            Err(e) => self.report(chat_id, e).await,
        }
    }

    async fn report(&self, chat_id: &str, error: EngineError) {
        match error {
            EngineError::AlreadyInProgress(_) => {
                self.notify(chat_id, templates::ALREADY_IN_PROGRESS).await;
            }
            EngineError::NoActiveSession(_) => {
                self.notify(chat_id, templates::NO_ACTIVE_SESSION).await;
            }
            EngineError::FlowNotFound(_) => {
                tracing::error!(chat_id, "{error}");
                self.notify(chat_id, templates::UNAVAILABLE).await;
            }
            EngineError::Channel(_) => tracing::error!(chat_id, "{error}"),
        }
    }

    async fn notify(&self, chat_id: &str, text: impl Into<String>) {
        if let Err(e) = self.channel.send(&OutboundMessage::notice(chat_id, text)).await {
            tracing::warn!(chat_id, "failed to send reply: {e:#}");
        }
    }

    /// Listen on the channel and handle events until shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        sweep_every: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        if !self.channel.health_check().await {
            tracing::warn!("{} channel failed its health check", self.channel.name());
        }

        let (tx, mut rx) = mpsc::channel::<ChannelMessage>(INBOX_CAPACITY);

        let listener = {
            let channel = Arc::clone(&self.channel);
            tokio::spawn(async move {
                if let Err(e) = channel.listen(tx).await {
                    tracing::error!("{} listener stopped: {e:#}", channel.name());
                }
            })
        };

        let sweeper = tokio::spawn(
            Arc::clone(&self.engine).run_timeout_sweeper(sweep_every, shutdown_rx.clone()),
        );

        tracing::info!(commands = ?self.engine.commands(), "bot started");

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        tracing::warn!("channel closed its inbox");
                        break;
                    };
                    self.enqueue(msg);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("bot shutting down");
                        break;
                    }
                }
            }
        }

        listener.abort();
        sweeper.abort();
        Ok(())
    }
}
