use super::execute::execute_step;
use super::session::{AbortReason, Reply, Session, SessionKey, SessionPolicy, Transition};
use super::state::SessionStore;
use super::types::FlowDefinition;
use crate::channels::traits::{Channel, OutboundMessage};
use crate::crm::{Dispatcher, FinalizedRequest};
use crate::observability::{Metrics, Outcome};
use crate::templates;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("a request is already in progress for chat '{0}'")]
    AlreadyInProgress(String),
    #[error("no active session for chat '{0}'")]
    NoActiveSession(String),
    #[error("no flow is started by '/{0}'")]
    FlowNotFound(String),
    #[error("channel error: {0:#}")]
    Channel(anyhow::Error),
}

/// How a reply was handled once it reached an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Accepted; the next prompt was sent.
    Prompted,
    /// Rejected; the same prompt was sent again with the reason.
    Reprompted,
    /// All fields collected and the dispatcher accepted the request.
    Completed,
    /// All fields collected but the dispatcher failed.
    DispatchFailed,
    Aborted,
    /// The deadline had passed before the reply arrived; the reply was dropped.
    TimedOut,
}

/// Drives guided conversations: one session per chat, prompts out through
/// the channel, finalized requests out through the dispatcher.
pub struct ConversationEngine {
    channel: Arc<dyn Channel>,
    dispatcher: Arc<dyn Dispatcher>,
    flows: HashMap<String, Arc<FlowDefinition>>,
    store: SessionStore,
    policy: SessionPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl ConversationEngine {
    /// `flows` may be keyed by anything; the engine indexes them by command.
    pub fn new(
        channel: Arc<dyn Channel>,
        dispatcher: Arc<dyn Dispatcher>,
        flows: HashMap<String, Arc<FlowDefinition>>,
        policy: SessionPolicy,
    ) -> Self {
        let flows = flows
            .into_values()
            .map(|def| (def.command.clone(), def))
            .collect();
        Self {
            channel,
            dispatcher,
            flows,
            store: SessionStore::new(),
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Commands that start a flow, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.flows.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }

    pub fn has_session(&self, chat_id: &str) -> bool {
        self.store.has_session(chat_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.store.len()
    }

    /// Start the flow bound to `command` for a chat and send its first prompt.
    pub async fn start(
        &self,
        chat_id: &str,
        username: &str,
        command: &str,
    ) -> Result<SessionKey, EngineError> {
        let flow = self
            .flows
            .get(command)
            .cloned()
            .ok_or_else(|| EngineError::FlowNotFound(command.to_string()))?;

        let session = Session::new(
            SessionKey::new(chat_id),
            username,
            flow,
            self.policy,
            Instant::now(),
        );
        let key = session.key().clone();
        let handle = self.store.insert_if_absent(session).map_err(|existing| {
            tracing::info!(
                chat_id,
                correlation_id = %existing.correlation_id,
                "conversation already in progress"
            );
            self.record(Outcome::Rejected);
            EngineError::AlreadyInProgress(chat_id.to_string())
        })?;
        self.refresh_gauge();

        let session = handle.lock().await;
        let sent = match session.current_step() {
            Some(step) => execute_step(self.channel.as_ref(), chat_id, step, None).await,
            None => Ok(()),
        };
        if let Err(e) = sent {
            drop(session);
            self.release(&key);
            return Err(EngineError::Channel(e));
        }

        tracing::info!(
            chat_id,
            correlation_id = %key.correlation_id,
            username,
            flow = command,
            state = %session.state(),
            "conversation started"
        );
        self.record(Outcome::Started);
        Ok(key)
    }

    /// Feed one reply (typed text or a selection token) into the chat's session.
    pub async fn handle_reply(
        &self,
        chat_id: &str,
        reply: Reply<'_>,
    ) -> Result<ReplyOutcome, EngineError> {
        let handle = self
            .store
            .get(chat_id)
            .ok_or_else(|| EngineError::NoActiveSession(chat_id.to_string()))?;
        let mut session = handle.lock().await;
        if session.is_terminal() {
            return Err(EngineError::NoActiveSession(chat_id.to_string()));
        }

        let key = session.key().clone();
        match session.apply(reply, Instant::now()) {
            Transition::Advanced | Transition::BranchSelected(_) => {
                tracing::debug!(
                    chat_id,
                    correlation_id = %key.correlation_id,
                    cursor = session.cursor(),
                    "answer accepted"
                );
                self.prompt(&session, None).await;
                Ok(ReplyOutcome::Prompted)
            }
            Transition::Rejected(err) => {
                tracing::info!(
                    chat_id,
                    correlation_id = %key.correlation_id,
                    step = %err.step_id,
                    kind = ?err.kind,
                    "answer rejected"
                );
                self.prompt(&session, Some(&err.kind.to_string())).await;
                Ok(ReplyOutcome::Reprompted)
            }
            Transition::Completed => {
                let finalized = session.finalize();
                drop(session);
                self.release(&key);
                match finalized {
                    Ok(request) => Ok(self.dispatch(chat_id, &key, request).await),
                    Err(e) => {
                        tracing::error!(
                            chat_id,
                            correlation_id = %key.correlation_id,
                            "failed to assemble request: {e}"
                        );
                        self.record(Outcome::DispatchFailed);
                        self.notify(chat_id, templates::DISPATCH_FAILED).await;
                        Ok(ReplyOutcome::DispatchFailed)
                    }
                }
            }
            Transition::Aborted(reason) => {
                drop(session);
                self.release(&key);
                tracing::info!(chat_id, correlation_id = %key.correlation_id, ?reason, "conversation aborted");
                self.record(Outcome::Aborted);
                self.notify(chat_id, abort_notice(reason)).await;
                Ok(ReplyOutcome::Aborted)
            }
            Transition::TimedOut => {
                drop(session);
                self.release(&key);
                tracing::info!(chat_id, correlation_id = %key.correlation_id, "conversation timed out");
                self.record(Outcome::TimedOut);
                self.notify(chat_id, templates::TIMED_OUT).await;
                Ok(ReplyOutcome::TimedOut)
            }
            Transition::Ignored => Err(EngineError::NoActiveSession(chat_id.to_string())),
        }
    }

    /// Explicit cancel from the user.
    pub async fn cancel(&self, chat_id: &str) -> Result<(), EngineError> {
        self.abort(chat_id, AbortReason::Cancelled).await?;
        self.notify(chat_id, templates::CANCELLED).await;
        Ok(())
    }

    /// The chat went away. Returns whether a session was dropped.
    pub async fn disconnect(&self, chat_id: &str) -> bool {
        self.abort(chat_id, AbortReason::Disconnected).await.is_ok()
    }

    async fn abort(&self, chat_id: &str, reason: AbortReason) -> Result<(), EngineError> {
        let handle = self
            .store
            .get(chat_id)
            .ok_or_else(|| EngineError::NoActiveSession(chat_id.to_string()))?;
        let mut session = handle.lock().await;
        if session.abort(reason) == Transition::Ignored {
            return Err(EngineError::NoActiveSession(chat_id.to_string()));
        }
        let key = session.key().clone();
        drop(session);
        self.release(&key);
        tracing::info!(chat_id, correlation_id = %key.correlation_id, ?reason, "conversation aborted");
        self.record(Outcome::Aborted);
        Ok(())
    }

    /// Move every session whose deadline has passed to `timed_out` and tell
    /// its chat. Returns how many sessions expired.
    ///
    /// Sessions busy with an event are skipped; they are checked again on the
    /// next sweep or when their reply is applied.
    pub async fn sweep_timeouts(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        for handle in self.store.snapshot() {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if session.expire_if_due(now) {
                expired.push(session.key().clone());
            }
        }

        for key in &expired {
            self.release(key);
            tracing::info!(
                chat_id = %key.chat_id,
                correlation_id = %key.correlation_id,
                "conversation timed out"
            );
            self.record(Outcome::TimedOut);
        }
        for key in &expired {
            self.notify(&key.chat_id, templates::TIMED_OUT).await;
        }
        expired.len()
    }

    /// Periodically expire sessions until shutdown is signalled.
    pub async fn run_timeout_sweeper(
        self: Arc<Self>,
        every: Duration,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(every);

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("timeout sweeper shutting down");
                        return;
                    }
                }
            }

            let expired = self.sweep_timeouts(Instant::now()).await;
            if expired > 0 {
                tracing::debug!(expired, "timeout sweep");
            }
        }
    }

    async fn dispatch(&self, chat_id: &str, key: &SessionKey, request: FinalizedRequest) -> ReplyOutcome {
        let kind = request.kind();
        match self.dispatcher.submit(request).await {
            Ok(response) => {
                tracing::info!(
                    chat_id,
                    correlation_id = %key.correlation_id,
                    reference = %response.reference,
                    %kind,
                    "conversation completed"
                );
                self.record(Outcome::Completed);
                self.notify(chat_id, response.render()).await;
                ReplyOutcome::Completed
            }
            Err(e) => {
                tracing::error!(
                    chat_id,
                    correlation_id = %key.correlation_id,
                    %kind,
                    "dispatch failed: {e}"
                );
                self.record(Outcome::DispatchFailed);
                self.notify(chat_id, templates::DISPATCH_FAILED).await;
                ReplyOutcome::DispatchFailed
            }
        }
    }

    async fn prompt(&self, session: &Session, notice: Option<&str>) {
        let Some(step) = session.current_step() else {
            return;
        };
        let chat_id = &session.key().chat_id;
        if let Err(e) = execute_step(self.channel.as_ref(), chat_id, step, notice).await {
            tracing::warn!(chat_id = %chat_id, step = %step.id, "failed to send prompt: {e:#}");
        }
    }

    async fn notify(&self, chat_id: &str, text: impl Into<String>) {
        let message = OutboundMessage::notice(chat_id, text);
        if let Err(e) = self.channel.send(&message).await {
            tracing::warn!(chat_id, "failed to send notice: {e:#}");
        }
    }

    fn release(&self, key: &SessionKey) {
        self.store.remove(key);
        self.refresh_gauge();
    }

    fn record(&self, outcome: Outcome) {
        if let Some(ref metrics) = self.metrics {
            metrics.record(outcome);
        }
    }

    fn refresh_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.set_active_sessions(self.store.len());
        }
    }
}

fn abort_notice(reason: AbortReason) -> &'static str {
    match reason {
        AbortReason::TooManyAttempts => templates::TOO_MANY_ATTEMPTS,
        AbortReason::Cancelled | AbortReason::Disconnected => templates::CANCELLED,
    }
}
