use super::types::{FieldValue, FlowDefinition, Step};
use super::validate::{ValidationError, ValidationErrorKind};
use crate::crm::{AssembleError, FinalizedRequest};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Identifies one in-flight conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat_id: String,
    pub correlation_id: Uuid,
}

impl SessionKey {
    pub fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            correlation_id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.correlation_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingBranch,
    AwaitingInput,
    Completed,
    Aborted,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::TimedOut)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingBranch => write!(f, "awaiting_branch"),
            Self::AwaitingInput => write!(f, "awaiting_input"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    Disconnected,
    TooManyAttempts,
}

/// What one inbound event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Value stored, next step is due.
    Advanced,
    /// Branch picked; the first step of the branch is due.
    BranchSelected(String),
    /// Input rejected; the same step is due again.
    Rejected(ValidationError),
    Completed,
    Aborted(AbortReason),
    TimedOut,
    /// The session was already terminal; nothing happened.
    Ignored,
}

/// One user reply as it arrived from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    /// Typed text.
    Text(&'a str),
    /// Token carried by a pressed button.
    Selection(&'a str),
}

impl<'a> Reply<'a> {
    pub fn raw(&self) -> &'a str {
        match self {
            Self::Text(raw) | Self::Selection(raw) => raw,
        }
    }
}

/// Retry limits applied while a session is running.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub step_timeout: Duration,
    /// Invalid selections tolerated at the branch step before aborting.
    pub max_branch_attempts: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(300),
            max_branch_attempts: 3,
        }
    }
}

/// A guided conversation for one chat.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    username: String,
    flow: Arc<FlowDefinition>,
    branch: Option<usize>,
    cursor: usize,
    collected: BTreeMap<String, FieldValue>,
    state: SessionState,
    deadline: Instant,
    branch_attempts: u32,
    policy: SessionPolicy,
}

impl Session {
    pub fn new(
        key: SessionKey,
        username: &str,
        flow: Arc<FlowDefinition>,
        policy: SessionPolicy,
        now: Instant,
    ) -> Self {
        let (state, branch) = if flow.selector.is_some() {
            (SessionState::AwaitingBranch, None)
        } else {
            (SessionState::AwaitingInput, Some(0))
        };
        Self {
            key,
            username: username.to_string(),
            flow,
            branch,
            cursor: 0,
            collected: BTreeMap::new(),
            state,
            deadline: now + policy.step_timeout,
            branch_attempts: 0,
            policy,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn collected(&self) -> &BTreeMap<String, FieldValue> {
        &self.collected
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Steps of the selected branch. Empty while the branch is not chosen yet.
    pub fn flow_steps(&self) -> &[Step] {
        self.branch
            .and_then(|i| self.flow.branches.get(i))
            .map(|b| b.steps.as_slice())
            .unwrap_or(&[])
    }

    /// The step the user is expected to answer, if any.
    pub fn current_step(&self) -> Option<&Step> {
        match self.state {
            SessionState::AwaitingBranch => self.flow.selector.as_ref(),
            SessionState::AwaitingInput => self.flow_steps().get(self.cursor),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_terminal() && now >= self.deadline
    }

    /// Move to `timed_out` when the deadline has passed.
    pub fn expire_if_due(&mut self, now: Instant) -> bool {
        if self.is_expired(now) {
            self.state = SessionState::TimedOut;
            true
        } else {
            false
        }
    }

    /// Explicit cancellation or disconnect.
    pub fn abort(&mut self, reason: AbortReason) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }
        self.state = SessionState::Aborted;
        Transition::Aborted(reason)
    }

    /// Feed one reply through the current step.
    ///
    /// The branch step takes a pressed button or a typed label. Input steps
    /// take typed text only; a button press there (a stale or double-tapped
    /// keyboard) is rejected and nothing is stored.
    pub fn apply(&mut self, reply: Reply<'_>, now: Instant) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }
        if self.expire_if_due(now) {
            return Transition::TimedOut;
        }

        match self.state {
            SessionState::AwaitingBranch => self.apply_branch(reply.raw(), now),
            SessionState::AwaitingInput => match reply {
                Reply::Text(raw) => self.apply_input(raw, now),
                Reply::Selection(_) => match self.current_step() {
                    Some(step) => Transition::Rejected(ValidationError::new(
                        &step.id,
                        ValidationErrorKind::UnexpectedSelection,
                    )),
                    None => Transition::Ignored,
                },
            },
            _ => Transition::Ignored,
        }
    }

    fn apply_branch(&mut self, raw: &str, now: Instant) -> Transition {
        let flow = Arc::clone(&self.flow);
        let Some(selector) = flow.selector.as_ref() else {
            return Transition::Ignored;
        };
        let selected = selector.validate(raw).and_then(|value| {
            let token = match value {
                FieldValue::Choice(token) => token,
                _ => String::new(),
            };
            flow.branch(&token)
                .map(|(index, _)| (index, token))
                .ok_or_else(|| ValidationError::new(&selector.id, ValidationErrorKind::UnknownChoice))
        });

        match selected {
            Ok((index, token)) => {
                self.branch = Some(index);
                self.cursor = 0;
                self.state = SessionState::AwaitingInput;
                self.deadline = now + self.policy.step_timeout;
                Transition::BranchSelected(token)
            }
            Err(e) => {
                self.branch_attempts += 1;
                if self.branch_attempts > self.policy.max_branch_attempts {
                    self.state = SessionState::Aborted;
                    return Transition::Aborted(AbortReason::TooManyAttempts);
                }
                Transition::Rejected(e)
            }
        }
    }

    fn apply_input(&mut self, raw: &str, now: Instant) -> Transition {
        let flow = Arc::clone(&self.flow);
        let Some(steps) = self.branch.and_then(|i| flow.branches.get(i)).map(|b| &b.steps) else {
            return Transition::Ignored;
        };
        let Some(step) = steps.get(self.cursor) else {
            return Transition::Ignored;
        };
        match step.validate(raw) {
            Ok(value) => {
                self.collected.insert(step.id.clone(), value);
                self.cursor += 1;
                if self.cursor == steps.len() {
                    self.state = SessionState::Completed;
                    Transition::Completed
                } else {
                    self.deadline = now + self.policy.step_timeout;
                    Transition::Advanced
                }
            }
            Err(e) => Transition::Rejected(e),
        }
    }

    /// Assemble the finalized request of a completed session.
    pub fn finalize(&self) -> Result<FinalizedRequest, AssembleError> {
        let branch = self
            .branch
            .and_then(|i| self.flow.branches.get(i))
            .filter(|_| self.state == SessionState::Completed)
            .ok_or(AssembleError::MissingField("branch"))?;
        FinalizedRequest::assemble(branch.request, &self.username, &self.collected)
    }
}
