//! Business side of the bot: the finalized requests a conversation produces
//! and the dispatcher that records them for the accounting office.

use crate::flows::types::{FieldValue, StepKind};
use crate::templates;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Compensation,
    Payment,
}

impl RequestKind {
    /// Fields a branch must collect to assemble this request, with their kinds.
    pub fn required_fields(&self) -> &'static [(&'static str, StepKind)] {
        match self {
            Self::Compensation => &[
                ("purpose", StepKind::FreeText),
                ("amount", StepKind::ValidatedNumber),
                ("account", StepKind::FreeText),
            ],
            Self::Payment => &[
                ("recipient", StepKind::FreeText),
                ("purpose", StepKind::FreeText),
                ("amount", StepKind::ValidatedNumber),
                ("account", StepKind::FreeText),
            ],
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compensation => write!(f, "compensation"),
            Self::Payment => write!(f, "payment"),
        }
    }
}

/// An employee asking to be refunded for money they already spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationRequest {
    pub username: String,
    pub purpose: String,
    pub amount: i64,
    pub account: String,
}

/// An employee asking the office to pay a third party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub username: String,
    pub recipient: String,
    pub purpose: String,
    pub amount: i64,
    pub account: String,
}

/// Immutable result of a completed conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizedRequest {
    Compensation(CompensationRequest),
    Payment(PaymentRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),
}

impl FinalizedRequest {
    /// Build the request for `kind` from the values a session collected.
    pub fn assemble(
        kind: RequestKind,
        username: &str,
        collected: &BTreeMap<String, FieldValue>,
    ) -> Result<Self, AssembleError> {
        let text = |field: &'static str| -> Result<String, AssembleError> {
            collected
                .get(field)
                .ok_or(AssembleError::MissingField(field))?
                .as_text()
                .map(str::to_string)
                .ok_or(AssembleError::WrongType(field))
        };
        let number = |field: &'static str| -> Result<i64, AssembleError> {
            collected
                .get(field)
                .ok_or(AssembleError::MissingField(field))?
                .as_number()
                .ok_or(AssembleError::WrongType(field))
        };

        Ok(match kind {
            RequestKind::Compensation => Self::Compensation(CompensationRequest {
                username: username.to_string(),
                purpose: text("purpose")?,
                amount: number("amount")?,
                account: text("account")?,
            }),
            RequestKind::Payment => Self::Payment(PaymentRequest {
                username: username.to_string(),
                recipient: text("recipient")?,
                purpose: text("purpose")?,
                amount: number("amount")?,
                account: text("account")?,
            }),
        })
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Compensation(_) => RequestKind::Compensation,
            Self::Payment(_) => RequestKind::Payment,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Compensation(r) => &r.username,
            Self::Payment(r) => &r.username,
        }
    }
}

/// What the dispatcher recorded, echoed back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub reference: Uuid,
    pub created_at: DateTime<Utc>,
    pub request: FinalizedRequest,
}

impl DispatchResponse {
    /// User-facing confirmation text.
    pub fn render(&self) -> String {
        let created = self.created_at.format("%Y-%m-%d %H:%M UTC").to_string();
        match &self.request {
            FinalizedRequest::Compensation(r) => templates::compensation_created(
                &r.username,
                &r.purpose,
                r.amount,
                &r.account,
                &self.reference.to_string(),
                &created,
            ),
            FinalizedRequest::Payment(r) => templates::payment_created(
                &r.username,
                &r.recipient,
                &r.purpose,
                r.amount,
                &r.account,
                &self.reference.to_string(),
                &created,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("back office unavailable: {0}")]
    Unavailable(String),
}

/// Business collaborator that acts on a finalized request.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn submit(&self, request: FinalizedRequest) -> Result<DispatchResponse, DispatchError>;
}

/// Accounting office dispatcher. Accepts every structurally valid request,
/// stamps it with a reference and echoes it back.
#[derive(Debug, Default)]
pub struct Crm;

impl Crm {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dispatcher for Crm {
    async fn submit(&self, request: FinalizedRequest) -> Result<DispatchResponse, DispatchError> {
        let response = DispatchResponse {
            reference: Uuid::new_v4(),
            created_at: Utc::now(),
            request,
        };
        tracing::info!(
            reference = %response.reference,
            kind = %response.request.kind(),
            username = response.request.username(),
            "new {} recorded",
            response.request.kind()
        );
        Ok(response)
    }
}
