use crate::crm::RequestKind;
use std::fmt;

use super::validate::{self, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Choice,
    FreeText,
    ValidatedNumber,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choice => write!(f, "choice"),
            Self::FreeText => write!(f, "free_text"),
            Self::ValidatedNumber => write!(f, "validated_number"),
        }
    }
}

/// One selectable option of a choice step. `token` travels as the button's
/// callback payload; `label` is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    pub label: String,
    pub token: String,
}

impl ChoiceOption {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// A validated field value collected from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
    Choice(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Self::Text(_) => StepKind::FreeText,
            Self::Number(_) => StepKind::ValidatedNumber,
            Self::Choice(_) => StepKind::Choice,
        }
    }
}

/// Declarative description of one conversational turn.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub prompt: String,
    pub kind: StepKind,
    pub choices: Vec<ChoiceOption>,
}

impl Step {
    pub fn choice(id: &str, prompt: &str, choices: Vec<ChoiceOption>) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            kind: StepKind::Choice,
            choices,
        }
    }

    pub fn free_text(id: &str, prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            kind: StepKind::FreeText,
            choices: Vec::new(),
        }
    }

    pub fn number(id: &str, prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            kind: StepKind::ValidatedNumber,
            choices: Vec::new(),
        }
    }

    /// Run the validator that belongs to this step's kind.
    pub fn validate(&self, raw: &str) -> Result<FieldValue, ValidationError> {
        match self.kind {
            StepKind::Choice => {
                validate::validate_choice(&self.id, raw, &self.choices).map(FieldValue::Choice)
            }
            StepKind::FreeText => {
                validate::validate_free_text(&self.id, raw).map(FieldValue::Text)
            }
            StepKind::ValidatedNumber => {
                validate::validate_amount(&self.id, raw).map(FieldValue::Number)
            }
        }
    }
}

/// An ordered step sequence selected by one choice of the flow's selector.
#[derive(Debug, Clone)]
pub struct Branch {
    /// Token of the selector choice that leads here.
    pub token: String,
    pub request: RequestKind,
    pub steps: Vec<Step>,
}

/// A complete guided conversation started by one command.
///
/// With a `selector`, the session starts in `awaiting_branch` and the chosen
/// token picks one of `branches`. Without one, the flow must have exactly one
/// branch and the session starts collecting its fields right away.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    pub name: String,
    pub command: String,
    pub selector: Option<Step>,
    pub branches: Vec<Branch>,
}

impl FlowDefinition {
    pub fn branch(&self, token: &str) -> Option<(usize, &Branch)> {
        self.branches
            .iter()
            .enumerate()
            .find(|(_, b)| b.token == token)
    }
}
