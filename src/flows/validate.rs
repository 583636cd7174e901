use super::types::{ChoiceOption, FlowDefinition, Step, StepKind};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationErrorKind {
    #[error("expected a whole number")]
    NotANumber,
    #[error("amount must be greater than zero")]
    OutOfRange,
    #[error("the answer cannot be empty")]
    Empty,
    #[error("please pick one of the offered options")]
    UnknownChoice,
    #[error("please type the answer instead of pressing a button")]
    UnexpectedSelection,
}

/// Rejected input for one step. Surfaced to the user and logged, never stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step '{step_id}': {kind}")]
pub struct ValidationError {
    pub step_id: String,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(step_id: &str, kind: ValidationErrorKind) -> Self {
        Self {
            step_id: step_id.to_string(),
            kind,
        }
    }
}

/// Parse a whole number. Surrounding whitespace is ignored.
pub fn validate_number(step_id: &str, raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::new(step_id, ValidationErrorKind::NotANumber))
}

/// A money amount: a whole number strictly greater than zero.
pub fn validate_amount(step_id: &str, raw: &str) -> Result<i64, ValidationError> {
    let n = validate_number(step_id, raw)?;
    if n <= 0 {
        return Err(ValidationError::new(step_id, ValidationErrorKind::OutOfRange));
    }
    Ok(n)
}

/// Any non-blank text, trimmed.
pub fn validate_free_text(step_id: &str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(step_id, ValidationErrorKind::Empty));
    }
    Ok(trimmed.to_string())
}

/// Resolve a selection to the token of one declared choice.
///
/// Button presses deliver the token verbatim; a typed label is accepted too,
/// compared case-insensitively.
pub fn validate_choice(
    step_id: &str,
    raw: &str,
    choices: &[ChoiceOption],
) -> Result<String, ValidationError> {
    let wanted = raw.trim();
    choices
        .iter()
        .find(|c| c.token == wanted || c.label.eq_ignore_ascii_case(wanted))
        .map(|c| c.token.clone())
        .ok_or_else(|| ValidationError::new(step_id, ValidationErrorKind::UnknownChoice))
}

/// Structural problems that keep a flow definition from loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("flow '{flow_name}': {message}")]
pub struct FlowValidationError {
    pub flow_name: String,
    pub message: String,
}

/// Check a flow definition before it is handed to the engine.
/// Returns every problem found, not just the first.
pub fn check_flow_definition(def: &FlowDefinition) -> Result<(), Vec<FlowValidationError>> {
    let mut errors = Vec::new();
    let mut push = |message: String| {
        errors.push(FlowValidationError {
            flow_name: def.name.clone(),
            message,
        })
    };

    if def.branches.is_empty() {
        push("flow has no branches".into());
    }

    match &def.selector {
        Some(selector) => {
            if selector.kind != StepKind::Choice {
                push(format!(
                    "selector step '{}' must be a choice step, found {}",
                    selector.id, selector.kind
                ));
            }
            let choice_tokens: HashSet<&str> =
                selector.choices.iter().map(|c| c.token.as_str()).collect();
            let branch_tokens: HashSet<&str> =
                def.branches.iter().map(|b| b.token.as_str()).collect();
            for token in choice_tokens.difference(&branch_tokens) {
                push(format!("selector choice '{token}' has no branch"));
            }
            for token in branch_tokens.difference(&choice_tokens) {
                push(format!("branch '{token}' is not offered by the selector"));
            }
            for msg in step_shape_errors(selector) {
                push(msg);
            }
        }
        None => {
            if def.branches.len() > 1 {
                push(format!(
                    "flow without a selector must have exactly one branch, found {}",
                    def.branches.len()
                ));
            }
        }
    }

    for branch in &def.branches {
        if branch.steps.is_empty() {
            push(format!("branch '{}' has no steps", branch.token));
        }

        let mut seen_ids = HashSet::new();
        for step in &branch.steps {
            if !seen_ids.insert(step.id.as_str()) {
                push(format!(
                    "branch '{}': duplicate step id '{}'",
                    branch.token, step.id
                ));
            }
            for msg in step_shape_errors(step) {
                push(format!("branch '{}': {msg}", branch.token));
            }
        }

        for (field, kind) in branch.request.required_fields() {
            match branch.steps.iter().find(|s| s.id == *field) {
                None => push(format!(
                    "branch '{}': {} request needs a '{field}' step",
                    branch.token, branch.request
                )),
                Some(step) if step.kind != *kind => push(format!(
                    "branch '{}': step '{field}' must be {kind}, found {}",
                    branch.token, step.kind
                )),
                Some(_) => {}
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `choices` is non-empty iff the step is a choice step.
fn step_shape_errors(step: &Step) -> Vec<String> {
    let mut errors = Vec::new();
    if step.prompt.trim().is_empty() {
        errors.push(format!("step '{}' has an empty prompt", step.id));
    }
    match step.kind {
        StepKind::Choice => {
            if step.choices.is_empty() {
                errors.push(format!("choice step '{}' requires non-empty choices", step.id));
            }
            let mut tokens = HashSet::new();
            for c in &step.choices {
                if !tokens.insert(c.token.as_str()) {
                    errors.push(format!(
                        "choice step '{}': duplicate choice token '{}'",
                        step.id, c.token
                    ));
                }
            }
        }
        StepKind::FreeText | StepKind::ValidatedNumber => {
            if !step.choices.is_empty() {
                errors.push(format!(
                    "{} step '{}' must not declare choices",
                    step.kind, step.id
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::RequestKind;
    use crate::flows::types::Branch;

    fn choices() -> Vec<ChoiceOption> {
        vec![
            ChoiceOption::new("Compensation", "compensation"),
            ChoiceOption::new("Payment", "payment"),
        ]
    }

    #[test]
    fn number_accepts_integers() {
        assert_eq!(validate_number("amount", "250").unwrap(), 250);
        assert_eq!(validate_number("amount", "  42\n").unwrap(), 42);
        assert_eq!(validate_number("amount", "-7").unwrap(), -7);
    }

    #[test]
    fn number_rejects_non_numeric() {
        for raw in ["abc", "", "12.5", "1 000", "250rub"] {
            let err = validate_number("amount", raw).unwrap_err();
            assert_eq!(err.kind, ValidationErrorKind::NotANumber, "input {raw:?}");
            assert_eq!(err.step_id, "amount");
        }
    }

    #[test]
    fn amount_rejects_zero_and_negative() {
        assert_eq!(
            validate_amount("amount", "0").unwrap_err().kind,
            ValidationErrorKind::OutOfRange
        );
        assert_eq!(
            validate_amount("amount", "-10").unwrap_err().kind,
            ValidationErrorKind::OutOfRange
        );
        assert_eq!(
            validate_amount("amount", "x").unwrap_err().kind,
            ValidationErrorKind::NotANumber
        );
        assert_eq!(validate_amount("amount", "1").unwrap(), 1);
    }

    #[test]
    fn free_text_trims_and_rejects_blank() {
        assert_eq!(
            validate_free_text("purpose", "  conference travel ").unwrap(),
            "conference travel"
        );
        for raw in ["", "   ", "\n\t"] {
            assert_eq!(
                validate_free_text("purpose", raw).unwrap_err().kind,
                ValidationErrorKind::Empty
            );
        }
    }

    #[test]
    fn choice_matches_token_or_label() {
        assert_eq!(
            validate_choice("service", "payment", &choices()).unwrap(),
            "payment"
        );
        assert_eq!(
            validate_choice("service", "COMPENSATION", &choices()).unwrap(),
            "compensation"
        );
        assert_eq!(
            validate_choice("service", "refund", &choices()).unwrap_err().kind,
            ValidationErrorKind::UnknownChoice
        );
        assert_eq!(
            validate_choice("service", "", &choices()).unwrap_err().kind,
            ValidationErrorKind::UnknownChoice
        );
    }

    #[test]
    fn validation_error_message_names_step() {
        let err = ValidationError::new("amount", ValidationErrorKind::NotANumber);
        assert_eq!(err.to_string(), "step 'amount': expected a whole number");
    }

    fn compensation_branch() -> Branch {
        Branch {
            token: "compensation".into(),
            request: RequestKind::Compensation,
            steps: vec![
                Step::free_text("purpose", "What for?"),
                Step::number("amount", "How much?"),
                Step::free_text("account", "Where to?"),
            ],
        }
    }

    #[test]
    fn well_formed_flow_passes() {
        let def = FlowDefinition {
            name: "appeal".into(),
            command: "appeal".into(),
            selector: Some(Step::choice(
                "service",
                "Pick",
                vec![ChoiceOption::new("Compensation", "compensation")],
            )),
            branches: vec![compensation_branch()],
        };
        assert!(check_flow_definition(&def).is_ok());
    }

    #[test]
    fn selector_without_matching_branch_errors() {
        let def = FlowDefinition {
            name: "appeal".into(),
            command: "appeal".into(),
            selector: Some(Step::choice("service", "Pick", choices())),
            branches: vec![compensation_branch()],
        };
        let errs = check_flow_definition(&def).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("'payment' has no branch")));
        assert!(errs[0].to_string().starts_with("flow 'appeal': "));
    }

    #[test]
    fn choice_step_without_choices_errors() {
        let def = FlowDefinition {
            name: "appeal".into(),
            command: "appeal".into(),
            selector: Some(Step::choice("service", "Pick", vec![])),
            branches: vec![compensation_branch()],
        };
        let errs = check_flow_definition(&def).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("requires non-empty choices")));
    }

    #[test]
    fn missing_required_field_errors() {
        let mut branch = compensation_branch();
        branch.steps.retain(|s| s.id != "amount");
        let def = FlowDefinition {
            name: "linear".into(),
            command: "linear".into(),
            selector: None,
            branches: vec![branch],
        };
        let errs = check_flow_definition(&def).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("needs a 'amount' step")));
    }

    #[test]
    fn wrong_field_kind_and_duplicate_ids_error() {
        let mut branch = compensation_branch();
        branch.steps[1] = Step::free_text("amount", "How much?");
        branch.steps.push(Step::free_text("purpose", "Again?"));
        let def = FlowDefinition {
            name: "linear".into(),
            command: "linear".into(),
            selector: None,
            branches: vec![branch],
        };
        let errs = check_flow_definition(&def).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("must be validated_number")));
        assert!(errs.iter().any(|e| e.message.contains("duplicate step id 'purpose'")));
    }
}
