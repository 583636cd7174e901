pub mod engine;
pub mod execute;
pub mod session;
pub mod state;
pub mod types;
pub mod validate;

use crate::crm::RequestKind;
use crate::templates;
use std::collections::HashMap;
use std::sync::Arc;
use types::{Branch, ChoiceOption, FlowDefinition, Step};

/// The "appeal" flow: pick a service, then fill in that service's fields.
pub fn appeal_flow() -> FlowDefinition {
    FlowDefinition {
        name: "appeal".into(),
        command: "appeal".into(),
        selector: Some(Step::choice(
            "service",
            templates::CHOOSE_SERVICE,
            vec![
                ChoiceOption::new("compensation", "compensation"),
                ChoiceOption::new("payment", "payment"),
            ],
        )),
        branches: vec![
            Branch {
                token: "compensation".into(),
                request: RequestKind::Compensation,
                steps: vec![
                    Step::free_text("purpose", templates::COMPENSATION_PURPOSE),
                    Step::number("amount", templates::COMPENSATION_AMOUNT),
                    Step::free_text("account", templates::COMPENSATION_ACCOUNT),
                ],
            },
            Branch {
                token: "payment".into(),
                request: RequestKind::Payment,
                steps: vec![
                    Step::free_text("recipient", templates::PAYMENT_RECIPIENT),
                    Step::free_text("purpose", templates::PAYMENT_PURPOSE),
                    Step::number("amount", templates::PAYMENT_AMOUNT),
                    Step::free_text("account", templates::PAYMENT_ACCOUNT),
                ],
            },
        ],
    }
}

/// Validate and index the built-in flows by name.
///
/// If any flow fails validation, returns an error listing every problem.
pub fn builtin_flows() -> anyhow::Result<HashMap<String, Arc<FlowDefinition>>> {
    load_flows(vec![appeal_flow()])
}

/// Validate `defs` and index them by name. Duplicate names and duplicate
/// commands are errors.
pub fn load_flows(
    defs: Vec<FlowDefinition>,
) -> anyhow::Result<HashMap<String, Arc<FlowDefinition>>> {
    let mut definitions: HashMap<String, Arc<FlowDefinition>> = HashMap::new();
    let mut all_errors = Vec::new();

    for def in defs {
        if let Err(errors) = validate::check_flow_definition(&def) {
            all_errors.extend(errors.iter().map(ToString::to_string));
            continue;
        }
        if definitions.contains_key(&def.name) {
            all_errors.push(format!("duplicate flow name '{}'", def.name));
            continue;
        }
        if definitions.values().any(|d| d.command == def.command) {
            all_errors.push(format!(
                "flow '{}': command '/{}' is already taken",
                def.name, def.command
            ));
            continue;
        }
        tracing::debug!("loaded flow '{}' (/{})", def.name, def.command);
        definitions.insert(def.name.clone(), Arc::new(def));
    }

    if !all_errors.is_empty() {
        anyhow::bail!("flow validation errors:\n  {}", all_errors.join("\n  "));
    }

    Ok(definitions)
}
