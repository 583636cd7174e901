use super::types::{ChoiceOption, Step, StepKind};
use crate::channels::traits::{Button, Channel, OutboundMessage};

/// Build the outbound prompt for a step. Choice steps carry one button per
/// option; `notice` is prepended when the step is asked again after a
/// rejected answer.
pub fn render_step(chat_id: &str, step: &Step, notice: Option<&str>) -> OutboundMessage {
    let text = match notice {
        Some(notice) => crate::templates::validation_notice(notice, &step.prompt),
        None => step.prompt.clone(),
    };
    let buttons = match step.kind {
        StepKind::Choice => step.choices.iter().map(choice_to_button).collect(),
        StepKind::FreeText | StepKind::ValidatedNumber => Vec::new(),
    };
    OutboundMessage::Prompt {
        chat_id: chat_id.to_string(),
        text,
        buttons,
    }
}

/// Send a step's prompt through the channel.
pub async fn execute_step(
    channel: &dyn Channel,
    chat_id: &str,
    step: &Step,
    notice: Option<&str>,
) -> anyhow::Result<()> {
    let message = render_step(chat_id, step, notice);
    channel.send(&message).await?;
    tracing::debug!(chat_id, step = %step.id, kind = %step.kind, "prompt sent");
    Ok(())
}

fn choice_to_button(c: &ChoiceOption) -> Button {
    Button {
        label: c.label.clone(),
        token: c.token.clone(),
    }
}
