//! User-facing texts. Messages are sent with Telegram's HTML parse mode, so
//! anything the user typed goes through [`escape_html`] before it is echoed.

pub const PING: &str = "I'm okay ☺️";

pub const CHOOSE_SERVICE: &str = "Choose required service 🤔";

pub const COMPENSATION_PURPOSE: &str = "What the compensation is for 💁🏻‍♂️";
pub const COMPENSATION_AMOUNT: &str = "Amount of compensation 💰";
pub const COMPENSATION_ACCOUNT: &str = "Specify card or telephone number to refund 💸";

pub const PAYMENT_RECIPIENT: &str = "Who should be paid 🏢";
pub const PAYMENT_PURPOSE: &str = "What the payment is for 🧾";
pub const PAYMENT_AMOUNT: &str = "Amount to pay 💰";
pub const PAYMENT_ACCOUNT: &str = "Recipient card, account or telephone number 💳";

pub const INVALID_INPUT: &str = "Invalid input 🤯";
pub const ALREADY_IN_PROGRESS: &str =
    "You already have a request in progress. Finish it or send /cancel first ✋";
pub const NO_ACTIVE_SESSION: &str = "There is no request in progress. Send /appeal to start one 📝";
pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel 🤷";
pub const CANCELLED: &str = "Request cancelled ❌";
pub const TOO_MANY_ATTEMPTS: &str = "Too many invalid answers, the request was cancelled ❌";
pub const TIMED_OUT: &str = "The request timed out ⌛ Send /appeal to start again.";
pub const DISPATCH_FAILED: &str =
    "Sorry, your request could not be saved 😞 Please try again later with /appeal.";
pub const UNAVAILABLE: &str = "Sorry, something went wrong on our side 😞";

pub fn greeting(user: &str) -> String {
    format!(
        "<b>Hi, {}! 👋🏻</b>\n🤖 can help you create a <b>refund</b> or <b>payment</b> request 🤝",
        escape_html(user)
    )
}

/// Usage block built from `(command, description)` pairs.
pub fn usage<'a, I>(commands: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    commands
        .into_iter()
        .map(|(command, description)| format!("<b>/{command}</b> {description}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A rejected answer followed by the prompt asked again.
pub fn validation_notice(reason: &str, prompt: &str) -> String {
    format!("{INVALID_INPUT}\n{reason}\n\n{prompt}")
}

pub fn compensation_created(
    username: &str,
    purpose: &str,
    amount: i64,
    account: &str,
    reference: &str,
    created: &str,
) -> String {
    format!(
        "Compensation successfully saved 🎉\n<code>\nFrom: {}\nPurpose: {}\nAmount: {amount}\nReturn to: {}\nReference: {reference}\nCreated: {created}\n</code>",
        escape_html(username),
        escape_html(purpose),
        escape_html(account),
    )
}

pub fn payment_created(
    username: &str,
    recipient: &str,
    purpose: &str,
    amount: i64,
    account: &str,
    reference: &str,
    created: &str,
) -> String {
    format!(
        "Payment successfully saved 🎉\n<code>\nFrom: {}\nPay to: {}\nPurpose: {}\nAmount: {amount}\nAccount: {}\nReference: {reference}\nCreated: {created}\n</code>",
        escape_html(username),
        escape_html(recipient),
        escape_html(purpose),
        escape_html(account),
    )
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_special_chars() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn greeting_escapes_user() {
        let text = greeting("<eve>");
        assert!(text.contains("&lt;eve&gt;"));
        assert!(!text.contains("<eve>"));
    }

    #[test]
    fn usage_lists_commands_in_order() {
        let text = usage([("appeal", "New appeal"), ("help", "Usage")]);
        assert_eq!(text, "<b>/appeal</b> New appeal\n\n<b>/help</b> Usage");
    }

    #[test]
    fn compensation_text_has_all_fields() {
        let text = compensation_created(
            "alice",
            "conference travel",
            250,
            "1234-5678",
            "ref-1",
            "2026-10-17 09:30 UTC",
        );
        for needle in ["alice", "conference travel", "250", "1234-5678", "ref-1", "2026-10-17"] {
            assert!(text.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn validation_notice_repeats_prompt() {
        let text = validation_notice("expected a whole number", COMPENSATION_AMOUNT);
        assert!(text.starts_with(INVALID_INPUT));
        assert!(text.ends_with(COMPENSATION_AMOUNT));
    }
}
