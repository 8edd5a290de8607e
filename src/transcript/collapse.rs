use crate::types::{Content, Message, Role};

/// Collapse consecutive same-role messages and, when a budget is given, drop
/// the oldest turns that no longer fit. The result always starts with a
/// single system message (possibly empty) and always ends with the most
/// recent non-system message when one exists.
///
/// Truncation is include-then-check: walking newest to oldest, each message
/// is included before the running sum is compared against the budget, so the
/// message that crosses the budget is still kept. With `truncate_sys_prompt`
/// (the default) the system message's token count seeds the running sum.
pub fn collapse_transcript(
    messages: Vec<Message>,
    truncate_tokens: Option<usize>,
    truncate_sys_prompt: bool,
) -> Vec<Message> {
    let mut collapsed = vec![Message {
        role: Role::System,
        content: Content::Text(String::new()),
        token_count: Some(0),
    }];

    for mut message in messages {
        let count = message.ensure_token_count();
        if message.role == Role::System {
            merge_into(&mut collapsed[0], &message.content.joined_text(), count);
            continue;
        }

        let last = collapsed.last_mut().expect("accumulator is never empty");
        if last.role == message.role {
            merge_into(last, &message.content.joined_text(), count);
        } else {
            collapsed.push(message);
        }
    }

    let Some(budget) = truncate_tokens else {
        return collapsed;
    };

    let mut tail = collapsed.split_off(1);
    let system = collapsed.pop().expect("system message at position 0");

    let mut running = if truncate_sys_prompt {
        system.token_count.unwrap_or(0)
    } else {
        0
    };
    let mut kept = Vec::new();
    while let Some(message) = tail.pop() {
        running = running.saturating_add(message.token_count.unwrap_or(0));
        kept.push(message);
        if running >= budget {
            break;
        }
    }

    let mut result = Vec::with_capacity(kept.len() + 1);
    result.push(system);
    result.extend(kept.into_iter().rev());
    result
}

/// Newline-join `addition` onto an accumulated message; token counts add.
fn merge_into(message: &mut Message, addition: &str, added_tokens: usize) {
    let Content::Text(existing) = &mut message.content else {
        // Collapsing runs before dispatch-time image extraction, so
        // accumulated content is always plain text here.
        return;
    };

    if existing.is_empty() {
        existing.push_str(addition);
    } else {
        existing.push('\n');
        existing.push_str(addition);
    }
    message.token_count = Some(message.token_count.unwrap_or(0).saturating_add(added_tokens));
}
