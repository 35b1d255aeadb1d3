//! Continuation prompt text.

use crate::models::todo::TodoItem;

/// Prompt for a run that stopped with todos still open.
#[must_use]
pub fn incomplete_todos(open: &[&TodoItem]) -> String {
    let mut prompt = String::from(
        "You stopped before finishing the task. These items are still open:\n",
    );
    for item in open {
        prompt.push_str("- ");
        prompt.push_str(&item.content);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nContinue working on them. When everything is done, call complete_task with a summary.",
    );
    prompt
}

/// Prompt for a run that reported partial completion.
#[must_use]
pub fn partial_completion(remaining: Option<&str>) -> String {
    match remaining {
        Some(work) if !work.trim().is_empty() => format!(
            "You marked the task as partially complete. Remaining work: {work}\n\n\
             Continue until it is finished, then call complete_task with status \"success\"."
        ),
        _ => "You marked the task as partially complete. Continue until it is finished, \
              then call complete_task with status \"success\"."
            .into(),
    }
}

/// Prompt for a run that used tools but never declared completion.
#[must_use]
pub fn missing_completion() -> String {
    "You stopped without calling complete_task. If the task is finished, call complete_task \
     with a summary of what you did. Otherwise continue working on the remaining steps."
        .into()
}

/// Error text once the continuation budget is spent.
#[must_use]
pub fn exhausted(attempts: u32) -> String {
    format!(
        "agent stopped without completing the task after {attempts} continuation attempts"
    )
}
