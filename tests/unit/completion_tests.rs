//! Unit tests for the completion enforcer state machine.

use agent_conductor::completion::{CompletionEnforcer, CompletionStatus, ExitAction, StepAction};
use agent_conductor::models::todo::{TodoItem, TodoPriority, TodoStatus};
use serde_json::json;

fn todo(id: &str, status: TodoStatus) -> TodoItem {
    TodoItem {
        id: id.into(),
        content: format!("item {id}"),
        status,
        priority: TodoPriority::Medium,
    }
}

#[test]
fn conversational_answer_completes_on_stop() {
    let mut enforcer = CompletionEnforcer::new(3);
    assert_eq!(enforcer.handle_step_finish(Some("stop")), StepAction::Complete);
}

#[test]
fn non_natural_reasons_never_complete() {
    let mut enforcer = CompletionEnforcer::new(3);
    assert_eq!(enforcer.handle_step_finish(Some("tool-calls")), StepAction::Continue);
    assert_eq!(enforcer.handle_step_finish(None), StepAction::Continue);
    assert!(!enforcer.is_continuation_pending());
}

#[test]
fn end_turn_variants_are_natural() {
    for reason in ["end_turn", "end-turn"] {
        let mut enforcer = CompletionEnforcer::new(3);
        assert_eq!(enforcer.handle_step_finish(Some(reason)), StepAction::Complete);
    }
}

#[test]
fn tool_use_without_completion_requests_continuation() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();

    assert_eq!(enforcer.handle_step_finish(Some("stop")), StepAction::Continue);
    assert!(enforcer.is_continuation_pending());

    match enforcer.handle_process_exit(0) {
        ExitAction::StartContinuation { prompt, attempt } => {
            assert_eq!(attempt, 1);
            assert!(prompt.contains("complete_task"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(enforcer.continuation_attempts(), 1);
}

#[test]
fn complete_task_success_with_closed_todos_completes() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    enforcer.update_todos(vec![
        todo("1", TodoStatus::Completed),
        todo("2", TodoStatus::Cancelled),
    ]);
    enforcer.handle_complete_task_detection(&json!({"status": "success", "summary": "done"}));

    assert_eq!(enforcer.handle_step_finish(Some("stop")), StepAction::Complete);
    let signal = enforcer.completion_signal().expect("signal");
    assert_eq!(signal.status, CompletionStatus::Success);
    assert_eq!(signal.summary.as_deref(), Some("done"));
}

#[test]
fn open_todos_block_completion_and_are_named_in_prompt() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    enforcer.update_todos(vec![
        todo("1", TodoStatus::Completed),
        todo("2", TodoStatus::InProgress),
        todo("3", TodoStatus::Pending),
    ]);
    enforcer.handle_complete_task_detection(&json!({"status": "success"}));

    assert_eq!(enforcer.open_todos().len(), 2);
    match enforcer.handle_process_exit(0) {
        ExitAction::StartContinuation { prompt, .. } => {
            assert!(prompt.contains("item 2"));
            assert!(prompt.contains("item 3"));
            assert!(!prompt.contains("item 1"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn blocked_status_completes_when_no_todo_is_open() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    enforcer.update_todos(vec![
        todo("1", TodoStatus::Completed),
        todo("2", TodoStatus::Cancelled),
    ]);
    enforcer.handle_complete_task_detection(&json!({"status": "blocked"}));
    assert_eq!(enforcer.handle_process_exit(0), ExitAction::Complete);
}

#[test]
fn blocked_status_with_open_todos_still_continues() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    enforcer.update_todos(vec![todo("1", TodoStatus::Pending)]);
    enforcer.handle_complete_task_detection(&json!({"status": "blocked"}));
    match enforcer.handle_process_exit(0) {
        ExitAction::StartContinuation { prompt, attempt } => {
            assert_eq!(attempt, 1);
            assert!(prompt.contains("item 1"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn partial_status_prompt_mentions_remaining_work() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    enforcer.handle_complete_task_detection(
        &json!({"status": "partial", "remaining_work": "write the tests"}),
    );
    match enforcer.handle_process_exit(0) {
        ExitAction::StartContinuation { prompt, .. } => {
            assert!(prompt.contains("write the tests"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unreadable_completion_input_counts_as_success() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    enforcer.handle_complete_task_detection(&json!("done"));
    assert_eq!(enforcer.handle_process_exit(0), ExitAction::Complete);
}

#[test]
fn budget_is_exhausted_after_max_attempts() {
    let mut enforcer = CompletionEnforcer::new(2);
    enforcer.mark_tools_used();

    for expected in 1..=2 {
        match enforcer.handle_process_exit(0) {
            ExitAction::StartContinuation { attempt, .. } => assert_eq!(attempt, expected),
            other => panic!("unexpected {other:?}"),
        }
    }
    match enforcer.handle_process_exit(0) {
        ExitAction::Exhausted { message } => {
            assert_eq!(
                message,
                "agent stopped without completing the task after 2 continuation attempts"
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!enforcer.is_continuation_pending());
}

#[test]
fn completion_during_continuation_resolves_exit() {
    let mut enforcer = CompletionEnforcer::new(3);
    enforcer.mark_tools_used();
    assert!(matches!(
        enforcer.handle_process_exit(0),
        ExitAction::StartContinuation { .. }
    ));

    enforcer.handle_complete_task_detection(&json!({"status": "success"}));
    assert_eq!(enforcer.handle_process_exit(0), ExitAction::Complete);
}

#[test]
fn reset_clears_all_evidence() {
    let mut enforcer = CompletionEnforcer::new(1);
    enforcer.mark_tools_used();
    enforcer.update_todos(vec![todo("1", TodoStatus::Pending)]);
    let _ = enforcer.handle_process_exit(0);

    enforcer.reset();

    assert!(!enforcer.tools_used());
    assert!(enforcer.todos().is_empty());
    assert!(enforcer.completion_signal().is_none());
    assert_eq!(enforcer.continuation_attempts(), 0);
    assert_eq!(enforcer.handle_step_finish(Some("stop")), StepAction::Complete);
}
