//! Identifier generation for tasks, messages and permission requests.

use chrono::Utc;
use uuid::Uuid;

fn generate(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// New task identifier, `task_<millis>_<hex>`.
#[must_use]
pub fn task_id() -> String {
    generate("task")
}

/// New transcript message identifier.
#[must_use]
pub fn message_id() -> String {
    generate("msg")
}

/// New permission request identifier.
#[must_use]
pub fn request_id() -> String {
    generate("req")
}
