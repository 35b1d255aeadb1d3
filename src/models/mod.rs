//! Domain model module declarations.

pub mod attachment;
pub mod ids;
pub mod permission;
pub mod task;
pub mod todo;
