//! Pure, deterministic logic: no process spawning, no filesystem access.

pub mod command_line;
pub mod ledger;
pub mod naming;
pub mod render;
pub mod types;
