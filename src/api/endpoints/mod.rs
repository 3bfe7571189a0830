//! API endpoint handlers.

pub mod ai;
pub mod content;
pub mod health;
pub mod jobs;
