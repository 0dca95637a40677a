//! HTTP handlers.

pub mod advisors;
pub mod analyze;
pub mod health;
pub mod jobs;
