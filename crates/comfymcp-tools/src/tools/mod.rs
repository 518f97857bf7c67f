//! Builtin tool implementations, grouped by concern.

pub mod assets;
pub mod batch;
pub mod configuration;
pub mod credentials;
pub mod jobs;
pub mod models;
pub mod publish;
pub mod variations;
pub mod webhooks;
pub mod workflow;
