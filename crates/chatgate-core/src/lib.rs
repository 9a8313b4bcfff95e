mod chat;
mod core;
mod error;
mod handler;
mod stats;

pub use crate::core::{Gateway, GatewayState};
pub use error::GatewayError;
pub use stats::{StatsSnapshot, UsageStats, estimate_completion_tokens, estimate_prompt_tokens};
