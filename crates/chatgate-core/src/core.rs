use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use chatgate_provider_core::ProviderRegistry;

use crate::handler::{chat_completions, health, list_models};
use crate::stats::UsageStats;

/// Shared by every handler; owns the providers and running totals.
pub struct GatewayState {
    pub registry: ProviderRegistry,
    pub stats: UsageStats,
}

pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            state: Arc::new(GatewayState {
                registry,
                stats: UsageStats::default(),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/models", get(list_models))
            .route("/v1/chat/completions", post(chat_completions))
            .route("/health", get(health))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }
}
