use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatgate_core::{GatewayError, GatewayState};
use chatgate_provider_core::{CredentialRecord, Provider};
use serde_json::{Value, json};
use tracing::info;

#[derive(Clone)]
struct AdminState {
    gateway: Arc<GatewayState>,
    admin_key: Option<Arc<str>>,
}

pub(crate) fn admin_router(gateway: Arc<GatewayState>, admin_key: Option<String>) -> Router {
    let state = AdminState {
        gateway,
        admin_key: admin_key.map(Arc::from),
    };

    Router::new()
        .route("/admin/providers", get(list_providers))
        .route(
            "/admin/providers/{id}/credentials",
            get(get_credentials)
                .put(put_credentials)
                .delete(delete_credentials),
        )
        .route("/admin/providers/{id}/expiry", get(get_expiry))
        .route("/admin/sessions/reset", post(reset_sessions))
        .route("/admin/stats", get(stats))
        .with_state(state)
}

async fn list_providers(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let mut providers = Vec::new();
    for provider in state.gateway.registry.providers() {
        let credentials = match provider.credential_summary().await {
            Ok(summary) => summary,
            Err(err) => return GatewayError::from(err).into_response(),
        };
        let models: Vec<String> = provider.models().into_iter().map(|model| model.id).collect();
        providers.push(json!({
            "id": provider.id(),
            "name": provider.name(),
            "models": models,
            "credentials": credentials,
        }));
    }
    Json(json!({ "providers": providers })).into_response()
}

async fn get_credentials(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let provider = match find_provider(&state, &id) {
        Ok(provider) => provider,
        Err(resp) => return resp,
    };

    match provider.credential_summary().await {
        Ok(Some(summary)) => Json(summary).into_response(),
        Ok(None) => Json(json!({ "has_credentials": false })).into_response(),
        Err(err) => GatewayError::from(err).into_response(),
    }
}

async fn put_credentials(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let provider = match find_provider(&state, &id) {
        Ok(provider) => provider,
        Err(resp) => return resp,
    };

    let record = match CredentialRecord::from_manual(body) {
        Ok(record) => record,
        Err(message) => return GatewayError::BadRequest(message).into_response(),
    };
    if let Err(err) = provider.save_credentials(record).await {
        return GatewayError::from(err).into_response();
    }
    info!(provider = %provider.id(), "credentials saved manually");

    match provider.credential_summary().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => GatewayError::from(err).into_response(),
    }
}

async fn delete_credentials(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let provider = match find_provider(&state, &id) {
        Ok(provider) => provider,
        Err(resp) => return resp,
    };

    match provider.clear_credentials().await {
        Ok(cleared) => {
            info!(provider = %provider.id(), cleared, "credentials cleared");
            Json(json!({ "cleared": cleared })).into_response()
        }
        Err(err) => GatewayError::from(err).into_response(),
    }
}

async fn get_expiry(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let provider = match find_provider(&state, &id) {
        Ok(provider) => provider,
        Err(resp) => return resp,
    };

    match provider.check_expiry().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => GatewayError::from(err).into_response(),
    }
}

async fn reset_sessions(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    state.gateway.registry.reset_sessions();
    info!("sessions reset");
    Json(json!({ "status": "ok" })).into_response()
}

async fn stats(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    Json(state.gateway.stats.snapshot()).into_response()
}

#[allow(clippy::result_large_err)]
fn find_provider(state: &AdminState, id: &str) -> Result<Arc<dyn Provider>, Response> {
    state.gateway.registry.get(id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "message": format!("unknown provider `{id}`"), "type": "not_found" } })),
        )
            .into_response()
    })
}

#[allow(clippy::result_large_err)]
fn require_admin(state: &AdminState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(admin_key) = state.admin_key.as_deref() else {
        return Ok(());
    };
    if is_admin(headers, admin_key) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized").into_response())
    }
}

fn is_admin(headers: &HeaderMap, admin_key: &str) -> bool {
    if let Some(value) = header_value(headers, "x-admin-key") {
        return value == admin_key;
    }

    let Some(auth) = header_value(headers, "authorization") else {
        return false;
    };
    let auth = auth.trim();
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .is_some_and(|token| token.trim() == admin_key)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
