use axum::Json;
use axum::response::{IntoResponse, Response};
use chatgate_protocol::openai::ErrorEnvelope;
use chatgate_provider_core::ProviderError;
use http::StatusCode;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Provider(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            GatewayError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let kind = if self.status().is_client_error() {
            "invalid_request_error"
        } else {
            "api_error"
        };
        let code = match self {
            GatewayError::BadRequest(_) => None,
            GatewayError::Provider(err) => Some(err.code().to_string()),
        };
        ErrorEnvelope::new(self.to_string(), kind, code)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(self.envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_side_failures_are_400() {
        let err = GatewayError::from(ProviderError::NoProviderForModel("x".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let envelope = err.envelope();
        assert_eq!(envelope.error.kind, "invalid_request_error");
        assert_eq!(envelope.error.code.as_deref(), Some("model_not_found"));
        assert_eq!(
            GatewayError::BadRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_failures_are_500() {
        let err = GatewayError::from(ProviderError::UpstreamRejected {
            status: 502,
            body: "bad gateway".into(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.envelope().error.kind, "api_error");
    }
}
