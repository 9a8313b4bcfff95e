use std::time::Instant;

use futures_util::StreamExt;
use http::HeaderValue;
use serde_json::Value;
use tracing::{info, warn};

use chatgate_provider_core::{ByteStream, ProviderError};

const MAX_ERROR_BODY: usize = 512;

pub fn network_failure(err: wreq::Error) -> ProviderError {
    ProviderError::Network(err.to_string())
}

/// Identifies an upstream call in logs.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCall<'a> {
    pub provider: &'static str,
    pub op: &'static str,
    pub method: &'static str,
    pub path: &'a str,
    pub model: Option<&'a str>,
    pub is_stream: bool,
}

pub async fn send_with_logging(
    call: UpstreamCall<'_>,
    request: wreq::RequestBuilder,
) -> Result<wreq::Response, ProviderError> {
    let started_at = Instant::now();
    info!(
        event = "upstream_request",
        provider = %call.provider,
        op = call.op,
        method = call.method,
        path = %call.path,
        model = call.model.unwrap_or_default(),
        is_stream = call.is_stream
    );
    let response = request.send().await.map_err(|err| {
        warn!(
            event = "upstream_response",
            provider = %call.provider,
            op = call.op,
            status = "error",
            elapsed_ms = started_at.elapsed().as_millis(),
            error = %err
        );
        network_failure(err)
    })?;
    info!(
        event = "upstream_response",
        provider = %call.provider,
        op = call.op,
        status = %response.status().as_u16(),
        elapsed_ms = started_at.elapsed().as_millis(),
        is_stream = call.is_stream
    );
    handle_response(response).await
}

pub async fn handle_response(response: wreq::Response) -> Result<wreq::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), body))
}

pub fn classify_status(status: u16, body: String) -> ProviderError {
    ProviderError::UpstreamRejected {
        status,
        body: truncate(body, MAX_ERROR_BODY),
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

pub async fn read_json(response: wreq::Response) -> Result<Value, ProviderError> {
    let body = response.bytes().await.map_err(network_failure)?;
    serde_json::from_slice(&body).map_err(|err| ProviderError::InvalidResponse(err.to_string()))
}

pub fn byte_stream(response: wreq::Response) -> ByteStream {
    Box::pin(response.bytes_stream().map(|item| item.map_err(network_failure)))
}

pub fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

pub fn header_value(provider: &str, value: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value).map_err(|err| ProviderError::InvalidCredentials {
        provider: provider.to_string(),
        message: err.to_string(),
    })
}
