use crate::credential::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no provider serves model `{0}`")]
    NoProviderForModel(String),
    #[error("no credentials stored for provider `{provider}`")]
    NoCredentials { provider: String },
    #[error("credentials for provider `{provider}` are malformed: {message}")]
    InvalidCredentials { provider: String, message: String },
    #[error("proof-of-work not solved within {iterations} iterations")]
    PowTimeout { iterations: u64 },
    #[error("unsupported proof-of-work algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("upstream rejected request with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },
    #[error("upstream business error {code}: {detail}")]
    UpstreamBusinessError { code: String, detail: String },
    #[error("upstream returned an empty response")]
    EmptyUpstreamResponse,
    #[error("credential capture timed out")]
    CaptureTimeout,
    #[error("credential capture aborted: browser page closed")]
    CaptureAborted,
    #[error("a credential capture for `{provider}` is already running")]
    CaptureInProgress { provider: String },
    #[error("browser error: {0}")]
    Browser(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProviderError {
    /// HTTP status classes that mean the session or credential went stale.
    pub fn is_auth_status(status: u16) -> bool {
        matches!(status, 401 | 403 | 410)
    }

    pub fn is_auth_class(&self) -> bool {
        match self {
            ProviderError::UpstreamRejected { status, .. } => Self::is_auth_status(*status),
            _ => false,
        }
    }

    /// Failures caused by the caller rather than by the upstream or the gateway.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProviderError::NoProviderForModel(_)
                | ProviderError::NoCredentials { .. }
                | ProviderError::InvalidCredentials { .. }
                | ProviderError::CaptureInProgress { .. }
        )
    }

    /// Short machine-readable code used in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::NoProviderForModel(_) => "model_not_found",
            ProviderError::NoCredentials { .. } => "no_credentials",
            ProviderError::InvalidCredentials { .. } => "invalid_credentials",
            ProviderError::PowTimeout { .. } => "pow_timeout",
            ProviderError::UnsupportedAlgorithm(_) => "unsupported_pow_algorithm",
            ProviderError::UpstreamRejected { .. } => "upstream_rejected",
            ProviderError::UpstreamBusinessError { .. } => "upstream_business_error",
            ProviderError::EmptyUpstreamResponse => "empty_upstream_response",
            ProviderError::CaptureTimeout => "capture_timeout",
            ProviderError::CaptureAborted => "capture_aborted",
            ProviderError::CaptureInProgress { .. } => "capture_in_progress",
            ProviderError::Browser(_) => "browser_error",
            ProviderError::Network(_) => "network_error",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_class_covers_stale_session_statuses() {
        for status in [401, 403, 410] {
            let err = ProviderError::UpstreamRejected {
                status,
                body: String::new(),
            };
            assert!(err.is_auth_class(), "status {status}");
        }
        let err = ProviderError::UpstreamRejected {
            status: 500,
            body: String::new(),
        };
        assert!(!err.is_auth_class());
        assert!(!ProviderError::EmptyUpstreamResponse.is_auth_class());
    }

    #[test]
    fn client_errors_are_caller_side() {
        assert!(ProviderError::NoProviderForModel("x".into()).is_client_error());
        assert!(
            ProviderError::NoCredentials {
                provider: "deepseek".into()
            }
            .is_client_error()
        );
        assert!(!ProviderError::Network("reset".into()).is_client_error());
    }
}
