use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde_json::Value;

use crate::browser::{BrowserPage, CaptureOutcome, StatusCallback};
use crate::credential::{CredentialRecord, ExpiryStatus};
use crate::error::ProviderError;
use crate::session::SessionMap;
use crate::translate::{StreamTranslator, TranslateOptions};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: String,
    /// Canonical model this id forwards to.
    pub alias_of: Option<String>,
}

impl ModelInfo {
    pub fn new(id: &str, owned_by: &str) -> Self {
        Self {
            id: id.to_string(),
            owned_by: owned_by.to_string(),
            alias_of: None,
        }
    }

    pub fn alias(id: &str, owned_by: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            owned_by: owned_by.to_string(),
            alias_of: Some(target.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPolicy {
    /// One vendor conversation reused per client session key.
    Cached,
    /// A new vendor conversation for every request.
    PerRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInput {
    /// Canonical model id (aliases already mapped).
    pub model: String,
    pub prompt: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn models(&self) -> Vec<ModelInfo>;

    fn matches_model(&self, model: &str) -> bool;

    fn map_model(&self, model: &str) -> String {
        self.models()
            .into_iter()
            .find(|info| info.id == model)
            .and_then(|info| info.alias_of)
            .unwrap_or_else(|| model.to_string())
    }

    fn session_policy(&self) -> SessionPolicy {
        SessionPolicy::Cached
    }

    fn sessions(&self) -> &SessionMap;

    /// Whether `err` means the session or credential went stale and a fresh
    /// session is worth one retry.
    fn is_session_failure(&self, err: &ProviderError) -> bool {
        err.is_auth_class()
    }

    async fn create_session(&self) -> Result<String, ProviderError>;

    async fn chat(&self, session_id: &str, input: &ChatInput) -> Result<ByteStream, ProviderError>;

    fn translator(&self, options: TranslateOptions) -> Box<dyn StreamTranslator>;

    async fn credential_record(&self) -> Result<Option<CredentialRecord>, ProviderError>;

    /// Credential overview safe to show to an operator (secrets shortened).
    async fn credential_summary(&self) -> Result<Option<Value>, ProviderError>;

    async fn save_credentials(&self, record: CredentialRecord) -> Result<(), ProviderError>;

    /// Deletes the stored credential and every cached session.
    async fn clear_credentials(&self) -> Result<bool, ProviderError>;

    async fn check_expiry(&self) -> Result<ExpiryStatus, ProviderError>;

    async fn capture_credentials(
        &self,
        page: Box<dyn BrowserPage>,
        status: Option<StatusCallback>,
    ) -> Result<CaptureOutcome, ProviderError>;

    fn reset_sessions(&self) {
        self.sessions().clear();
    }
}

/// Shortens a secret for display: first and last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_edges_of_long_secrets() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd…mnop");
        assert_eq!(mask_secret("short"), "*****");
    }
}
