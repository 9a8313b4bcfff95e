mod capture;
mod stream;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use http::header::{ACCEPT, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use chatgate_capture::{CaptureConfig, CaptureLock, run_capture};
use chatgate_provider_core::{
    BrowserPage, ByteStream, CaptureOutcome, ChatInput, CredentialRecord, CredentialSlot,
    CredentialStore, ExpiryStatus, FramedTranslator, ModelInfo, Provider, ProviderError,
    SessionMap, StatusCallback, StreamTranslator, TranslateOptions, mask_secret,
};

use crate::client::shared_client;
use crate::provider::{ProviderSettings, cookie_value, token_expiry, user_agent_or_default};
use crate::upstream::{
    UpstreamCall, build_url, byte_stream, header_value, read_json, send_with_logging,
};

pub use capture::ClaudeCapture;
pub use stream::ClaudeClassifier;

pub const PROVIDER_NAME: &str = "claude";
const DISPLAY_NAME: &str = "Claude";
const DEFAULT_BASE_URL: &str = "https://claude.ai";
const OWNED_BY: &str = "claude-web";
const MODELS: [&str; 3] = ["claude-sonnet-4-6", "claude-opus-4-6", "claude-haiku-4-6"];
/// Listed aliases and the canonical model each forwards to.
const LISTED_ALIASES: [(&str, &str); 3] = [
    ("claude-3-5-sonnet", "claude-sonnet-4-6"),
    ("claude-3-opus", "claude-opus-4-6"),
    ("claude-3-haiku", "claude-haiku-4-6"),
];
/// Accepted but not advertised in the model list.
const SHORT_ALIASES: [(&str, &str); 3] = [
    ("claude-sonnet", "claude-sonnet-4-6"),
    ("claude-opus", "claude-opus-4-6"),
    ("claude-haiku", "claude-haiku-4-6"),
];
const ORGANIZATIONS_PATH: &str = "/api/organizations";

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeCredential {
    #[serde(default, alias = "sessionKey")]
    pub session_key: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default, alias = "organizationId")]
    pub organization_id: String,
}

impl ClaudeCredential {
    /// The session key, falling back to the `sessionKey` cookie.
    pub fn session_key(&self) -> Option<&str> {
        Some(self.session_key.as_str())
            .filter(|key| !key.is_empty())
            .or_else(|| cookie_value(&self.cookie, "sessionKey"))
    }

    /// Cookie header to send; a bare session key is enough.
    pub fn cookie_header(&self) -> Option<String> {
        if !self.cookie.trim().is_empty() {
            return Some(self.cookie.clone());
        }
        self.session_key().map(|key| format!("sessionKey={key}"))
    }
}

pub struct ClaudeProvider {
    base_url: String,
    proxy: Option<String>,
    credential: CredentialSlot<ClaudeCredential>,
    /// Organization discovered from the API when the credential lacks one.
    organization: ArcSwapOption<String>,
    sessions: SessionMap,
    capture_lock: CaptureLock,
    capture_config: CaptureConfig,
}

impl ClaudeProvider {
    pub fn new(store: Arc<dyn CredentialStore>, settings: ProviderSettings) -> Self {
        Self {
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            proxy: settings.proxy,
            credential: CredentialSlot::new(PROVIDER_NAME, store),
            organization: ArcSwapOption::empty(),
            sessions: SessionMap::new(),
            capture_lock: CaptureLock::new(),
            capture_config: CaptureConfig::default(),
        }
    }

    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture_config = config;
        self
    }

    fn forget_account(&self) {
        self.organization.store(None);
        self.sessions.clear();
    }

    async fn organization_id(
        &self,
        credential: &ClaudeCredential,
        user_agent: &str,
    ) -> Result<String, ProviderError> {
        if !credential.organization_id.is_empty() {
            return Ok(credential.organization_id.clone());
        }
        if let Some(organization) = self.organization.load_full() {
            return Ok(organization.as_ref().clone());
        }

        let client = shared_client(self.proxy.as_deref())?;
        let request = client
            .get(build_url(&self.base_url, ORGANIZATIONS_PATH))
            .headers(build_claude_headers(credential, user_agent)?);
        let call = UpstreamCall {
            provider: PROVIDER_NAME,
            op: "claude.organizations",
            method: "GET",
            path: ORGANIZATIONS_PATH,
            model: None,
            is_stream: false,
        };
        let body = read_json(send_with_logging(call, request).await?).await?;
        let organization = body
            .pointer("/0/uuid")
            .and_then(Value::as_str)
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no organization found".to_string()))?
            .to_string();
        debug!(provider = %PROVIDER_NAME, organization = %organization, "organization discovered");
        self.organization.store(Some(Arc::new(organization.clone())));
        Ok(organization)
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn id(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn models(&self) -> Vec<ModelInfo> {
        MODELS
            .iter()
            .map(|id| ModelInfo::new(id, OWNED_BY))
            .chain(
                LISTED_ALIASES
                    .iter()
                    .map(|(alias, target)| ModelInfo::alias(alias, OWNED_BY, target)),
            )
            .collect()
    }

    fn matches_model(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    fn map_model(&self, model: &str) -> String {
        LISTED_ALIASES
            .iter()
            .chain(SHORT_ALIASES.iter())
            .find(|(alias, _)| *alias == model)
            .map(|(_, target)| target.to_string())
            .unwrap_or_else(|| model.to_string())
    }

    fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    async fn create_session(&self) -> Result<String, ProviderError> {
        let loaded = self.credential.require().await?;
        let user_agent = loaded.record.user_agent.as_str();
        let organization = self.organization_id(&loaded.value, user_agent).await?;
        let conversation_id = Uuid::new_v4().to_string();
        let path = format!("/api/organizations/{organization}/chat_conversations");

        let client = shared_client(self.proxy.as_deref())?;
        let request = client
            .post(build_url(&self.base_url, &path))
            .headers(build_claude_headers(&loaded.value, user_agent)?)
            .json(&json!({ "uuid": conversation_id, "name": "" }));
        let call = UpstreamCall {
            provider: PROVIDER_NAME,
            op: "claude.create_conversation",
            method: "POST",
            path: &path,
            model: None,
            is_stream: false,
        };
        let body = read_json(send_with_logging(call, request).await?).await?;
        Ok(body
            .get("uuid")
            .and_then(Value::as_str)
            .filter(|uuid| !uuid.is_empty())
            .map(str::to_string)
            .unwrap_or(conversation_id))
    }

    async fn chat(&self, session_id: &str, input: &ChatInput) -> Result<ByteStream, ProviderError> {
        let loaded = self.credential.require().await?;
        let user_agent = loaded.record.user_agent.as_str();
        let organization = self.organization_id(&loaded.value, user_agent).await?;
        let path =
            format!("/api/organizations/{organization}/chat_conversations/{session_id}/completion");

        let mut headers = build_claude_headers(&loaded.value, user_agent)?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let body = json!({
            "prompt": input.prompt,
            "model": input.model,
            "timezone": "UTC",
            "attachments": [],
            "files": [],
            "rendering_mode": "messages",
        });

        let client = shared_client(self.proxy.as_deref())?;
        let request = client
            .post(build_url(&self.base_url, &path))
            .headers(headers)
            .json(&body);
        let call = UpstreamCall {
            provider: PROVIDER_NAME,
            op: "claude.chat",
            method: "POST",
            path: &path,
            model: Some(&input.model),
            is_stream: true,
        };
        let response = send_with_logging(call, request).await?;
        Ok(byte_stream(response))
    }

    fn translator(&self, options: TranslateOptions) -> Box<dyn StreamTranslator> {
        Box::new(FramedTranslator::new(ClaudeClassifier, options))
    }

    async fn credential_record(&self) -> Result<Option<CredentialRecord>, ProviderError> {
        Ok(self
            .credential
            .current()
            .await?
            .map(|loaded| loaded.record.clone()))
    }

    async fn credential_summary(&self) -> Result<Option<Value>, ProviderError> {
        let Some(loaded) = self.credential.current().await? else {
            return Ok(None);
        };
        let credential = &loaded.value;
        Ok(Some(json!({
            "has_credentials": true,
            "captured_at": loaded.record.captured_at_rfc3339(),
            "has_session_key": credential.session_key().is_some(),
            "session_key": credential.session_key().map(mask_secret),
            "has_cookie": !credential.cookie.is_empty(),
            "has_organization_id": !credential.organization_id.is_empty(),
        })))
    }

    async fn save_credentials(&self, record: CredentialRecord) -> Result<(), ProviderError> {
        self.credential.replace(record).await?;
        self.forget_account();
        Ok(())
    }

    async fn clear_credentials(&self) -> Result<bool, ProviderError> {
        self.forget_account();
        self.credential.clear().await
    }

    /// Claude session keys are opaque, so only presence is reported.
    async fn check_expiry(&self) -> Result<ExpiryStatus, ProviderError> {
        let loaded = self.credential.current().await?;
        Ok(token_expiry(
            loaded.as_ref().and_then(|loaded| loaded.value.session_key()),
        ))
    }

    async fn capture_credentials(
        &self,
        page: Box<dyn BrowserPage>,
        status: Option<StatusCallback>,
    ) -> Result<CaptureOutcome, ProviderError> {
        let _running = self.capture_lock.try_begin(PROVIDER_NAME)?;
        let outcome = run_capture(
            ClaudeCapture::default(),
            page,
            self.credential.store().as_ref(),
            status,
            self.capture_config,
        )
        .await?;
        self.credential.adopt(outcome.record.clone())?;
        self.forget_account();
        Ok(outcome)
    }
}

fn build_claude_headers(
    credential: &ClaudeCredential,
    user_agent: &str,
) -> Result<HeaderMap, ProviderError> {
    let cookie = credential
        .cookie_header()
        .ok_or_else(|| ProviderError::InvalidCredentials {
            provider: PROVIDER_NAME.to_string(),
            message: "missing sessionKey".to_string(),
        })?;
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, header_value(PROVIDER_NAME, &cookie)?);
    headers.insert(
        USER_AGENT,
        header_value(PROVIDER_NAME, user_agent_or_default(user_agent))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://claude.ai"));
    headers.insert(REFERER, HeaderValue::from_static("https://claude.ai/new"));
    headers.insert(
        "anthropic-client-platform",
        HeaderValue::from_static("web_claude_ai"),
    );
    Ok(headers)
}
