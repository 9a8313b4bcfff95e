mod capture;
mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream as futures_stream};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use chatgate_capture::{CaptureConfig, CaptureLock, run_capture};
use chatgate_provider_core::{
    BrowserPage, ByteStream, CaptureOutcome, ChatInput, CredentialRecord, CredentialSlot,
    CredentialStore, ExpiryStatus, FramedTranslator, ModelInfo, Provider, ProviderError,
    SessionMap, SessionPolicy, StatusCallback, StreamTranslator, TranslateOptions, mask_secret,
};

use crate::client::shared_client;
use crate::provider::{ProviderSettings, cookie_value, token_expiry, user_agent_or_default};
use crate::upstream::{UpstreamCall, build_url, byte_stream, header_value, send_with_logging};

pub use capture::QwenCapture;
pub use stream::QwenClassifier;

pub const PROVIDER_NAME: &str = "qwen";
const DISPLAY_NAME: &str = "Qwen";
const DEFAULT_BASE_URL: &str = "https://chat.qwen.ai";
const OWNED_BY: &str = "qwen-web";
const MODELS: [&str; 5] = [
    "qwen3.5-plus",
    "qwen-max",
    "qwen-plus",
    "qwen-turbo",
    "qwq-plus",
];
const MODEL_PREFIXES: [&str; 2] = ["qwen", "qwq"];
const THINKING_MODELS: [&str; 3] = ["qwq", "qwen3.5", "qwen-max"];
const COMPLETIONS_PATH: &str = "/api/v2/chat/completions";
const AUTH_BUSINESS_CODES: [&str; 2] = ["Unauthorized", "Not_Login"];

#[derive(Debug, Clone, Deserialize)]
pub struct QwenCredential {
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, alias = "bxUa")]
    pub bx_ua: String,
    #[serde(default, alias = "bxUmidtoken")]
    pub bx_umidtoken: String,
}

impl QwenCredential {
    /// The bearer token, falling back to the `token` cookie.
    pub fn bearer(&self) -> Option<&str> {
        Some(self.token.as_str())
            .filter(|token| !token.is_empty())
            .or_else(|| cookie_value(&self.cookie, "token"))
    }
}

pub struct QwenProvider {
    base_url: String,
    proxy: Option<String>,
    credential: CredentialSlot<QwenCredential>,
    sessions: SessionMap,
    capture_lock: CaptureLock,
    capture_config: CaptureConfig,
}

impl QwenProvider {
    pub fn new(store: Arc<dyn CredentialStore>, settings: ProviderSettings) -> Self {
        Self {
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            proxy: settings.proxy,
            credential: CredentialSlot::new(PROVIDER_NAME, store),
            sessions: SessionMap::new(),
            capture_lock: CaptureLock::new(),
            capture_config: CaptureConfig::default(),
        }
    }

    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture_config = config;
        self
    }
}

#[async_trait]
impl Provider for QwenProvider {
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
            .collect()
    }

    fn matches_model(&self, model: &str) -> bool {
        MODEL_PREFIXES.iter().any(|prefix| model.starts_with(prefix))
    }

    fn session_policy(&self) -> SessionPolicy {
        SessionPolicy::PerRequest
    }

    fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    fn is_session_failure(&self, err: &ProviderError) -> bool {
        match err {
            ProviderError::UpstreamBusinessError { code, .. } => {
                AUTH_BUSINESS_CODES.contains(&code.as_str())
            }
            other => other.is_auth_class(),
        }
    }

    /// Qwen conversations are addressed by a client-chosen id.
    async fn create_session(&self) -> Result<String, ProviderError> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn chat(&self, session_id: &str, input: &ChatInput) -> Result<ByteStream, ProviderError> {
        let loaded = self.credential.require().await?;
        let credential = &loaded.value;
        if credential.bx_ua.is_empty() {
            warn!(
                provider = %PROVIDER_NAME,
                "bx-ua signature missing, upstream may reject the request"
            );
        }
        let headers = build_qwen_headers(credential, &loaded.record.user_agent)?;
        let thinking = THINKING_MODELS
            .iter()
            .any(|marker| input.model.contains(marker));
        let body = build_chat_body(session_id, &input.model, &input.prompt, thinking, true);
        let path = format!("{COMPLETIONS_PATH}?chat_id={session_id}");

        let client = shared_client(self.proxy.as_deref())?;
        let request = client
            .post(build_url(&self.base_url, &path))
            .headers(headers)
            .json(&body);
        let call = UpstreamCall {
            provider: PROVIDER_NAME,
            op: "qwen.chat",
            method: "POST",
            path: &path,
            model: Some(&input.model),
            is_stream: true,
        };
        let response = send_with_logging(call, request).await?;
        reject_business_error(byte_stream(response)).await
    }

    fn translator(&self, options: TranslateOptions) -> Box<dyn StreamTranslator> {
        Box::new(FramedTranslator::new(QwenClassifier, options))
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
            "has_cookie": !credential.cookie.is_empty(),
            "cookie_count": credential.cookie.split(';').filter(|pair| !pair.trim().is_empty()).count(),
            "has_token": credential.bearer().is_some(),
            "token": credential.bearer().map(mask_secret),
            "has_bx_ua": !credential.bx_ua.is_empty(),
            "has_bx_umidtoken": !credential.bx_umidtoken.is_empty(),
        })))
    }

    async fn save_credentials(&self, record: CredentialRecord) -> Result<(), ProviderError> {
        self.credential.replace(record).await?;
        self.sessions.clear();
        Ok(())
    }

    async fn clear_credentials(&self) -> Result<bool, ProviderError> {
        self.sessions.clear();
        self.credential.clear().await
    }

    async fn check_expiry(&self) -> Result<ExpiryStatus, ProviderError> {
        let loaded = self.credential.current().await?;
        Ok(token_expiry(
            loaded.as_ref().and_then(|loaded| loaded.value.bearer()),
        ))
    }

    async fn capture_credentials(
        &self,
        page: Box<dyn BrowserPage>,
        status: Option<StatusCallback>,
    ) -> Result<CaptureOutcome, ProviderError> {
        let _running = self.capture_lock.try_begin(PROVIDER_NAME)?;
        let outcome = run_capture(
            QwenCapture::default(),
            page,
            self.credential.store().as_ref(),
            status,
            self.capture_config,
        )
        .await?;
        self.credential.adopt(outcome.record.clone())?;
        self.sessions.clear();
        Ok(outcome)
    }
}

fn build_chat_body(chat_id: &str, model: &str, prompt: &str, thinking: bool, search: bool) -> Value {
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    json!({
        "stream": true,
        "version": "2.1",
        "incremental_output": true,
        "chat_id": chat_id,
        "chat_mode": "normal",
        "model": model,
        "parent_id": Value::Null,
        "messages": [{
            "fid": Uuid::new_v4().to_string(),
            "parentId": Value::Null,
            "childrenIds": [Uuid::new_v4().to_string()],
            "role": "user",
            "content": prompt,
            "user_action": "chat",
            "files": [],
            "timestamp": timestamp,
            "models": [model],
            "chat_type": "t2t",
            "feature_config": {
                "thinking_enabled": thinking,
                "output_schema": "phase",
                "research_mode": "normal",
                "auto_thinking": thinking,
                "thinking_format": "summary",
                "auto_search": search,
            },
            "extra": { "meta": { "subChatType": "t2t" } },
            "sub_chat_type": "t2t",
            "parent_id": Value::Null,
        }],
        "timestamp": timestamp + 1,
    })
}

fn build_qwen_headers(
    credential: &QwenCredential,
    user_agent: &str,
) -> Result<HeaderMap, ProviderError> {
    let token = credential
        .bearer()
        .ok_or_else(|| ProviderError::InvalidCredentials {
            provider: PROVIDER_NAME.to_string(),
            message: "missing token".to_string(),
        })?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if !credential.cookie.is_empty() {
        headers.insert(COOKIE, header_value(PROVIDER_NAME, &credential.cookie)?);
    }
    headers.insert(
        USER_AGENT,
        header_value(PROVIDER_NAME, user_agent_or_default(user_agent))?,
    );
    headers.insert(
        AUTHORIZATION,
        header_value(PROVIDER_NAME, &format!("Bearer {token}"))?,
    );
    headers.insert(ORIGIN, HeaderValue::from_static("https://chat.qwen.ai"));
    headers.insert(REFERER, HeaderValue::from_static("https://chat.qwen.ai/"));
    headers.insert("source", HeaderValue::from_static("web"));
    headers.insert(
        "x-request-id",
        header_value(PROVIDER_NAME, &Uuid::new_v4().to_string())?,
    );
    if !credential.bx_ua.is_empty() {
        headers.insert("bx-ua", header_value(PROVIDER_NAME, &credential.bx_ua)?);
    }
    if !credential.bx_umidtoken.is_empty() {
        headers.insert(
            "bx-umidtoken",
            header_value(PROVIDER_NAME, &credential.bx_umidtoken)?,
        );
    }
    Ok(headers)
}

/// Qwen may answer 200 with a JSON error object instead of an event stream.
/// The first chunk is inspected and, when it is not an error, stitched back
/// in front of the unread remainder.
pub(crate) async fn reject_business_error(mut stream: ByteStream) -> Result<ByteStream, ProviderError> {
    let first = loop {
        match stream.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => break chunk,
            Some(Err(err)) => return Err(err),
            None => return Err(ProviderError::EmptyUpstreamResponse),
        }
    };

    let text = String::from_utf8_lossy(&first);
    if text.trim_start().starts_with('{')
        && let Ok(body) = serde_json::from_str::<Value>(text.trim())
        && body.get("success") == Some(&Value::Bool(false))
    {
        let code = match body.pointer("/data/code") {
            Some(Value::String(code)) => code.clone(),
            Some(Value::Number(code)) => code.to_string(),
            _ => "unknown".to_string(),
        };
        let detail = ["/data/details", "/data/message"]
            .iter()
            .filter_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
            .find(|detail| !detail.is_empty())
            .unwrap_or("unknown error")
            .to_string();
        warn!(provider = %PROVIDER_NAME, code = %code, detail = %detail, "upstream business error");
        return Err(ProviderError::UpstreamBusinessError { code, detail });
    }

    Ok(Box::pin(
        futures_stream::once(async move { Ok(first) }).chain(stream),
    ))
}
