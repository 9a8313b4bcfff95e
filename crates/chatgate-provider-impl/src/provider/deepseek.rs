mod capture;
mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use chatgate_capture::{CaptureConfig, CaptureLock, run_capture};
use chatgate_provider_core::{
    BrowserPage, ByteStream, CaptureOutcome, ChatInput, CredentialRecord, CredentialSlot,
    CredentialStore, ExpiryStatus, FramedTranslator, ModelInfo, Provider, ProviderError,
    SessionMap, StatusCallback, StreamTranslator, TranslateOptions, mask_secret,
};

use crate::client::shared_client;
use crate::pow::{PowChallenge, PowSolver};
use crate::provider::{ProviderSettings, token_expiry, user_agent_or_default};
use crate::upstream::{
    UpstreamCall, build_url, byte_stream, header_value, read_json, send_with_logging,
};

pub use capture::DeepSeekCapture;
pub use stream::DeepSeekClassifier;

pub const PROVIDER_NAME: &str = "deepseek";
const DISPLAY_NAME: &str = "DeepSeek";
const DEFAULT_BASE_URL: &str = "https://chat.deepseek.com";
const OWNED_BY: &str = "deepseek-web";
const MODELS: [&str; 4] = [
    "deepseek-chat",
    "deepseek-reasoner",
    "deepseek-chat-search",
    "deepseek-reasoner-search",
];
const CREATE_SESSION_PATH: &str = "/api/v0/chat_session/create";
const POW_CHALLENGE_PATH: &str = "/api/v0/chat/create_pow_challenge";
const COMPLETION_PATH: &str = "/api/v0/chat/completion";
/// Business codes DeepSeek returns with HTTP 200 when the bearer is missing or stale.
const AUTH_BUSINESS_CODES: [&str; 2] = ["40002", "40003"];

#[derive(Debug, Clone, Deserialize)]
pub struct DeepSeekCredential {
    #[serde(default)]
    pub cookie: String,
    pub bearer: String,
}

pub struct DeepSeekProvider {
    base_url: String,
    proxy: Option<String>,
    credential: CredentialSlot<DeepSeekCredential>,
    sessions: SessionMap,
    pow: PowSolver,
    capture_lock: CaptureLock,
    capture_config: CaptureConfig,
}

impl DeepSeekProvider {
    pub fn new(store: Arc<dyn CredentialStore>, settings: ProviderSettings) -> Self {
        Self {
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            proxy: settings.proxy,
            credential: CredentialSlot::new(PROVIDER_NAME, store),
            sessions: SessionMap::new(),
            pow: PowSolver::new(),
            capture_lock: CaptureLock::new(),
            capture_config: CaptureConfig::default(),
        }
    }

    /// Replaces the solver, e.g. to plug in a `DeepSeekHashV1` strategy.
    pub fn with_pow_solver(mut self, pow: PowSolver) -> Self {
        self.pow = pow;
        self
    }

    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture_config = config;
        self
    }

    async fn post_json(
        &self,
        op: &'static str,
        path: &str,
        headers: HeaderMap,
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let client = shared_client(self.proxy.as_deref())?;
        let request = client
            .post(build_url(&self.base_url, path))
            .headers(headers)
            .json(body);
        let call = UpstreamCall {
            provider: PROVIDER_NAME,
            op,
            method: "POST",
            path,
            model: None,
            is_stream: false,
        };
        let response = send_with_logging(call, request).await?;
        let body = read_json(response).await?;
        check_business_code(&body)?;
        Ok(body)
    }

    async fn pow_response(
        &self,
        credential: &DeepSeekCredential,
        user_agent: &str,
        target_path: &str,
    ) -> Result<String, ProviderError> {
        let headers = build_deepseek_headers(credential, user_agent)?;
        let body = self
            .post_json(
                "deepseek.pow_challenge",
                POW_CHALLENGE_PATH,
                headers,
                &json!({ "target_path": target_path }),
            )
            .await?;
        let challenge = PowChallenge::from_response(&body)?;
        debug!(
            provider = %PROVIDER_NAME,
            algorithm = %challenge.algorithm,
            difficulty = challenge.difficulty,
            "solving pow challenge"
        );
        Ok(self.pow.respond(&challenge, target_path).await?)
    }
}

#[async_trait]
impl Provider for DeepSeekProvider {
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
        model.starts_with("deepseek-")
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

    async fn create_session(&self) -> Result<String, ProviderError> {
        let loaded = self.credential.require().await?;
        let headers = build_deepseek_headers(&loaded.value, &loaded.record.user_agent)?;
        let body = self
            .post_json(
                "deepseek.create_session",
                CREATE_SESSION_PATH,
                headers,
                &json!({}),
            )
            .await?;
        ["/data/biz_data/id", "/data/biz_data/chat_session_id"]
            .iter()
            .filter_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
            .find(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("session id missing".to_string()))
    }

    async fn chat(&self, session_id: &str, input: &ChatInput) -> Result<ByteStream, ProviderError> {
        let loaded = self.credential.require().await?;
        let user_agent = loaded.record.user_agent.as_str();
        let pow = self
            .pow_response(&loaded.value, user_agent, COMPLETION_PATH)
            .await?;

        let flags = ModelFlags::from_model(&input.model);
        let mut headers = build_deepseek_headers(&loaded.value, user_agent)?;
        headers.insert("x-ds-pow-response", header_value(PROVIDER_NAME, &pow)?);
        let body = json!({
            "chat_session_id": session_id,
            "parent_message_id": Value::Null,
            "prompt": input.prompt,
            "ref_file_ids": [],
            "thinking_enabled": flags.thinking,
            "search_enabled": flags.search,
            "preempt": false,
        });

        let client = shared_client(self.proxy.as_deref())?;
        let request = client
            .post(build_url(&self.base_url, COMPLETION_PATH))
            .headers(headers)
            .json(&body);
        let call = UpstreamCall {
            provider: PROVIDER_NAME,
            op: "deepseek.chat",
            method: "POST",
            path: COMPLETION_PATH,
            model: Some(&input.model),
            is_stream: true,
        };
        let response = send_with_logging(call, request).await?;
        Ok(byte_stream(response))
    }

    fn translator(&self, options: TranslateOptions) -> Box<dyn StreamTranslator> {
        Box::new(FramedTranslator::new(DeepSeekClassifier::default(), options))
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
        let cookie = &loaded.value.cookie;
        Ok(Some(json!({
            "has_credentials": true,
            "captured_at": loaded.record.captured_at_rfc3339(),
            "has_cookie": !cookie.is_empty(),
            "cookie_count": cookie.split(';').filter(|pair| !pair.trim().is_empty()).count(),
            "has_bearer": !loaded.value.bearer.is_empty(),
            "bearer": mask_secret(&loaded.value.bearer),
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
            loaded.as_ref().map(|loaded| loaded.value.bearer.as_str()),
        ))
    }

    async fn capture_credentials(
        &self,
        page: Box<dyn BrowserPage>,
        status: Option<StatusCallback>,
    ) -> Result<CaptureOutcome, ProviderError> {
        let _running = self.capture_lock.try_begin(PROVIDER_NAME)?;
        let outcome = run_capture(
            DeepSeekCapture::default(),
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModelFlags {
    thinking: bool,
    search: bool,
}

impl ModelFlags {
    fn from_model(model: &str) -> Self {
        let search = model.ends_with("-search");
        let base = model.strip_suffix("-search").unwrap_or(model);
        Self {
            thinking: base.contains("reasoner"),
            search,
        }
    }
}

/// DeepSeek answers some failures with HTTP 200 and a non-zero `code`.
fn check_business_code(body: &Value) -> Result<(), ProviderError> {
    let code = match body.get("code") {
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::String(code)) => code.clone(),
        _ => return Ok(()),
    };
    if code == "0" {
        return Ok(());
    }
    let detail = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(ProviderError::UpstreamBusinessError { code, detail })
}

fn build_deepseek_headers(
    credential: &DeepSeekCredential,
    user_agent: &str,
) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, header_value(PROVIDER_NAME, &credential.cookie)?);
    headers.insert(
        USER_AGENT,
        header_value(PROVIDER_NAME, user_agent_or_default(user_agent))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    if !credential.bearer.is_empty() {
        headers.insert(
            AUTHORIZATION,
            header_value(PROVIDER_NAME, &format!("Bearer {}", credential.bearer))?,
        );
    }
    headers.insert(REFERER, HeaderValue::from_static("https://chat.deepseek.com/"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://chat.deepseek.com"));
    headers.insert("x-client-platform", HeaderValue::from_static("web"));
    headers.insert("x-client-version", HeaderValue::from_static("1.7.0"));
    headers.insert("x-app-version", HeaderValue::from_static("20241129.1"));
    headers.insert("x-client-locale", HeaderValue::from_static("zh_CN"));
    headers.insert("x-client-timezone-offset", HeaderValue::from_static("28800"));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chatgate_provider_core::collect;
    use chatgate_storage::MemoryCredentialStore;
    use serde_json::Map;
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::pow::{leading_zero_bits, target_bits};

    #[derive(Default)]
    struct Upstream {
        sessions: AtomicUsize,
        chat_bodies: Mutex<Vec<Value>>,
    }

    async fn create_session(
        State(upstream): State<Arc<Upstream>>,
        headers: AxumHeaders,
    ) -> Json<Value> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer tok") {
            return Json(json!({ "code": 40003, "msg": "INVALID_TOKEN", "data": null }));
        }
        let n = upstream.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({ "code": 0, "data": { "biz_data": { "id": format!("sess-{n}") } } }))
    }

    async fn pow_challenge(Json(body): Json<Value>) -> Json<Value> {
        Json(json!({
            "code": 0,
            "data": { "biz_data": { "challenge": {
                "algorithm": "sha256",
                "challenge": "abc",
                "salt": "salt",
                "difficulty": 6,
                "signature": "sig",
                "expire_at": 1_700_000_000_i64,
                "expire_after": 30000,
                "target_path": body["target_path"],
            } } }
        }))
    }

    async fn completion(
        State(upstream): State<Arc<Upstream>>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> Result<String, StatusCode> {
        let token = headers
            .get("x-ds-pow-response")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::BAD_REQUEST)?;
        let decoded: Value = STANDARD
            .decode(token)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(StatusCode::BAD_REQUEST)?;
        let answer = decoded["answer"].as_u64().ok_or(StatusCode::BAD_REQUEST)?;
        let digest = Sha256::digest(format!("saltabc{answer}").as_bytes());
        if leading_zero_bits(&digest) < target_bits(6)
            || decoded["target_path"] != COMPLETION_PATH
            || decoded["expire_after"] != 30000
        {
            return Err(StatusCode::FORBIDDEN);
        }
        upstream.chat_bodies.lock().unwrap().push(body);
        Ok(concat!(
            "data: {\"v\":{\"response\":{\"message_id\":2}}}\n\n",
            "data: {\"p\":\"response/thinking_content\",\"o\":\"APPEND\",\"v\":\"hmm\"}\n\n",
            "data: {\"p\":\"response/content\",\"o\":\"APPEND\",\"v\":\"He\"}\n\n",
            "data: {\"v\":\"llo\"}\n\n",
            "data: {\"p\":\"response/status\",\"v\":\"FINISHED\"}\n\n",
        )
        .to_string())
    }

    async fn spawn_upstream() -> (String, Arc<Upstream>) {
        let upstream = Arc::new(Upstream::default());
        let app = Router::new()
            .route(CREATE_SESSION_PATH, post(create_session))
            .route(POW_CHALLENGE_PATH, post(pow_challenge))
            .route(COMPLETION_PATH, post(completion))
            .with_state(upstream.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), upstream)
    }

    async fn provider_with(base_url: String, bearer: &str) -> DeepSeekProvider {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut payload = Map::new();
        payload.insert("cookie".into(), json!("ds_session_id=1; d_id=2"));
        payload.insert("bearer".into(), json!(bearer));
        store
            .save(PROVIDER_NAME, &CredentialRecord::new("UA/1", payload))
            .await
            .unwrap();
        DeepSeekProvider::new(
            store,
            ProviderSettings {
                base_url: Some(base_url),
                proxy: None,
            },
        )
    }

    #[tokio::test]
    async fn chat_solves_pow_and_streams_answer() {
        let (base_url, upstream) = spawn_upstream().await;
        let provider = provider_with(base_url, "tok").await;

        let session = provider.create_session().await.unwrap();
        assert_eq!(session, "sess-1");
        let input = ChatInput {
            model: "deepseek-reasoner-search".into(),
            prompt: "hi".into(),
        };
        let stream = provider.chat(&session, &input).await.unwrap();
        let collected = collect(stream, provider.translator(TranslateOptions::default()))
            .await
            .unwrap();
        assert_eq!(collected.content, "Hello");
        assert_eq!(collected.reasoning.as_deref(), Some("hmm"));

        let bodies = upstream.chat_bodies.lock().unwrap();
        assert_eq!(bodies[0]["chat_session_id"], "sess-1");
        assert_eq!(bodies[0]["thinking_enabled"], true);
        assert_eq!(bodies[0]["search_enabled"], true);
        assert_eq!(bodies[0]["prompt"], "hi");
    }

    #[tokio::test]
    async fn stale_bearer_is_a_session_failure() {
        let (base_url, _upstream) = spawn_upstream().await;
        let provider = provider_with(base_url, "stale").await;
        let err = provider.create_session().await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UpstreamBusinessError { ref code, .. } if code == "40003"
        ));
        assert!(provider.is_session_failure(&err));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let provider = DeepSeekProvider::new(
            Arc::new(MemoryCredentialStore::new()),
            ProviderSettings {
                base_url: Some("http://127.0.0.1:9".into()),
                proxy: None,
            },
        );
        assert!(matches!(
            provider.create_session().await.unwrap_err(),
            ProviderError::NoCredentials { .. }
        ));
        assert!(provider.credential_summary().await.unwrap().is_none());
    }

    #[test]
    fn model_suffixes_select_flags() {
        assert_eq!(
            ModelFlags::from_model("deepseek-chat"),
            ModelFlags {
                thinking: false,
                search: false
            }
        );
        assert_eq!(
            ModelFlags::from_model("deepseek-reasoner"),
            ModelFlags {
                thinking: true,
                search: false
            }
        );
        assert_eq!(
            ModelFlags::from_model("deepseek-chat-search"),
            ModelFlags {
                thinking: false,
                search: true
            }
        );
    }
}
