use std::time::Duration;

use chatgate_capture::{CapturePolicy, Readiness, cookie_header, find_cookie};
use chatgate_provider_core::{BrowserCookie, ObservedTraffic};
use serde_json::{Map, Value};

use crate::provider::cookie_value;

const START_URL: &str = "https://chat.qwen.ai/";
const COOKIE_URLS: &[&str] = &["https://chat.qwen.ai", "https://qwen.ai"];
const SIGNATURE_GRACE: Duration = Duration::from_secs(15);

/// The token is enough to talk to Qwen, but the `bx-ua` anti-bot signature
/// only shows up once the user sends a message, so a token-only capture waits
/// a short grace period for it before completing anyway.
#[derive(Debug, Default)]
pub struct QwenCapture {
    token: Option<String>,
    cookie: Option<String>,
    bx_ua: Option<String>,
    bx_umidtoken: Option<String>,
}

impl QwenCapture {
    fn note_token(&mut self, token: Option<&str>) {
        if self.token.is_none()
            && let Some(token) = token.map(str::trim).filter(|token| !token.is_empty())
        {
            self.token = Some(token.to_string());
        }
    }
}

impl CapturePolicy for QwenCapture {
    fn provider(&self) -> &'static str {
        super::PROVIDER_NAME
    }

    fn start_url(&self) -> &'static str {
        START_URL
    }

    fn cookie_urls(&self) -> &'static [&'static str] {
        COOKIE_URLS
    }

    fn observe_request(&mut self, request: &ObservedTraffic) {
        if !request.url.contains("qwen.ai") {
            return;
        }
        if let Some(bx_ua) = request.header("bx-ua") {
            self.bx_ua = Some(bx_ua.to_string());
        }
        if let Some(umid) = request.header("bx-umidtoken") {
            self.bx_umidtoken = Some(umid.to_string());
        }
        self.note_token(
            request
                .header("authorization")
                .and_then(|value| value.strip_prefix("Bearer ")),
        );
        self.note_token(
            request
                .header("cookie")
                .and_then(|cookie| cookie_value(cookie, "token")),
        );
    }

    fn observe_response(&mut self, response: &ObservedTraffic) {
        self.note_token(
            response
                .header("set-cookie")
                .and_then(|cookie| cookie_value(cookie, "token")),
        );
    }

    fn observe_cookies(&mut self, cookies: &[BrowserCookie]) {
        if !cookies.is_empty() {
            self.cookie = Some(cookie_header(cookies));
        }
        self.note_token(find_cookie(cookies, "token"));
    }

    fn readiness(&self) -> Readiness {
        match (&self.token, &self.bx_ua) {
            (Some(_), Some(_)) => Readiness::Ready,
            (Some(_), None) => Readiness::Partial,
            _ => Readiness::Waiting,
        }
    }

    fn grace_period(&self) -> Option<Duration> {
        Some(SIGNATURE_GRACE)
    }

    fn partial_warning(&self) -> String {
        "qwen token captured without the bx-ua signature; requests may be rejected until \
         credentials are captured again after sending a message"
            .to_string()
    }

    fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        for (key, value) in [
            ("cookie", &self.cookie),
            ("token", &self.token),
            ("bx_ua", &self.bx_ua),
            ("bx_umidtoken", &self.bx_umidtoken),
        ] {
            payload.insert(
                key.to_string(),
                Value::String(value.clone().unwrap_or_default()),
            );
        }
        payload
    }
}
