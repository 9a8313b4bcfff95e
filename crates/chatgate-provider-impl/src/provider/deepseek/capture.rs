use chatgate_capture::{CapturePolicy, Readiness, cookie_header};
use chatgate_provider_core::{BrowserCookie, ObservedTraffic};
use serde_json::{Map, Value};

const START_URL: &str = "https://chat.deepseek.com/";
const COOKIE_URLS: &[&str] = &["https://chat.deepseek.com", "https://deepseek.com"];

/// Needs the web bearer token and a logged-in cookie jar.
#[derive(Debug, Default)]
pub struct DeepSeekCapture {
    bearer: Option<String>,
    cookie: Option<String>,
}

impl CapturePolicy for DeepSeekCapture {
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
        if !request.url.contains("/api/v0/") {
            return;
        }
        if let Some(bearer) = request
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|bearer| !bearer.is_empty())
        {
            self.bearer = Some(bearer.to_string());
        }
    }

    fn observe_cookies(&mut self, cookies: &[BrowserCookie]) {
        let logged_in = cookies
            .iter()
            .any(|cookie| cookie.name == "ds_session_id" || cookie.name == "d_id")
            || cookies.len() > 3;
        if logged_in {
            self.cookie = Some(cookie_header(cookies));
        }
    }

    fn readiness(&self) -> Readiness {
        if self.bearer.is_some() && self.cookie.is_some() {
            Readiness::Ready
        } else {
            Readiness::Waiting
        }
    }

    fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(
            "cookie".to_string(),
            Value::String(self.cookie.clone().unwrap_or_default()),
        );
        payload.insert(
            "bearer".to_string(),
            Value::String(self.bearer.clone().unwrap_or_default()),
        );
        payload
    }
}
