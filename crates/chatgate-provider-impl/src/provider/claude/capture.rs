use chatgate_capture::{CapturePolicy, Readiness, cookie_header, find_cookie};
use chatgate_provider_core::{BrowserCookie, ObservedTraffic};
use serde_json::{Map, Value};

const START_URL: &str = "https://claude.ai/new";
const COOKIE_URLS: &[&str] = &["https://claude.ai"];

/// Completes as soon as the `sessionKey` cookie exists. The organization id
/// is picked up opportunistically and otherwise discovered at chat time.
#[derive(Debug, Default)]
pub struct ClaudeCapture {
    session_key: Option<String>,
    cookie: Option<String>,
    organization_id: Option<String>,
}

/// `/api/organizations/{uuid}/...` in a request path.
fn organization_in_url(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("/api/organizations/")?;
    let id = rest.split(['/', '?']).next()?;
    (!id.is_empty()).then_some(id)
}

impl CapturePolicy for ClaudeCapture {
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
        if self.organization_id.is_none()
            && let Some(organization) = organization_in_url(&request.url)
        {
            self.organization_id = Some(organization.to_string());
        }
    }

    fn observe_cookies(&mut self, cookies: &[BrowserCookie]) {
        let Some(session_key) = find_cookie(cookies, "sessionKey") else {
            return;
        };
        self.session_key = Some(session_key.to_string());
        self.cookie = Some(cookie_header(cookies));
        if let Some(organization) = find_cookie(cookies, "lastActiveOrg") {
            self.organization_id = Some(organization.to_string());
        }
    }

    fn readiness(&self) -> Readiness {
        if self.session_key.is_some() {
            Readiness::Ready
        } else {
            Readiness::Waiting
        }
    }

    fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        for (key, value) in [
            ("session_key", &self.session_key),
            ("cookie", &self.cookie),
            ("organization_id", &self.organization_id),
        ] {
            payload.insert(
                key.to_string(),
                Value::String(value.clone().unwrap_or_default()),
            );
        }
        payload
    }
}
